//! Evaluation capture

pub mod sink;

pub use sink::*;
