//! Privacy helpers

pub mod pii;

pub use pii::*;
