//! Plan compilation

pub mod plan_compiler;

pub use plan_compiler::*;
