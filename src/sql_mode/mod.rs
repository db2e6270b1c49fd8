//! SQL-mode fallback: generation, validation, feedback and retry

pub mod feedback;
pub mod generator;
pub mod retry;
pub mod validator;

pub use feedback::*;
pub use generator::*;
pub use retry::*;
pub use validator::*;
