//! Narration of results: generator, markdown fallback parser and the
//! empty-result template

pub mod empty;
pub mod generator;
pub mod markdown;
pub mod types;

pub use empty::*;
pub use generator::*;
pub use markdown::*;
pub use types::*;
