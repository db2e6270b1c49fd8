//! Intent resolution: question → query plan

pub mod resolver;
pub mod types;

pub use resolver::*;
pub use types::*;
