//! Cache layers with a "stale but usable" read path

pub mod response;
pub mod result;
pub mod stale;

pub use response::*;
pub use result::*;
pub use stale::*;
