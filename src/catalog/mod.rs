//! Catalog adapters: semantic registry and raw database schema

pub mod registry;
pub mod schema;

pub use registry::*;
pub use schema::*;
