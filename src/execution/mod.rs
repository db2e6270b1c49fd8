//! Query execution: executor contract, Postgres executor and row sets

pub mod executor;
pub mod postgres;
pub mod result;

pub use executor::*;
pub use postgres::PgQueryExecutor;
pub use result::*;
