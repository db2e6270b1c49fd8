//! Natural-language question answering over tenant data.
//!
//! A question is resolved into a query plan against a semantic registry,
//! compiled to parameterised SQL and executed (metrics mode). When that path
//! cannot answer, the model writes SQL directly against the database schema
//! (SQL mode), which is validated before it runs. Results are narrated back
//! to the user and every turn is recorded for evaluation.

pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod eval;
pub mod execution;
pub mod intent;
pub mod llm;
pub mod narrative;
pub mod observability;
pub mod pipeline;
pub mod privacy;
pub mod resilience;
pub mod sql_mode;

pub use catalog::{RegistryProvider, SchemaProvider, StaticRegistryProvider};
pub use config::AppConfig;
pub use error::{NlqError, Result};
pub use eval::{EvalSink, JsonlEvalSink, MemoryEvalSink};
pub use execution::{QueryExecutor, QueryRunner};
pub use intent::{IntentContext, QueryPlan};
pub use llm::LlmAdapter;
pub use pipeline::{ExecutionMode, Pipeline, PipelineDeps, PipelineOutput, RunOptions};
