//! Resilience primitives shared by every LLM call: circuit breaking, request
//! coalescing, prompt-size guarding and adaptive backoff.

pub mod backoff;
pub mod circuit_breaker;
pub mod coalescer;
pub mod prompt_guard;

pub use backoff::*;
pub use circuit_breaker::*;
pub use coalescer::*;
pub use prompt_guard::*;
