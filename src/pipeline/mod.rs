//! Pipeline orchestration: stage machine, deadline and output

pub mod deadline;
pub mod orchestrator;
pub mod output;
pub mod state;

pub use deadline::Deadline;
pub use orchestrator::*;
pub use output::*;
pub use state::Stage;
