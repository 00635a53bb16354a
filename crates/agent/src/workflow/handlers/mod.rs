//! One handler per workflow stage, keyed on the status it reacts to.

mod analyze;
mod checkpoint;
mod execute;
mod failure;
mod split;
mod summarize;

pub use analyze::AnalyzeHandler;
pub use checkpoint::CheckpointHandler;
pub use execute::{TaskExecuteHandler, MAX_TOOL_ROUNDS};
pub use failure::FailureHandler;
pub use split::TaskSplitHandler;
pub use summarize::SummarizeHandler;
