//! Runner module: the scripted start / query / analyze / stop workflow.

mod analysis;
mod report;
mod workflow;

pub use analysis::*;
pub use report::*;
pub use workflow::*;
