pub mod convert;
pub mod graph;
pub mod pipelines;
pub mod run_log;

pub use graph::{
    Branch, BranchStep, Completed, FlowEngine, FlowState, Next, RetryStatus, RunState, Step,
    StepContext, StepResult, Transition,
};
pub use pipelines::{Capabilities, DocumentInput, Invocation, Pipelines};
pub use run_log::RunLogger;
