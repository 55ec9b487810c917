//! Workflow engine: a directed graph of steps over a typed run state.
//!
//! Each step reads the [`RunState`] and returns a partial update that the
//! engine merges into it. After every step a [`Transition`] picks what runs
//! next: a single step, a fan-out of isolated branches joined in assignment
//! order, or the terminal marker. One step per graph may be designated for
//! bounded retries; the [`retry`] controller decides between re-running it
//! and giving up.
//!
//! Step failures are values recorded in the state's error slot. The engine
//! only returns `Err` for a malformed graph, a runaway run or cancellation.

pub mod executor;
pub mod retry;
pub mod state;
pub mod step;
pub mod transition;

pub use executor::{FlowEngine, FlowEngineBuilder};
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{FlowState, RetryLedger, RetryStatus, RunState};
pub use step::{BranchStep, Node, Step, StepContext, StepResult};
pub use transition::{Branch, Completed, Next, Transition};
