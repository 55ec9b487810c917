use std::fmt;
use std::hash::Hash;

use serde::Serialize;

use resumind_core::failure::Failure;
use resumind_core::types::RunId;

/// Typed slots threaded through one run.
///
/// A state type also names its step vocabulary and the narrow input that
/// fan-out branches receive, so a whole graph is checked against one type.
pub trait FlowState: Clone + fmt::Debug + Serialize + Send + Sync + 'static {
    /// Partial update returned by a step.
    type Update: Send + 'static;
    /// Step names. An enum per pipeline keeps transition tables exhaustive.
    type Step: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    /// What a fan-out branch sees instead of the full state.
    type BranchInput: Send + 'static;

    /// Merge an update. Single-valued slots are replaced by a returned value;
    /// accumulating slots are appended to.
    fn apply(&mut self, update: Self::Update);
}

/// Lifecycle of the designated retryable step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStatus {
    #[default]
    Fresh,
    Retrying,
    Exhausted,
}

/// Attempt counter for the designated step. Informational once the step
/// succeeds; never reset within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryLedger {
    pub attempts: u32,
    pub status: RetryStatus,
}

/// Everything the engine owns for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState<S: FlowState> {
    pub run_id: RunId,
    pub slots: S,
    /// Last classified step failure, if any.
    pub error: Option<Failure>,
    pub retry: RetryLedger,
    /// Step names in execution order. Fan-out branches appear in assignment order.
    pub trace: Vec<String>,
}

impl<S: FlowState> RunState<S> {
    pub fn new(run_id: RunId, slots: S) -> Self {
        Self {
            run_id,
            slots,
            error: None,
            retry: RetryLedger::default(),
            trace: Vec::new(),
        }
    }

    /// The user-visible error string, if the run failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|f| f.to_string())
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// How many times `step` ran in this run.
    pub fn runs_of(&self, step: S::Step) -> usize {
        let name = step.to_string();
        self.trace.iter().filter(|s| **s == name).count()
    }
}
