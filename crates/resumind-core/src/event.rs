use serde::Serialize;

use crate::types::RunId;

/// Progress notifications published by the workflow engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A run began executing its entry step.
    RunStarted {
        run_id: RunId,
        pipeline: String,
        scope: String,
    },
    /// A sequential step is about to run.
    StepStarted {
        run_id: RunId,
        step: String,
        attempt: u32,
    },
    /// A sequential step returned.
    StepFinished {
        run_id: RunId,
        step: String,
        elapsed_ms: u64,
        failure: Option<String>,
    },
    /// The retry controller is sending the run back to a failed step.
    RetryScheduled {
        run_id: RunId,
        step: String,
        attempt: u32,
        ceiling: u32,
        backoff_ms: u64,
        reason: String,
    },
    /// The retry ceiling was reached; the last failure stays in state.
    RetryExhausted {
        run_id: RunId,
        step: String,
        attempts: u32,
        reason: String,
    },
    /// Parallel branches were spawned.
    FanOutStarted {
        run_id: RunId,
        origin: String,
        branches: Vec<String>,
    },
    /// One branch completed (in completion order, not merge order).
    BranchFinished {
        run_id: RunId,
        step: String,
        index: usize,
        failure: Option<String>,
    },
    /// Every branch completed and contributions were merged.
    FanOutJoined {
        run_id: RunId,
        origin: String,
        succeeded: usize,
        failed: usize,
    },
    /// The run reached a terminal marker.
    RunComplete {
        run_id: RunId,
        steps: usize,
        elapsed_ms: u64,
        error: Option<String>,
    },
}

impl FlowEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepFinished { run_id, .. }
            | Self::RetryScheduled { run_id, .. }
            | Self::RetryExhausted { run_id, .. }
            | Self::FanOutStarted { run_id, .. }
            | Self::BranchFinished { run_id, .. }
            | Self::FanOutJoined { run_id, .. }
            | Self::RunComplete { run_id, .. } => run_id,
        }
    }

    /// Verbosity tier used by run logging: 1 = run summary, 2 = steps, 3 = branches.
    pub fn level(&self) -> u8 {
        match self {
            Self::RunStarted { .. } | Self::RunComplete { .. } => 1,
            Self::BranchFinished { .. } => 3,
            _ => 2,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: FlowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
