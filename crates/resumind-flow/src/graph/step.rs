use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use resumind_core::config::RunConfig;
use resumind_core::failure::{Failure, FailureKind};
use resumind_core::types::RunId;

use super::state::{FlowState, RunState};

/// What a step returns: a partial update, or a classified failure.
pub type StepResult<U> = std::result::Result<U, Failure>;

/// Per-run context handed to every step.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: RunId,
    /// Resolved once at run start and never mutated.
    pub config: Arc<RunConfig>,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: RunId::new(),
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Await a capability call under the per-call timeout. A timed-out call
    /// fails with `on_timeout`.
    pub async fn call<T, F>(&self, fut: F, on_timeout: FailureKind) -> StepResult<T>
    where
        F: Future<Output = StepResult<T>>,
    {
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Failure::new(
                on_timeout,
                format!("call exceeded {}s timeout", limit.as_secs()),
            )),
        }
    }
}

/// A sequential unit of work.
pub trait Step<S: FlowState>: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        state: &'a RunState<S>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<S::Update>>;
}

/// A unit of work run as one fan-out branch. Sees only its branch input.
pub trait BranchStep<S: FlowState>: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        input: S::BranchInput,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<S::Update>>;
}

/// A registered graph node.
pub enum Node<S: FlowState> {
    Sequential(Arc<dyn Step<S>>),
    Branch(Arc<dyn BranchStep<S>>),
}

impl<S: FlowState> Node<S> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sequential(_) => "sequential step",
            Self::Branch(_) => "branch step",
        }
    }
}

impl<S: FlowState> Clone for Node<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Sequential(s) => Self::Sequential(Arc::clone(s)),
            Self::Branch(b) => Self::Branch(Arc::clone(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumind_core::failure::ModelCause;
    use std::time::Duration;

    #[tokio::test]
    async fn test_call_passes_result_through() {
        let ctx = StepContext::new(RunConfig::default());
        let out: StepResult<u32> = ctx
            .call(async { Ok(7) }, FailureKind::Extraction(ModelCause::Timeout))
            .await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out_with_given_kind() {
        let ctx = StepContext::new(RunConfig {
            timeout_secs: 1,
            ..RunConfig::default()
        });
        let out: StepResult<()> = ctx
            .call(
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                FailureKind::Extraction(ModelCause::Timeout),
            )
            .await;
        let err = out.unwrap_err();
        assert_eq!(err.kind, FailureKind::Extraction(ModelCause::Timeout));
        assert!(err.is_retryable());
    }
}
