use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use resumind_core::config::EngineConfig;
use resumind_core::error::{Result, ResumindError};
use resumind_core::event::{EventBus, FlowEvent};
use resumind_core::failure::Failure;
use resumind_llm::retry::calculate_backoff;

use super::retry::{RetryDecision, RetryPolicy};
use super::state::{FlowState, RunState};
use super::step::{BranchStep, Node, Step, StepContext};
use super::transition::{Branch, Completed, Next, Transition};

/// Executes a step graph over one run state.
///
/// Starting from the entry step, the engine runs a step, merges its update,
/// consults the retry controller if the designated step failed, then asks
/// the transition policy where to go. Fan-outs run every branch to
/// completion and merge contributions in branch-assignment order.
pub struct FlowEngine<S: FlowState> {
    name: String,
    nodes: HashMap<S::Step, Node<S>>,
    entry: S::Step,
    transition: Arc<dyn Transition<S>>,
    retry_step: Option<S::Step>,
    limits: EngineConfig,
    events: Option<Arc<EventBus>>,
}

/// Assembles a [`FlowEngine`] and validates its shape.
pub struct FlowEngineBuilder<S: FlowState> {
    name: String,
    nodes: HashMap<S::Step, Node<S>>,
    entry: S::Step,
    transition: Arc<dyn Transition<S>>,
    retry_step: Option<S::Step>,
    limits: EngineConfig,
    events: Option<Arc<EventBus>>,
}

impl<S: FlowState> FlowEngineBuilder<S> {
    /// Register a sequential step.
    pub fn step(mut self, name: S::Step, step: impl Step<S>) -> Self {
        self.nodes.insert(name, Node::Sequential(Arc::new(step)));
        self
    }

    /// Register a step that only runs as a fan-out branch.
    pub fn branch(mut self, name: S::Step, step: impl BranchStep<S>) -> Self {
        self.nodes.insert(name, Node::Branch(Arc::new(step)));
        self
    }

    /// Designate the step whose failures go through the retry controller.
    pub fn retry(mut self, name: S::Step) -> Self {
        self.retry_step = Some(name);
        self
    }

    pub fn limits(mut self, limits: EngineConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Check that the entry and retry steps are registered sequential steps.
    pub fn build(self) -> Result<FlowEngine<S>> {
        match self.nodes.get(&self.entry) {
            None => return Err(ResumindError::MissingEntry(self.entry.to_string())),
            Some(Node::Branch(_)) => {
                return Err(ResumindError::StepKindMismatch {
                    step: self.entry.to_string(),
                    expected: "sequential step",
                })
            }
            Some(Node::Sequential(_)) => {}
        }

        if let Some(step) = self.retry_step {
            match self.nodes.get(&step) {
                None => return Err(ResumindError::UnknownStep(step.to_string())),
                Some(Node::Branch(_)) => {
                    return Err(ResumindError::StepKindMismatch {
                        step: step.to_string(),
                        expected: "sequential step",
                    })
                }
                Some(Node::Sequential(_)) => {}
            }
        }

        Ok(FlowEngine {
            name: self.name,
            nodes: self.nodes,
            entry: self.entry,
            transition: self.transition,
            retry_step: self.retry_step,
            limits: self.limits,
            events: self.events,
        })
    }
}

impl<S: FlowState> FlowEngine<S> {
    pub fn builder(
        name: impl Into<String>,
        entry: S::Step,
        transition: impl Transition<S>,
    ) -> FlowEngineBuilder<S> {
        FlowEngineBuilder {
            name: name.into(),
            nodes: HashMap::new(),
            entry,
            transition: Arc::new(transition),
            retry_step: None,
            limits: EngineConfig::default(),
            events: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> S::Step {
        self.entry
    }

    /// Run the graph from the entry step until the terminal marker.
    ///
    /// Step failures end up in the returned state's error slot. `Err` means
    /// the graph itself is malformed, the step limit was hit, or the run was
    /// cancelled through `ctx.cancel`.
    pub async fn execute(&self, slots: S, ctx: &StepContext) -> Result<RunState<S>> {
        let start = Instant::now();
        let mut state = RunState::new(ctx.run_id.clone(), slots);
        let retry_policy = RetryPolicy::new(ctx.config.max_retries);
        let mut executions = 0usize;
        // Retries are bounded by the retry ceiling, not the step budget.
        let mut retrying = false;
        let mut origin = self.entry;
        let mut next = Next::Step(self.entry);

        info!(
            pipeline = %self.name,
            run_id = %ctx.run_id,
            scope = %ctx.config.user_id,
            "Starting run"
        );
        self.publish(FlowEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            pipeline: self.name.clone(),
            scope: ctx.config.user_id.clone(),
        });

        loop {
            let completed = match next {
                Next::End => break,
                Next::Step(step) => {
                    if !std::mem::take(&mut retrying) {
                        executions = self.count_executions(executions, 1)?;
                    }
                    let node = self.sequential(step)?;
                    self.run_step(step, node, &mut state, ctx).await?;
                    origin = step;

                    if self.retry_step == Some(step) {
                        if let Some(failure) = state.error.clone() {
                            let decision = retry_policy.decide(&state.retry, &failure);
                            RetryPolicy::record(&mut state.retry, decision);
                            let again = self
                                .on_retry_decision(step, decision, &failure, &retry_policy, &mut state, ctx)
                                .await?;
                            if again {
                                retrying = true;
                                next = Next::Step(step);
                                continue;
                            }
                        }
                    }
                    Completed::Step(step)
                }
                Next::FanOut(branches) => {
                    executions = self.count_executions(executions, branches.len())?;
                    self.fan_out(origin, branches, &mut state, ctx).await?;
                    Completed::Join { origin }
                }
            };

            next = self.transition.next(completed, &state);
            debug!(run_id = %ctx.run_id, ?completed, "Transition evaluated");
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &state.error {
            Some(failure) => warn!(
                pipeline = %self.name,
                run_id = %ctx.run_id,
                elapsed_ms,
                error = %failure,
                "Run finished with error"
            ),
            None => info!(pipeline = %self.name, run_id = %ctx.run_id, elapsed_ms, "Run complete"),
        }
        self.publish(FlowEvent::RunComplete {
            run_id: ctx.run_id.clone(),
            steps: state.trace.len(),
            elapsed_ms,
            error: state.error_message(),
        });

        Ok(state)
    }

    fn publish(&self, event: FlowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    fn count_executions(&self, so_far: usize, more: usize) -> Result<usize> {
        let total = so_far + more;
        if total > self.limits.max_steps {
            error!(pipeline = %self.name, limit = self.limits.max_steps, "Step limit exceeded");
            return Err(ResumindError::StepLimitExceeded(self.limits.max_steps));
        }
        Ok(total)
    }

    fn node(&self, step: S::Step) -> Result<&Node<S>> {
        self.nodes
            .get(&step)
            .ok_or_else(|| ResumindError::UnknownStep(step.to_string()))
    }

    fn sequential(&self, step: S::Step) -> Result<Arc<dyn Step<S>>> {
        match self.node(step)? {
            Node::Sequential(s) => Ok(Arc::clone(s)),
            other => Err(ResumindError::StepKindMismatch {
                step: step.to_string(),
                expected: mismatch(other),
            }),
        }
    }

    async fn run_step(
        &self,
        step: S::Step,
        node: Arc<dyn Step<S>>,
        state: &mut RunState<S>,
        ctx: &StepContext,
    ) -> Result<()> {
        let attempt = if self.retry_step == Some(step) {
            state.retry.attempts + 1
        } else {
            1
        };
        debug!(run_id = %ctx.run_id, step = %step, attempt, "Running step");
        self.publish(FlowEvent::StepStarted {
            run_id: ctx.run_id.clone(),
            step: step.to_string(),
            attempt,
        });

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                warn!(run_id = %ctx.run_id, step = %step, "Run cancelled");
                return Err(ResumindError::Cancelled);
            }
            result = node.run(state, ctx) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        state.trace.push(step.to_string());

        let failure = match result {
            Ok(update) => {
                state.slots.apply(update);
                debug!(run_id = %ctx.run_id, step = %step, elapsed_ms, "Step succeeded");
                None
            }
            Err(failure) => {
                warn!(run_id = %ctx.run_id, step = %step, elapsed_ms, error = %failure, "Step failed");
                let message = failure.to_string();
                state.error = Some(failure);
                Some(message)
            }
        };

        self.publish(FlowEvent::StepFinished {
            run_id: ctx.run_id.clone(),
            step: step.to_string(),
            elapsed_ms,
            failure,
        });
        Ok(())
    }

    /// Apply a retry decision. Returns true when the step should run again.
    async fn on_retry_decision(
        &self,
        step: S::Step,
        decision: RetryDecision,
        failure: &Failure,
        policy: &RetryPolicy,
        state: &mut RunState<S>,
        ctx: &StepContext,
    ) -> Result<bool> {
        match decision {
            RetryDecision::Retry { attempt } => {
                state.error = None;
                let backoff = if self.limits.retry_backoff_ms > 0 {
                    calculate_backoff(
                        attempt - 1,
                        self.limits.retry_backoff_ms,
                        self.limits.max_backoff_ms,
                    )
                } else {
                    Duration::ZERO
                };
                info!(
                    run_id = %ctx.run_id,
                    step = %step,
                    attempt,
                    ceiling = policy.ceiling,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying step"
                );
                self.publish(FlowEvent::RetryScheduled {
                    run_id: ctx.run_id.clone(),
                    step: step.to_string(),
                    attempt,
                    ceiling: policy.ceiling,
                    backoff_ms: backoff.as_millis() as u64,
                    reason: failure.to_string(),
                });
                if !backoff.is_zero() {
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => return Err(ResumindError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Ok(true)
            }
            RetryDecision::Exhausted => {
                warn!(
                    run_id = %ctx.run_id,
                    step = %step,
                    attempts = state.retry.attempts,
                    "Retry ceiling reached"
                );
                self.publish(FlowEvent::RetryExhausted {
                    run_id: ctx.run_id.clone(),
                    step: step.to_string(),
                    attempts: state.retry.attempts,
                    reason: failure.to_string(),
                });
                Ok(false)
            }
            RetryDecision::NotRetryable => {
                debug!(run_id = %ctx.run_id, step = %step, kind = %failure.kind, "Failure is not retryable");
                Ok(false)
            }
        }
    }

    async fn fan_out(
        &self,
        origin: S::Step,
        branches: Vec<Branch<S::Step, S::BranchInput>>,
        state: &mut RunState<S>,
        ctx: &StepContext,
    ) -> Result<()> {
        if branches.len() > self.limits.max_fan_out {
            return Err(ResumindError::FanOutTooWide {
                requested: branches.len(),
                limit: self.limits.max_fan_out,
            });
        }

        // Resolve every branch before spawning any so a bad graph runs nothing.
        let mut runnable = Vec::with_capacity(branches.len());
        for branch in branches {
            match self.node(branch.step)? {
                Node::Branch(b) => runnable.push((branch.step, Arc::clone(b), branch.input)),
                other => {
                    return Err(ResumindError::StepKindMismatch {
                        step: branch.step.to_string(),
                        expected: mismatch(other),
                    })
                }
            }
        }

        let names: Vec<String> = runnable.iter().map(|(s, _, _)| s.to_string()).collect();
        info!(run_id = %ctx.run_id, origin = %origin, branches = ?names, "Fanning out");
        self.publish(FlowEvent::FanOutStarted {
            run_id: ctx.run_id.clone(),
            origin: origin.to_string(),
            branches: names,
        });

        let futs: Vec<_> = runnable
            .into_iter()
            .enumerate()
            .map(|(index, (step, node, input))| async move {
                let result = node.run(input, ctx).await;
                if let Err(e) = &result {
                    warn!(run_id = %ctx.run_id, step = %step, index, error = %e, "Branch failed");
                }
                self.publish(FlowEvent::BranchFinished {
                    run_id: ctx.run_id.clone(),
                    step: step.to_string(),
                    index,
                    failure: result.as_ref().err().map(|e| e.to_string()),
                });
                (step, result)
            })
            .collect();

        let results = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                warn!(run_id = %ctx.run_id, origin = %origin, "Run cancelled during fan-out");
                return Err(ResumindError::Cancelled);
            }
            results = futures::future::join_all(futs) => results,
        };

        // join_all yields in input order, which is the assignment order.
        let total = results.len();
        let mut failures = Vec::new();
        for (step, result) in results {
            state.trace.push(step.to_string());
            match result {
                Ok(update) => state.slots.apply(update),
                Err(failure) => failures.push((step.to_string(), failure)),
            }
        }

        let failed = failures.len();
        if !failures.is_empty() {
            state.error = Some(Failure::aggregate(&failures, total));
        }
        debug!(run_id = %ctx.run_id, origin = %origin, total, failed, "Fan-out joined");
        self.publish(FlowEvent::FanOutJoined {
            run_id: ctx.run_id.clone(),
            origin: origin.to_string(),
            succeeded: total - failed,
            failed,
        });
        Ok(())
    }
}

/// The kind a step was expected to be, given the kind it actually is.
fn mismatch<S: FlowState>(actual: &Node<S>) -> &'static str {
    match actual {
        Node::Sequential(_) => "branch step",
        Node::Branch(_) => "sequential step",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use resumind_core::config::RunConfig;
    use resumind_core::failure::{FailureKind, ModelCause};
    use serde::Serialize;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    use crate::graph::state::RetryStatus;
    use crate::graph::step::StepResult;

    #[derive(Debug, Clone, Default, Serialize)]
    struct Notes {
        items: Vec<String>,
        cleaned: bool,
    }

    enum NoteUpdate {
        Push(String),
        Clean,
    }

    type Hop = Next<Id, (String, u64)>;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Id {
        Start,
        Work,
        A,
        B,
        C,
        Cleanup,
        Nowhere,
    }

    impl fmt::Display for Id {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl FlowState for Notes {
        type Update = NoteUpdate;
        type Step = Id;
        type BranchInput = (String, u64);

        fn apply(&mut self, update: NoteUpdate) {
            match update {
                NoteUpdate::Push(s) => self.items.push(s),
                NoteUpdate::Clean => {
                    self.items.clear();
                    self.cleaned = true;
                }
            }
        }
    }

    struct Push(&'static str);

    impl Step<Notes> for Push {
        fn run<'a>(
            &'a self,
            _state: &'a RunState<Notes>,
            _ctx: &'a StepContext,
        ) -> BoxFuture<'a, StepResult<NoteUpdate>> {
            Box::pin(async move { Ok(NoteUpdate::Push(self.0.to_string())) })
        }
    }

    struct Clean;

    impl Step<Notes> for Clean {
        fn run<'a>(
            &'a self,
            _state: &'a RunState<Notes>,
            _ctx: &'a StepContext,
        ) -> BoxFuture<'a, StepResult<NoteUpdate>> {
            Box::pin(async { Ok(NoteUpdate::Clean) })
        }
    }

    /// Fails `failures` times, then pushes "worked".
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        cause: ModelCause,
    }

    impl Flaky {
        fn new(failures: u32, cause: ModelCause) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                cause,
            }
        }
    }

    impl Step<Notes> for Arc<Flaky> {
        fn run<'a>(
            &'a self,
            _state: &'a RunState<Notes>,
            _ctx: &'a StepContext,
        ) -> BoxFuture<'a, StepResult<NoteUpdate>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(Failure::new(FailureKind::Extraction(self.cause), format!("attempt {}", n)))
                } else {
                    Ok(NoteUpdate::Push("worked".into()))
                }
            })
        }
    }

    /// Sleeps for the given delay, then contributes its label. Labels
    /// starting with "fail" fail instead.
    struct Echo;

    impl BranchStep<Notes> for Echo {
        fn run<'a>(
            &'a self,
            (label, delay_ms): (String, u64),
            _ctx: &'a StepContext,
        ) -> BoxFuture<'a, StepResult<NoteUpdate>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if label.starts_with("fail") {
                    Err(Failure::new(FailureKind::Generation(ModelCause::Timeout), label))
                } else {
                    Ok(NoteUpdate::Push(label))
                }
            })
        }
    }

    fn linear(completed: Completed<Id>, state: &RunState<Notes>) -> Hop {
        if state.error.is_some() {
            return match completed {
                Completed::Step(Id::Cleanup) => Next::End,
                _ => Next::Step(Id::Cleanup),
            };
        }
        match completed {
            Completed::Step(Id::Start) => Next::Step(Id::Work),
            _ => Next::End,
        }
    }

    fn fan(delays: [(&'static str, u64); 3]) -> impl Transition<Notes> {
        move |completed: Completed<Id>, state: &RunState<Notes>| -> Hop {
            if state.error.is_some() {
                return match completed {
                    Completed::Step(Id::Cleanup) => Next::End,
                    _ => Next::Step(Id::Cleanup),
                };
            }
            match completed {
                Completed::Step(Id::Start) => Next::FanOut(
                    [Id::A, Id::B, Id::C]
                        .into_iter()
                        .zip(delays)
                        .map(|(step, (label, delay))| Branch::new(step, (label.to_string(), delay)))
                        .collect(),
                ),
                Completed::Join { origin: Id::Start } => Next::Step(Id::Work),
                _ => Next::End,
            }
        }
    }

    fn ctx(max_retries: u32) -> StepContext {
        StepContext::new(RunConfig {
            user_id: "user-42".into(),
            max_retries,
            ..RunConfig::default()
        })
    }

    #[tokio::test]
    async fn test_linear_run_reaches_end() {
        let engine = FlowEngine::<Notes>::builder("linear", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .step(Id::Work, Push("work"))
            .step(Id::Cleanup, Clean)
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(2)).await.unwrap();
        assert!(state.succeeded());
        assert_eq!(state.slots.items, vec!["start", "work"]);
        assert_eq!(state.trace, vec!["Start", "Work"]);
        assert_eq!(state.retry.status, RetryStatus::Fresh);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let flaky = Arc::new(Flaky::new(2, ModelCause::Validation));
        let engine = FlowEngine::<Notes>::builder("retry", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .step(Id::Work, flaky.clone())
            .step(Id::Cleanup, Clean)
            .retry(Id::Work)
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(2)).await.unwrap();
        assert!(state.succeeded());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.retry.attempts, 2);
        assert_eq!(state.retry.status, RetryStatus::Retrying);
        assert_eq!(state.slots.items, vec!["start", "worked"]);
        assert_eq!(state.runs_of(Id::Work), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_routes_to_cleanup_with_error() {
        let flaky = Arc::new(Flaky::new(u32::MAX, ModelCause::Timeout));
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let engine = FlowEngine::<Notes>::builder("retry", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .step(Id::Work, flaky.clone())
            .step(Id::Cleanup, Clean)
            .retry(Id::Work)
            .events(bus)
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(2)).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.retry.status, RetryStatus::Exhausted);
        assert_eq!(state.retry.attempts, 2);
        assert!(state.slots.cleaned);
        assert!(state.slots.items.is_empty());
        let err = state.error.unwrap();
        assert_eq!(err.kind, FailureKind::Extraction(ModelCause::Timeout));
        assert_eq!(err.message, "attempt 2");

        let mut scheduled = 0;
        let mut exhausted = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                FlowEvent::RetryScheduled { .. } => scheduled += 1,
                FlowEvent::RetryExhausted { attempts, .. } => {
                    assert_eq!(attempts, 2);
                    exhausted += 1;
                }
                _ => {}
            }
        }
        assert_eq!((scheduled, exhausted), (2, 1));
    }

    #[tokio::test]
    async fn test_retry_ceiling_above_step_limit_still_exhausts() {
        let flaky = Arc::new(Flaky::new(u32::MAX, ModelCause::Timeout));
        let engine = FlowEngine::<Notes>::builder("retry", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .step(Id::Work, flaky.clone())
            .step(Id::Cleanup, Clean)
            .retry(Id::Work)
            .limits(EngineConfig {
                max_steps: 5,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(20)).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 21);
        assert_eq!(state.retry.status, RetryStatus::Exhausted);
        assert!(state.slots.cleaned);
        assert_eq!(
            state.error.map(|f| f.kind),
            Some(FailureKind::Extraction(ModelCause::Timeout))
        );
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_retry() {
        let flaky = Arc::new(Flaky::new(1, ModelCause::Auth));
        let engine = FlowEngine::<Notes>::builder("retry", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .step(Id::Work, flaky.clone())
            .step(Id::Cleanup, Clean)
            .retry(Id::Work)
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(2)).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.retry.status, RetryStatus::Fresh);
        assert_eq!(state.trace, vec!["Start", "Work", "Cleanup"]);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_undesignated_step_is_never_retried() {
        let flaky = Arc::new(Flaky::new(1, ModelCause::Timeout));
        let engine = FlowEngine::<Notes>::builder("no-retry", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .step(Id::Work, flaky.clone())
            .step(Id::Cleanup, Clean)
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(5)).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
        assert!(state.slots.cleaned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_merges_in_assignment_order() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let engine = FlowEngine::<Notes>::builder("fan", Id::Start, fan([("a", 30), ("b", 20), ("c", 10)]))
            .step(Id::Start, Push("start"))
            .branch(Id::A, Echo)
            .branch(Id::B, Echo)
            .branch(Id::C, Echo)
            .step(Id::Work, Push("gather"))
            .step(Id::Cleanup, Clean)
            .events(bus)
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(0)).await.unwrap();
        assert!(state.succeeded());
        assert_eq!(state.slots.items, vec!["start", "a", "b", "c", "gather"]);
        assert_eq!(state.trace, vec!["Start", "A", "B", "C", "Work"]);

        // Completion order was the reverse of assignment order.
        let mut finished = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let FlowEvent::BranchFinished { step, .. } = event {
                finished.push(step);
            }
        }
        assert_eq!(finished, vec!["C", "B", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_failure_keeps_successful_branches() {
        let engine = FlowEngine::<Notes>::builder(
            "fan",
            Id::Start,
            fan([("a", 10), ("fail-b", 5), ("c", 50)]),
        )
        .step(Id::Start, Push("start"))
        .branch(Id::A, Echo)
        .branch(Id::B, Echo)
        .branch(Id::C, Echo)
        .step(Id::Work, Push("gather"))
        .step(Id::Cleanup, Push("cleanup"))
        .build()
        .unwrap();

        let state = engine.execute(Notes::default(), &ctx(0)).await.unwrap();
        // The slow peer still ran to completion and was merged.
        assert_eq!(state.slots.items, vec!["start", "a", "c", "cleanup"]);
        let err = state.error.unwrap();
        assert_eq!(err.kind, FailureKind::FanOut { failed: 1, total: 3 });
        assert!(err.message.contains("[B]"));
    }

    #[tokio::test]
    async fn test_empty_fan_out_joins_immediately() {
        let transition = |completed: Completed<Id>, _state: &RunState<Notes>| -> Hop {
            match completed {
                Completed::Step(Id::Start) => Next::FanOut(Vec::new()),
                Completed::Join { .. } => Next::Step(Id::Work),
                _ => Next::End,
            }
        };
        let engine = FlowEngine::<Notes>::builder("empty", Id::Start, transition)
            .step(Id::Start, Push("start"))
            .step(Id::Work, Push("work"))
            .build()
            .unwrap();

        let state = engine.execute(Notes::default(), &ctx(0)).await.unwrap();
        assert_eq!(state.slots.items, vec!["start", "work"]);
    }

    #[test]
    fn test_missing_entry_is_structural() {
        let err = FlowEngine::<Notes>::builder("bad", Id::Start, linear)
            .step(Id::Work, Push("work"))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ResumindError::MissingEntry(_)));
        assert!(err.is_structural());
    }

    #[test]
    fn test_branch_step_cannot_be_retry_target() {
        let err = FlowEngine::<Notes>::builder("bad", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .branch(Id::A, Echo)
            .retry(Id::A)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ResumindError::StepKindMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unknown_next_step_aborts() {
        let transition = |completed: Completed<Id>, _state: &RunState<Notes>| -> Hop {
            match completed {
                Completed::Step(Id::Start) => Next::Step(Id::Nowhere),
                _ => Next::End,
            }
        };
        let engine = FlowEngine::<Notes>::builder("bad", Id::Start, transition)
            .step(Id::Start, Push("start"))
            .build()
            .unwrap();

        let err = engine.execute(Notes::default(), &ctx(0)).await.unwrap_err();
        assert!(matches!(err, ResumindError::UnknownStep(ref s) if s == "Nowhere"));
    }

    #[tokio::test]
    async fn test_branch_step_run_sequentially_is_rejected() {
        let transition = |completed: Completed<Id>, _state: &RunState<Notes>| -> Hop {
            match completed {
                Completed::Step(Id::Start) => Next::Step(Id::A),
                _ => Next::End,
            }
        };
        let engine = FlowEngine::<Notes>::builder("bad", Id::Start, transition)
            .step(Id::Start, Push("start"))
            .branch(Id::A, Echo)
            .build()
            .unwrap();

        let err = engine.execute(Notes::default(), &ctx(0)).await.unwrap_err();
        assert!(matches!(
            err,
            ResumindError::StepKindMismatch { expected: "sequential step", .. }
        ));
    }

    #[tokio::test]
    async fn test_fan_out_wider_than_limit_is_rejected() {
        let engine = FlowEngine::<Notes>::builder("wide", Id::Start, fan([("a", 0), ("b", 0), ("c", 0)]))
            .step(Id::Start, Push("start"))
            .branch(Id::A, Echo)
            .branch(Id::B, Echo)
            .branch(Id::C, Echo)
            .limits(EngineConfig {
                max_fan_out: 2,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();

        let err = engine.execute(Notes::default(), &ctx(0)).await.unwrap_err();
        assert!(matches!(err, ResumindError::FanOutTooWide { requested: 3, limit: 2 }));
    }

    #[tokio::test]
    async fn test_cycle_hits_step_limit() {
        let transition =
            |_completed: Completed<Id>, _state: &RunState<Notes>| -> Hop { Next::Step(Id::Start) };
        let engine = FlowEngine::<Notes>::builder("cycle", Id::Start, transition)
            .step(Id::Start, Push("again"))
            .limits(EngineConfig {
                max_steps: 10,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();

        let err = engine.execute(Notes::default(), &ctx(0)).await.unwrap_err();
        assert!(matches!(err, ResumindError::StepLimitExceeded(10)));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops() {
        let engine = FlowEngine::<Notes>::builder("cancel", Id::Start, linear)
            .step(Id::Start, Push("start"))
            .step(Id::Work, Push("work"))
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ctx(0).with_cancel(cancel);

        let err = engine.execute(Notes::default(), &ctx).await.unwrap_err();
        assert!(matches!(err, ResumindError::Cancelled));
    }
}
