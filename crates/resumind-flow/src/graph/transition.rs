use super::state::{FlowState, RunState};

/// What just finished, as seen by the transition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completed<K> {
    /// A sequential step finished (successfully or not).
    Step(K),
    /// Every branch of a fan-out that `origin` requested has finished and
    /// been merged.
    Join { origin: K },
}

/// One branch of a fan-out: the step to run and its narrow input.
#[derive(Debug, Clone)]
pub struct Branch<K, I> {
    pub step: K,
    pub input: I,
}

impl<K, I> Branch<K, I> {
    pub fn new(step: K, input: I) -> Self {
        Self { step, input }
    }
}

/// Where the run goes next.
#[derive(Debug, Clone)]
pub enum Next<K, I> {
    Step(K),
    /// Run every branch concurrently, then report `Completed::Join`.
    FanOut(Vec<Branch<K, I>>),
    End,
}

impl<K: PartialEq, I> PartialEq for Next<K, I> {
    /// Branch inputs are not compared.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Step(a), Self::Step(b)) => a == b,
            (Self::FanOut(a), Self::FanOut(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.step == y.step)
            }
            (Self::End, Self::End) => true,
            _ => false,
        }
    }
}

/// A pure decision function over the current state.
///
/// Implementations must check the error slot first and must resolve
/// anything ambiguous to the conservative (cleanup or terminal) route.
pub trait Transition<S: FlowState>: Send + Sync + 'static {
    fn next(
        &self,
        completed: Completed<S::Step>,
        state: &RunState<S>,
    ) -> Next<S::Step, S::BranchInput>;
}

impl<S, F> Transition<S> for F
where
    S: FlowState,
    F: Fn(Completed<S::Step>, &RunState<S>) -> Next<S::Step, S::BranchInput>
        + Send
        + Sync
        + 'static,
{
    fn next(
        &self,
        completed: Completed<S::Step>,
        state: &RunState<S>,
    ) -> Next<S::Step, S::BranchInput> {
        self(completed, state)
    }
}
