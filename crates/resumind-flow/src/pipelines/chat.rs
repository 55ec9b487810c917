//! Question answering over the caller's own indexed documents.
//!
//! `transform_query` rewrites the question into a few search queries,
//! `retrieve` collects hits within the caller's scope, then the run either
//! answers from that context or declines with a fixed message.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use resumind_core::config::EngineConfig;
use resumind_core::error::Result;
use resumind_core::event::EventBus;
use resumind_core::failure::{FailureKind, IndexCause, ModelCause};
use resumind_core::prompts;
use resumind_core::traits::{Generator, VectorIndex};
use resumind_core::types::{GenerationRequest, ScoredDocument, SearchQueries};
use resumind_llm::output::generate_structured;

use super::Capabilities;
use crate::graph::{Completed, FlowEngine, FlowState, Next, RunState, Step, StepContext, StepResult};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatStep {
    TransformQuery,
    Retrieve,
    GenerateResponse,
    CannotAnswer,
}

impl fmt::Display for ChatStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransformQuery => "transform_query",
            Self::Retrieve => "retrieve",
            Self::GenerateResponse => "generate_response",
            Self::CannotAnswer => "cannot_answer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatState {
    pub question: String,
    pub queries: Vec<String>,
    pub retrieved: Vec<ScoredDocument>,
    pub answer: Option<String>,
}

impl ChatState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatUpdate {
    pub queries: Option<Vec<String>>,
    pub retrieved: Option<Vec<ScoredDocument>>,
    pub answer: Option<String>,
}

impl FlowState for ChatState {
    type Update = ChatUpdate;
    type Step = ChatStep;
    type BranchInput = ();

    fn apply(&mut self, update: ChatUpdate) {
        if let Some(queries) = update.queries {
            self.queries = queries;
        }
        if let Some(retrieved) = update.retrieved {
            self.retrieved = retrieved;
        }
        if let Some(answer) = update.answer {
            self.answer = Some(answer);
        }
    }
}

pub fn route(completed: Completed<ChatStep>, state: &RunState<ChatState>) -> Next<ChatStep, ()> {
    if state.error.is_some() {
        return Next::End;
    }
    match completed {
        Completed::Step(ChatStep::TransformQuery) => Next::Step(ChatStep::Retrieve),
        Completed::Step(ChatStep::Retrieve) if state.slots.retrieved.is_empty() => {
            Next::Step(ChatStep::CannotAnswer)
        }
        Completed::Step(ChatStep::Retrieve) => Next::Step(ChatStep::GenerateResponse),
        _ => Next::End,
    }
}

pub fn engine(
    caps: &Capabilities,
    limits: EngineConfig,
    events: Arc<EventBus>,
) -> Result<FlowEngine<ChatState>> {
    FlowEngine::<ChatState>::builder("chat", ChatStep::TransformQuery, route)
        .step(
            ChatStep::TransformQuery,
            TransformQuery {
                generator: caps.generator.clone(),
            },
        )
        .step(
            ChatStep::Retrieve,
            Retrieve {
                index: caps.documents.clone(),
            },
        )
        .step(
            ChatStep::GenerateResponse,
            GenerateResponse {
                generator: caps.generator.clone(),
            },
        )
        .step(ChatStep::CannotAnswer, CannotAnswer)
        .limits(limits)
        .events(events)
        .build()
}

/// Trim, drop empties and cap at `max`.
fn clean_queries(queries: Vec<String>, max: usize) -> Vec<String> {
    queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(max)
        .collect()
}

struct TransformQuery {
    generator: Arc<dyn Generator>,
}

impl Step<ChatState> for TransformQuery {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ChatState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ChatUpdate>> {
        Box::pin(async move {
            let config = &ctx.config;
            let max = config.max_queries.to_string();
            let request = GenerationRequest::new(config.query_model.as_str(), config.temperature)
                .with_system(prompts::render(&config.query_prompt, &[("max_queries", max.as_str())]))
                .with_prompt(state.slots.question.as_str());

            let generated: SearchQueries = ctx
                .call(
                    generate_structured(self.generator.as_ref(), request),
                    FailureKind::Generation(ModelCause::Timeout),
                )
                .await?;
            let queries = clean_queries(generated.queries, config.max_queries.max(1));
            debug!(count = queries.len(), "Rewrote question into search queries");
            Ok(ChatUpdate {
                queries: Some(queries),
                ..ChatUpdate::default()
            })
        })
    }
}

struct Retrieve {
    index: Arc<dyn VectorIndex>,
}

impl Step<ChatState> for Retrieve {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ChatState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ChatUpdate>> {
        Box::pin(async move {
            let scope = ctx.config.scope();
            let mut seen = HashSet::new();
            let mut retrieved = Vec::new();
            for query in &state.slots.queries {
                let hits = ctx
                    .call(
                        self.index.query(query, &scope, ctx.config.k),
                        FailureKind::Index(IndexCause::Connection),
                    )
                    .await?;
                for hit in hits {
                    if seen.insert(hit.document.body.clone()) {
                        retrieved.push(hit);
                    }
                }
            }
            debug!(scope = %scope, count = retrieved.len(), "Retrieved context");
            Ok(ChatUpdate {
                retrieved: Some(retrieved),
                ..ChatUpdate::default()
            })
        })
    }
}

struct GenerateResponse {
    generator: Arc<dyn Generator>,
}

impl Step<ChatState> for GenerateResponse {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ChatState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ChatUpdate>> {
        Box::pin(async move {
            let config = &ctx.config;
            let context = state
                .slots
                .retrieved
                .iter()
                .map(|hit| hit.document.body.as_str())
                .collect::<Vec<_>>()
                .join(CONTEXT_SEPARATOR);
            let request =
                GenerationRequest::new(config.response_model.as_str(), config.temperature)
                    .with_system(prompts::render(
                        &config.response_prompt,
                        &[("context", context.as_str())],
                    ))
                    .with_prompt(state.slots.question.as_str());

            let answer = ctx
                .call(
                    self.generator.generate(request),
                    FailureKind::Generation(ModelCause::Timeout),
                )
                .await?;
            Ok(ChatUpdate {
                answer: Some(answer.trim().to_string()),
                ..ChatUpdate::default()
            })
        })
    }
}

struct CannotAnswer;

impl Step<ChatState> for CannotAnswer {
    fn run<'a>(
        &'a self,
        _state: &'a RunState<ChatState>,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ChatUpdate>> {
        Box::pin(async {
            Ok(ChatUpdate {
                answer: Some(prompts::CANNOT_ANSWER.to_string()),
                ..ChatUpdate::default()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumind_core::failure::Failure;
    use resumind_core::types::RunId;

    #[test]
    fn test_clean_queries_caps_and_trims() {
        let queries = vec![
            " rust ".to_string(),
            "".to_string(),
            "kafka".to_string(),
            "payments".to_string(),
        ];
        assert_eq!(clean_queries(queries, 2), vec!["rust", "kafka"]);
    }

    #[test]
    fn test_empty_retrieval_declines() {
        let state = RunState::new(RunId::new(), ChatState::new("what did I do at Acme?"));
        assert_eq!(
            route(Completed::Step(ChatStep::Retrieve), &state),
            Next::Step(ChatStep::CannotAnswer)
        );
        assert_eq!(
            route(Completed::Step(ChatStep::CannotAnswer), &state),
            Next::End
        );
    }

    #[test]
    fn test_failure_ends_run() {
        let mut state = RunState::new(RunId::new(), ChatState::new("q"));
        state.error = Some(Failure::new(FailureKind::Generation(ModelCause::Quota), "429"));
        assert_eq!(
            route(Completed::Step(ChatStep::TransformQuery), &state),
            Next::End
        );
    }
}
