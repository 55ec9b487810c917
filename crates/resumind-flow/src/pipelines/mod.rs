//! The three resume workflows wired onto the engine.
//!
//! * [`parsing`]: fetch, classify, extract (retried), convert, index.
//! * [`questions`]: load stored documents, fan out one generation per
//!   question category, gather into the question index.
//! * [`chat`]: rewrite the question into search queries, retrieve within
//!   the caller's scope, answer or decline.

pub mod chat;
pub mod parsing;
pub mod questions;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use resumind_core::config::{ConfigOverlay, EngineConfig, RunConfig};
use resumind_core::error::Result;
use resumind_core::event::EventBus;
use resumind_core::traits::{Classifier, DocumentSource, Extractor, Generator, VectorIndex};
use resumind_core::types::{Content, RunId, ScopeKey};

use crate::graph::{FlowEngine, RunState, StepContext};

pub use chat::ChatState;
pub use parsing::ParsingState;
pub use questions::QuestionsState;

/// External collaborators the pipelines call through.
#[derive(Clone)]
pub struct Capabilities {
    pub source: Arc<dyn DocumentSource>,
    pub classifier: Arc<dyn Classifier>,
    pub extractor: Arc<dyn Extractor>,
    pub generator: Arc<dyn Generator>,
    /// Parsed resume documents.
    pub documents: Arc<dyn VectorIndex>,
    /// Generated interview questions.
    pub questions: Arc<dyn VectorIndex>,
}

/// What the parsing pipeline reads: a reference resolved through the
/// document source, or bytes supplied directly.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    Reference(String),
    Content(Content),
}

/// One caller request: who is asking, their overrides, and a handle to
/// abandon the run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub identity: ScopeKey,
    pub overlay: ConfigOverlay,
    pub run_id: RunId,
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: ScopeKey::new(identity),
            overlay: ConfigOverlay::default(),
            run_id: RunId::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_overlay(mut self, overlay: ConfigOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The run invocation surface.
///
/// Every run resolves its own [`RunConfig`] from the shared defaults plus
/// the caller's overlay; defaults are never mutated.
pub struct Pipelines {
    defaults: RunConfig,
    events: Arc<EventBus>,
    parsing: FlowEngine<ParsingState>,
    questions: FlowEngine<QuestionsState>,
    chat: FlowEngine<ChatState>,
}

impl Pipelines {
    pub fn new(caps: Capabilities, defaults: RunConfig, limits: EngineConfig) -> Result<Self> {
        let events = Arc::new(EventBus::new(limits.event_capacity));
        Ok(Self {
            parsing: parsing::engine(&caps, limits.clone(), events.clone())?,
            questions: questions::engine(&caps, limits.clone(), events.clone())?,
            chat: chat::engine(&caps, limits, events.clone())?,
            defaults,
            events,
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn defaults(&self) -> &RunConfig {
        &self.defaults
    }

    fn context(&self, invocation: &Invocation) -> Result<StepContext> {
        let config = self
            .defaults
            .resolve(&invocation.identity, &invocation.overlay)?;
        Ok(StepContext::new(config)
            .with_run_id(invocation.run_id.clone())
            .with_cancel(invocation.cancel.clone()))
    }

    /// Parse a resume and index it under the caller's scope.
    pub async fn parse(
        &self,
        invocation: &Invocation,
        input: DocumentInput,
    ) -> Result<RunState<ParsingState>> {
        let ctx = self.context(invocation)?;
        self.parsing.execute(ParsingState::new(input), &ctx).await
    }

    /// Generate interview questions from one stored profile and one stored
    /// experience document.
    pub async fn questions(
        &self,
        invocation: &Invocation,
        profile_id: impl Into<String>,
        experience_id: impl Into<String>,
    ) -> Result<RunState<QuestionsState>> {
        let ctx = self.context(invocation)?;
        self.questions
            .execute(QuestionsState::new(profile_id, experience_id), &ctx)
            .await
    }

    /// Answer a question from the caller's indexed documents.
    pub async fn chat(
        &self,
        invocation: &Invocation,
        question: impl Into<String>,
    ) -> Result<RunState<ChatState>> {
        let ctx = self.context(invocation)?;
        self.chat.execute(ChatState::new(question), &ctx).await
    }
}
