//! Resume parsing: load → classify → extract → convert → index.
//!
//! A rejected classification, a missing extraction result and any recorded
//! failure all route to `cleanup`, which drops produced documents so nothing
//! partial leaves the run. Extraction is the retry-designated step.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info};

use resumind_core::config::EngineConfig;
use resumind_core::error::Result;
use resumind_core::event::EventBus;
use resumind_core::failure::{Failure, FailureKind, IndexCause, ModelCause};
use resumind_core::traits::{Classifier, DocumentSource, Extractor, VectorIndex};
use resumind_core::types::{Content, Document, ResumeRecord, Verdict};

use super::{Capabilities, DocumentInput};
use crate::convert::{to_documents, Provenance};
use crate::graph::{Completed, FlowEngine, FlowState, Next, RunState, Step, StepContext, StepResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParsingStep {
    LoadDocument,
    Classify,
    Extract,
    Convert,
    Index,
    Cleanup,
}

impl fmt::Display for ParsingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LoadDocument => "load_document",
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::Convert => "convert",
            Self::Index => "index",
            Self::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsingState {
    pub reference: Option<String>,
    #[serde(skip)]
    pub content: Option<Content>,
    pub verdict: Option<Verdict>,
    pub record: Option<ResumeRecord>,
    /// The produced output collection.
    pub documents: Vec<Document>,
    pub indexed_ids: Vec<String>,
}

impl ParsingState {
    pub fn new(input: DocumentInput) -> Self {
        match input {
            DocumentInput::Reference(reference) => Self {
                reference: Some(reference),
                ..Self::default()
            },
            DocumentInput::Content(content) => Self {
                content: Some(content),
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct ParsingUpdate {
    pub content: Option<Content>,
    pub verdict: Option<Verdict>,
    pub record: Option<ResumeRecord>,
    pub documents: Option<Vec<Document>>,
    pub indexed_ids: Vec<String>,
    /// Drop every produced output.
    pub clear_outputs: bool,
}

impl FlowState for ParsingState {
    type Update = ParsingUpdate;
    type Step = ParsingStep;
    type BranchInput = ();

    fn apply(&mut self, update: ParsingUpdate) {
        if let Some(content) = update.content {
            self.content = Some(content);
        }
        if let Some(verdict) = update.verdict {
            self.verdict = Some(verdict);
        }
        if let Some(record) = update.record {
            self.record = Some(record);
        }
        if let Some(documents) = update.documents {
            self.documents = documents;
        }
        self.indexed_ids.extend(update.indexed_ids);
        if update.clear_outputs {
            self.documents.clear();
            self.indexed_ids.clear();
        }
    }
}

/// Branching for the parsing graph. Anything unexpected goes to cleanup.
pub fn route(
    completed: Completed<ParsingStep>,
    state: &RunState<ParsingState>,
) -> Next<ParsingStep, ()> {
    let step = match completed {
        Completed::Step(step) => step,
        Completed::Join { .. } => return Next::Step(ParsingStep::Cleanup),
    };
    if step == ParsingStep::Cleanup {
        return Next::End;
    }
    if state.error.is_some() {
        return Next::Step(ParsingStep::Cleanup);
    }

    let slots = &state.slots;
    match step {
        ParsingStep::LoadDocument => Next::Step(ParsingStep::Classify),
        ParsingStep::Classify => match &slots.verdict {
            Some(verdict) if verdict.accepted => Next::Step(ParsingStep::Extract),
            _ => Next::Step(ParsingStep::Cleanup),
        },
        ParsingStep::Extract if slots.record.is_some() => Next::Step(ParsingStep::Convert),
        ParsingStep::Convert if !slots.documents.is_empty() => Next::Step(ParsingStep::Index),
        ParsingStep::Index => Next::End,
        _ => Next::Step(ParsingStep::Cleanup),
    }
}

pub fn engine(
    caps: &Capabilities,
    limits: EngineConfig,
    events: Arc<EventBus>,
) -> Result<FlowEngine<ParsingState>> {
    FlowEngine::<ParsingState>::builder("parse", ParsingStep::LoadDocument, route)
        .step(
            ParsingStep::LoadDocument,
            LoadDocument {
                source: caps.source.clone(),
            },
        )
        .step(
            ParsingStep::Classify,
            Classify {
                classifier: caps.classifier.clone(),
            },
        )
        .step(
            ParsingStep::Extract,
            Extract {
                extractor: caps.extractor.clone(),
            },
        )
        .step(ParsingStep::Convert, Convert)
        .step(
            ParsingStep::Index,
            Index {
                index: caps.documents.clone(),
            },
        )
        .step(ParsingStep::Cleanup, Cleanup)
        .retry(ParsingStep::Extract)
        .limits(limits)
        .events(events)
        .build()
}

struct LoadDocument {
    source: Arc<dyn DocumentSource>,
}

impl Step<ParsingState> for LoadDocument {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ParsingState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ParsingUpdate>> {
        Box::pin(async move {
            if state.slots.content.is_some() {
                debug!("Document supplied inline, skipping fetch");
                return Ok(ParsingUpdate::default());
            }
            let reference = state
                .slots
                .reference
                .as_deref()
                .ok_or_else(|| Failure::not_found("no document reference or content supplied"))?;

            let scope = ctx.config.scope();
            let content = ctx
                .call(
                    self.source.fetch(reference, &scope),
                    FailureKind::DownloadFailure,
                )
                .await?;
            debug!(reference, bytes = content.len(), "Loaded document");
            Ok(ParsingUpdate {
                content: Some(content),
                ..ParsingUpdate::default()
            })
        })
    }
}

struct Classify {
    classifier: Arc<dyn Classifier>,
}

impl Step<ParsingState> for Classify {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ParsingState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ParsingUpdate>> {
        Box::pin(async move {
            let content = state.slots.content.clone().unwrap_or_else(|| Arc::from(Vec::new()));
            let verdict = ctx
                .call(
                    self.classifier.classify(&content, &ctx.config),
                    FailureKind::Classification(ModelCause::Timeout),
                )
                .await?;
            if !verdict.accepted {
                info!(reason = %verdict.reason, "Document rejected by classification");
            }
            Ok(ParsingUpdate {
                verdict: Some(verdict),
                ..ParsingUpdate::default()
            })
        })
    }
}

struct Extract {
    extractor: Arc<dyn Extractor>,
}

impl Step<ParsingState> for Extract {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ParsingState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ParsingUpdate>> {
        Box::pin(async move {
            let content = state.slots.content.as_ref().ok_or_else(|| {
                Failure::new(
                    FailureKind::Extraction(ModelCause::Validation),
                    "no document content to extract from",
                )
            })?;
            let record = ctx
                .call(
                    self.extractor.extract(content, &ctx.config),
                    FailureKind::Extraction(ModelCause::Timeout),
                )
                .await?;
            Ok(ParsingUpdate {
                record: Some(record),
                ..ParsingUpdate::default()
            })
        })
    }
}

struct Convert;

impl Step<ParsingState> for Convert {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ParsingState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ParsingUpdate>> {
        Box::pin(async move {
            let Some(record) = &state.slots.record else {
                return Ok(ParsingUpdate::default());
            };
            let scope = ctx.config.scope();
            let documents = to_documents(
                record,
                Provenance {
                    owner: &scope,
                    schema_version: &ctx.config.schema_version,
                    source: state.slots.reference.as_deref(),
                },
            );
            debug!(count = documents.len(), "Converted record to documents");
            Ok(ParsingUpdate {
                documents: Some(documents),
                ..ParsingUpdate::default()
            })
        })
    }
}

struct Index {
    index: Arc<dyn VectorIndex>,
}

impl Step<ParsingState> for Index {
    fn run<'a>(
        &'a self,
        state: &'a RunState<ParsingState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ParsingUpdate>> {
        Box::pin(async move {
            let scope = ctx.config.scope();
            let ids = ctx
                .call(
                    self.index.replace_scope(&scope, state.slots.documents.clone()),
                    FailureKind::Index(IndexCause::Connection),
                )
                .await?;
            info!(scope = %scope, count = ids.len(), "Indexed resume documents");
            Ok(ParsingUpdate {
                indexed_ids: ids,
                ..ParsingUpdate::default()
            })
        })
    }
}

struct Cleanup;

impl Step<ParsingState> for Cleanup {
    fn run<'a>(
        &'a self,
        _state: &'a RunState<ParsingState>,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<ParsingUpdate>> {
        Box::pin(async {
            Ok(ParsingUpdate {
                clear_outputs: true,
                ..ParsingUpdate::default()
            })
        })
    }
}
