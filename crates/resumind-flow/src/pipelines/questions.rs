//! Interview question generation.
//!
//! `load_documents` fetches the candidate profile and one experience from the
//! document index, scoped to the requester. The run then fans out one
//! generation branch per [`QuestionCategory`], each seeing only a
//! [`QuestionBrief`]. `gather` replaces the requester's previous questions in
//! the question index. Any failure goes to `cleanup` and nothing is written.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info};

use resumind_core::config::EngineConfig;
use resumind_core::error::Result;
use resumind_core::event::EventBus;
use resumind_core::failure::{Failure, FailureKind, IndexCause, ModelCause};
use resumind_core::prompts;
use resumind_core::traits::{Generator, VectorIndex};
use resumind_core::types::{
    Document, DocumentCategory, DocumentMetadata, GeneratedQuestions, GenerationRequest,
    QuestionCategory, QuestionSet, StoredDocument,
};
use resumind_llm::output::generate_structured;

use super::Capabilities;
use crate::graph::{
    Branch, BranchStep, Completed, FlowEngine, FlowState, Next, RunState, Step, StepContext,
    StepResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionsStep {
    LoadDocuments,
    Generate(QuestionCategory),
    Gather,
    Cleanup,
}

impl fmt::Display for QuestionsStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadDocuments => f.write_str("load_documents"),
            Self::Generate(category) => write!(f, "generate_{}", category),
            Self::Gather => f.write_str("gather"),
            Self::Cleanup => f.write_str("cleanup"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuestionsState {
    pub profile_id: String,
    pub experience_id: String,
    pub profile: Option<StoredDocument>,
    pub experience: Option<StoredDocument>,
    /// Accumulated per-category results, in branch-assignment order.
    pub question_sets: Vec<QuestionSet>,
    pub indexed_ids: Vec<String>,
}

impl QuestionsState {
    pub fn new(profile_id: impl Into<String>, experience_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            experience_id: experience_id.into(),
            ..Self::default()
        }
    }

    /// Total questions across all categories.
    pub fn question_count(&self) -> usize {
        self.question_sets.iter().map(|s| s.questions.len()).sum()
    }
}

#[derive(Debug, Default)]
pub struct QuestionsUpdate {
    pub profile: Option<StoredDocument>,
    pub experience: Option<StoredDocument>,
    /// Appended, never replacing earlier sets.
    pub question_set: Option<QuestionSet>,
    pub indexed_ids: Vec<String>,
    pub clear_outputs: bool,
}

/// The narrow view a generation branch receives.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionBrief {
    pub category: QuestionCategory,
    pub candidate_name: String,
    pub position: String,
    pub objective: String,
    /// Rendered experience document body.
    pub experience: String,
}

impl FlowState for QuestionsState {
    type Update = QuestionsUpdate;
    type Step = QuestionsStep;
    type BranchInput = QuestionBrief;

    fn apply(&mut self, update: QuestionsUpdate) {
        if let Some(profile) = update.profile {
            self.profile = Some(profile);
        }
        if let Some(experience) = update.experience {
            self.experience = Some(experience);
        }
        if let Some(set) = update.question_set {
            self.question_sets.push(set);
        }
        self.indexed_ids.extend(update.indexed_ids);
        if update.clear_outputs {
            self.question_sets.clear();
            self.indexed_ids.clear();
        }
    }
}

/// One branch per category, in [`QuestionCategory::ALL`] order.
pub fn briefs(state: &QuestionsState) -> Option<Vec<QuestionBrief>> {
    let profile = &state.profile.as_ref()?.document;
    let experience = &state.experience.as_ref()?.document;
    let field = |key: &str| profile.metadata.get_str(key).unwrap_or_default().to_string();

    Some(
        QuestionCategory::ALL
            .iter()
            .map(|&category| QuestionBrief {
                category,
                candidate_name: field("candidate_name"),
                position: field("position"),
                objective: field("objective"),
                experience: experience.body.clone(),
            })
            .collect(),
    )
}

pub fn route(
    completed: Completed<QuestionsStep>,
    state: &RunState<QuestionsState>,
) -> Next<QuestionsStep, QuestionBrief> {
    if completed == Completed::Step(QuestionsStep::Cleanup) {
        return Next::End;
    }
    if state.error.is_some() {
        return Next::Step(QuestionsStep::Cleanup);
    }

    match completed {
        Completed::Step(QuestionsStep::LoadDocuments) => match briefs(&state.slots) {
            Some(briefs) => Next::FanOut(
                briefs
                    .into_iter()
                    .map(|brief| Branch::new(QuestionsStep::Generate(brief.category), brief))
                    .collect(),
            ),
            None => Next::Step(QuestionsStep::Cleanup),
        },
        Completed::Join { .. } => Next::Step(QuestionsStep::Gather),
        Completed::Step(QuestionsStep::Gather) => Next::End,
        _ => Next::Step(QuestionsStep::Cleanup),
    }
}

pub fn engine(
    caps: &Capabilities,
    limits: EngineConfig,
    events: Arc<EventBus>,
) -> Result<FlowEngine<QuestionsState>> {
    let mut builder =
        FlowEngine::<QuestionsState>::builder("questions", QuestionsStep::LoadDocuments, route)
            .step(
                QuestionsStep::LoadDocuments,
                LoadDocuments {
                    index: caps.documents.clone(),
                },
            )
            .step(
                QuestionsStep::Gather,
                Gather {
                    index: caps.questions.clone(),
                },
            )
            .step(QuestionsStep::Cleanup, Cleanup);
    for category in QuestionCategory::ALL {
        builder = builder.branch(
            QuestionsStep::Generate(category),
            GenerateQuestions {
                generator: caps.generator.clone(),
            },
        );
    }
    builder.limits(limits).events(events).build()
}

struct LoadDocuments {
    index: Arc<dyn VectorIndex>,
}

impl Step<QuestionsState> for LoadDocuments {
    fn run<'a>(
        &'a self,
        state: &'a RunState<QuestionsState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<QuestionsUpdate>> {
        Box::pin(async move {
            let slots = &state.slots;
            let scope = ctx.config.scope();
            let ids = [slots.profile_id.clone(), slots.experience_id.clone()];
            let found = ctx
                .call(
                    self.index.get_by_ids(&ids, &scope),
                    FailureKind::Index(IndexCause::Connection),
                )
                .await?;

            // Results come back in no particular order.
            let mut profile = None;
            let mut experience = None;
            for doc in found {
                let category = doc.document.metadata.category;
                if doc.id == slots.profile_id && category == DocumentCategory::CandidateProfile {
                    profile = Some(doc);
                } else if doc.id == slots.experience_id && category.is_experience() {
                    experience = Some(doc);
                }
            }

            let profile = profile.ok_or_else(|| {
                Failure::not_found(format!("candidate profile {} not found", slots.profile_id))
            })?;
            let experience = experience.ok_or_else(|| {
                Failure::not_found(format!("experience {} not found", slots.experience_id))
            })?;
            debug!(profile = %profile.id, experience = %experience.id, "Loaded source documents");

            Ok(QuestionsUpdate {
                profile: Some(profile),
                experience: Some(experience),
                ..QuestionsUpdate::default()
            })
        })
    }
}

struct GenerateQuestions {
    generator: Arc<dyn Generator>,
}

impl BranchStep<QuestionsState> for GenerateQuestions {
    fn run<'a>(
        &'a self,
        brief: QuestionBrief,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<QuestionsUpdate>> {
        Box::pin(async move {
            let config = &ctx.config;
            let base = prompts::render(
                &config.question_base_prompt,
                &[
                    ("candidate_name", brief.candidate_name.as_str()),
                    ("position", brief.position.as_str()),
                    ("objective", brief.objective.as_str()),
                    ("experience", brief.experience.as_str()),
                ],
            );
            let system = format!("{}\n\n{}", base, config.question_prompt(brief.category));
            let request = GenerationRequest::new(
                config.question_model(brief.category),
                config.question_temperature,
            )
            .with_system(system)
            .with_prompt("Generate interview questions based on the resume above.");

            let generated: GeneratedQuestions = ctx
                .call(
                    generate_structured(self.generator.as_ref(), request),
                    FailureKind::Generation(ModelCause::Timeout),
                )
                .await?;
            debug!(
                category = %brief.category,
                count = generated.questions.len(),
                "Generated questions"
            );

            Ok(QuestionsUpdate {
                question_set: Some(QuestionSet {
                    category: brief.category,
                    questions: generated.questions,
                }),
                ..QuestionsUpdate::default()
            })
        })
    }
}

struct Gather {
    index: Arc<dyn VectorIndex>,
}

impl Step<QuestionsState> for Gather {
    fn run<'a>(
        &'a self,
        state: &'a RunState<QuestionsState>,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<QuestionsUpdate>> {
        Box::pin(async move {
            let scope = ctx.config.scope();
            let slots = &state.slots;
            let mut documents = Vec::with_capacity(slots.question_count());
            for set in &slots.question_sets {
                for q in &set.questions {
                    let metadata = DocumentMetadata::new(
                        DocumentCategory::GeneratedQuestion,
                        &scope,
                        &ctx.config.schema_version,
                    )
                    .with("question_type", set.category.as_str())
                    .with("profile_id", slots.profile_id.as_str())
                    .with("experience_id", slots.experience_id.as_str());
                    documents.push(Document {
                        body: format!("question:{}\nexplanation:{}", q.question, q.explanation),
                        metadata,
                    });
                }
            }

            let ids = ctx
                .call(
                    self.index.replace_scope(&scope, documents),
                    FailureKind::Index(IndexCause::Connection),
                )
                .await?;
            info!(scope = %scope, count = ids.len(), "Stored generated questions");
            Ok(QuestionsUpdate {
                indexed_ids: ids,
                ..QuestionsUpdate::default()
            })
        })
    }
}

struct Cleanup;

impl Step<QuestionsState> for Cleanup {
    fn run<'a>(
        &'a self,
        _state: &'a RunState<QuestionsState>,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, StepResult<QuestionsUpdate>> {
        Box::pin(async {
            Ok(QuestionsUpdate {
                clear_outputs: true,
                ..QuestionsUpdate::default()
            })
        })
    }
}
