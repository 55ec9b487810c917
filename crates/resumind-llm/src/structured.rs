use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use resumind_core::config::RunConfig;
use resumind_core::failure::FailureKind;
use resumind_core::traits::{CapabilityResult, Classifier, Extractor, Generator};
use resumind_core::types::{Attachment, Content, GenerationRequest, ResumeRecord, Verdict};

use crate::output::generate_structured;

/// Reason recorded when there is nothing to classify.
pub const EMPTY_DOCUMENT_REASON: &str = "No document content to parse.";

/// Classification backed by a JSON-mode model call on the attached PDF.
pub struct StructuredClassifier {
    generator: Arc<dyn Generator>,
}

impl StructuredClassifier {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

impl Classifier for StructuredClassifier {
    fn classify<'a>(
        &'a self,
        content: &'a Content,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, CapabilityResult<Verdict>> {
        Box::pin(async move {
            if content.is_empty() {
                info!("Empty document, rejecting without a model call");
                return Ok(Verdict::rejected(EMPTY_DOCUMENT_REASON));
            }

            let request = GenerationRequest::new(&config.classification_model, config.temperature)
                .with_system(&config.classification_prompt)
                .with_prompt("Is the attached document a job application document?")
                .with_attachment(Attachment::pdf(content.clone()));

            let verdict: Verdict = generate_structured(self.generator.as_ref(), request)
                .await
                .map_err(|f| f.in_role(FailureKind::Classification))?;
            debug!(accepted = verdict.accepted, reason = %verdict.reason, "Classified document");
            Ok(verdict)
        })
    }
}

/// Structured resume extraction backed by a JSON-mode model call.
pub struct StructuredExtractor {
    generator: Arc<dyn Generator>,
}

impl StructuredExtractor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

impl Extractor for StructuredExtractor {
    fn extract<'a>(
        &'a self,
        content: &'a Content,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, CapabilityResult<ResumeRecord>> {
        Box::pin(async move {
            let request = GenerationRequest::new(&config.extraction_model, config.temperature)
                .with_system(&config.extraction_prompt)
                .with_prompt("Parse the attached resume.")
                .with_attachment(Attachment::pdf(content.clone()));

            let record: ResumeRecord = generate_structured(self.generator.as_ref(), request)
                .await
                .map_err(|f| f.in_role(FailureKind::Extraction))?;
            debug!(
                careers = record.career_experiences.len(),
                projects = record.project_experiences.len(),
                "Extracted resume record"
            );
            Ok(record)
        })
    }
}
