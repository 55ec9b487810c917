//! Scripted capabilities and fixtures for exercising the pipelines without
//! a model endpoint or an embedding service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use resumind_core::config::RunConfig;
use resumind_core::failure::{Failure, FailureKind, IndexCause, ModelCause};
use resumind_core::traits::{
    CapabilityResult, Classifier, DocumentSource, Extractor, Generator, VectorIndex,
};
use resumind_core::types::*;
use resumind_memory::{EmbeddingProvider, FsDocumentSource};

// ---------------------------------------------------------------------------
// Vector index
// ---------------------------------------------------------------------------

/// In-memory [`VectorIndex`] that ranks by shared words and logs every call.
///
/// `replace_scope` is the trait default, so a replace shows up in the log as
/// `delete` followed by `upsert`.
#[derive(Default)]
pub struct MemoryIndex {
    scopes: Mutex<HashMap<String, Vec<StoredDocument>>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    fail_writes: Mutex<Option<Failure>>,
}

impl MemoryIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent write fail with `failure`.
    pub fn fail_writes(&self, failure: Failure) {
        *self.fail_writes.lock().unwrap() = Some(failure);
    }

    /// Calls in order, as `op:scope`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, scope: &str) -> usize {
        self.scopes.lock().unwrap().get(scope).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.scopes.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn docs(&self, scope: &str) -> Vec<StoredDocument> {
        self.scopes
            .lock()
            .unwrap()
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    /// Store documents directly, bypassing the call log.
    pub fn seed(&self, scope: &str, documents: Vec<Document>) -> Vec<String> {
        let stored = self.assign_ids(documents);
        let ids = stored.iter().map(|d| d.id.clone()).collect();
        self.scopes
            .lock()
            .unwrap()
            .entry(scope.to_string())
            .or_default()
            .extend(stored);
        ids
    }

    fn log(&self, op: &str, scope: &ScopeKey) {
        self.calls.lock().unwrap().push(format!("{}:{}", op, scope));
    }

    fn assign_ids(&self, documents: Vec<Document>) -> Vec<StoredDocument> {
        documents
            .into_iter()
            .map(|document| StoredDocument {
                id: format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
                document,
            })
            .collect()
    }

    fn check_write(&self, scope: &ScopeKey, documents: &[Document]) -> CapabilityResult<()> {
        if let Some(failure) = self.fail_writes.lock().unwrap().clone() {
            return Err(failure);
        }
        match documents.iter().find(|d| d.metadata.owner != scope.as_str()) {
            Some(doc) => Err(Failure::index(
                IndexCause::Scope,
                format!("owner '{}' written to scope '{}'", doc.metadata.owner, scope),
            )),
            None => Ok(()),
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl VectorIndex for MemoryIndex {
    fn upsert<'a>(
        &'a self,
        scope: &'a ScopeKey,
        documents: Vec<Document>,
    ) -> BoxFuture<'a, CapabilityResult<Vec<String>>> {
        Box::pin(async move {
            self.log("upsert", scope);
            self.check_write(scope, &documents)?;
            Ok(self.seed(scope.as_str(), documents))
        })
    }

    fn delete_where<'a>(&'a self, scope: &'a ScopeKey) -> BoxFuture<'a, CapabilityResult<usize>> {
        Box::pin(async move {
            self.log("delete", scope);
            Ok(self
                .scopes
                .lock()
                .unwrap()
                .remove(scope.as_str())
                .map_or(0, |docs| docs.len()))
        })
    }

    fn query<'a>(
        &'a self,
        text: &'a str,
        scope: &'a ScopeKey,
        k: usize,
    ) -> BoxFuture<'a, CapabilityResult<Vec<ScoredDocument>>> {
        Box::pin(async move {
            self.log("query", scope);
            let wanted = words(text);
            let mut hits: Vec<ScoredDocument> = self
                .docs(scope.as_str())
                .into_iter()
                .filter_map(|doc| {
                    let body = words(&doc.document.body);
                    let shared = wanted.iter().filter(|w| body.contains(w)).count();
                    (shared > 0).then(|| ScoredDocument {
                        id: doc.id,
                        document: doc.document,
                        score: shared as f32 / wanted.len().max(1) as f32,
                    })
                })
                .collect();
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(k);
            Ok(hits)
        })
    }

    fn get_by_ids<'a>(
        &'a self,
        ids: &'a [String],
        scope: &'a ScopeKey,
    ) -> BoxFuture<'a, CapabilityResult<Vec<StoredDocument>>> {
        Box::pin(async move {
            self.log("get", scope);
            Ok(self
                .docs(scope.as_str())
                .into_iter()
                .filter(|d| ids.contains(&d.id))
                .collect())
        })
    }
}

/// Deterministic bag-of-letters embedder for [`resumind_memory::SqliteIndex`].
pub struct LetterEmbedder;

impl EmbeddingProvider for LetterEmbedder {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>, String>> {
        let out = texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                    v[(c - b'a') as usize] += 1.0;
                }
                v
            })
            .collect();
        Box::pin(async move { Ok(out) })
    }

    fn dimensions(&self) -> usize {
        26
    }
}

// ---------------------------------------------------------------------------
// Document source
// ---------------------------------------------------------------------------

/// Serves fixed bytes for references of the form `<owner>/<name>`.
#[derive(Default)]
pub struct ScriptedSource {
    documents: HashMap<String, Content>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: &str, bytes: &[u8]) -> Self {
        self.documents.insert(reference.to_string(), Arc::from(bytes));
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DocumentSource for ScriptedSource {
    fn fetch<'a>(
        &'a self,
        reference: &'a str,
        requester: &'a ScopeKey,
    ) -> BoxFuture<'a, CapabilityResult<Content>> {
        Box::pin(async move {
            let owner = reference.split('/').next().unwrap_or_default();
            if owner != requester.as_str() {
                return Err(Failure::access_denied(format!(
                    "'{}' may not read '{}'",
                    requester, reference
                )));
            }
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.documents
                .get(reference)
                .cloned()
                .ok_or_else(|| Failure::not_found(format!("no document '{}'", reference)))
        })
    }
}

/// An on-disk source rooted in a temp dir holding one document.
pub fn fs_source(reference: &str, bytes: &[u8]) -> (tempfile::TempDir, FsDocumentSource) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(reference);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    let source = FsDocumentSource::new(dir.path());
    (dir, source)
}

// ---------------------------------------------------------------------------
// Model-backed capabilities
// ---------------------------------------------------------------------------

/// Returns a fixed verdict and counts calls.
pub struct ScriptedClassifier {
    verdict: Verdict,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn accepting() -> Self {
        Self {
            verdict: Verdict {
                accepted: true,
                reason: "Developer resume with career history.".into(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self {
            verdict: Verdict::rejected(reason),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for ScriptedClassifier {
    fn classify<'a>(
        &'a self,
        _content: &'a Content,
        _config: &'a RunConfig,
    ) -> BoxFuture<'a, CapabilityResult<Verdict>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict.clone())
        })
    }
}

/// Fails the first `failures` calls with `kind`, then returns the record.
pub struct FlakyExtractor {
    record: ResumeRecord,
    failures: usize,
    kind: FailureKind,
    calls: AtomicUsize,
}

impl FlakyExtractor {
    pub fn new(record: ResumeRecord, failures: usize) -> Self {
        Self {
            record,
            failures,
            kind: FailureKind::Extraction(ModelCause::Validation),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reliable(record: ResumeRecord) -> Self {
        Self::new(record, 0)
    }

    /// Always fail with `kind`.
    pub fn broken(kind: FailureKind) -> Self {
        Self {
            record: sample_record(),
            failures: usize::MAX,
            kind,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for FlakyExtractor {
    fn extract<'a>(
        &'a self,
        _content: &'a Content,
        _config: &'a RunConfig,
    ) -> BoxFuture<'a, CapabilityResult<ResumeRecord>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Failure::new(
                    self.kind.clone(),
                    format!("scripted failure {}", call + 1),
                ));
            }
            Ok(self.record.clone())
        })
    }
}

struct Rule {
    needle: String,
    reply: CapabilityResult<String>,
    delay: Duration,
}

/// Answers each request from the first rule whose needle appears in the
/// request's model name or system prompt. Records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Vec<Rule>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, needle: &str, text: impl Into<String>) -> Self {
        self.rule(needle, Ok(text.into()), Duration::ZERO)
    }

    pub fn delayed(self, needle: &str, text: impl Into<String>, delay: Duration) -> Self {
        self.rule(needle, Ok(text.into()), delay)
    }

    pub fn fail(self, needle: &str, failure: Failure) -> Self {
        self.rule(needle, Err(failure), Duration::ZERO)
    }

    fn rule(mut self, needle: &str, reply: CapabilityResult<String>, delay: Duration) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            reply,
            delay,
        });
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, CapabilityResult<String>> {
        Box::pin(async move {
            let rule = self.rules.iter().find(|r| {
                request.model.contains(&r.needle) || request.system.contains(&r.needle)
            });
            self.requests.lock().unwrap().push(request);
            let Some(rule) = rule else {
                return Err(Failure::new(
                    FailureKind::Generation(ModelCause::Unknown),
                    "no scripted reply",
                ));
            };
            if !rule.delay.is_zero() {
                tokio::time::sleep(rule.delay).await;
            }
            rule.reply.clone()
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One profile, one career and one project.
pub fn sample_record() -> ResumeRecord {
    ResumeRecord {
        candidate_profile: CandidateProfile {
            name: "Jane Doe".into(),
            position: Position::Be,
            objective: "Build reliable payment systems".into(),
            experience_level: Some(ExperienceLevel::Senior),
            education: vec![Education {
                institution: "KAIST".into(),
                degree: Some("BSc".into()),
                field_of_study: Some("Computer Science".into()),
                start_date: Some("2012-03".into()),
                end_date: Some("2016-02".into()),
                description: String::new(),
            }],
        },
        career_experiences: vec![CareerExperience {
            company: "Acme Pay".into(),
            company_description: "Payments platform".into(),
            employment_type: EmploymentType::Employee,
            job_level: Some("Senior".into()),
            detail: ExperienceDetail {
                start_date: Some("2019-04".into()),
                end_date: None,
                tech_stack: vec!["Rust".into(), "Kafka".into(), "PostgreSQL".into()],
                architecture: None,
                positions: vec![Position::Be],
                summary: "Settlement engine for card payments".into(),
                situation: vec!["Nightly batch settlement missed its SLA".into()],
                task: vec!["Make settlement continuous".into()],
                action: vec!["Rebuilt settlement on Kafka streams".into()],
                result: vec!["Settlement latency dropped from hours to seconds".into()],
            },
        }],
        project_experiences: vec![ProjectExperience {
            project_name: "tinykv".into(),
            project_type: ProjectType::OpenSource,
            team_size: Some(3),
            detail: ExperienceDetail {
                summary: "Embedded key-value store with a write-ahead log".into(),
                tech_stack: vec!["Rust".into()],
                positions: vec![Position::Be],
                ..ExperienceDetail::default()
            },
        }],
    }
}

/// Bytes standing in for an uploaded PDF.
pub fn sample_pdf() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n%%EOF\n".to_vec()
}

/// A JSON reply for the question generation branches.
pub fn questions_reply(topic: &str, count: usize) -> String {
    let questions: Vec<serde_json::Value> = (1..=count)
        .map(|i| {
            serde_json::json!({
                "question": format!("{} question {}?", topic, i),
                "explanation": format!("Checks {} depth, point {}.", topic, i),
            })
        })
        .collect();
    serde_json::json!({ "questions": questions }).to_string()
}

/// Defaults with a short timeout and no retry backoff, ready for overlays.
pub fn test_run_config() -> RunConfig {
    RunConfig {
        timeout_secs: 5,
        ..RunConfig::default()
    }
}
