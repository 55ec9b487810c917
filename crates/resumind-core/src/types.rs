use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity that partitions every index read, write and delete.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ScopeKey(pub String);

impl ScopeKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw document bytes shared between steps without copying.
pub type Content = Arc<[u8]>;

// ---------------------------------------------------------------------------
// Structured resume record
// ---------------------------------------------------------------------------

/// Developer role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Fe,
    Be,
    Fs,
    DevOps,
    DataScientist,
    DataEngineer,
    AiEngineer,
    Other,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fe => "FE",
            Self::Be => "BE",
            Self::Fs => "FS",
            Self::DevOps => "DEV_OPS",
            Self::DataScientist => "DATA_SCIENTIST",
            Self::DataEngineer => "DATA_ENGINEER",
            Self::AiEngineer => "AI_ENGINEER",
            Self::Other => "OTHER",
        }
    }
}

/// Seniority band. JUNIOR 0-3 years, SENIOR 4-8, STAFF 9-12, PRINCIPAL 13+.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperienceLevel {
    Junior,
    Senior,
    Staff,
    Principal,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Junior => "JUNIOR",
            Self::Senior => "SENIOR",
            Self::Staff => "STAFF",
            Self::Principal => "PRINCIPAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmploymentType {
    Employee,
    Intern,
    Contract,
    Freelance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectType {
    Personal,
    Team,
    OpenSource,
    Academic,
    Hackathon,
    Freelance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub institution: String,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub field_of_study: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    pub position: Position,
    #[serde(default)]
    pub objective: String,
    #[serde(default, alias = "experience_years")]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(default)]
    pub education: Vec<Education>,
}

/// Fields shared by career and project experiences. STAR lists describe
/// situation, task, action and result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceDetail {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    /// Mermaid diagram source.
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default, alias = "position")]
    pub positions: Vec<Position>,
    pub summary: String,
    #[serde(default)]
    pub situation: Vec<String>,
    #[serde(default)]
    pub task: Vec<String>,
    #[serde(default)]
    pub action: Vec<String>,
    #[serde(default)]
    pub result: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareerExperience {
    pub company: String,
    #[serde(default)]
    pub company_description: String,
    #[serde(alias = "employee_type")]
    pub employment_type: EmploymentType,
    #[serde(default)]
    pub job_level: Option<String>,
    #[serde(flatten)]
    pub detail: ExperienceDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectExperience {
    pub project_name: String,
    pub project_type: ProjectType,
    #[serde(default)]
    pub team_size: Option<u32>,
    #[serde(flatten)]
    pub detail: ExperienceDetail,
}

/// Output of the structured extraction capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub candidate_profile: CandidateProfile,
    #[serde(default)]
    pub career_experiences: Vec<CareerExperience>,
    #[serde(default)]
    pub project_experiences: Vec<ProjectExperience>,
}

/// Checks applied to model output after it deserializes.
pub trait Validate {
    fn validate(&self) -> Vec<String>;
}

impl Validate for ResumeRecord {
    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.candidate_profile.name.trim().is_empty() {
            issues.push("candidate_profile.name is empty".to_string());
        }
        for (i, career) in self.career_experiences.iter().enumerate() {
            if career.company.trim().is_empty() {
                issues.push(format!("career_experiences[{}].company is empty", i));
            }
            if career.detail.summary.trim().is_empty() {
                issues.push(format!("career_experiences[{}].summary is empty", i));
            }
        }
        for (i, project) in self.project_experiences.iter().enumerate() {
            if project.project_name.trim().is_empty() {
                issues.push(format!("project_experiences[{}].project_name is empty", i));
            }
            if project.team_size == Some(0) {
                issues.push(format!("project_experiences[{}].team_size is zero", i));
            }
        }
        issues
    }
}

/// Outcome of the classification capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(alias = "is_resume")]
    pub accepted: bool,
    pub reason: String,
}

impl Verdict {
    pub const MAX_REASON_CHARS: usize = 350;

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

impl Validate for Verdict {
    fn validate(&self) -> Vec<String> {
        let len = self.reason.chars().count();
        if len > Self::MAX_REASON_CHARS {
            vec![format!(
                "reason is {} characters, limit is {}",
                len,
                Self::MAX_REASON_CHARS
            )]
        } else {
            vec![]
        }
    }
}

// ---------------------------------------------------------------------------
// Index documents
// ---------------------------------------------------------------------------

/// Category tag written into every indexed document's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    CandidateProfile,
    CareerExperience,
    ProjectExperience,
    GeneratedQuestion,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CandidateProfile => "candidate_profile",
            Self::CareerExperience => "career_experience",
            Self::ProjectExperience => "project_experience",
            Self::GeneratedQuestion => "generated_question",
        }
    }

    pub fn is_experience(&self) -> bool {
        matches!(self, Self::CareerExperience | Self::ProjectExperience)
    }
}

/// Metadata carried by every document. `extra` holds category-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub category: DocumentCategory,
    pub owner: String,
    pub schema_version: String,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    pub fn new(category: DocumentCategory, owner: &ScopeKey, schema_version: &str) -> Self {
        Self {
            category,
            owner: owner.0.clone(),
            schema_version: schema_version.to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Set a category-specific field, skipping `null`s.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.extra.insert(key.to_string(), value);
        }
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// A text chunk plus its metadata, ready for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub body: String,
    pub metadata: DocumentMetadata,
}

/// A document as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub document: Document,
}

/// A query hit, ranked by similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub document: Document,
    pub score: f32,
}

// ---------------------------------------------------------------------------
// Interview questions and chat
// ---------------------------------------------------------------------------

/// The three question-generation branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Experience,
    Tech,
    Cowork,
}

impl QuestionCategory {
    /// Branch assignment order.
    pub const ALL: [QuestionCategory; 3] = [Self::Experience, Self::Tech, Self::Cowork];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experience => "experience",
            Self::Tech => "tech",
            Self::Cowork => "cowork",
        }
    }
}

impl std::fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    pub explanation: String,
}

impl Question {
    pub const MAX_CHARS: usize = 500;
}

/// Wire shape of a question generation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestions {
    #[serde(alias = "contents")]
    pub questions: Vec<Question>,
}

impl Validate for GeneratedQuestions {
    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.questions.is_empty() {
            issues.push("no questions generated".to_string());
        }
        for (i, q) in self.questions.iter().enumerate() {
            if q.question.trim().is_empty() {
                issues.push(format!("questions[{}].question is empty", i));
            }
            if q.question.chars().count() > Question::MAX_CHARS {
                issues.push(format!("questions[{}].question exceeds {} chars", i, Question::MAX_CHARS));
            }
            if q.explanation.chars().count() > Question::MAX_CHARS {
                issues.push(format!("questions[{}].explanation exceeds {} chars", i, Question::MAX_CHARS));
            }
        }
        issues
    }
}

/// One branch's contribution to the accumulated question collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub category: QuestionCategory,
    pub questions: Vec<Question>,
}

/// Wire shape of the query-rewriting response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueries {
    pub queries: Vec<String>,
}

impl Validate for SearchQueries {
    fn validate(&self) -> Vec<String> {
        if self.queries.iter().all(|q| q.trim().is_empty()) {
            vec!["no search queries generated".to_string()]
        } else {
            vec![]
        }
    }
}

// ---------------------------------------------------------------------------
// Generation requests
// ---------------------------------------------------------------------------

/// Binary input attached to a generation request (e.g. the uploaded PDF).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Content,
}

impl Attachment {
    pub fn pdf(data: Content) -> Self {
        Self {
            mime_type: "application/pdf".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// A single model call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub temperature: f32,
    pub system: String,
    pub prompt: String,
    pub attachment: Option<Attachment>,
    pub format: OutputFormat,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
            system: String::new(),
            prompt: String::new(),
            attachment: None,
            format: OutputFormat::Text,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn json(mut self) -> Self {
        self.format = OutputFormat::Json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record_json() -> serde_json::Value {
        serde_json::json!({
            "candidate_profile": {
                "name": "Jane Doe",
                "position": "BE",
                "objective": "Build reliable backends",
                "experience_years": "SENIOR",
                "education": [{
                    "institution": "KAIST",
                    "degree": "BSc",
                    "field_of_study": null,
                    "start_date": "2012-03",
                    "end_date": "2016-02",
                    "description": "Computer science"
                }]
            },
            "career_experiences": [{
                "company": "Acme",
                "company_description": "Payments",
                "employee_type": "EMPLOYEE",
                "job_level": null,
                "start_date": "2018-01",
                "end_date": null,
                "tech_stack": ["Rust", "PostgreSQL"],
                "architecture": null,
                "position": ["BE", "DEV_OPS"],
                "summary": "Led the ledger rewrite.",
                "situation": ["Legacy ledger"],
                "task": ["Replace it"],
                "action": ["Wrote a new one"],
                "result": ["p99 -70%"]
            }],
            "project_experiences": []
        })
    }

    #[test]
    fn test_resume_record_accepts_wire_aliases() {
        let record: ResumeRecord = serde_json::from_value(sample_record_json()).unwrap();
        assert_eq!(record.candidate_profile.position, Position::Be);
        assert_eq!(
            record.candidate_profile.experience_level,
            Some(ExperienceLevel::Senior)
        );
        let career = &record.career_experiences[0];
        assert_eq!(career.employment_type, EmploymentType::Employee);
        assert_eq!(career.detail.positions, vec![Position::Be, Position::DevOps]);
        assert!(record.validate().is_empty());
    }

    #[test]
    fn test_resume_record_rejects_unknown_position() {
        let mut json = sample_record_json();
        json["candidate_profile"]["position"] = serde_json::json!("MANAGER");
        assert!(serde_json::from_value::<ResumeRecord>(json).is_err());
    }

    #[test]
    fn test_resume_record_validation_issues() {
        let mut record: ResumeRecord = serde_json::from_value(sample_record_json()).unwrap();
        record.candidate_profile.name = "  ".into();
        record.career_experiences[0].company = String::new();
        let issues = record.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("name"));
    }

    #[test]
    fn test_verdict_reason_limit() {
        let ok = Verdict::rejected("Not a resume: it is an invoice.");
        assert!(ok.validate().is_empty());

        let long = Verdict::rejected("x".repeat(351));
        assert_eq!(long.validate().len(), 1);

        let parsed: Verdict =
            serde_json::from_str(r#"{"is_resume": true, "reason": "CV layout"}"#).unwrap();
        assert!(parsed.accepted);
    }

    #[test]
    fn test_generated_questions_validation() {
        let parsed: GeneratedQuestions = serde_json::from_str(
            r#"{"contents": [{"question": "Why Rust?", "explanation": "Stack choice"}]}"#,
        )
        .unwrap();
        assert!(parsed.validate().is_empty());

        let too_long = GeneratedQuestions {
            questions: vec![Question {
                question: "q".repeat(501),
                explanation: String::new(),
            }],
        };
        assert_eq!(too_long.validate().len(), 1);

        let empty = GeneratedQuestions { questions: vec![] };
        assert_eq!(empty.validate(), vec!["no questions generated".to_string()]);
    }

    #[test]
    fn test_metadata_skips_nulls() {
        let meta = DocumentMetadata::new(
            DocumentCategory::CareerExperience,
            &ScopeKey::new("user-42"),
            "0.0.1",
        )
        .with("company", "Acme")
        .with("end_date", serde_json::Value::Null);
        assert_eq!(meta.get_str("company"), Some("Acme"));
        assert!(!meta.extra.contains_key("end_date"));
        assert_eq!(meta.owner, "user-42");
    }

    #[test]
    fn test_question_category_order() {
        let names: Vec<&str> = QuestionCategory::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["experience", "tech", "cowork"]);
    }
}
