//! Render an extracted resume as indexable markdown documents.
//!
//! One document for the candidate profile, then one per career experience
//! and one per project experience, in record order. Every document carries
//! the owner scope and schema version; category-specific metadata is added
//! for retrieval and for the question pipeline.

use serde::Serialize;

use resumind_core::types::{
    CandidateProfile, CareerExperience, Document, DocumentCategory, DocumentMetadata,
    ExperienceDetail, Position, ProjectExperience, ResumeRecord, ScopeKey,
};

/// Where the documents came from and who owns them.
#[derive(Debug, Clone, Copy)]
pub struct Provenance<'a> {
    pub owner: &'a ScopeKey,
    pub schema_version: &'a str,
    /// Document reference the record was extracted from, if any.
    pub source: Option<&'a str>,
}

impl<'a> Provenance<'a> {
    fn metadata(&self, category: DocumentCategory) -> DocumentMetadata {
        DocumentMetadata::new(category, self.owner, self.schema_version)
            .with("source", self.source)
    }
}

pub fn to_documents(record: &ResumeRecord, provenance: Provenance<'_>) -> Vec<Document> {
    let name = &record.candidate_profile.name;
    let mut documents = Vec::with_capacity(
        1 + record.career_experiences.len() + record.project_experiences.len(),
    );
    documents.push(profile_document(&record.candidate_profile, provenance));
    documents.extend(
        record
            .career_experiences
            .iter()
            .map(|career| career_document(career, name, provenance)),
    );
    documents.extend(
        record
            .project_experiences
            .iter()
            .map(|project| project_document(project, name, provenance)),
    );
    documents
}

fn profile_document(profile: &CandidateProfile, provenance: Provenance<'_>) -> Document {
    let level = profile
        .experience_level
        .map(|l| l.as_str())
        .unwrap_or("N/A");

    let mut body = format!("# Candidate Profile: {}\n\n", profile.name);
    body.push_str("## Position\n");
    body.push_str(&format!("- **Desired Position:** {}\n", profile.position.as_str()));
    body.push_str(&format!("- **Experience Level:** {}\n\n", level));
    body.push_str(&format!("## Objective\n{}\n\n", profile.objective));
    body.push_str("## Education\n");
    for edu in &profile.education {
        body.push_str(&format!("- **Institution:** {}\n", edu.institution));
        body.push_str(&format!(
            "  - **Degree:** {}, {}\n",
            or_na(&edu.degree),
            or_na(&edu.field_of_study)
        ));
        body.push_str(&format!(
            "  - **Period:** {} - {}\n",
            or_unknown(&edu.start_date),
            or_unknown(&edu.end_date)
        ));
        if !edu.description.is_empty() {
            body.push_str(&format!("  - **Description:** {}\n", edu.description));
        }
    }

    let metadata = provenance
        .metadata(DocumentCategory::CandidateProfile)
        .with("candidate_name", profile.name.as_str())
        .with("position", profile.position.as_str())
        .with("objective", profile.objective.as_str())
        .with("experience_level", profile.experience_level.map(|l| l.as_str()));

    Document { body, metadata }
}

fn career_document(
    career: &CareerExperience,
    candidate_name: &str,
    provenance: Provenance<'_>,
) -> Document {
    let d = &career.detail;
    let mut body = format!("# Career Experience: {}\n\n", career.company);
    if career.company_description.is_empty() {
        body.push_str(&format!("- **Company:** {}\n", career.company));
    } else {
        body.push_str(&format!(
            "- **Company:** {} ({})\n",
            career.company, career.company_description
        ));
    }
    body.push_str(&format!("- **Position:** {}\n", positions(&d.positions)));
    body.push_str(&format!("- **Job Level:** {}\n", or_na(&career.job_level)));
    body.push_str(&format!(
        "- **Employment Type:** {}\n",
        label(&career.employment_type)
    ));
    body.push_str(&period(d));
    detail_sections(&mut body, d, "Achievements");

    let metadata = experience_metadata(
        provenance.metadata(DocumentCategory::CareerExperience),
        candidate_name,
        d,
    )
    .with("company", career.company.as_str());

    Document { body, metadata }
}

fn project_document(
    project: &ProjectExperience,
    candidate_name: &str,
    provenance: Provenance<'_>,
) -> Document {
    let d = &project.detail;
    let team = project
        .team_size
        .map(|n| n.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut body = format!("# Project Experience: {}\n\n", project.project_name);
    body.push_str(&format!("- **Project:** {}\n", project.project_name));
    body.push_str(&format!("- **Project Type:** {}\n", label(&project.project_type)));
    body.push_str(&format!("- **Team Size:** {}\n", team));
    body.push_str(&period(d));
    body.push_str(&format!("- **Position:** {}\n", positions(&d.positions)));
    detail_sections(&mut body, d, "Contributions");

    let metadata = experience_metadata(
        provenance.metadata(DocumentCategory::ProjectExperience),
        candidate_name,
        d,
    )
    .with("project_name", project.project_name.as_str());

    Document { body, metadata }
}

fn experience_metadata(
    metadata: DocumentMetadata,
    candidate_name: &str,
    d: &ExperienceDetail,
) -> DocumentMetadata {
    let position_labels: Vec<&str> = d.positions.iter().map(|p| p.as_str()).collect();
    metadata
        .with("candidate_name", candidate_name)
        .with("summary", d.summary.as_str())
        .with("positions", position_labels)
        .with("tech_stack", d.tech_stack.clone())
        .with("start_date", d.start_date.clone())
        .with("end_date", d.end_date.clone())
}

/// Summary, tech stack, STAR sections and the optional architecture diagram.
fn detail_sections(body: &mut String, d: &ExperienceDetail, star_heading: &str) {
    body.push_str(&format!("\n## Summary\n{}\n\n", d.summary));
    body.push_str("## Tech Stack\n");
    body.push_str(&bullets(&d.tech_stack));
    body.push_str(&format!("\n## {} (STAR Method)\n", star_heading));
    for (heading, items) in [
        ("Situation", &d.situation),
        ("Task", &d.task),
        ("Action", &d.action),
        ("Result", &d.result),
    ] {
        body.push_str(&format!("### {}\n", heading));
        body.push_str(&bullets(items));
    }
    if let Some(diagram) = d.architecture.as_deref().filter(|a| !a.trim().is_empty()) {
        body.push_str(&format!("\n## Architecture\n```mermaid\n{}\n```\n", diagram.trim()));
    }
}

fn bullets(items: &[String]) -> String {
    items.iter().map(|item| format!("- {}\n", item)).collect()
}

fn period(d: &ExperienceDetail) -> String {
    format!(
        "- **Period:** {} - {}\n",
        or_unknown(&d.start_date),
        or_unknown(&d.end_date)
    )
}

fn positions(list: &[Position]) -> String {
    if list.is_empty() {
        return "N/A".to_string();
    }
    list.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
}

/// The serialized name of a unit enum variant.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => "N/A".to_string(),
    }
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumind_core::types::{EmploymentType, ExperienceLevel, ProjectType};

    fn record() -> ResumeRecord {
        ResumeRecord {
            candidate_profile: CandidateProfile {
                name: "Jane Doe".into(),
                position: Position::Be,
                objective: "Build reliable payment systems".into(),
                experience_level: Some(ExperienceLevel::Senior),
                education: vec![],
            },
            career_experiences: vec![CareerExperience {
                company: "Acme Pay".into(),
                company_description: "Fintech".into(),
                employment_type: EmploymentType::Employee,
                job_level: None,
                detail: ExperienceDetail {
                    start_date: Some("2020-01".into()),
                    end_date: None,
                    tech_stack: vec!["Rust".into(), "Kafka".into()],
                    architecture: Some("graph TD; A-->B".into()),
                    positions: vec![Position::Be],
                    summary: "Settlement engine".into(),
                    situation: vec!["Batch jobs missed SLAs".into()],
                    task: vec![],
                    action: vec!["Moved to streaming".into()],
                    result: vec!["Latency down 90%".into()],
                },
            }],
            project_experiences: vec![ProjectExperience {
                project_name: "tinykv".into(),
                project_type: ProjectType::OpenSource,
                team_size: Some(3),
                detail: ExperienceDetail {
                    summary: "Embedded KV store".into(),
                    ..ExperienceDetail::default()
                },
            }],
        }
    }

    #[test]
    fn test_one_document_per_section_in_order() {
        let owner = ScopeKey::new("user-42");
        let docs = to_documents(
            &record(),
            Provenance {
                owner: &owner,
                schema_version: "0.0.1",
                source: Some("user-42/resume.pdf"),
            },
        );

        let categories: Vec<_> = docs.iter().map(|d| d.metadata.category).collect();
        assert_eq!(
            categories,
            vec![
                DocumentCategory::CandidateProfile,
                DocumentCategory::CareerExperience,
                DocumentCategory::ProjectExperience,
            ]
        );
        for doc in &docs {
            assert_eq!(doc.metadata.owner, "user-42");
            assert_eq!(doc.metadata.schema_version, "0.0.1");
            assert_eq!(doc.metadata.get_str("source"), Some("user-42/resume.pdf"));
            assert_eq!(doc.metadata.get_str("candidate_name"), Some("Jane Doe"));
        }
    }

    #[test]
    fn test_career_body_and_metadata() {
        let owner = ScopeKey::new("user-42");
        let docs = to_documents(
            &record(),
            Provenance {
                owner: &owner,
                schema_version: "0.0.1",
                source: None,
            },
        );
        let career = &docs[1];
        assert!(career.body.starts_with("# Career Experience: Acme Pay"));
        assert!(career.body.contains("- **Employment Type:** EMPLOYEE"));
        assert!(career.body.contains("- **Period:** 2020-01 - ?"));
        assert!(career.body.contains("### Situation\n- Batch jobs missed SLAs\n"));
        assert!(career.body.contains("```mermaid\ngraph TD; A-->B\n```"));
        assert_eq!(career.metadata.get_str("company"), Some("Acme Pay"));
        assert_eq!(
            career.metadata.extra["tech_stack"],
            serde_json::json!(["Rust", "Kafka"])
        );
        assert!(!career.metadata.extra.contains_key("end_date"));
        assert!(!career.metadata.extra.contains_key("source"));
    }

    #[test]
    fn test_project_without_architecture() {
        let owner = ScopeKey::new("user-42");
        let docs = to_documents(
            &record(),
            Provenance {
                owner: &owner,
                schema_version: "0.0.1",
                source: None,
            },
        );
        let project = &docs[2];
        assert!(project.body.contains("- **Project Type:** OPEN_SOURCE"));
        assert!(project.body.contains("- **Team Size:** 3"));
        assert!(project.body.contains("- **Position:** N/A"));
        assert!(!project.body.contains("mermaid"));
        assert_eq!(project.metadata.get_str("project_name"), Some("tinykv"));
    }
}
