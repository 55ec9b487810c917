//! Default prompt templates. Placeholders use `{name}` and are filled by
//! [`render`]; unknown placeholders are left untouched.

pub const CLASSIFICATION: &str = r#"You are a recruiter screening uploaded files.
Decide whether the attached document is a job application document: a resume, a career description, a portfolio or a cover letter.

Signals that it is:
- personal identification (name, contact details, e-mail, GitHub profile)
- education and work experience
- projects with concrete roles and outcomes
- a technology stack
- architecture diagrams, screenshots or benchmark charts

Reply with a JSON object: {"accepted": true|false, "reason": "<at most 350 characters>"}."#;

pub const EXTRACTION: &str = r#"You are an expert at parsing developer resumes and career documents.
Extract the attached document into a JSON object with the keys
"candidate_profile", "career_experiences" and "project_experiences".

Rules:
- Dates use YYYY-MM.
- Keep professional career experience and side projects apart.
- Summarize each experience and fill the situation/task/action/result lists where the document allows.
- Lists with no matching content are empty lists, optional single values are null.
- Never guess. Omit an experience entirely rather than invent its company or name.
- Positions are one of FE, BE, FS, DEV_OPS, DATA_SCIENTIST, DATA_ENGINEER, AI_ENGINEER, OTHER.
- Experience level is one of JUNIOR, SENIOR, STAFF, PRINCIPAL."#;

pub const QUESTION_BASE: &str = r#"You are a CTO-level engineer with twenty years of interviewing experience.
Write personalized interview preparation questions for the developer described below.
Study the projects, technologies, responsibilities and results before writing.

Candidate: {candidate_name}
Desired position: {position}
Objective: {objective}

Experience:
{experience}

Reply with a JSON object: {"questions": [{"question": "...", "explanation": "..."}]}.
Each question and each explanation is at most 500 characters.
"#;

pub const EXPERIENCE_QUESTIONS: &str = r#"Focus: the candidate's understanding of the project as a whole and their own contribution.
Ask about background and goals, personal role, memorable achievements, obstacles and lessons learned."#;

pub const TECH_QUESTIONS: &str = r#"Focus: the technologies in the resume.
Ask about technology choices, performance work, troubleshooting and the core principles of the key technologies, tailored to the candidate's position."#;

pub const COWORK_QUESTIONS: &str = r#"Focus: teamwork.
Ask about communication, conflict resolution, cross-functional collaboration, project management and code review."#;

pub const QUERY: &str = r#"Generate up to {max_queries} search queries that retrieve passages from the user's resume documents relevant to their question.
Reply with a JSON object: {"queries": ["..."]}."#;

pub const RESPONSE: &str = r#"You are a senior engineer helping a developer prepare for interviews.
Answer the question using only the retrieved context from the developer's own documents. Think step by step.

Retrieved context:
{context}"#;

/// Returned by the chat pipeline when retrieval finds nothing to ground an answer on.
pub const CANNOT_ANSWER: &str = "I'm sorry, but I couldn't find any relevant information in your documents to answer your question. Please try asking something else.";

/// Fill `{key}` placeholders in `template` in a single pass.
///
/// Substituted values are written verbatim and never scanned again. Unknown
/// placeholders are left as they are.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail[1..].find('}').and_then(|close| {
            let key = &tail[1..=close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close + 2))
        });
        match value {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
