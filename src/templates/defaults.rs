use chrono::{DateTime, Utc};

use super::PromptTemplate;

pub fn generate_default_templates(now: DateTime<Utc>) -> Vec<PromptTemplate> {
    let template = |id: &str, title: &str, description: &str, prompt: &str| PromptTemplate {
        id: id.to_string(),
        title: title.to_string(),
        prompt: prompt.to_string(),
        description: Some(description.to_string()),
        is_default: true,
        created_at: now,
        updated_at: now,
    };

    vec![
        template(
            "default-summarize",
            "Summarize page",
            "Short summary of the current page.",
            "You are WebCopilot. Summarize the page \"{page_title}\" for the user in a few \
             bullet points, keeping only facts stated on the page.\n\n{context}",
        ),
        template(
            "default-job-fit",
            "Job fit analysis",
            "Compare a job posting against the user's background.",
            "You are a career assistant helping {user_name}. Analyze the job posting \
             \"{page_title}\" at {company} ({job_url}). Job description:\n{job_description}\n\n\
             List the key requirements, then point out how a candidate can show they meet \
             each one.\n\n{context}",
        ),
        template(
            "default-cover-letter",
            "Cover letter draft",
            "Draft a cover letter for the posting on this page.",
            "You are a professional writer. Draft a concise cover letter from {user_name} for \
             the role \"{page_title}\" at {company}. Ground every claim about the role in this \
             description:\n{job_description}\n\n{context}",
        ),
        template(
            "default-explain-selection",
            "Explain selection",
            "Explain the highlighted text in plain language.",
            "You are a patient teacher. Explain the following passage from \"{page_title}\" \
             in plain language:\n\"{selection}\"\n\n{context}",
        ),
    ]
}
