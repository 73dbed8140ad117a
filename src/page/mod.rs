//! Extracted page records.
//!
//! Extraction itself happens in the extension; the backend receives the
//! finished record and only normalizes it (content cap, change hash).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on stored page text, in characters.
pub const MAX_CONTENT_CHARS: usize = 50_000;

/// Characters of content mixed into the change-detection hash.
const HASH_CONTENT_PREFIX: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<JobPosting>,
    pub extracted_at: DateTime<Utc>,
    pub content_hash: String,
}

/// Structured job-posting record lifted from the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobPosting {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub employment_type: Option<String>,
    pub date_posted: Option<String>,
    pub salary: Option<String>,
}

/// Page fields as delivered by the extractor, before normalization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPage {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub structured_data: Option<JobPosting>,
}

/// Text the user last highlighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub text: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

impl PageContent {
    pub fn from_raw(raw: RawPage) -> Self {
        Self::from_raw_at(raw, Utc::now())
    }

    pub fn from_raw_at(raw: RawPage, extracted_at: DateTime<Utc>) -> Self {
        let content = truncate_chars(raw.content.trim(), MAX_CONTENT_CHARS).to_string();
        let content_hash = content_hash(&raw.url, &raw.title, &content);
        let company = raw
            .company
            .filter(|c| !c.trim().is_empty())
            .or_else(|| {
                raw.structured_data
                    .as_ref()
                    .and_then(|job| job.company.clone())
            });

        Self {
            url: raw.url,
            title: raw.title,
            company,
            description: raw.description,
            content,
            structured_data: raw.structured_data,
            extracted_at,
            content_hash,
        }
    }

    /// Job description when a posting was recognized, otherwise the page description.
    pub fn job_description(&self) -> &str {
        self.structured_data
            .as_ref()
            .and_then(|job| job.description.as_deref())
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&self.description)
    }

    pub fn is_job_posting(&self) -> bool {
        self.structured_data.is_some()
    }
}

/// 32-bit rolling hash over url, title and the start of the content.
///
/// Only used to notice that a page changed between extractions.
pub fn content_hash(url: &str, title: &str, content: &str) -> String {
    let prefix = truncate_chars(content, HASH_CONTENT_PREFIX);
    let hash = url
        .chars()
        .chain(title.chars())
        .chain(prefix.chars())
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32));
    format!("{:08x}", hash)
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(content: &str) -> RawPage {
        RawPage {
            url: "https://jobs.example.com/1".to_string(),
            title: "Backend Engineer".to_string(),
            company: None,
            description: "Build things".to_string(),
            content: content.to_string(),
            structured_data: None,
        }
    }

    #[test]
    fn hash_is_stable_and_tracks_changes() {
        let a = content_hash("u", "t", "body");
        assert_eq!(a, content_hash("u", "t", "body"));
        assert_ne!(a, content_hash("u", "t", "body!"));
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn hash_ignores_content_past_prefix() {
        let base = "x".repeat(HASH_CONTENT_PREFIX);
        let a = content_hash("u", "t", &format!("{}tail-one", base));
        let b = content_hash("u", "t", &format!("{}tail-two", base));
        assert_eq!(a, b);
    }

    #[test]
    fn content_is_capped_on_char_boundary() {
        let long = "é".repeat(MAX_CONTENT_CHARS + 10);
        let page = PageContent::from_raw(raw(&long));
        assert_eq!(page.content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn company_falls_back_to_structured_record() {
        let mut input = raw("text");
        input.structured_data = Some(JobPosting {
            company: Some("Acme".to_string()),
            description: Some("Own the ingestion pipeline".to_string()),
            ..Default::default()
        });
        let page = PageContent::from_raw(input);
        assert_eq!(page.company.as_deref(), Some("Acme"));
        assert_eq!(page.job_description(), "Own the ingestion pipeline");
        assert!(page.is_job_posting());
    }

    #[test]
    fn truncate_chars_handles_short_text() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
