//! RAG Context Builder.
//!
//! Builds the prompt pair for a query by:
//! 1. Scoring every stored chunk against the query
//! 2. Keeping the top-k chunks that clear the similarity threshold
//! 3. Formatting them into a size-bounded context block with sources
//! 4. Rendering the system prompt (default persona or selected template)

use serde::{Deserialize, Serialize};

use super::scorer;
use super::store::MemoryChunk;
use crate::llm::tokens::estimate_tokens;
use crate::templates::{render_template, PlaceholderValues, PromptTemplate};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are WebCopilot, a helpful assistant that answers \
questions about the web page the user is currently viewing. Answer concisely and accurately. \
If the page does not contain the answer, say so instead of guessing.";

pub const CONTEXT_INSTRUCTION: &str = "Use the provided context to answer.\n\n";

/// Configuration for context building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBuilderConfig {
    /// Maximum number of chunks to include
    pub top_k: usize,
    /// Maximum total context length in characters
    pub max_context_length: usize,
    /// Minimum relevance score a chunk needs to be used
    pub similarity_threshold: f64,
    /// Share of a token budget that context may occupy; the rest is left
    /// for the model's response
    pub usable_budget_ratio: f64,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_length: 4000,
            similarity_threshold: 0.7,
            usable_budget_ratio: 0.7,
        }
    }
}

/// A chunk with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk: MemoryChunk,
    pub score: f64,
}

/// Everything the gateway needs for one RAG request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagContext {
    pub query: String,
    pub relevant_chunks: Vec<ScoredChunk>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub estimated_tokens: usize,
}

/// Stateless builder; holds only its configuration.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextBuilderConfig {
        &self.config
    }

    /// Scores all chunks, keeps the top-k, then drops those under the threshold.
    ///
    /// An empty result is normal: the threshold is strict, and short queries
    /// often fail it even against relevant chunks.
    pub fn retrieve(&self, query: &str, chunks: &[MemoryChunk]) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .map(|chunk| ScoredChunk {
                score: scorer::score(query, &chunk.chunk_text),
                chunk: chunk.clone(),
            })
            .collect();

        // Stable sort keeps stored order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.config.top_k);
        scored.retain(|sc| sc.score >= self.config.similarity_threshold);
        scored
    }

    /// Concatenates chunks in the given order as `[Source: url]` blocks.
    ///
    /// Stops at the first chunk that would push the block past
    /// `max_context_length`; chunks are never cut.
    pub fn assemble_context(&self, scored_chunks: &[ScoredChunk]) -> String {
        self.assemble_context_counted(scored_chunks).0
    }

    /// `assemble_context` plus the number of chunks that made it in.
    pub fn assemble_context_counted(&self, scored_chunks: &[ScoredChunk]) -> (String, usize) {
        let max_length = self.config.max_context_length;
        let mut context = String::new();
        let mut current_length = 0;
        let mut included = 0;

        for sc in scored_chunks {
            let entry = format!(
                "[Source: {}]\n{}\n\n",
                sc.chunk.source_url, sc.chunk.chunk_text
            );
            let entry_length = entry.chars().count();
            if current_length + entry_length > max_length {
                break;
            }
            context.push_str(&entry);
            current_length += entry_length;
            included += 1;
        }

        (context, included)
    }

    /// Default persona or rendered template, followed by the context block.
    pub fn system_prompt(
        &self,
        template: Option<&PromptTemplate>,
        context_block: &str,
        values: &PlaceholderValues,
    ) -> String {
        let (mut prompt, consumed_context) = match template {
            Some(template) => {
                let values = PlaceholderValues {
                    context: context_block.to_string(),
                    ..values.clone()
                };
                (
                    render_template(&template.prompt, &values),
                    template.prompt.contains("{context}"),
                )
            }
            None => (DEFAULT_SYSTEM_PROMPT.to_string(), false),
        };

        if !context_block.trim().is_empty() && !consumed_context {
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(context_block.trim_end());
        }
        prompt
    }

    pub fn user_prompt(&self, query: &str, has_context: bool) -> String {
        if has_context {
            format!("{}{}", CONTEXT_INSTRUCTION, query)
        } else {
            query.to_string()
        }
    }

    /// Full pipeline: retrieval, assembly and prompt rendering.
    pub fn build(
        &self,
        query: &str,
        chunks: &[MemoryChunk],
        template: Option<&PromptTemplate>,
        values: &PlaceholderValues,
    ) -> RagContext {
        let relevant_chunks = self.retrieve(query, chunks);
        let context_block = self.assemble_context(&relevant_chunks);
        let has_context = !context_block.is_empty();

        let system_prompt = self.system_prompt(template, &context_block, values);
        let user_prompt = self.user_prompt(query, has_context);
        let total_chars = system_prompt.chars().count() + user_prompt.chars().count();

        RagContext {
            query: query.to_string(),
            relevant_chunks,
            system_prompt,
            user_prompt,
            estimated_tokens: total_chars.div_ceil(crate::llm::tokens::CHARS_PER_TOKEN),
        }
    }

    /// Greedy prefix of `chunks` fitting in the usable share of `token_budget`.
    pub fn optimize_for_budget<'a>(
        &self,
        chunks: &'a [ScoredChunk],
        token_budget: usize,
    ) -> &'a [ScoredChunk] {
        let usable = (token_budget as f64 * self.config.usable_budget_ratio).floor() as usize;
        let mut running = 0;
        let mut taken = 0;

        for sc in chunks {
            let tokens = estimate_tokens(&sc.chunk.chunk_text);
            if running + tokens > usable {
                break;
            }
            running += tokens;
            taken += 1;
        }

        &chunks[..taken]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_chunk(text: &str, source: &str, index: usize) -> MemoryChunk {
        MemoryChunk {
            id: format!("{}-{}", source, index),
            source_url: source.to_string(),
            chunk_text: text.to_string(),
            embedding: Vec::new(),
            chunk_index: index,
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    fn scored(text: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: make_chunk(text, "https://a.com", 0),
            score,
        }
    }

    fn template(prompt: &str) -> PromptTemplate {
        PromptTemplate {
            id: "t".to_string(),
            title: "T".to_string(),
            prompt: prompt.to_string(),
            description: None,
            is_default: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn relevant_chunk_is_selected() {
        let builder = ContextBuilder::default();
        let chunks = vec![
            make_chunk("Free snacks and a friendly office dog.", "https://a.com/jobs/1", 0),
            make_chunk(
                "The role requires 5 years of experience with distributed systems.",
                "https://a.com/jobs/1",
                1,
            ),
        ];

        let result = builder.retrieve("experience distributed systems", &chunks);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk.chunk_index, 1);
        assert!(result[0].score > 0.9);
    }

    #[test]
    fn strict_threshold_can_return_nothing_for_relevant_text() {
        // "rust" matches, but "do", "we" and "use" dilute the score to 0.25.
        let builder = ContextBuilder::default();
        let chunks = vec![make_chunk("We build everything in Rust", "https://a.com", 0)];
        assert!(builder.retrieve("do we use rust", &chunks).is_empty());
    }

    #[test]
    fn top_k_is_applied_before_threshold() {
        let builder = ContextBuilder::new(ContextBuilderConfig {
            top_k: 2,
            ..Default::default()
        });
        let chunks: Vec<MemoryChunk> = (0..4)
            .map(|i| make_chunk("distributed systems", "https://a.com", i))
            .collect();

        let result = builder.retrieve("distributed systems", &chunks);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].chunk.chunk_index, 0);
        assert_eq!(result[1].chunk.chunk_index, 1);
    }

    #[test]
    fn assembled_context_respects_max_length() {
        let builder = ContextBuilder::new(ContextBuilderConfig {
            max_context_length: 120,
            ..Default::default()
        });
        let chunks = vec![
            scored(&"a".repeat(50), 1.0),
            scored(&"b".repeat(50), 0.9),
            scored(&"c".repeat(5), 0.8),
        ];

        let context = builder.assemble_context(&chunks);

        assert!(context.chars().count() <= 120);
        assert!(context.contains(&"a".repeat(50)));
        // The second entry would overflow, so assembly stops there.
        assert!(!context.contains('b'));
        assert!(!context.contains("ccccc"));
        assert!(context.starts_with("[Source: https://a.com]\n"));
        assert_eq!(builder.assemble_context_counted(&chunks), (context, 1));
    }

    #[test]
    fn default_prompt_gets_context_appended() {
        let builder = ContextBuilder::default();
        let prompt = builder.system_prompt(None, "[Source: u]\nbody\n\n", &PlaceholderValues::default());
        assert!(prompt.starts_with(DEFAULT_SYSTEM_PROMPT));
        assert!(prompt.ends_with("Context:\n[Source: u]\nbody"));
    }

    #[test]
    fn template_context_placeholder_consumes_block() {
        let builder = ContextBuilder::default();
        let values = PlaceholderValues {
            page_title: "Rust Engineer".to_string(),
            ..Default::default()
        };
        let prompt = builder.system_prompt(
            Some(&template("Role: {page_title}\n{context}")),
            "[Source: u]\nbody\n\n",
            &values,
        );
        assert!(prompt.starts_with("Role: Rust Engineer\n[Source: u]\nbody"));
        assert!(!prompt.contains("Context:\n"));
    }

    #[test]
    fn build_reports_token_estimate_and_context_instruction() {
        let builder = ContextBuilder::default();
        let chunks = vec![make_chunk(
            "The role requires 5 years of experience with distributed systems.",
            "https://a.com/jobs/1",
            0,
        )];

        let rag = builder.build(
            "experience distributed systems",
            &chunks,
            None,
            &PlaceholderValues::default(),
        );

        assert_eq!(rag.relevant_chunks.len(), 1);
        assert!(rag.user_prompt.starts_with(CONTEXT_INSTRUCTION));
        let total = rag.system_prompt.chars().count() + rag.user_prompt.chars().count();
        assert_eq!(rag.estimated_tokens, total.div_ceil(4));
    }

    #[test]
    fn build_without_matches_keeps_query_verbatim() {
        let builder = ContextBuilder::default();
        let rag = builder.build("salary range", &[], None, &PlaceholderValues::default());
        assert!(rag.relevant_chunks.is_empty());
        assert_eq!(rag.user_prompt, "salary range");
        assert_eq!(rag.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn budget_optimization_reserves_response_share() {
        let builder = ContextBuilder::default();
        // 40 chars = 10 tokens each; budget 30 -> usable 21 tokens -> two chunks.
        let chunks = vec![
            scored(&"x".repeat(40), 1.0),
            scored(&"y".repeat(40), 0.9),
            scored(&"z".repeat(40), 0.8),
        ];
        assert_eq!(builder.optimize_for_budget(&chunks, 30).len(), 2);
        assert_eq!(builder.optimize_for_budget(&chunks, 10).len(), 0);
    }

    #[test]
    fn budget_optimization_stops_at_first_overflow() {
        let builder = ContextBuilder::default();
        let chunks = vec![
            scored(&"x".repeat(400), 1.0),
            scored(&"y".repeat(4), 0.9),
        ];
        // The large first chunk overflows, so the small one is not considered.
        assert!(builder.optimize_for_budget(&chunks, 100).is_empty());
    }
}
