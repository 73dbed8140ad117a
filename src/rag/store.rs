//! Chunk storage for retrieval.
//!
//! Pages are split into `MemoryChunk`s on ingestion. Chunks of one source
//! URL are written together, never edited afterwards, and dropped together
//! when that URL is re-ingested or cleared.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::chunker::{chunk_text, ChunkerConfig};
use super::embedding::{char_frequency_embedding, Embedder};
use crate::core::errors::ApiError;
use crate::page::PageContent;
use crate::storage::{self, KvStore, KEY_MEMORY_CHUNKS};

const MAX_KEYWORD_TAGS: usize = 5;

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z][A-Za-z0-9+#]{3,}").expect("keyword regex must compile")
});

const STOPWORDS: [&str; 24] = [
    "about", "after", "also", "been", "being", "from", "have", "into", "more", "other", "over",
    "such", "than", "that", "their", "there", "these", "they", "this", "what", "when", "which",
    "will", "with",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryChunk {
    pub id: String,
    pub source_url: String,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn KvStore>,
    config: ChunkerConfig,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn KvStore>, config: ChunkerConfig) -> Self {
        Self { store, config }
    }

    /// Splits `page` into chunks, embeds them and replaces any chunks
    /// previously stored for the page URL.
    ///
    /// If the embedder fails, the chunks are stored with local fallback
    /// vectors instead of failing the ingestion.
    pub async fn ingest(
        &self,
        page: &PageContent,
        embedder: &dyn Embedder,
    ) -> Result<Vec<MemoryChunk>, ApiError> {
        let texts: Vec<String> = chunk_text(&page.content, &self.config)
            .map(str::to_string)
            .collect();

        let embeddings = match embedder.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                tracing::warn!(
                    "Embedding with {} failed, using local fallback: {}",
                    embedder.name(),
                    err
                );
                texts.iter().map(|t| char_frequency_embedding(t)).collect()
            }
        };

        let shared_tags = page_tags(page);
        let created_at = Utc::now();
        let chunks: Vec<MemoryChunk> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (chunk_text, embedding))| {
                let mut tags = keyword_tags(&chunk_text);
                tags.extend(shared_tags.iter().cloned());
                MemoryChunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    source_url: page.url.clone(),
                    chunk_text,
                    embedding,
                    chunk_index,
                    created_at,
                    tags,
                }
            })
            .collect();

        let mut all = self.all_chunks().await?;
        all.retain(|chunk| chunk.source_url != page.url);
        all.extend(chunks.iter().cloned());
        storage::save(self.store.as_ref(), KEY_MEMORY_CHUNKS, &all).await?;

        tracing::info!(
            "Stored {} chunks for {} (embedder: {})",
            chunks.len(),
            page.url,
            embedder.name()
        );
        Ok(chunks)
    }

    pub async fn chunks_for_url(&self, url: &str) -> Result<Vec<MemoryChunk>, ApiError> {
        let mut chunks: Vec<MemoryChunk> = self
            .all_chunks()
            .await?
            .into_iter()
            .filter(|chunk| chunk.source_url == url)
            .collect();
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    /// Deletes every chunk from `url`. Returns how many were removed.
    pub async fn clear_url(&self, url: &str) -> Result<usize, ApiError> {
        let mut all = self.all_chunks().await?;
        let before = all.len();
        all.retain(|chunk| chunk.source_url != url);
        let removed = before - all.len();
        if removed > 0 {
            storage::save(self.store.as_ref(), KEY_MEMORY_CHUNKS, &all).await?;
        }
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<(), ApiError> {
        self.store.remove(KEY_MEMORY_CHUNKS).await
    }

    pub async fn count(&self) -> Result<usize, ApiError> {
        Ok(self.all_chunks().await?.len())
    }

    /// Every stored chunk, across all source URLs.
    pub async fn all_chunks(&self) -> Result<Vec<MemoryChunk>, ApiError> {
        Ok(storage::load(self.store.as_ref(), KEY_MEMORY_CHUNKS)
            .await?
            .unwrap_or_default())
    }
}

/// Most frequent non-stopword terms of the chunk, most frequent first.
fn keyword_tags(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, m) in KEYWORD_RE.find_iter(text).enumerate() {
        let word = m.as_str().to_lowercase();
        if STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    // Ties keep first-appearance order.
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(MAX_KEYWORD_TAGS)
        .map(|(word, _)| word)
        .collect()
}

fn page_tags(page: &PageContent) -> Vec<String> {
    let mut tags = vec![if page.is_job_posting() {
        "type:job_posting".to_string()
    } else {
        "type:webpage".to_string()
    }];
    if let Some(slug) = page.company.as_deref().map(slugify).filter(|s| !s.is_empty()) {
        tags.push(format!("company:{}", slug));
    }
    tags
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
