//! Embedding matcher: one vector per tool, linear cosine scan per query.

use super::ScoredId;
use crate::error::{AppError, Result};
use crate::inference::{EmbeddingBackend, EmbeddingConfig, TextEmbedder};
use crate::ingestion::{build_search_text, ToolDescriptor};
use crate::persistence::EmbeddingCache;
use ndarray::ArrayView1;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a bulk index.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    pub from_cache: usize,
    pub failed: usize,
}

pub struct EmbeddingMatcher {
    backend: Arc<dyn EmbeddingBackend>,
    config: EmbeddingConfig,
    embedder: RwLock<Option<Arc<dyn TextEmbedder>>>,
    vectors: RwLock<Arc<HashMap<String, Vec<f32>>>>,
}

impl EmbeddingMatcher {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: EmbeddingConfig) -> Self {
        Self {
            backend,
            config,
            embedder: RwLock::new(None),
            vectors: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Load the model on the blocking pool. On error the matcher stays
    /// uninitialized and every `embed` fails with `NotInitialized`.
    pub async fn initialize(&self) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();

        let embedder = tokio::task::spawn_blocking(move || backend.load(&config))
            .await
            .map_err(|e| AppError::ModelError(format!("Model load task join error: {}", e)))??;

        tracing::info!(
            model = %self.config.model,
            dimension = embedder.dimension(),
            "Embedding backend ready"
        );
        *self.embedder.write() = Some(embedder);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.embedder.read().is_some()
    }

    fn embedder(&self) -> Result<Arc<dyn TextEmbedder>> {
        self.embedder.read().clone().ok_or(AppError::NotInitialized)
    }

    /// Embed `text` on the blocking pool.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.embedder()?;
        let text = text.to_string();

        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| AppError::ModelError(format!("Embedding task join error: {}", e)))?
    }

    /// Vector for `tool`, from `cache` when current, otherwise freshly
    /// embedded and written back to `cache`. The bool reports a cache hit.
    async fn vector_for(
        &self,
        tool: &ToolDescriptor,
        cache: Option<&EmbeddingCache>,
    ) -> Result<(Vec<f32>, bool)> {
        if let Some(vector) = cache.and_then(|c| c.get(tool)) {
            return Ok((vector, true));
        }

        let vector = self.embed(&build_search_text(tool)).await?;
        if let Some(cache) = cache {
            cache.set(tool, vector.clone());
        }
        Ok((vector, false))
    }

    /// Index or re-index one tool. Returns true when the vector came from cache.
    pub async fn index_tool(
        &self,
        tool: &ToolDescriptor,
        cache: Option<&EmbeddingCache>,
    ) -> Result<bool> {
        let (vector, cached) = self.vector_for(tool, cache).await?;

        let mut guard = self.vectors.write();
        let mut next = HashMap::clone(&guard);
        next.insert(tool.qualified_id.clone(), vector);
        *guard = Arc::new(next);
        Ok(cached)
    }

    /// Replace every vector with ones for `tools`. Tools that fail to embed
    /// are logged and left out; the swap happens once at the end.
    pub async fn replace_all(
        &self,
        tools: &[ToolDescriptor],
        cache: Option<&EmbeddingCache>,
    ) -> IndexReport {
        let mut report = IndexReport::default();
        let mut next = HashMap::with_capacity(tools.len());

        for tool in tools {
            match self.vector_for(tool, cache).await {
                Ok((vector, cached)) => {
                    next.insert(tool.qualified_id.clone(), vector);
                    report.indexed += 1;
                    if cached {
                        report.from_cache += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(tool = %tool.qualified_id, error = %e, "Failed to embed tool");
                    report.failed += 1;
                }
            }
        }

        *self.vectors.write() = Arc::new(next);
        report
    }

    pub fn remove(&self, qualified_id: &str) -> bool {
        let mut guard = self.vectors.write();
        if !guard.contains_key(qualified_id) {
            return false;
        }
        let mut next = HashMap::clone(&guard);
        next.remove(qualified_id);
        *guard = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embed `query` and return the `limit` most similar tools.
    pub async fn find_similar(&self, query: &str, limit: usize) -> Result<Vec<ScoredId>> {
        let query_vector = self.embed(query).await?;
        Ok(self.similar_to(&query_vector, limit))
    }

    /// Rank indexed tools against an already-embedded query.
    pub fn similar_to(&self, query_vector: &[f32], limit: usize) -> Vec<ScoredId> {
        let vectors = Arc::clone(&*self.vectors.read());

        let mut results: Vec<ScoredId> = vectors
            .iter()
            .map(|(id, vector)| ScoredId::new(id.clone(), cosine_similarity(query_vector, vector)))
            .collect();

        super::sort_scored(&mut results);
        results.truncate(limit);
        results
    }
}

/// Cosine similarity that does not trust its inputs to be normalized.
/// Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);

    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (a.dot(&b) / denom).clamp(-1.0, 1.0)
}
