//! Hybrid search coordinator.
//!
//! Runs the lexical and embedding matchers side by side and fuses their
//! scores as `alpha * semantic + (1 - alpha) * fuzzy`. When the embedding
//! backend is unavailable, alpha is forced to 0 so fuzzy scores pass through
//! unchanged and stay comparable to the threshold.

use super::{lexical::LexicalMatcher, semantic::EmbeddingMatcher, ScoredId};
use crate::error::{AppError, Result};
use crate::inference::{EmbeddingBackend, EmbeddingConfig};
use crate::ingestion::ToolDescriptor;
use crate::persistence::{backend_set_hash, EmbeddingCache};
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Span;

const SEMANTIC_STRONG: f32 = 0.7;
const SEMANTIC_MATCH: f32 = 0.5;
const KEYWORD_STRONG: f32 = 0.8;
const KEYWORD_MATCH: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Weight of the semantic score in `[0, 1]`
    pub alpha: f32,
    pub default_limit: usize,
    pub default_threshold: f32,
    /// When false the embedding backend is never loaded
    pub semantic_enabled: bool,
    /// Directory for the embedding cache files
    pub cache_dir: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            default_limit: 10,
            default_threshold: 0.3,
            semantic_enabled: true,
            cache_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f32,
    pub fuzzy: f32,
    pub combined: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub tool: ToolDescriptor,
    pub score: f32,
    pub score_breakdown: ScoreBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub tools_indexed: usize,
    pub cached_embeddings: usize,
    pub model: String,
    pub semantic_available: bool,
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// One tool's fused score before it is joined with its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub qualified_id: String,
    pub breakdown: ScoreBreakdown,
}

/// Fuse the two candidate lists.
///
/// A tool missing from one list contributes 0 for that component. Results
/// with `combined >= threshold` are kept, highest first.
pub fn fuse_scores(
    semantic: &[ScoredId],
    fuzzy: &[ScoredId],
    alpha: f32,
    threshold: f32,
) -> Vec<FusedScore> {
    let mut parts: HashMap<&str, (f32, f32)> = HashMap::new();

    for hit in semantic {
        let entry = parts.entry(hit.qualified_id.as_str()).or_default();
        entry.0 = entry.0.max(hit.score);
    }
    for hit in fuzzy {
        let entry = parts.entry(hit.qualified_id.as_str()).or_default();
        entry.1 = entry.1.max(hit.score);
    }

    let mut fused: Vec<FusedScore> = parts
        .into_iter()
        .map(|(id, (semantic, fuzzy))| FusedScore {
            qualified_id: id.to_string(),
            breakdown: ScoreBreakdown {
                semantic,
                fuzzy,
                combined: alpha * semantic + (1.0 - alpha) * fuzzy,
            },
        })
        .filter(|f| f.breakdown.combined >= threshold)
        .collect();

    fused.sort_by(|a, b| {
        b.breakdown
            .combined
            .partial_cmp(&a.breakdown.combined)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| a.qualified_id.cmp(&b.qualified_id))
    });
    fused
}

/// Keep the best-scoring result per tool, sort descending, cap at `limit`.
pub fn dedupe_results(results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    for result in results {
        match best.get(&result.tool.qualified_id) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(result.tool.qualified_id.clone(), result);
            }
        }
    }

    let mut deduped: Vec<SearchResult> = best.into_values().collect();
    deduped.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| a.tool.qualified_id.cmp(&b.tool.qualified_id))
    });
    deduped.truncate(limit);
    deduped
}

/// Human-readable explanation of a score. Not used for ranking.
pub fn describe_match(breakdown: &ScoreBreakdown) -> Option<String> {
    let mut reasons = Vec::new();

    if breakdown.semantic >= SEMANTIC_STRONG {
        reasons.push("strong semantic match");
    } else if breakdown.semantic >= SEMANTIC_MATCH {
        reasons.push("semantic match");
    }

    if breakdown.fuzzy >= KEYWORD_STRONG {
        reasons.push("strong keyword match");
    } else if breakdown.fuzzy >= KEYWORD_MATCH {
        reasons.push("keyword match");
    }

    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join(", "))
    }
}

pub struct HybridSearch {
    config: SearchConfig,
    lexical: LexicalMatcher,
    semantic: EmbeddingMatcher,
    cache: RwLock<Option<Arc<EmbeddingCache>>>,
    /// Mirror of the indexed catalog, for joining ids back to descriptors
    tools: RwLock<Arc<HashMap<String, ToolDescriptor>>>,
    ready: AtomicBool,
    semantic_available: AtomicBool,
    span: Span,
}

impl HybridSearch {
    pub fn new(
        config: SearchConfig,
        backend: Arc<dyn EmbeddingBackend>,
        embedding: EmbeddingConfig,
    ) -> Self {
        Self {
            config,
            lexical: LexicalMatcher::default(),
            semantic: EmbeddingMatcher::new(backend, embedding),
            cache: RwLock::new(None),
            tools: RwLock::new(Arc::new(HashMap::new())),
            ready: AtomicBool::new(false),
            semantic_available: AtomicBool::new(false),
            span: tracing::info_span!("hybrid_search"),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_semantic_available(&self) -> bool {
        self.semantic_available.load(Ordering::SeqCst)
    }

    fn cache(&self) -> Option<Arc<EmbeddingCache>> {
        self.cache.read().clone()
    }

    /// Open the embedding cache for this backend set and try to bring up the
    /// embedding backend. Never fails: a backend that cannot load leaves the
    /// coordinator in fuzzy-only mode for its lifetime.
    ///
    /// Queries are still rejected with `SearchNotReady` until the first
    /// [`HybridSearch::index_tools`] completes.
    pub async fn initialize<S: AsRef<str>>(&self, backend_names: &[S]) {
        let hash = backend_set_hash(backend_names.iter().map(|n| n.as_ref()));
        let cache = Arc::new(EmbeddingCache::new(
            &self.config.cache_dir,
            self.semantic.model(),
            hash,
        ));

        let loader = Arc::clone(&cache);
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .unwrap_or(0);
        *self.cache.write() = Some(cache);

        let available = if self.config.semantic_enabled {
            match self.semantic.initialize().await {
                Ok(()) => true,
                Err(e) => {
                    self.span.in_scope(|| {
                        tracing::warn!(
                            error = %e,
                            model = %self.semantic.model(),
                            "Embedding backend unavailable, search runs fuzzy-only"
                        )
                    });
                    false
                }
            }
        } else {
            false
        };

        self.semantic_available.store(available, Ordering::SeqCst);

        self.span.in_scope(|| {
            tracing::info!(
                cached_embeddings = loaded,
                semantic = available,
                alpha = self.config.alpha,
                "Hybrid search initialized"
            )
        });
    }

    /// Index the whole catalog. The lexical index is rebuilt in one call;
    /// vectors come from cache where current. Cache entries for tools no
    /// longer in the catalog are dropped, then the cache is saved once.
    /// Marks the coordinator ready.
    pub async fn index_tools(&self, tools: &[ToolDescriptor]) {
        let start = Instant::now();

        *self.tools.write() = Arc::new(
            tools
                .iter()
                .map(|t| (t.qualified_id.clone(), t.clone()))
                .collect(),
        );
        self.lexical.index(tools);

        if !self.is_semantic_available() {
            self.ready.store(true, Ordering::SeqCst);
            self.span.in_scope(|| {
                tracing::info!(tools = tools.len(), "Indexed tools (fuzzy only)")
            });
            return;
        }

        let cache = self.cache();
        let report = self.semantic.replace_all(tools, cache.as_deref()).await;

        if let Some(cache) = cache {
            cache.retain(tools.iter().map(|t| t.qualified_id.as_str()));
            self.persist_cache(cache).await;
        }
        self.ready.store(true, Ordering::SeqCst);

        self.span.in_scope(|| {
            tracing::info!(
                tools = tools.len(),
                embedded = report.indexed - report.from_cache,
                from_cache = report.from_cache,
                failed = report.failed,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Indexed tools"
            )
        });
    }

    async fn persist_cache(&self, cache: Arc<EmbeddingCache>) {
        let result = tokio::task::spawn_blocking(move || cache.save())
            .await
            .map_err(|e| AppError::CacheError(format!("save task join error: {}", e)))
            .and_then(|r| r);

        if let Err(e) = result {
            self.span.in_scope(|| {
                tracing::warn!(error = %e, "Embedding cache not persisted")
            });
        }
    }

    /// Add or replace a single tool in both matchers.
    pub async fn add_tool(&self, tool: &ToolDescriptor) -> Result<()> {
        {
            let mut guard = self.tools.write();
            let mut next = HashMap::clone(&guard);
            next.insert(tool.qualified_id.clone(), tool.clone());
            *guard = Arc::new(next);
        }
        self.lexical.add_tool(tool);

        if self.is_semantic_available() {
            let cache = self.cache();
            self.semantic.index_tool(tool, cache.as_deref()).await?;
        }
        Ok(())
    }

    /// Remove a tool from the catalog mirror and both matchers.
    pub fn remove_tool(&self, qualified_id: &str) -> bool {
        let removed = {
            let mut guard = self.tools.write();
            if guard.contains_key(qualified_id) {
                let mut next = HashMap::clone(&guard);
                next.remove(qualified_id);
                *guard = Arc::new(next);
                true
            } else {
                false
            }
        };
        let lexical = self.lexical.remove_tool(qualified_id);
        let semantic = self.semantic.remove(qualified_id);
        removed || lexical || semantic
    }

    /// Ranked results for `query`.
    ///
    /// `limit` and `threshold` fall back to the configured defaults.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        if !self.is_ready() {
            return Err(AppError::SearchNotReady);
        }

        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::ValidationError("Query cannot be empty".to_string()));
        }

        let start = Instant::now();
        let limit = limit.unwrap_or(self.config.default_limit);
        let threshold = threshold.unwrap_or(self.config.default_threshold);
        let fetch = limit.saturating_mul(2);

        let fuzzy = self.lexical.search(query, fetch);

        let (semantic, alpha) = if self.is_semantic_available() {
            match self.semantic.find_similar(query, fetch).await {
                Ok(hits) => (hits, self.config.alpha.clamp(0.0, 1.0)),
                // Alpha drops to 0 rather than keeping it with a zero semantic
                // term: the query is scored exactly like fuzzy-only mode, so the
                // default threshold does not suppress its fuzzy matches.
                Err(e) => {
                    self.span.in_scope(|| {
                        tracing::warn!(error = %e, "Query embedding failed, falling back to fuzzy")
                    });
                    (Vec::new(), 0.0)
                }
            }
        } else {
            (Vec::new(), 0.0)
        };

        if alpha == 0.0 {
            metrics::counter!("search_fuzzy_only_total").increment(1);
        }

        let tools = Arc::clone(&*self.tools.read());
        let candidates: Vec<SearchResult> = fuse_scores(&semantic, &fuzzy, alpha, threshold)
            .into_iter()
            .filter_map(|fused| {
                let tool = tools.get(&fused.qualified_id)?;
                Some(SearchResult {
                    tool: tool.clone(),
                    score: fused.breakdown.combined,
                    score_breakdown: fused.breakdown,
                    reason: describe_match(&fused.breakdown),
                })
            })
            .collect();

        let results = dedupe_results(candidates, limit);

        let elapsed = start.elapsed();
        self.span.in_scope(|| {
            tracing::debug!(
                query,
                limit,
                threshold,
                alpha,
                fuzzy_candidates = fuzzy.len(),
                semantic_candidates = semantic.len(),
                results = results.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Search completed"
            )
        });

        metrics::counter!("search_requests_total").increment(1);
        metrics::histogram!("search_latency_ms").record(elapsed.as_millis() as f64);

        Ok(results)
    }

    pub fn stats(&self) -> SearchStats {
        let cache = self.cache();
        SearchStats {
            tools_indexed: self.tools.read().len(),
            cached_embeddings: cache.as_ref().map_or(0, |c| c.len()),
            model: self.semantic.model().to_string(),
            semantic_available: self.is_semantic_available(),
            cache_hit_rate: cache.as_ref().map_or(0.0, |c| c.hit_rate()),
            cache_hits: cache.as_ref().map_or(0, |c| c.hits()),
            cache_misses: cache.as_ref().map_or(0, |c| c.misses()),
        }
    }
}
