pub mod hybrid;
pub mod lexical;
pub mod semantic;

pub use hybrid::{
    dedupe_results, fuse_scores, FusedScore, HybridSearch, ScoreBreakdown, SearchConfig,
    SearchResult, SearchStats,
};
pub use lexical::{LexicalMatcher, LexicalOptions};
pub use semantic::{cosine_similarity, EmbeddingMatcher, IndexReport};

use serde::Serialize;
use std::cmp::Ordering;

/// A tool id with one matcher's score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredId {
    pub qualified_id: String,
    pub score: f32,
}

impl ScoredId {
    pub fn new(qualified_id: impl Into<String>, score: f32) -> Self {
        Self {
            qualified_id: qualified_id.into(),
            score,
        }
    }
}

/// Highest score first; ties broken by id so results are stable.
pub(crate) fn sort_scored(results: &mut [ScoredId]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.qualified_id.cmp(&b.qualified_id))
    });
}
