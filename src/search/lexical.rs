//! Weighted multi-field fuzzy matcher.
//!
//! Each field is scored with an approximate substring edit distance, so a
//! query matches anywhere inside a tool name rather than only at its start.
//! Field distances are combined with per-field weights (tool name heaviest)
//! and inverted so that 1.0 is a perfect match.

use super::ScoredId;
use crate::ingestion::{humanize_identifier, ToolDescriptor};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Floor for a zero field distance so a perfect field does not zero the product.
const EPSILON: f32 = 1e-3;

/// Share of the final score reserved for how much of the tool name the query
/// covers. Breaks ties between "create_issue" and "create_issue_comment".
const COVERAGE_WEIGHT: f32 = 0.05;

/// Descriptions beyond this many characters are not searched.
const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct LexicalOptions {
    /// Largest normalized edit distance still counted as a match
    pub threshold: f32,
    /// Queries (and query tokens) shorter than this are ignored
    pub min_match_len: usize,
    pub name_weight: f32,
    pub server_weight: f32,
    pub description_weight: f32,
}

impl Default for LexicalOptions {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            min_match_len: 2,
            name_weight: 3.0,
            server_weight: 2.0,
            description_weight: 1.0,
        }
    }
}

struct IndexedTool {
    qualified_id: String,
    name: Vec<char>,
    server: Vec<char>,
    description: Vec<char>,
}

impl IndexedTool {
    fn new(tool: &ToolDescriptor) -> Self {
        let description: String = tool
            .description_or_empty()
            .chars()
            .take(MAX_DESCRIPTION_CHARS)
            .collect();
        Self {
            qualified_id: tool.qualified_id.clone(),
            name: normalize(&tool.tool_name),
            server: normalize(&tool.server_name),
            description: normalize(&description),
        }
    }
}

#[derive(Default)]
struct LexicalIndex {
    tools: Vec<IndexedTool>,
}

/// Fuzzy index over tool descriptors.
///
/// Searches read an immutable snapshot; every mutation rebuilds a fresh
/// snapshot and swaps it in, so a search never sees a half-built index.
pub struct LexicalMatcher {
    options: LexicalOptions,
    index: RwLock<Arc<LexicalIndex>>,
    /// Source of truth for rebuilds; also serializes mutations
    tools: Mutex<BTreeMap<String, ToolDescriptor>>,
}

impl Default for LexicalMatcher {
    fn default() -> Self {
        Self::new(LexicalOptions::default())
    }
}

impl LexicalMatcher {
    pub fn new(options: LexicalOptions) -> Self {
        Self {
            options,
            index: RwLock::new(Arc::new(LexicalIndex::default())),
            tools: Mutex::new(BTreeMap::new()),
        }
    }

    /// Replace the whole index with `tools`.
    pub fn index(&self, tools: &[ToolDescriptor]) {
        let mut guard = self.tools.lock();
        *guard = tools
            .iter()
            .map(|t| (t.qualified_id.clone(), t.clone()))
            .collect();
        self.rebuild(&guard);
    }

    pub fn add_tool(&self, tool: &ToolDescriptor) {
        let mut guard = self.tools.lock();
        guard.insert(tool.qualified_id.clone(), tool.clone());
        self.rebuild(&guard);
    }

    pub fn remove_tool(&self, qualified_id: &str) -> bool {
        let mut guard = self.tools.lock();
        let removed = guard.remove(qualified_id).is_some();
        if removed {
            self.rebuild(&guard);
        }
        removed
    }

    fn rebuild(&self, tools: &BTreeMap<String, ToolDescriptor>) {
        let index = LexicalIndex {
            tools: tools.values().map(IndexedTool::new).collect(),
        };
        *self.index.write() = Arc::new(index);
    }

    pub fn len(&self) -> usize {
        self.index.read().tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best `limit` matches for `query`, scores in `[0, 1]`, highest first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ScoredId> {
        let pattern = normalize(query);
        if pattern.len() < self.options.min_match_len || limit == 0 {
            return Vec::new();
        }

        let tokens: Vec<Vec<char>> = pattern
            .split(|c| *c == ' ')
            .filter(|t| t.len() >= self.options.min_match_len)
            .map(|t| t.to_vec())
            .collect();

        let index = Arc::clone(&*self.index.read());

        let mut results: Vec<ScoredId> = index
            .tools
            .iter()
            .filter_map(|tool| {
                self.score_tool(&pattern, &tokens, tool)
                    .map(|score| ScoredId::new(tool.qualified_id.clone(), score))
            })
            .collect();

        super::sort_scored(&mut results);
        results.truncate(limit);
        results
    }

    fn score_tool(&self, pattern: &[char], tokens: &[Vec<char>], tool: &IndexedTool) -> Option<f32> {
        let fields = [
            (&tool.name, self.options.name_weight),
            (&tool.server, self.options.server_weight),
            (&tool.description, self.options.description_weight),
        ];
        let total_weight: f32 = fields.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return None;
        }

        let mut product = 1.0f32;
        let mut matched = false;

        for (text, weight) in fields {
            if weight <= 0.0 {
                continue;
            }
            let distance = field_distance(pattern, tokens, text);
            if distance <= self.options.threshold {
                matched = true;
                product *= distance.max(EPSILON).powf(weight / total_weight);
            }
        }

        if !matched {
            return None;
        }

        let coverage = if tool.name.is_empty() {
            0.0
        } else {
            (pattern.len() as f32 / tool.name.len() as f32).min(1.0)
        };

        let score = (1.0 - product) * (1.0 - COVERAGE_WEIGHT) + coverage * COVERAGE_WEIGHT;
        Some(score.clamp(0.0, 1.0))
    }
}

/// Lowercase and turn identifier separators into single spaces.
fn normalize(text: &str) -> Vec<char> {
    humanize_identifier(text).to_lowercase().chars().collect()
}

/// Normalized distance of the query against one field: the better of the
/// whole query and the mean over its individual words.
fn field_distance(pattern: &[char], tokens: &[Vec<char>], text: &[char]) -> f32 {
    let whole = substring_distance(pattern, text);
    if tokens.len() < 2 {
        return whole;
    }
    let per_token =
        tokens.iter().map(|t| substring_distance(t, text)).sum::<f32>() / tokens.len() as f32;
    whole.min(per_token)
}

/// Smallest edit distance between `pattern` and any substring of `text`,
/// divided by the pattern length. 0.0 means `pattern` occurs verbatim.
pub(crate) fn substring_distance(pattern: &[char], text: &[char]) -> f32 {
    let m = pattern.len();
    if m == 0 {
        return 0.0;
    }

    // Row 0 is all zeros: a match may start anywhere in the text
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut cur = vec![0usize; m + 1];
    let mut best = m;

    for &tc in text {
        cur[0] = 0;
        for i in 1..=m {
            let cost = usize::from(pattern[i - 1] != tc);
            cur[i] = (prev[i - 1] + cost).min(prev[i] + 1).min(cur[i - 1] + 1);
        }
        best = best.min(cur[m]);
        if best == 0 {
            break;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    (best as f32 / m as f32).min(1.0)
}
