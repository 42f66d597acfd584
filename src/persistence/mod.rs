//! On-disk cache of tool embeddings.
//!
//! One JSON file per backend set, keyed by qualified tool id. An entry is
//! only served while its metadata hash still matches the tool's current
//! description and input schema, so editing a tool upstream invalidates its
//! vector without touching the rest of the file.

use crate::error::{AppError, Result};
use crate::ingestion::ToolDescriptor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_64;

/// Cache file format version. Increment when format changes.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub vector: Vec<f32>,
    pub metadata_hash: String,
    /// Seconds since the Unix epoch when the vector was computed
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    version: u32,
    model: String,
    backend_set_hash: String,
    embeddings: HashMap<String, CacheEntry>,
}

/// Hash of the fields whose change invalidates a tool's vector.
pub fn metadata_hash(tool: &ToolDescriptor) -> String {
    let schema = serde_json::to_string(&tool.input_schema).unwrap_or_default();
    let mut buf = String::with_capacity(schema.len() + 64);
    buf.push_str(tool.description_or_empty());
    buf.push('\n');
    buf.push_str(&schema);
    format!("{:016x}", xxh3_64(buf.as_bytes()))
}

/// Order-independent hash of the configured backend names.
pub fn backend_set_hash<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
    names.sort();
    names.dedup();
    format!("{:016x}", xxh3_64(names.join(",").as_bytes()))
}

pub fn cache_file_path(dir: &Path, backend_set_hash: &str) -> PathBuf {
    dir.join(format!("embeddings-{}.json", backend_set_hash))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Embedding cache bound to one model and one backend set.
pub struct EmbeddingCache {
    path: PathBuf,
    model: String,
    backend_set_hash: String,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create an empty cache. Nothing is read until [`load`](Self::load).
    pub fn new(dir: &Path, model: impl Into<String>, backend_set_hash: impl Into<String>) -> Self {
        let backend_set_hash = backend_set_hash.into();
        Self {
            path: cache_file_path(dir, &backend_set_hash),
            model: model.into(),
            backend_set_hash,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Replace the in-memory map with the file contents.
    ///
    /// A missing, unreadable, malformed or mismatched file leaves the cache
    /// empty. Returns the number of entries loaded.
    pub fn load(&self) -> usize {
        let loaded = match self.read_file() {
            Ok(Some(file)) => file.embeddings,
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Discarding embedding cache");
                HashMap::new()
            }
        };

        let count = loaded.len();
        *self.entries.lock() = loaded;
        count
    }

    fn read_file(&self) -> Result<Option<CacheFile>> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "Cache file does not exist");
            return Ok(None);
        }

        let bytes = fs::read(&self.path)
            .map_err(|e| AppError::CacheError(format!("read {}: {}", self.path.display(), e)))?;
        let file: CacheFile = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::CacheError(format!("parse cache file: {}", e)))?;

        if file.version != CACHE_VERSION {
            return Err(AppError::CacheError(format!(
                "version {} (expected {})",
                file.version, CACHE_VERSION
            )));
        }
        if file.model != self.model {
            return Err(AppError::CacheError(format!(
                "built with model '{}' (current '{}')",
                file.model, self.model
            )));
        }
        if file.backend_set_hash != self.backend_set_hash {
            return Err(AppError::CacheError("backend set changed".to_string()));
        }

        tracing::info!(
            path = %self.path.display(),
            entries = file.embeddings.len(),
            "Embedding cache loaded"
        );
        Ok(Some(file))
    }

    /// Persist the whole map. Written to a sibling temp file and renamed into
    /// place so readers never see a partial file.
    pub fn save(&self) -> Result<()> {
        let file = CacheFile {
            version: CACHE_VERSION,
            model: self.model.clone(),
            backend_set_hash: self.backend_set_hash.clone(),
            embeddings: self.entries.lock().clone(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::CacheError(format!("create cache directory: {}", e)))?;
        }

        let bytes = serde_json::to_vec(&file)
            .map_err(|e| AppError::CacheError(format!("encode cache file: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .map_err(|e| AppError::CacheError(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::CacheError(format!("rename into {}: {}", self.path.display(), e)))?;

        tracing::info!(
            path = %self.path.display(),
            entries = file.embeddings.len(),
            size_bytes = bytes.len(),
            "Embedding cache saved"
        );
        Ok(())
    }

    /// Cached vector for `tool`, if present and still current.
    pub fn get(&self, tool: &ToolDescriptor) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock();

        let current = match entries.get(&tool.qualified_id) {
            Some(entry) if entry.metadata_hash == metadata_hash(tool) => {
                Some(entry.vector.clone())
            }
            Some(_) => {
                tracing::debug!(tool = %tool.qualified_id, "Stale embedding evicted");
                entries.remove(&tool.qualified_id);
                None
            }
            None => None,
        };

        match current {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        current
    }

    pub fn set(&self, tool: &ToolDescriptor, vector: Vec<f32>) {
        let entry = CacheEntry {
            vector,
            metadata_hash: metadata_hash(tool),
            timestamp: now_secs(),
        };
        self.entries.lock().insert(tool.qualified_id.clone(), entry);
    }

    pub fn remove(&self, qualified_id: &str) -> bool {
        self.entries.lock().remove(qualified_id).is_some()
    }

    /// Drop every entry whose id is not in `live`. Returns how many went.
    pub fn retain<'a, I>(&self, live: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: HashSet<&str> = live.into_iter().collect();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, _| live.contains(id.as_str()));
        let pruned = before - entries.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned embeddings of removed tools");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_tool(server: &str, name: &str, desc: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            server,
            name,
            Some(desc.to_string()),
            json!({"type": "object", "properties": {"repo": {"type": "string"}}}),
            None,
        )
    }

    #[test]
    fn test_backend_set_hash_is_order_independent() {
        assert_eq!(
            backend_set_hash(["github", "jira"]),
            backend_set_hash(["jira", "github"])
        );
        assert_ne!(backend_set_hash(["github"]), backend_set_hash(["github", "jira"]));
    }

    #[test]
    fn test_metadata_hash_tracks_schema() {
        let tool = make_tool("github", "create_issue", "Open an issue");
        let mut changed = tool.clone();
        changed.input_schema = json!({"type": "object"});
        assert_ne!(metadata_hash(&tool), metadata_hash(&changed));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let hash = backend_set_hash(["github"]);
        let tool = make_tool("github", "create_issue", "Open an issue");

        let cache = EmbeddingCache::new(dir.path(), "bge-small-en-v1.5", hash.clone());
        cache.set(&tool, vec![0.25, 0.5, 0.75]);
        cache.save().unwrap();

        let fresh = EmbeddingCache::new(dir.path(), "bge-small-en-v1.5", hash);
        assert_eq!(fresh.load(), 1);

        let vector = fresh.get(&tool).unwrap();
        for (a, b) in vector.iter().zip([0.25f32, 0.5, 0.75]) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(fresh.hits(), 1);
    }

    #[test]
    fn test_description_change_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path(), "m", "h");
        let mut tool = make_tool("github", "create_issue", "Open an issue");
        cache.set(&tool, vec![1.0, 0.0]);

        tool.description = Some("Close an issue".to_string());
        assert!(cache.get(&tool).is_none());
        // Evicted, not just skipped
        assert!(cache.is_empty());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_model_mismatch_discards_file() {
        let dir = tempdir().unwrap();
        let tool = make_tool("github", "create_issue", "Open an issue");

        let cache = EmbeddingCache::new(dir.path(), "model-a", "h");
        cache.set(&tool, vec![1.0]);
        cache.save().unwrap();

        let other = EmbeddingCache::new(dir.path(), "model-b", "h");
        assert_eq!(other.load(), 0);
        assert!(other.get(&tool).is_none());
    }

    #[test]
    fn test_backend_set_mismatch_discards_file() {
        let dir = tempdir().unwrap();
        let tool = make_tool("github", "create_issue", "Open an issue");

        let cache = EmbeddingCache::new(dir.path(), "m", "aaaa");
        cache.set(&tool, vec![1.0]);
        cache.save().unwrap();

        // Same file name, different hash recorded inside
        fs::copy(
            cache.path(),
            cache_file_path(dir.path(), "bbbb"),
        )
        .unwrap();
        let other = EmbeddingCache::new(dir.path(), "m", "bbbb");
        assert_eq!(other.load(), 0);
    }

    #[test]
    fn test_corrupt_file_is_cold_cache() {
        let dir = tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path(), "m", "h");
        fs::write(cache.path(), b"{not json").unwrap();

        assert_eq!(cache.load(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_rate() {
        let dir = tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path(), "m", "h");
        assert_eq!(cache.hit_rate(), 0.0);

        let tool = make_tool("github", "create_issue", "Open an issue");
        assert!(cache.get(&tool).is_none());
        cache.set(&tool, vec![1.0]);
        assert!(cache.get(&tool).is_some());
        assert!((cache.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_retain_prunes_removed_tools() {
        let dir = tempdir().unwrap();
        let hash = backend_set_hash(["github"]);
        let kept = make_tool("github", "create_issue", "Open an issue");
        let gone = make_tool("github", "delete_repo", "Delete a repository");

        let cache = EmbeddingCache::new(dir.path(), "bge-small-en-v1.5", hash.clone());
        cache.set(&kept, vec![1.0, 0.0]);
        cache.set(&gone, vec![0.0, 1.0]);

        assert_eq!(cache.retain(["github__create_issue"]), 1);
        cache.save().unwrap();

        let fresh = EmbeddingCache::new(dir.path(), "bge-small-en-v1.5", hash);
        assert_eq!(fresh.load(), 1);
        assert!(fresh.get(&kept).is_some());
        assert!(fresh.get(&gone).is_none());
    }
}
