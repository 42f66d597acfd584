use crate::inference::{Device, EmbeddingConfig};
use crate::search::SearchConfig;
use crate::upstream::BackendConfig;
use anyhow::Context;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Backend fleet file, `{"mcpServers": {name: BackendConfig}}`
    pub mcp_config_path: PathBuf,
    pub connect_timeout_secs: u64,
    /// Per-backend close deadline during shutdown
    pub close_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub search_alpha: f32,
    pub search_threshold: f32,
    pub search_limit: usize,
    /// When false, search never loads the embedding model
    pub semantic_search: bool,
    pub embedding_model: String,
    pub embedding_device: Device,
    /// Holds `<model>/model.onnx` and `<model>/tokenizer.json`
    pub model_cache_dir: PathBuf,
    pub embedding_pool_size: usize,
    pub max_sequence_length: usize,
    /// Embedding cache directory
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("toolmux")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            host: "127.0.0.1".to_string(),
            port: 8931,
            mcp_config_path: PathBuf::from("./mcp.json"),
            connect_timeout_secs: 30,
            close_timeout_secs: 5,
            shutdown_timeout_secs: 2,
            search_alpha: 0.6,
            search_threshold: 0.3,
            search_limit: 10,
            semantic_search: true,
            embedding_model: "bge-small-en-v1.5".to_string(),
            embedding_device: Device::Cpu,
            model_cache_dir: data_dir.join("models"),
            embedding_pool_size: 2,
            max_sequence_length: 256,
            data_dir,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid value for {}: '{}'", key, other),
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let model_cache_dir = env::var("MODEL_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let embedding_device = match env::var("EMBEDDING_DEVICE") {
            Ok(raw) => Device::parse(&raw)
                .with_context(|| format!("invalid value for EMBEDDING_DEVICE: '{}'", raw))?,
            Err(_) => defaults.embedding_device,
        };

        let semantic_search = match env::var("SEMANTIC_SEARCH") {
            Ok(raw) => parse_bool("SEMANTIC_SEARCH", &raw)?,
            Err(_) => defaults.semantic_search,
        };

        let search_alpha: f32 = env_parse("SEARCH_ALPHA", defaults.search_alpha)?;
        if !(0.0..=1.0).contains(&search_alpha) {
            anyhow::bail!("SEARCH_ALPHA must be within [0, 1], got {}", search_alpha);
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port)?,
            mcp_config_path: env::var("MCP_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.mcp_config_path),
            connect_timeout_secs: env_parse("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs)?,
            close_timeout_secs: env_parse("CLOSE_TIMEOUT_SECS", defaults.close_timeout_secs)?,
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT", defaults.shutdown_timeout_secs)?,
            search_alpha,
            search_threshold: env_parse("SEARCH_THRESHOLD", defaults.search_threshold)?,
            search_limit: env_parse("SEARCH_LIMIT", defaults.search_limit)?,
            semantic_search,
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_device,
            model_cache_dir,
            embedding_pool_size: env_parse("EMBEDDING_POOL_SIZE", defaults.embedding_pool_size)?,
            max_sequence_length: env_parse("MAX_SEQ_LENGTH", defaults.max_sequence_length)?,
            data_dir,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            alpha: self.search_alpha,
            default_limit: self.search_limit,
            default_threshold: self.search_threshold,
            semantic_enabled: self.semantic_search,
            cache_dir: self.data_dir.clone(),
        }
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            model: self.embedding_model.clone(),
            device: self.embedding_device,
            cache_dir: self.model_cache_dir.clone(),
            max_sequence_length: self.max_sequence_length,
            pool_size: self.embedding_pool_size,
        }
    }
}

/// Read the backend fleet file.
///
/// A missing file yields an empty fleet. Entries without a `type` but with a
/// `command` are treated as stdio. Entries that still fail to parse are
/// logged and skipped.
pub fn load_backends(path: &Path) -> anyhow::Result<HashMap<String, BackendConfig>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Backend config file not found, starting with no backends");
        return Ok(HashMap::new());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_backends(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_backends(raw: &str) -> anyhow::Result<HashMap<String, BackendConfig>> {
    let root: Value = serde_json::from_str(raw)?;
    let servers = match root.get("mcpServers") {
        Some(Value::Object(servers)) => servers,
        Some(_) => anyhow::bail!("'mcpServers' must be an object"),
        None => return Ok(HashMap::new()),
    };

    let mut backends = HashMap::with_capacity(servers.len());
    for (name, entry) in servers {
        let mut entry = entry.clone();
        if let Value::Object(map) = &mut entry {
            if !map.contains_key("type") && map.contains_key("command") {
                map.insert("type".to_string(), Value::String("stdio".to_string()));
            }
        }

        match serde_json::from_value::<BackendConfig>(entry) {
            Ok(config) => {
                backends.insert(name.clone(), config);
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "Skipping invalid backend entry");
            }
        }
    }

    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backends_variants() {
        let raw = r#"{
            "mcpServers": {
                "fs": {"command": "mcp-fs", "args": ["/tmp"]},
                "github": {"type": "http", "url": "https://example.com/mcp",
                           "auth": {"type": "bearer", "token": "abc"}},
                "legacy": {"type": "event-stream", "url": "https://example.com/sse"},
                "jira": {"type": "sse", "url": "https://example.com/jira/sse"}
            }
        }"#;

        let backends = parse_backends(raw).unwrap();
        assert_eq!(backends.len(), 4);
        assert_eq!(backends["fs"].transport_kind(), "stdio");
        assert_eq!(backends["github"].transport_kind(), "http");
        assert_eq!(backends["legacy"].transport_kind(), "sse");
        assert_eq!(backends["jira"].transport_kind(), "sse");
    }

    #[test]
    fn test_invalid_entry_is_skipped() {
        let raw = r#"{"mcpServers": {
            "ok": {"command": "x"},
            "broken": {"type": "carrier-pigeon"}
        }}"#;
        let backends = parse_backends(raw).unwrap();
        assert_eq!(backends.len(), 1);
        assert!(backends.contains_key("ok"));
    }

    #[test]
    fn test_missing_file_is_empty_fleet() {
        let dir = tempfile::tempdir().unwrap();
        let backends = load_backends(&dir.path().join("absent.json")).unwrap();
        assert!(backends.is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(load_backends(&path).is_err());
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.port, 8931);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(config.model_cache_dir.ends_with("toolmux/models"));

        let search = config.search_config();
        assert_eq!(search.default_limit, 10);
        assert!((search.alpha - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
