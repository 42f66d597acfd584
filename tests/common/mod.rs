//! Shared fixtures: an in-memory tool-server fleet and deterministic
//! embedding backends, so tests need neither live servers nor model files.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use toolmux::{
    inference::{l2_normalize, Device},
    upstream::{ServerInfo, ToolServerSession},
    AppError, BackendConfig, Connector, EmbeddingBackend, EmbeddingConfig, Result, SearchConfig,
    TextEmbedder,
};

pub const DIMENSION: usize = 256;

pub fn tool_json(name: &str, description: &str, params: &[(&str, &str)]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|(p, d)| (p.to_string(), json!({"type": "string", "description": d})))
        .collect();
    json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object", "properties": properties}
    })
}

#[derive(Clone)]
pub enum MockBehavior {
    Serve { title: String, tools: Vec<Value> },
    /// Connects, but `close` never returns
    StuckOnClose { title: String, tools: Vec<Value> },
    /// Never completes the handshake
    Hang,
    Refuse,
    Unauthorized,
}

/// Connector answering from a fixed table instead of dialing anything.
#[derive(Default)]
pub struct MockConnector {
    servers: HashMap<String, MockBehavior>,
    /// Transport kind seen per connect attempt
    pub dialed: Mutex<Vec<(String, &'static str)>>,
}

impl MockConnector {
    pub fn with_server(mut self, name: &str, behavior: MockBehavior) -> Self {
        self.servers.insert(name.to_string(), behavior);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, name: &str, config: &BackendConfig) -> Result<Box<dyn ToolServerSession>> {
        self.dialed
            .lock()
            .push((name.to_string(), config.transport_kind()));

        match self.servers.get(name) {
            Some(MockBehavior::Serve { title, tools }) => Ok(Box::new(MockSession {
                title: title.clone(),
                tools: tools.clone(),
                stuck_on_close: false,
            })),
            Some(MockBehavior::StuckOnClose { title, tools }) => Ok(Box::new(MockSession {
                title: title.clone(),
                tools: tools.clone(),
                stuck_on_close: true,
            })),
            Some(MockBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("hung connect is cancelled by the connect timeout")
            }
            Some(MockBehavior::Unauthorized) => Err(AppError::Unauthorized(name.to_string())),
            Some(MockBehavior::Refuse) | None => Err(AppError::ConnectRefused {
                server: name.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

struct MockSession {
    title: String,
    tools: Vec<Value>,
    stuck_on_close: bool,
}

#[async_trait]
impl ToolServerSession for MockSession {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            title: Some(self.title.clone()),
            instructions: Some(format!("Tools from {}", self.title)),
        }
    }

    async fn list_tools(&self) -> Result<Value> {
        Ok(json!({ "tools": self.tools }))
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        Ok(json!({
            "content": [{"type": "text", "text": format!("{} ok", name)}],
            "isError": false,
            "arguments": arguments,
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.stuck_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

pub fn stdio(command: &str) -> BackendConfig {
    BackendConfig::Stdio {
        command: command.to_string(),
        args: vec![],
        env: HashMap::new(),
    }
}

pub fn http(url: &str) -> BackendConfig {
    BackendConfig::Http {
        url: url.to_string(),
        headers: HashMap::new(),
        auth: None,
    }
}

pub fn event_stream(url: &str) -> BackendConfig {
    BackendConfig::EventStream {
        url: url.to_string(),
        headers: HashMap::new(),
        auth: None,
    }
}

/// Three backends, one per transport kind, seven tools in total.
pub fn fleet() -> (HashMap<String, BackendConfig>, MockConnector) {
    let configs = HashMap::from([
        ("filesystem".to_string(), stdio("mcp-filesystem")),
        ("github".to_string(), http("http://127.0.0.1:9/mcp")),
        ("atlassian".to_string(), event_stream("http://127.0.0.1:9/sse")),
    ]);

    let connector = MockConnector::default()
        .with_server(
            "filesystem",
            MockBehavior::Serve {
                title: "Filesystem".into(),
                tools: vec![
                    tool_json("read_file", "Read the contents of a file", &[("path", "File path")]),
                    tool_json(
                        "write_file",
                        "Write text to a file, replacing it",
                        &[("path", "File path"), ("content", "Text to write")],
                    ),
                    tool_json("list_directory", "List entries of a directory", &[("path", "Directory path")]),
                ],
            },
        )
        .with_server(
            "github",
            MockBehavior::Serve {
                title: "GitHub".into(),
                tools: vec![
                    tool_json(
                        "create_issue",
                        "Create a new issue in a repository",
                        &[("repo", "Owner and repository"), ("title", "Issue title")],
                    ),
                    tool_json("list_pull_requests", "List pull requests for a repository", &[("repo", "Owner and repository")]),
                ],
            },
        )
        .with_server(
            "atlassian",
            MockBehavior::Serve {
                title: "Atlassian".into(),
                tools: vec![
                    tool_json("get_issue", "Fetch a Jira ticket by key", &[("key", "Ticket key")]),
                    tool_json("search_tickets", "Search Jira tickets with JQL", &[("jql", "Query")]),
                ],
            },
        );

    (configs, connector)
}

/// Bag-of-words embedder: every alphanumeric word bumps one hashed dimension.
pub struct HashEmbedder;

impl TextEmbedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("explode") {
            return Err(AppError::ModelError("embedding exploded".into()));
        }
        let mut v = vec![0.0f32; DIMENSION];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let idx = xxhash_rust::xxh3::xxh3_64(word.as_bytes()) as usize % DIMENSION;
            v[idx] += 1.0;
        }
        l2_normalize(&mut v);
        Ok(v)
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

pub struct HashBackend;

impl EmbeddingBackend for HashBackend {
    fn load(&self, _config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>> {
        Ok(Arc::new(HashEmbedder))
    }
}

/// Backend whose model never loads.
pub struct FailingBackend;

impl EmbeddingBackend for FailingBackend {
    fn load(&self, _config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>> {
        Err(AppError::ModelError("model files missing".into()))
    }
}

pub fn search_config(cache_dir: &Path) -> SearchConfig {
    SearchConfig {
        alpha: 0.6,
        default_limit: 10,
        default_threshold: 0.3,
        semantic_enabled: true,
        cache_dir: cache_dir.to_path_buf(),
    }
}

pub fn embedding_config(model_dir: &Path) -> EmbeddingConfig {
    EmbeddingConfig {
        model: "hash-test".into(),
        device: Device::Cpu,
        cache_dir: model_dir.to_path_buf(),
        max_sequence_length: 128,
        pool_size: 1,
    }
}
