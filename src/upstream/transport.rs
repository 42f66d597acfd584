//! Transport factory and the rmcp-backed session.
//!
//! [`create_transport`] turns a [`BackendConfig`] into a [`TransportHandle`]
//! bound to the right wire format; [`RmcpConnector`] completes the protocol
//! handshake over it. Every match over the config and the handle is
//! exhaustive, so a new transport kind fails to compile until it is wired.

use std::{
    borrow::Cow,
    collections::HashMap,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use rmcp::{
    model::CallToolRequestParam,
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    auth::{authorization_header, AuthCapability, StaticTokenAuth},
    config::{AuthConfig, BackendConfig},
    connection::{Connector, ServerInfo, ToolServerSession},
};
use crate::error::{AppError, Result};

type McpClient = RunningService<RoleClient, ()>;

/// A transport bound to one backend, not yet handshaken.
pub enum TransportHandle {
    Stdio(TokioChildProcess),
    Http(StreamableHttpClientTransport<reqwest::Client>),
    /// SSE opens its stream as part of connecting, so the handle keeps the
    /// pieces rather than a live transport.
    EventStream {
        client: reqwest::Client,
        config: SseClientConfig,
    },
}

impl TransportHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportHandle::Stdio(_) => "stdio",
            TransportHandle::Http(_) => "http",
            TransportHandle::EventStream { .. } => "sse",
        }
    }
}

/// Build the transport for `config`.
///
/// `auth` is consulted only for network transports; stdio ignores it.
pub async fn create_transport(
    config: &BackendConfig,
    auth: Option<&dyn AuthCapability>,
) -> Result<TransportHandle> {
    match config {
        BackendConfig::Stdio { command, args, env } => {
            let transport = TokioChildProcess::new(
                tokio::process::Command::new(command).configure(|cmd| {
                    cmd.args(args)
                        .envs(env.iter())
                        .stderr(Stdio::inherit())
                        .kill_on_drop(true);
                }),
            )
            .map_err(|e| AppError::ConnectRefused {
                server: command.clone(),
                reason: format!("spawn stdio transport: {}", e),
            })?;
            Ok(TransportHandle::Stdio(transport))
        }

        BackendConfig::Http { url, headers, .. } => {
            let client = build_http_client(headers, auth).await?;
            let cfg = StreamableHttpClientTransportConfig::with_uri(url.as_str());
            Ok(TransportHandle::Http(
                StreamableHttpClientTransport::with_client(client, cfg),
            ))
        }

        BackendConfig::EventStream { url, headers, .. } => {
            let client = build_http_client(headers, auth).await?;
            let config = SseClientConfig {
                sse_endpoint: url.clone().into(),
                ..Default::default()
            };
            Ok(TransportHandle::EventStream { client, config })
        }
    }
}

async fn build_http_client(
    headers: &HashMap<String, String>,
    auth: Option<&dyn AuthCapability>,
) -> Result<reqwest::Client> {
    let mut default_headers = HeaderMap::new();

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::ValidationError(format!("header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::ValidationError(format!("header '{}': {}", name, e)))?;
        default_headers.insert(name, value);
    }

    if let Some(auth) = auth {
        if let Some(bearer) = authorization_header(auth).await {
            let mut value = HeaderValue::from_str(&bearer)
                .map_err(|e| AppError::ValidationError(format!("auth token: {}", e)))?;
            value.set_sensitive(true);
            default_headers.insert(AUTHORIZATION, value);
        }
    }

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .default_headers(default_headers)
        .build()
        .map_err(|e| AppError::ResourceError(format!("build HTTP client: {}", e)))
}

/// Map a handshake failure to the error kind the aggregator reacts to.
pub fn classify_connect_error(server: &str, message: String) -> AppError {
    let lowered = message.to_lowercase();
    if lowered.contains("401") || lowered.contains("unauthorized") {
        AppError::Unauthorized(server.to_string())
    } else {
        AppError::ConnectRefused {
            server: server.to_string(),
            reason: message,
        }
    }
}

/// Connector speaking the tool protocol through rmcp.
#[derive(Default)]
pub struct RmcpConnector {
    /// Capabilities registered by the external OAuth flow, by backend name
    auth_providers: HashMap<String, Arc<dyn AuthCapability>>,
}

impl RmcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth_provider(
        mut self,
        server: impl Into<String>,
        provider: Arc<dyn AuthCapability>,
    ) -> Self {
        self.auth_providers.insert(server.into(), provider);
        self
    }

    fn resolve_auth(&self, name: &str, config: &BackendConfig) -> Option<Arc<dyn AuthCapability>> {
        match config.auth()? {
            AuthConfig::Bearer { token } => Some(Arc::new(StaticTokenAuth::new(token.clone()))),
            AuthConfig::Oauth { .. } => {
                let provider = self.auth_providers.get(name).cloned();
                if provider.is_none() {
                    debug!(
                        server = name,
                        "No OAuth capability registered, connecting unauthenticated"
                    );
                }
                provider
            }
        }
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        name: &str,
        config: &BackendConfig,
    ) -> Result<Box<dyn ToolServerSession>> {
        info!(server = name, config = ?config, "Connecting to backend");

        let auth = self.resolve_auth(name, config);
        let handle = create_transport(config, auth.as_deref()).await?;
        let kind = handle.kind();

        let client = match handle {
            TransportHandle::Stdio(transport) => ().serve(transport).await.map_err(|e| {
                classify_connect_error(name, format!("initialize stdio client: {}", e))
            })?,
            TransportHandle::Http(transport) => ().serve(transport).await.map_err(|e| {
                classify_connect_error(name, format!("initialize streamable client: {}", e))
            })?,
            TransportHandle::EventStream { client, config } => {
                let transport = SseClientTransport::start_with_client(client, config)
                    .await
                    .map_err(|e| {
                        classify_connect_error(name, format!("create SSE transport: {}", e))
                    })?;
                ().serve(transport).await.map_err(|e| {
                    classify_connect_error(name, format!("initialize SSE client: {}", e))
                })?
            }
        };

        let info = extract_server_info(&client);
        info!(server = name, transport = kind, "Handshake complete");

        Ok(Box::new(RmcpSession {
            name: name.to_string(),
            client: RwLock::new(Some(client)),
            info,
        }))
    }
}

fn extract_server_info(client: &McpClient) -> ServerInfo {
    let Some(peer_info) = client.peer_info() else {
        return ServerInfo::default();
    };
    let value = serde_json::to_value(peer_info).unwrap_or(Value::Null);
    let text = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

    ServerInfo {
        title: value
            .pointer("/serverInfo/title")
            .and_then(text)
            .or_else(|| value.pointer("/serverInfo/name").and_then(text)),
        instructions: value.get("instructions").and_then(text),
    }
}

pub struct RmcpSession {
    name: String,
    client: RwLock<Option<McpClient>>,
    info: ServerInfo,
}

#[async_trait]
impl ToolServerSession for RmcpSession {
    fn server_info(&self) -> ServerInfo {
        self.info.clone()
    }

    async fn list_tools(&self) -> Result<Value> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| AppError::ServerNotConnected(self.name.clone()))?;

        let tools = client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| AppError::ProtocolError(format!("list tools on '{}': {}", self.name, e)))?;

        serde_json::to_value(tools)
            .map_err(|e| AppError::ProtocolError(format!("encode tool listing: {}", e)))
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| AppError::ServerNotConnected(self.name.clone()))?;

        let request = CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments: Some(arguments),
        };

        let result = client
            .call_tool(request)
            .await
            .map_err(|e| AppError::ToolCallError(format!("'{}' on '{}': {}", name, self.name, e)))?;

        serde_json::to_value(result)
            .map_err(|e| AppError::ToolCallError(format!("encode tool result: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            client
                .cancel()
                .await
                .map_err(|e| AppError::ProtocolError(format!("close '{}': {}", self.name, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unauthorized() {
        let err = classify_connect_error("github", "HTTP status client error (401 Unauthorized)".into());
        assert!(matches!(err, AppError::Unauthorized(ref s) if s == "github"));
    }

    #[test]
    fn test_classify_refused() {
        let err = classify_connect_error("jira", "error sending request: connection refused".into());
        assert!(matches!(err, AppError::ConnectRefused { ref server, .. } if server == "jira"));
    }

    #[tokio::test]
    async fn test_http_transport_kind() {
        let config = BackendConfig::Http {
            url: "http://127.0.0.1:9/mcp".into(),
            headers: HashMap::from([("X-Team".to_string(), "core".to_string())]),
            auth: Some(AuthConfig::Bearer {
                token: "t0ken".into(),
            }),
        };
        let auth = StaticTokenAuth::new("t0ken");

        let handle = create_transport(&config, Some(&auth)).await.unwrap();
        assert_eq!(handle.kind(), "http");
    }

    #[tokio::test]
    async fn test_event_stream_transport_kind() {
        let config = BackendConfig::EventStream {
            url: "http://127.0.0.1:9/sse".into(),
            headers: HashMap::new(),
            auth: None,
        };

        let handle = create_transport(&config, None).await.unwrap();
        assert_eq!(handle.kind(), "sse");
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected() {
        let config = BackendConfig::Http {
            url: "http://127.0.0.1:9/mcp".into(),
            headers: HashMap::from([("bad header".to_string(), "v".to_string())]),
            auth: None,
        };

        assert!(matches!(
            create_transport(&config, None).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_oauth_without_provider_resolves_to_none() {
        let connector = RmcpConnector::new();
        let config = BackendConfig::Http {
            url: "http://127.0.0.1:9/mcp".into(),
            headers: HashMap::new(),
            auth: Some(AuthConfig::Oauth { scopes: vec![] }),
        };
        assert!(connector.resolve_auth("github", &config).is_none());
    }

    #[test]
    fn test_oauth_with_registered_provider() {
        let provider: Arc<dyn AuthCapability> = Arc::new(StaticTokenAuth::new("x"));
        let connector = RmcpConnector::new().with_auth_provider("github", provider);
        let config = BackendConfig::Http {
            url: "http://127.0.0.1:9/mcp".into(),
            headers: HashMap::new(),
            auth: Some(AuthConfig::Oauth { scopes: vec![] }),
        };
        assert!(connector.resolve_auth("github", &config).is_some());
    }
}
