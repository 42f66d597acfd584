//! One live connection to one tool server.
//!
//! [`ServerConnection`] owns the session for its backend exclusively and
//! tracks its lifecycle: `Disconnected -> Connecting -> Connected -> Closed`.
//! A failed or timed-out connect lands in `Closed` with nothing left
//! behind; `close` is idempotent and also runs from `Drop`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info_span, Instrument, Span};

use super::config::BackendConfig;
use crate::error::{AppError, Result};

/// Default deadline for connect + handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// What a backend advertised about itself during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// An established protocol session with a tool server.
#[async_trait]
pub trait ToolServerSession: Send + Sync {
    fn server_info(&self) -> ServerInfo;

    /// Raw tool listing; parsed by [`crate::ingestion::atomize_tools`].
    async fn list_tools(&self) -> Result<Value>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value>;

    /// Release the transport. Must tolerate being called more than once.
    async fn close(&self) -> Result<()>;
}

/// Dials a backend and completes the protocol handshake.
///
/// Dropping the returned future before it resolves must release every
/// resource it created (child process, HTTP streams).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, name: &str, config: &BackendConfig)
        -> Result<Box<dyn ToolServerSession>>;
}

pub struct ServerConnection {
    name: String,
    config: BackendConfig,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<Arc<dyn ToolServerSession>>>,
    span: Span,
}

impl ServerConnection {
    pub fn new(name: impl Into<String>, config: BackendConfig) -> Self {
        let name = name.into();
        let span = info_span!("backend", server = %name, transport = config.transport_kind());
        Self {
            name,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            session: RwLock::new(None),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.session.read().as_ref().map(|s| s.server_info())
    }

    /// Connect under `timeout`.
    ///
    /// On timeout the in-flight connect future is dropped before the error
    /// is returned, so a half-built transport never outlives this call.
    pub async fn connect(&self, connector: &dyn Connector, timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(AppError::ResourceError(format!(
                        "connection to '{}' already in progress",
                        self.name
                    )))
                }
                _ => *state = ConnectionState::Connecting,
            }
        }

        let attempt = tokio::time::timeout(timeout, connector.connect(&self.name, &self.config))
            .instrument(self.span.clone())
            .await;

        self.span.in_scope(|| match attempt {
            Ok(Ok(session)) => {
                *self.session.write() = Some(Arc::from(session));
                *self.state.write() = ConnectionState::Connected;
                tracing::info!("Backend connected");
                Ok(())
            }
            Ok(Err(e)) => {
                *self.state.write() = ConnectionState::Closed;
                tracing::warn!(error = %e, "Backend connection failed");
                Err(e)
            }
            Err(_) => {
                *self.state.write() = ConnectionState::Closed;
                tracing::warn!(timeout_secs = timeout.as_secs(), "Backend connection timed out");
                Err(AppError::ConnectTimeout {
                    server: self.name.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        })
    }

    fn active_session(&self) -> Result<Arc<dyn ToolServerSession>> {
        if !self.is_connected() {
            return Err(AppError::ServerNotConnected(self.name.clone()));
        }
        self.session
            .read()
            .clone()
            .ok_or_else(|| AppError::ServerNotConnected(self.name.clone()))
    }

    pub async fn list_tools(&self) -> Result<Value> {
        let session = self.active_session()?;
        session.list_tools().instrument(self.span.clone()).await
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let session = self.active_session()?;
        session
            .call_tool(tool_name, arguments)
            .instrument(self.span.clone())
            .await
    }

    /// Close the connection. Safe on any state, safe to repeat.
    pub async fn close(&self) -> Result<()> {
        let session = self.session.write().take();
        *self.state.write() = ConnectionState::Closed;

        match session {
            Some(session) => {
                let result = session.close().instrument(self.span.clone()).await;
                self.span.in_scope(|| match &result {
                    Ok(()) => tracing::info!("Backend closed"),
                    Err(e) => tracing::warn!(error = %e, "Backend close reported an error"),
                });
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        let Some(session) = self.session.get_mut().take() else {
            return;
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let name = self.name.clone();
            handle.spawn(async move {
                if let Err(e) = session.close().await {
                    tracing::warn!(server = %name, error = %e, "Error closing dropped backend");
                }
            });
        } else {
            tracing::warn!(server = %self.name, "No tokio runtime available for backend cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolServerSession for CountingSession {
        fn server_info(&self) -> ServerInfo {
            ServerInfo {
                title: Some("Counting".into()),
                instructions: None,
            }
        }

        async fn list_tools(&self) -> Result<Value> {
            Ok(json!([{ "name": "noop" }]))
        }

        async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
            Ok(json!({ "called": name, "args": arguments }))
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    enum Behavior {
        Succeed(Arc<AtomicUsize>),
        Hang,
        Refuse,
    }

    struct TestConnector(Behavior);

    #[async_trait]
    impl Connector for TestConnector {
        async fn connect(
            &self,
            name: &str,
            _config: &BackendConfig,
        ) -> Result<Box<dyn ToolServerSession>> {
            match &self.0 {
                Behavior::Succeed(closes) => Ok(Box::new(CountingSession {
                    closes: Arc::clone(closes),
                })),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("connect should have timed out")
                }
                Behavior::Refuse => Err(AppError::ConnectRefused {
                    server: name.to_string(),
                    reason: "connection refused".into(),
                }),
            }
        }
    }

    fn stdio() -> BackendConfig {
        BackendConfig::Stdio {
            command: "true".into(),
            args: vec![],
            env: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_connect_then_call() {
        let closes = Arc::new(AtomicUsize::new(0));
        let conn = ServerConnection::new("local", stdio());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect(&TestConnector(Behavior::Succeed(closes)), DEFAULT_CONNECT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.server_info().unwrap().title.as_deref(), Some("Counting"));

        let result = conn.call_tool("noop", Map::new()).await.unwrap();
        assert_eq!(result["called"], "noop");
    }

    #[tokio::test]
    async fn test_connect_timeout_closes_connection() {
        let conn = ServerConnection::new("slow", stdio());
        let err = conn
            .connect(&TestConnector(Behavior::Hang), Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ConnectTimeout { ref server, .. } if server == "slow"));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.list_tools().await,
            Err(AppError::ServerNotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_usable() {
        let conn = ServerConnection::new("down", stdio());
        let err = conn
            .connect(&TestConnector(Behavior::Refuse), DEFAULT_CONNECT_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ConnectRefused { .. }));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let conn = ServerConnection::new("local", stdio());
        conn.connect(
            &TestConnector(Behavior::Succeed(Arc::clone(&closes))),
            DEFAULT_CONNECT_TIMEOUT,
        )
        .await
        .unwrap();

        conn.close().await.unwrap();
        conn.close().await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_on_never_connected() {
        let conn = ServerConnection::new("idle", stdio());
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_drop_closes_open_session() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let conn = ServerConnection::new("local", stdio());
            conn.connect(
                &TestConnector(Behavior::Succeed(Arc::clone(&closes))),
                DEFAULT_CONNECT_TIMEOUT,
            )
            .await
            .unwrap();
        }

        // The close runs on a spawned task.
        for _ in 0..50 {
            if closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
