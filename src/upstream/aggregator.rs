//! Catalog aggregation across all configured backends.
//!
//! The aggregator is best effort: every backend is dialed concurrently, a
//! failure only removes that backend from service, and the catalog is
//! rebuilt from whichever backends are connected. There is no retry loop
//! here; reconnecting is a caller decision.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info_span, Instrument, Span};

use super::{
    config::BackendConfig,
    connection::{ConnectionState, Connector, ServerConnection, DEFAULT_CONNECT_TIMEOUT},
};
use crate::{
    error::{AppError, Result},
    ingestion::{atomize_tools, ToolDescriptor, QUALIFIER_SEPARATOR},
};

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome counts of the last `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitStats {
    pub connected: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub transport: &'static str,
    pub state: ConnectionState,
}

/// Immutable snapshot of the merged catalog, keyed by qualified id.
#[derive(Debug, Default)]
pub struct Catalog {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl Catalog {
    /// Last write wins on duplicate qualified ids.
    pub fn from_tools(tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let mut map = BTreeMap::new();
        for tool in tools {
            map.insert(tool.qualified_id.clone(), tool);
        }
        Self { tools: map }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, qualified_id: &str) -> Option<&ToolDescriptor> {
        self.tools.get(qualified_id)
    }

    pub fn all(&self) -> Vec<ToolDescriptor> {
        self.tools.values().cloned().collect()
    }

    /// Apply a filter expression.
    ///
    /// Comma-separated tokens; a token containing `__` selects that exact
    /// tool, any other token selects every tool of that server. The result
    /// is the deduplicated union in catalog order. An empty expression
    /// selects everything.
    pub fn filter(&self, expr: &str) -> Vec<ToolDescriptor> {
        let mut exact = BTreeSet::new();
        let mut servers = BTreeSet::new();

        for token in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.contains(QUALIFIER_SEPARATOR) {
                exact.insert(token);
            } else {
                servers.insert(token);
            }
        }

        if exact.is_empty() && servers.is_empty() {
            return self.all();
        }

        self.tools
            .values()
            .filter(|tool| {
                exact.contains(tool.qualified_id.as_str())
                    || servers.contains(tool.server_name.as_str())
            })
            .cloned()
            .collect()
    }
}

pub struct ToolAggregator {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    close_timeout: Duration,
    connections: RwLock<HashMap<String, Arc<ServerConnection>>>,
    catalog: RwLock<Arc<Catalog>>,
    init_stats: RwLock<InitStats>,
    span: Span,
}

impl ToolAggregator {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            connections: RwLock::new(HashMap::new()),
            catalog: RwLock::new(Arc::new(Catalog::default())),
            init_stats: RwLock::new(InitStats::default()),
            span: info_span!("aggregator"),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Connect to every backend concurrently, then refresh the catalog.
    ///
    /// Waits for every attempt to settle; no failure short-circuits the
    /// others.
    pub async fn initialize(&self, backends: HashMap<String, BackendConfig>) -> InitStats {
        let span = self.span.clone();
        async move {
            let connections: Vec<Arc<ServerConnection>> = backends
                .into_iter()
                .map(|(name, config)| Arc::new(ServerConnection::new(name, config)))
                .collect();

            {
                let mut map = self.connections.write();
                for conn in &connections {
                    map.insert(conn.name().to_string(), Arc::clone(conn));
                }
            }

            let attempts = connections.iter().map(|conn| {
                let connector = Arc::clone(&self.connector);
                let timeout = self.connect_timeout;
                async move { (conn.name(), conn.connect(connector.as_ref(), timeout).await) }
            });

            let mut stats = InitStats::default();
            for (name, outcome) in join_all(attempts).await {
                match outcome {
                    Ok(()) => stats.connected += 1,
                    Err(AppError::Unauthorized(_)) => {
                        stats.failed += 1;
                        metrics::counter!("backend_connect_failures_total", "kind" => "unauthorized")
                            .increment(1);
                        tracing::warn!(
                            server = name,
                            "Backend rejected the connection as unauthorized; complete the \
                             authorization flow for this server, then reconnect"
                        );
                    }
                    Err(e) => {
                        stats.failed += 1;
                        metrics::counter!("backend_connect_failures_total", "kind" => "connect")
                            .increment(1);
                        tracing::warn!(server = name, error = %e, "Backend unavailable, continuing without it");
                    }
                }
            }

            *self.init_stats.write() = stats;
            tracing::info!(
                connected = stats.connected,
                failed = stats.failed,
                "Backend initialization complete"
            );

            self.refresh_tools().await;
            stats
        }
        .instrument(span)
        .await
    }

    /// Rebuild the catalog from every connected backend.
    ///
    /// The new catalog is swapped in whole; readers see either the previous
    /// snapshot or this one. Returns the number of tools in the new catalog.
    pub async fn refresh_tools(&self) -> usize {
        let mut connected: Vec<Arc<ServerConnection>> = self
            .connections
            .read()
            .values()
            .filter(|c| c.is_connected())
            .cloned()
            .collect();
        // Deterministic order for last-write-wins.
        connected.sort_by(|a, b| a.name().cmp(b.name()));

        let listings = join_all(connected.iter().map(|conn| async move {
            (conn.name().to_string(), conn.list_tools().await)
        }))
        .instrument(self.span.clone())
        .await;

        let mut tools = Vec::new();
        for (server, listing) in listings {
            let parsed = listing.and_then(|value| atomize_tools(&value, &server));
            match parsed {
                Ok(server_tools) => {
                    self.span.in_scope(|| {
                        tracing::info!(server = %server, count = server_tools.len(), "Discovered tools")
                    });
                    tools.extend(server_tools);
                }
                Err(e) => self.span.in_scope(|| {
                    tracing::warn!(server = %server, error = %e, "Skipping tool listing")
                }),
            }
        }

        let catalog = Arc::new(Catalog::from_tools(tools));
        let count = catalog.len();
        *self.catalog.write() = catalog;
        count
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&*self.catalog.read())
    }

    pub fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        self.catalog().all()
    }

    pub fn get_tools_by_filter(&self, expr: &str) -> Vec<ToolDescriptor> {
        self.catalog().filter(expr)
    }

    pub fn init_stats(&self) -> InitStats {
        *self.init_stats.read()
    }

    /// Every configured backend, sorted by name.
    pub fn servers(&self) -> Vec<ServerSummary> {
        let mut summaries: Vec<ServerSummary> = self
            .connections
            .read()
            .values()
            .map(|conn| {
                let info = conn.server_info().unwrap_or_default();
                ServerSummary {
                    name: conn.name().to_string(),
                    title: info.title,
                    instructions: info.instructions,
                    transport: conn.config().transport_kind(),
                    state: conn.state(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Names of all configured backends, connected or not.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forward a call to the backend that owns `qualified_id`. No retry.
    pub async fn call_tool(&self, qualified_id: &str, arguments: Value) -> Result<Value> {
        let tool = self
            .catalog()
            .get(qualified_id)
            .cloned()
            .ok_or_else(|| AppError::ToolNotFound(qualified_id.to_string()))?;

        let connection = self
            .connections
            .read()
            .get(&tool.server_name)
            .cloned()
            .filter(|c| c.is_connected())
            .ok_or_else(|| AppError::ServerNotConnected(tool.server_name.clone()))?;

        let arguments = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(AppError::ValidationError(format!(
                    "tool arguments must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        metrics::counter!("tool_calls_total", "server" => tool.server_name.clone()).increment(1);
        let result = connection.call_tool(&tool.tool_name, arguments).await;
        if result.is_err() {
            metrics::counter!("tool_call_errors_total", "server" => tool.server_name.clone())
                .increment(1);
        }
        result
    }

    /// Close every connection, each under its own deadline.
    ///
    /// A slow or failing backend only costs its own timeout; the rest close
    /// concurrently. Safe to call more than once.
    pub async fn shutdown(&self) {
        let connections: Vec<Arc<ServerConnection>> =
            self.connections.read().values().cloned().collect();
        let close_timeout = self.close_timeout;

        let closes = connections.iter().map(|conn| async move {
            let outcome = tokio::time::timeout(close_timeout, conn.close()).await;
            (conn.name(), outcome)
        });

        for (name, outcome) in join_all(closes).instrument(self.span.clone()).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.span.in_scope(|| {
                    tracing::warn!(server = name, error = %e, "Error disconnecting backend")
                }),
                Err(_) => self.span.in_scope(|| {
                    tracing::warn!(
                        server = name,
                        timeout_secs = close_timeout.as_secs(),
                        "Backend close timed out"
                    )
                }),
            }
        }

        *self.catalog.write() = Arc::new(Catalog::default());
        self.span.in_scope(|| tracing::info!("All backends shut down"));
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
