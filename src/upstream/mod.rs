//! Connections to upstream tool servers and the merged catalog.

pub mod aggregator;
pub mod auth;
pub mod config;
pub mod connection;
pub mod transport;

pub use aggregator::{Catalog, InitStats, ServerSummary, ToolAggregator};
pub use auth::{AuthCapability, ClientInformation, OAuthTokens, StaticTokenAuth};
pub use config::{AuthConfig, BackendConfig};
pub use connection::{
    ConnectionState, Connector, ServerConnection, ServerInfo, ToolServerSession,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use transport::{create_transport, RmcpConnector, TransportHandle};
