//! toolmux - one catalog and search index over many tool servers
//!
//! The library exposes the gateway's components so integration tests (and
//! embedding applications) can assemble them with their own connectors and
//! embedding backends.

pub mod config;
pub mod error;
pub mod handlers;
pub mod inference;
pub mod ingestion;
pub mod persistence;
pub mod runtime;
pub mod search;
pub mod state;
pub mod upstream;

// Re-export key types for convenience
pub use config::{load_backends, Config};
pub use error::{AppError, Result};
pub use handlers::router;
pub use inference::{EmbeddingBackend, EmbeddingConfig, OnnxBackend, TextEmbedder};
pub use ingestion::{atomize_tools, ToolDescriptor};
pub use search::{HybridSearch, SearchConfig, SearchResult};
pub use state::AppState;
pub use upstream::{BackendConfig, Connector, RmcpConnector, ToolAggregator, ToolServerSession};
