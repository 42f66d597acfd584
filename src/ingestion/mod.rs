//! Ingestion module for processing backend tool listings.
//!
//! This module transforms tool-server `list_tools` payloads into catalog
//! descriptors and derives the text the search layer indexes.

pub mod atomizer;
pub mod types;

pub use atomizer::{atomize_tools, build_search_text, humanize_identifier};
pub use types::{qualify, ToolDescriptor, QUALIFIER_SEPARATOR};
