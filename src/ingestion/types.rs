//! Type definitions for the ingestion module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between server name and tool name in a qualified identifier.
pub const QUALIFIER_SEPARATOR: &str = "__";

/// Build the catalog key for a tool: `<server>__<tool>`.
pub fn qualify(server_name: &str, tool_name: &str) -> String {
    format!("{}{}{}", server_name, QUALIFIER_SEPARATOR, tool_name)
}

/// One callable tool in the merged catalog.
///
/// Created during a catalog refresh from a backend's tool listing. The
/// `qualified_id` is the only key the rest of the gateway uses; it is unique
/// across the catalog because server names are unique in the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Backend that owns this tool (e.g., "github", "filesystem")
    pub server_name: String,

    /// Tool name as advertised by the backend
    pub tool_name: String,

    /// `server_name + "__" + tool_name`
    pub qualified_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON schema for the call arguments
    pub input_schema: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    pub fn new(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        description: Option<String>,
        input_schema: Value,
        output_schema: Option<Value>,
    ) -> Self {
        let server_name = server_name.into();
        let tool_name = tool_name.into();
        let qualified_id = qualify(&server_name, &tool_name);
        Self {
            server_name,
            tool_name,
            qualified_id,
            description,
            input_schema,
            output_schema,
        }
    }

    pub fn description_or_empty(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qualified_id_joins_server_and_tool() {
        let tool = ToolDescriptor::new("github", "create_issue", None, json!({}), None);
        assert_eq!(tool.qualified_id, "github__create_issue");
    }

    #[test]
    fn test_serializes_camel_case_and_skips_missing_optionals() {
        let tool = ToolDescriptor::new("fs", "read_file", None, json!({"type": "object"}), None);
        let value = serde_json::to_value(&tool).unwrap();

        assert_eq!(value["serverName"], "fs");
        assert_eq!(value["qualifiedId"], "fs__read_file");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("description").is_none());
        assert!(value.get("outputSchema").is_none());
    }
}
