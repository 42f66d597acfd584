//! Tool atomization: turning a backend's raw `list_tools` payload into
//! catalog descriptors, and descriptors into text worth embedding.
//!
//! Parsing follows a partial-success model. A payload that is not a tool
//! array is rejected as a protocol error for that backend only; individual
//! malformed entries are logged and skipped.

use crate::error::{AppError, Result};
use crate::ingestion::types::ToolDescriptor;
use serde_json::Value;

/// Maximum description length before truncation in the search text
const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Maximum parameter description length in the search text
const MAX_PARAM_DESC_LENGTH: usize = 80;

/// Transform a backend tool listing into descriptors owned by `server_name`.
///
/// Accepts a bare array, `{ "tools": [...] }`, or a full JSON-RPC response
/// `{ "result": { "tools": [...] } }`.
///
/// # Errors
/// Returns `AppError::ProtocolError` if no tool array can be found.
pub fn atomize_tools(listing: &Value, server_name: &str) -> Result<Vec<ToolDescriptor>> {
    let tools_array = extract_tools_array(listing)?;

    let mut results = Vec::with_capacity(tools_array.len());

    for (idx, tool_value) in tools_array.iter().enumerate() {
        match normalize_tool(tool_value, server_name) {
            Ok(tool) => results.push(tool),
            Err(e) => {
                tracing::warn!(
                    server = server_name,
                    index = idx,
                    error = %e,
                    "Skipping malformed tool definition"
                );
            }
        }
    }

    tracing::debug!(
        total = tools_array.len(),
        parsed = results.len(),
        server = server_name,
        "Tool atomization complete"
    );

    Ok(results)
}

fn extract_tools_array(listing: &Value) -> Result<&Vec<Value>> {
    if let Some(array) = listing.as_array() {
        return Ok(array);
    }

    listing
        .get("result")
        .unwrap_or(listing)
        .get("tools")
        .and_then(|t| t.as_array())
        .ok_or_else(|| AppError::ProtocolError("Expected a tool array in listing".into()))
}

fn normalize_tool(tool_value: &Value, server_name: &str) -> Result<ToolDescriptor> {
    let name = tool_value
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AppError::ProtocolError(format!(
                "Tool missing required 'name' field: {:?}",
                tool_value.get("name")
            ))
        })?;

    let description = tool_value
        .get("description")
        .and_then(|v| v.as_str())
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let input_schema = tool_value
        .get("inputSchema")
        .filter(|s| s.is_object())
        .cloned()
        .unwrap_or_else(|| serde_json::json!({ "type": "object" }));

    let output_schema = tool_value
        .get("outputSchema")
        .filter(|s| s.is_object())
        .cloned();

    Ok(ToolDescriptor::new(
        server_name,
        name,
        description,
        input_schema,
        output_schema,
    ))
}

/// Build the text the embedding backend sees for one tool.
///
/// Server name, tool name with separators turned to spaces, description,
/// then every input parameter name and its description. Parameter text lets
/// queries about arguments ("issue title", "file path") reach the tool.
pub fn build_search_text(tool: &ToolDescriptor) -> String {
    let mut parts: Vec<String> = vec![
        tool.server_name.clone(),
        humanize_identifier(&tool.tool_name),
    ];

    let description = truncate_description(tool.description_or_empty());
    if !description.is_empty() {
        parts.push(description);
    }

    let params = build_param_summary(&tool.input_schema);
    if !params.is_empty() {
        parts.push(params);
    }

    parts.join(" ")
}

/// Replace `_`, `-`, `.` and `/` with spaces.
pub fn humanize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '_' | '-' | '.' | '/') { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate description to MAX_DESCRIPTION_LENGTH with ellipsis.
///
/// Attempts to truncate at a word boundary when possible.
fn truncate_description(desc: &str) -> String {
    if desc.len() <= MAX_DESCRIPTION_LENGTH {
        return desc.to_string();
    }

    let mut cut = MAX_DESCRIPTION_LENGTH;
    while !desc.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &desc[..cut];

    match truncated.rfind(' ') {
        Some(pos) if pos > cut.saturating_sub(50) => format!("{}...", &truncated[..pos]),
        _ => format!("{}...", truncated),
    }
}

/// Flatten `inputSchema.properties` into "name description" pairs.
fn build_param_summary(input_schema: &Value) -> String {
    let Some(properties) = input_schema.get("properties").and_then(|p| p.as_object()) else {
        return String::new();
    };

    properties
        .iter()
        .map(|(name, prop)| format_param(name, prop))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_param(name: &str, prop: &Value) -> String {
    let name = humanize_identifier(name);
    let brief_desc = prop
        .get("description")
        .and_then(|d| d.as_str())
        .map(|d| {
            let end = d
                .find('.')
                .unwrap_or(MAX_PARAM_DESC_LENGTH)
                .min(MAX_PARAM_DESC_LENGTH)
                .min(d.len());
            let mut end = end;
            while !d.is_char_boundary(end) {
                end -= 1;
            }
            &d[..end]
        })
        .unwrap_or("");

    if brief_desc.is_empty() {
        name
    } else {
        format!("{} {}", name, brief_desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_atomize_bare_array() {
        let listing = json!([{
            "name": "calculate_sum",
            "description": "Add two numbers.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "a": { "type": "number", "description": "First number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            }
        }]);

        let tools = atomize_tools(&listing, "math_server").unwrap();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_name, "calculate_sum");
        assert_eq!(tools[0].server_name, "math_server");
        assert_eq!(tools[0].qualified_id, "math_server__calculate_sum");
        assert_eq!(tools[0].description.as_deref(), Some("Add two numbers."));
    }

    #[test]
    fn test_atomize_json_rpc_envelope() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "tools": [{ "name": "ping" }] }
        });

        let tools = atomize_tools(&response, "net").unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].qualified_id, "net__ping");
    }

    #[test]
    fn test_atomize_non_array_is_protocol_error() {
        let result = atomize_tools(&json!({ "tools": "nope" }), "server");
        assert!(matches!(result, Err(AppError::ProtocolError(_))));
    }

    #[test]
    fn test_atomize_missing_name_skips_tool() {
        let listing = json!([
            { "description": "No name here" },
            { "name": "", "description": "Blank name" },
            { "name": 42 },
            { "name": "valid_tool", "description": "Has name" }
        ]);

        let tools = atomize_tools(&listing, "server").unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_name, "valid_tool");
    }

    #[test]
    fn test_atomize_missing_schema_defaults_to_object() {
        let tools = atomize_tools(&json!([{ "name": "bare" }]), "s").unwrap();
        assert_eq!(tools[0].input_schema, json!({ "type": "object" }));
        assert!(tools[0].output_schema.is_none());
        assert!(tools[0].description.is_none());
    }

    #[test]
    fn test_search_text_includes_params() {
        let tool = ToolDescriptor::new(
            "github",
            "create_issue",
            Some("Open a new issue in a repository".into()),
            json!({
                "type": "object",
                "properties": {
                    "repo_name": { "type": "string", "description": "Owner and repository. Example: a/b" },
                    "title": { "type": "string" }
                }
            }),
            None,
        );

        let text = build_search_text(&tool);
        assert_eq!(
            text,
            "github create issue Open a new issue in a repository repo name Owner and repository title"
        );
    }

    #[test]
    fn test_humanize_identifier() {
        assert_eq!(humanize_identifier("get-pull_request.v2"), "get pull request v2");
        assert_eq!(humanize_identifier("__lead"), "lead");
    }

    #[test]
    fn test_truncate_long_description() {
        let long_desc = "A".repeat(600);
        let truncated = truncate_description(&long_desc);

        assert!(truncated.len() <= MAX_DESCRIPTION_LENGTH + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_short_description() {
        assert_eq!(truncate_description("Short description"), "Short description");
    }

    #[test]
    fn test_param_summary_without_properties_is_empty() {
        assert_eq!(build_param_summary(&json!({})), "");
        assert_eq!(build_param_summary(&json!({ "properties": {} })), "");
    }
}
