//! Client binding rendering for `/runtime/tools.ts`.
//!
//! Full binding generation lives outside this service; it plugs in through
//! [`BindingRenderer`]. [`TypeScriptDeclarations`] is the built-in renderer:
//! one `declare namespace` per server with a typed function per tool.

use crate::ingestion::ToolDescriptor;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Nested object schemas deeper than this render as `Record<string, unknown>`.
const MAX_SCHEMA_DEPTH: usize = 4;

pub trait BindingRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn render(&self, tools: &[ToolDescriptor]) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TypeScriptDeclarations;

impl BindingRenderer for TypeScriptDeclarations {
    fn content_type(&self) -> &'static str {
        "application/typescript; charset=utf-8"
    }

    fn render(&self, tools: &[ToolDescriptor]) -> String {
        let mut by_server: BTreeMap<&str, Vec<&ToolDescriptor>> = BTreeMap::new();
        for tool in tools {
            by_server.entry(tool.server_name.as_str()).or_default().push(tool);
        }

        let mut out = String::from("// Tool bindings served by toolmux\n");
        for (server, tools) in by_server {
            let _ = writeln!(out, "\ndeclare namespace {} {{", ts_identifier(server));
            for tool in tools {
                if let Some(description) = tool.description.as_deref().filter(|d| !d.is_empty()) {
                    let _ = writeln!(out, "  /** {} */", doc_comment(description));
                }
                let _ = writeln!(
                    out,
                    "  function {}(args: {}): Promise<unknown>;",
                    ts_identifier(&tool.tool_name),
                    schema_type(&tool.input_schema, 1)
                );
            }
            out.push_str("}\n");
        }
        out
    }
}

/// Make `name` a valid identifier: invalid characters become `_`, and a
/// leading digit gets an `_` prefix.
fn ts_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

fn doc_comment(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("*/", "*\\/")
}

fn property_key(name: &str) -> String {
    if ts_identifier(name) == name {
        name.to_string()
    } else {
        Value::String(name.to_string()).to_string()
    }
}

fn schema_type(schema: &Value, depth: usize) -> String {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        if !values.is_empty() {
            return values
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" | ");
        }
    }

    match schema.get("type").and_then(Value::as_str) {
        Some("string") => "string".to_string(),
        Some("number") | Some("integer") => "number".to_string(),
        Some("boolean") => "boolean".to_string(),
        Some("null") => "null".to_string(),
        Some("array") => {
            let item = schema
                .get("items")
                .map(|items| schema_type(items, depth + 1))
                .unwrap_or_else(|| "unknown".to_string());
            format!("Array<{}>", item)
        }
        Some("object") | None if schema.get("properties").is_some() => {
            object_type(schema, depth)
        }
        Some("object") => "Record<string, unknown>".to_string(),
        _ => "unknown".to_string(),
    }
}

fn object_type(schema: &Value, depth: usize) -> String {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return "Record<string, unknown>".to_string();
    };
    if depth > MAX_SCHEMA_DEPTH {
        return "Record<string, unknown>".to_string();
    }
    if properties.is_empty() {
        return "{}".to_string();
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let fields: Vec<String> = properties
        .iter()
        .map(|(name, prop)| {
            let optional = if required.contains(&name.as_str()) { "" } else { "?" };
            format!("{}{}: {}", property_key(name), optional, schema_type(prop, depth + 1))
        })
        .collect();

    format!("{{ {} }}", fields.join("; "))
}
