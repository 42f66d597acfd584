//! Backend configuration types.
//!
//! One entry per tool server, tagged by transport kind. The loader in
//! [`crate::config`] hands these over already validated.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<AuthConfig>,
    },
    #[serde(rename = "sse", alias = "event-stream")]
    EventStream {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<AuthConfig>,
    },
}

/// How a network backend authenticates.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Static bearer token sent on every request
    Bearer { token: String },
    /// Tokens come from the OAuth flow registered for this backend
    Oauth {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        scopes: Vec<String>,
    },
}

impl BackendConfig {
    pub fn transport_kind(&self) -> &'static str {
        match self {
            BackendConfig::Stdio { .. } => "stdio",
            BackendConfig::Http { .. } => "http",
            BackendConfig::EventStream { .. } => "sse",
        }
    }

    pub fn auth(&self) -> Option<&AuthConfig> {
        match self {
            BackendConfig::Stdio { .. } => None,
            BackendConfig::Http { auth, .. } | BackendConfig::EventStream { auth, .. } => {
                auth.as_ref()
            }
        }
    }
}

// Hand-written so env values, headers and tokens never reach the logs.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Stdio { command, args, env } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("env_keys", &env.keys().collect::<Vec<_>>())
                .finish(),
            BackendConfig::Http { url, headers, auth } => f
                .debug_struct("Http")
                .field("url", url)
                .field("header_names", &headers.keys().collect::<Vec<_>>())
                .field("auth", auth)
                .finish(),
            BackendConfig::EventStream { url, headers, auth } => f
                .debug_struct("EventStream")
                .field("url", url)
                .field("header_names", &headers.keys().collect::<Vec<_>>())
                .field("auth", auth)
                .finish(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::Bearer { .. } => f.write_str("Bearer(<redacted>)"),
            AuthConfig::Oauth { scopes } => f.debug_struct("Oauth").field("scopes", scopes).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stdio_defaults() {
        let config: BackendConfig =
            serde_json::from_value(json!({ "type": "stdio", "command": "npx" })).unwrap();

        match config {
            BackendConfig::Stdio { command, args, env } => {
                assert_eq!(command, "npx");
                assert!(args.is_empty());
                assert!(env.is_empty());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_event_stream_accepts_both_tags() {
        for tag in ["sse", "event-stream"] {
            let config: BackendConfig =
                serde_json::from_value(json!({ "type": tag, "url": "http://localhost/sse" }))
                    .unwrap();
            assert_eq!(config.transport_kind(), "sse");
        }
    }

    #[test]
    fn test_http_with_bearer_auth() {
        let config: BackendConfig = serde_json::from_value(json!({
            "type": "http",
            "url": "https://mcp.example.com",
            "headers": { "X-Team": "core" },
            "auth": { "type": "bearer", "token": "secret" }
        }))
        .unwrap();

        assert!(matches!(config.auth(), Some(AuthConfig::Bearer { token }) if token == "secret"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = BackendConfig::Http {
            url: "https://mcp.example.com".into(),
            headers: HashMap::from([("Authorization".to_string(), "Bearer xyz".to_string())]),
            auth: Some(AuthConfig::Bearer {
                token: "secret".into(),
            }),
        };

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("xyz"));
        assert!(rendered.contains("Authorization"));
    }
}
