//! Authentication capability consumed by network transports.
//!
//! The gateway never runs an authorization flow itself. Whoever owns the
//! flow implements [`AuthCapability`] and registers it with the transport
//! factory; the factory only reads tokens from it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Dynamically registered OAuth client, as returned by the authorization server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInformation {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[async_trait]
pub trait AuthCapability: Send + Sync {
    /// Current tokens, if the backend has been authorized.
    async fn tokens(&self) -> Option<OAuthTokens>;

    async fn save_tokens(&self, tokens: OAuthTokens) -> Result<()>;

    async fn client_information(&self) -> Option<ClientInformation>;

    /// Hand the user off to the authorization server.
    async fn redirect_to_authorization(&self, url: &str) -> Result<()>;
}

/// Capability for backends configured with a fixed bearer token.
pub struct StaticTokenAuth {
    tokens: parking_lot::RwLock<OAuthTokens>,
}

impl StaticTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            tokens: parking_lot::RwLock::new(OAuthTokens {
                access_token: token.into(),
                token_type: default_token_type(),
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl AuthCapability for StaticTokenAuth {
    async fn tokens(&self) -> Option<OAuthTokens> {
        Some(self.tokens.read().clone())
    }

    async fn save_tokens(&self, tokens: OAuthTokens) -> Result<()> {
        *self.tokens.write() = tokens;
        Ok(())
    }

    async fn client_information(&self) -> Option<ClientInformation> {
        None
    }

    async fn redirect_to_authorization(&self, url: &str) -> Result<()> {
        tracing::warn!(
            url,
            "Static token backend asked for authorization; replace the configured token"
        );
        Ok(())
    }
}

/// `Authorization` header value for the capability's current tokens.
pub async fn authorization_header(auth: &dyn AuthCapability) -> Option<String> {
    let tokens = auth.tokens().await?;
    if tokens.access_token.is_empty() {
        return None;
    }
    Some(format!("Bearer {}", tokens.access_token))
}
