//! Port to the Twitter API (OAuth dance, filtered-stream rules, stream connection).
//!
//! The HTTP implementation lives in the `ttb-twitter` adapter crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Consumer key/secret of the Twitter app.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AppCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
}

/// Temporary OAuth 1.0a request token, valid between `/login` and PIN entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestToken {
    pub oauth_token: String,
    pub oauth_token_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_callback_confirmed: Option<String>,
}

/// Long-lived user credentials obtained after entering the PIN.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl AccessCredentials {
    pub fn app(&self) -> AppCredentials {
        AppCredentials {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
        }
    }
}

/// A filtered-stream rule as returned by the rules endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRule {
    pub id: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Raw lines of the filtered stream (one JSON document or keep-alive per line).
pub type LineStream = BoxStream<'static, Result<String>>;

pub enum StreamConnection {
    Connected(LineStream),
    /// HTTP 429. `reset_at` comes from `x-rate-limit-reset` when present.
    RateLimited { reset_at: Option<DateTime<Utc>> },
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamConnection::Connected(_) => f.write_str("Connected(..)"),
            StreamConnection::RateLimited { reset_at } => f
                .debug_struct("RateLimited")
                .field("reset_at", reset_at)
                .finish(),
        }
    }
}

#[async_trait]
pub trait TwitterPort: Send + Sync {
    /// Start the out-of-band (PIN) OAuth 1.0a flow.
    async fn request_token(&self) -> Result<RequestToken>;

    /// URL the user opens to authorize the app and obtain the PIN.
    fn authorize_url(&self, token: &RequestToken) -> String;

    /// Exchange a request token + PIN for access credentials.
    async fn access_token(&self, token: &RequestToken, verifier: &str)
        -> Result<AccessCredentials>;

    async fn list_rules(&self, creds: &AccessCredentials) -> Result<Vec<StreamRule>>;

    async fn add_rule(
        &self,
        creds: &AccessCredentials,
        value: &str,
        tag: Option<&str>,
    ) -> Result<StreamRule>;

    async fn delete_rules(&self, creds: &AccessCredentials, ids: &[String]) -> Result<()>;

    async fn connect_stream(&self, creds: &AccessCredentials) -> Result<StreamConnection>;
}
