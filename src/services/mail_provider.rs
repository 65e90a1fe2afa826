//! Pieces shared by the Gmail, Outlook and IMAP adapters.

use crate::models::{EmailAccount, IncomingEmail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} OAuth credentials not configured")]
    NotConfigured(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("Token request failed: {0}")]
    Token(String),
    #[error("No refresh token available for {0} account")]
    MissingRefreshToken(&'static str),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Server not found: {0}")]
    HostNotFound(String),
    #[error("IMAP error: {0}")]
    Imap(String),
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),
    #[error("Failed to parse message: {0}")]
    Parse(String),
    #[error("Unsupported provider: {0}")]
    Unsupported(String),
}

/// Token endpoint response, shared by Google and Microsoft.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Expiry instant; providers that omit `expires_in` get one hour.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in.unwrap_or(3600))
    }
}

/// Which messages a sync pass asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: DateTime<Utc>,
    pub max_results: u32,
}

/// Lists recent messages from one mailbox. `secret` is the decrypted access
/// token for API providers and the decrypted password for IMAP.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait MailFetcher: Send + Sync {
    async fn fetch(
        &self,
        account: &EmailAccount,
        secret: &str,
        window: FetchWindow,
    ) -> Result<Vec<IncomingEmail>, ProviderError>;
}

/// Reads an error description out of an OAuth or Graph error body.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    value["error_description"]
        .as_str()
        .or_else(|| value["error"]["message"].as_str())
        .or_else(|| value["error"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Splits `"Name" <addr>` into the address and an optional display name.
pub fn parse_email_address(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();
    if let (Some(open), Some(close)) = (raw.rfind('<'), raw.rfind('>')) {
        if open < close {
            let address = raw[open + 1..close].trim().to_string();
            let name = raw[..open].trim().replace('"', "");
            let name = if name.is_empty() { None } else { Some(name) };
            return (address, name);
        }
    }
    (raw.to_string(), None)
}

/// Addresses from a comma-separated header value, names dropped.
pub fn parse_address_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(|part| parse_email_address(part).0)
            .filter(|addr| !addr.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
