//! Google OAuth and the Gmail REST API.

use crate::config::GoogleConfig;
use crate::models::{format_timestamp, make_snippet, AttachmentMeta, EmailAccount, IncomingEmail};
use crate::services::mail_provider::{
    error_message, parse_address_list, parse_email_address, FetchWindow, MailFetcher,
    ProviderError, TokenResponse,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const PROVIDER: &str = "Gmail";

pub const GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailProfile {
    pub email_address: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Clone)]
pub struct GmailClient {
    client: reqwest::Client,
    config: GoogleConfig,
}

impl GmailClient {
    pub fn new(config: GoogleConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn client_id(&self) -> Result<&str, ProviderError> {
        self.config
            .client_id
            .as_deref()
            .ok_or(ProviderError::NotConfigured("Google"))
    }

    /// Consent screen URL requesting offline access.
    pub fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        let scope = GMAIL_SCOPES.join(" ");
        let url = reqwest::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.client_id()?),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| ProviderError::Token(e.to_string()))?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ProviderError> {
        let client_id = self.client_id()?;
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();
        self.token_request(&[
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        let client_id = self.client_id()?;
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Token(error_message(&body)));
        }
        Ok(response.json().await?)
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/gmail/v1/users/me/{}",
            self.config.gmail_api_base.trim_end_matches('/'),
            path
        )
    }

    pub async fn profile(&self, access_token: &str) -> Result<GmailProfile, ProviderError> {
        let response = self
            .client
            .get(self.api_url("profile"))
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn list_message_ids(
        &self,
        access_token: &str,
        window: FetchWindow,
    ) -> Result<Vec<String>, ProviderError> {
        let query = format!("after:{}", window.since.timestamp());
        let max = window.max_results.to_string();
        let response = self
            .client
            .get(self.api_url("messages"))
            .bearer_auth(access_token)
            .query(&[("q", query.as_str()), ("maxResults", max.as_str())])
            .send()
            .await?;
        let list: MessageList = check(response).await?.json().await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    pub async fn get_message(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<GmailMessage, ProviderError> {
        let response = self
            .client
            .get(self.api_url(&format!("messages/{}", id)))
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Sends an RFC 2822 message through `messages/send`.
    pub async fn send_raw(&self, access_token: &str, rfc2822: &[u8]) -> Result<(), ProviderError> {
        let raw = URL_SAFE_NO_PAD.encode(rfc2822);
        let response = self
            .client
            .post(self.api_url("messages/send"))
            .bearer_auth(access_token)
            .json(&json!({ "raw": raw }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl MailFetcher for GmailClient {
    async fn fetch(
        &self,
        account: &EmailAccount,
        secret: &str,
        window: FetchWindow,
    ) -> Result<Vec<IncomingEmail>, ProviderError> {
        let ids = self.list_message_ids(secret, window).await?;
        let mut emails = Vec::with_capacity(ids.len());

        for id in ids {
            match self.get_message(secret, &id).await {
                Ok(message) => emails.push(parse_gmail_message(&message)),
                Err(e) => tracing::warn!(
                    "Error fetching Gmail message {} for {}: {}",
                    id,
                    account.email_address,
                    e
                ),
            }
        }

        Ok(emails)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        provider: PROVIDER,
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn walk_parts(
    part: &MessagePart,
    text: &mut Option<String>,
    html: &mut Option<String>,
    attachments: &mut Vec<AttachmentMeta>,
) {
    if !part.filename.is_empty() {
        attachments.push(AttachmentMeta {
            filename: part.filename.clone(),
            content_type: part.mime_type.clone(),
            size: part.body.as_ref().map(|b| b.size).unwrap_or(0),
        });
        return;
    }

    let data = part.body.as_ref().and_then(|b| b.data.as_deref());
    match (part.mime_type.as_str(), data) {
        ("text/plain", Some(data)) if text.is_none() => *text = decode_body(data),
        ("text/html", Some(data)) if html.is_none() => *html = decode_body(data),
        _ => {}
    }

    for sub in &part.parts {
        walk_parts(sub, text, html, attachments);
    }
}

/// Maps a `format=full` message onto the common row shape.
pub fn parse_gmail_message(message: &GmailMessage) -> IncomingEmail {
    let payload = message.payload.clone().unwrap_or_default();
    let header = |name: &str| {
        payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    };

    let (from_address, from_name) = header("From")
        .map(parse_email_address)
        .unwrap_or_default();

    let mut text = None;
    let mut html = None;
    let mut attachments = Vec::new();
    walk_parts(&payload, &mut text, &mut html, &mut attachments);

    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(format_timestamp);

    let snippet = message
        .snippet
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| text.as_deref().map(make_snippet));

    IncomingEmail {
        message_id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        subject: Some(header("Subject").unwrap_or("(No Subject)").to_string()),
        from_address: Some(from_address).filter(|a| !a.is_empty()),
        from_name,
        to_addresses: parse_address_list(header("To")),
        cc_addresses: parse_address_list(header("Cc")),
        body_text: text,
        body_html: html,
        snippet,
        received_at,
        is_read: !message.label_ids.iter().any(|l| l == "UNREAD"),
        is_starred: message.label_ids.iter().any(|l| l == "STARRED"),
        labels: message.label_ids.clone(),
        has_attachments: !attachments.is_empty(),
        attachments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    fn sample_message() -> GmailMessage {
        serde_json::from_value(json!({
            "id": "18c1",
            "threadId": "t-1",
            "labelIds": ["INBOX", "UNREAD", "STARRED"],
            "snippet": "Quarterly numbers attached",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "Subject", "value": "Q3 report"},
                    {"name": "From", "value": "\"Grace Hopper\" <grace@example.com>"},
                    {"name": "To", "value": "me@example.com, Team <team@example.com>"}
                ],
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            {"mimeType": "text/plain", "body": {"size": 5, "data": encode("Hello")}},
                            {"mimeType": "text/html", "body": {"size": 12, "data": encode("<p>Hello</p>")}}
                        ]
                    },
                    {"mimeType": "application/pdf", "filename": "q3.pdf", "body": {"size": 2048}}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_gmail_message() {
        let email = parse_gmail_message(&sample_message());
        assert_eq!(email.message_id, "18c1");
        assert_eq!(email.thread_id.as_deref(), Some("t-1"));
        assert_eq!(email.subject.as_deref(), Some("Q3 report"));
        assert_eq!(email.from_address.as_deref(), Some("grace@example.com"));
        assert_eq!(email.from_name.as_deref(), Some("Grace Hopper"));
        assert_eq!(email.to_addresses, vec!["me@example.com", "team@example.com"]);
        assert_eq!(email.body_text.as_deref(), Some("Hello"));
        assert_eq!(email.body_html.as_deref(), Some("<p>Hello</p>"));
        assert!(!email.is_read);
        assert!(email.is_starred);
        assert!(email.has_attachments);
        assert_eq!(email.attachments[0].filename, "q3.pdf");
        assert_eq!(email.attachments[0].size, 2048);
        assert_eq!(email.received_at.as_deref(), Some("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_missing_subject_defaults() {
        let message = GmailMessage {
            id: "x".into(),
            label_ids: vec!["INBOX".into()],
            ..Default::default()
        };
        let email = parse_gmail_message(&message);
        assert_eq!(email.subject.as_deref(), Some("(No Subject)"));
        assert!(email.is_read);
        assert!(!email.has_attachments);
    }

    #[test]
    fn test_authorization_url_requires_client_id() {
        let config = crate::config::AppConfig::default().google;
        let client = GmailClient::new(config.clone());
        assert!(matches!(
            client.authorization_url("s"),
            Err(ProviderError::NotConfigured(_))
        ));

        let client = GmailClient::new(GoogleConfig {
            client_id: Some("cid".into()),
            ..config
        });
        let url = client.authorization_url("signed-state").unwrap();
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=signed-state"));
        assert!(url.contains("gmail.send"));
    }
}
