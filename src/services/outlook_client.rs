//! Microsoft identity platform OAuth (with PKCE) and Microsoft Graph mail.

use crate::config::MicrosoftConfig;
use crate::models::{format_timestamp, make_snippet, parse_timestamp, EmailAccount, IncomingEmail};
use crate::services::mail_provider::{
    error_message, FetchWindow, MailFetcher, ProviderError, TokenResponse,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

const PROVIDER: &str = "Outlook";

pub const OUTLOOK_SCOPES: &[&str] = &[
    "User.Read",
    "Mail.Read",
    "Mail.ReadWrite",
    "Mail.Send",
    "offline_access",
];

const REFRESH_SCOPE: &str =
    "https://graph.microsoft.com/Mail.Read https://graph.microsoft.com/Mail.Send offline_access";

/// PKCE verifier: 32 random bytes, base64url without padding.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl GraphUser {
    pub fn address(&self) -> Option<&str> {
        self.mail
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(self.user_principal_name.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub cc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub flag: Option<FollowupFlag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: GraphAddress,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphAddress {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupFlag {
    #[serde(default)]
    pub flag_status: String,
}

#[derive(Clone)]
pub struct OutlookClient {
    client: reqwest::Client,
    config: MicrosoftConfig,
}

impl OutlookClient {
    pub fn new(config: MicrosoftConfig) -> Self {
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
            .ok_or(ProviderError::NotConfigured("Microsoft"))
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{}",
            self.config.login_base.trim_end_matches('/'),
            self.config.tenant_id,
            action
        )
    }

    pub fn authorization_url(
        &self,
        state: &str,
        code_verifier: &str,
    ) -> Result<String, ProviderError> {
        let scope = OUTLOOK_SCOPES.join(" ");
        let challenge = code_challenge(code_verifier);
        let url = reqwest::Url::parse_with_params(
            &self.endpoint("authorize"),
            &[
                ("client_id", self.client_id()?),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("response_mode", "query"),
                ("state", state),
                ("prompt", "consent"),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| ProviderError::Token(e.to_string()))?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, ProviderError> {
        let client_id = self.client_id()?;
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();
        let scope = OUTLOOK_SCOPES.join(" ");
        let mut form = vec![
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
            ("scope", scope.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }
        self.token_request(&form).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        let client_id = self.client_id()?;
        let client_secret = self
            .config
            .client_secret
            .as_deref()
            .ok_or(ProviderError::NotConfigured("Microsoft"))?;
        self.token_request(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", REFRESH_SCOPE),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("token"))
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Token(error_message(&body)));
        }
        Ok(response.json().await?)
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.graph_base.trim_end_matches('/'), path)
    }

    pub async fn me(&self, access_token: &str) -> Result<GraphUser, ProviderError> {
        let response = self
            .client
            .get(self.graph_url("me"))
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn list_messages(
        &self,
        access_token: &str,
        window: FetchWindow,
    ) -> Result<Vec<GraphMessage>, ProviderError> {
        let filter = format!(
            "receivedDateTime ge {}",
            format_timestamp(window.since)
        );
        let top = window.max_results.to_string();
        let response = self
            .client
            .get(self.graph_url("me/messages"))
            .bearer_auth(access_token)
            .query(&[
                ("$filter", filter.as_str()),
                ("$top", top.as_str()),
                ("$orderby", "receivedDateTime desc"),
            ])
            .send()
            .await?;
        let page: MessagePage = check(response).await?.json().await?;
        Ok(page.value)
    }

    /// Posts a Graph `message` resource to `/me/sendMail`.
    pub async fn send_mail(&self, access_token: &str, message: Value) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.graph_url("me/sendMail"))
            .bearer_auth(access_token)
            .json(&json!({ "message": message, "saveToSentItems": true }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl MailFetcher for OutlookClient {
    async fn fetch(
        &self,
        _account: &EmailAccount,
        secret: &str,
        window: FetchWindow,
    ) -> Result<Vec<IncomingEmail>, ProviderError> {
        let messages = self.list_messages(secret, window).await?;
        Ok(messages.iter().map(parse_outlook_message).collect())
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

fn recipient_addresses(recipients: &[Recipient]) -> Vec<String> {
    recipients
        .iter()
        .filter_map(|r| r.email_address.address.clone())
        .collect()
}

pub fn parse_outlook_message(message: &GraphMessage) -> IncomingEmail {
    let body = message.body.clone().unwrap_or_default();
    let is_html = body.content_type.eq_ignore_ascii_case("html");
    let preview = message.body_preview.clone().filter(|p| !p.is_empty());

    let body_text = if is_html {
        preview.clone()
    } else {
        Some(body.content.clone()).filter(|c| !c.is_empty())
    };

    let from = message.from.as_ref().map(|f| &f.email_address);

    IncomingEmail {
        message_id: message.id.clone(),
        thread_id: message.conversation_id.clone(),
        subject: Some(
            message
                .subject
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(No Subject)".to_string()),
        ),
        from_address: from.and_then(|a| a.address.clone()),
        from_name: from.and_then(|a| a.name.clone()).filter(|n| !n.is_empty()),
        to_addresses: recipient_addresses(&message.to_recipients),
        cc_addresses: recipient_addresses(&message.cc_recipients),
        snippet: preview.or_else(|| body_text.as_deref().map(make_snippet)),
        body_text,
        body_html: is_html.then(|| body.content.clone()),
        received_at: message
            .received_date_time
            .as_deref()
            .and_then(parse_timestamp)
            .map(format_timestamp),
        is_read: message.is_read,
        is_starred: message
            .flag
            .as_ref()
            .map(|f| f.flag_status == "flagged")
            .unwrap_or(false),
        labels: Vec::new(),
        has_attachments: message.has_attachments,
        attachments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generated_verifier_length() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 43);
        assert_ne!(verifier, generate_code_verifier());
    }

    #[test]
    fn test_parse_outlook_message() {
        let message: GraphMessage = serde_json::from_value(json!({
            "id": "AAMk1",
            "conversationId": "conv-9",
            "subject": "Contract renewal",
            "from": {"emailAddress": {"address": "legal@example.com", "name": "Legal"}},
            "toRecipients": [{"emailAddress": {"address": "me@example.com", "name": "Me"}}],
            "ccRecipients": [],
            "body": {"contentType": "html", "content": "<p>Please sign</p>"},
            "bodyPreview": "Please sign",
            "receivedDateTime": "2025-03-01T09:30:00Z",
            "isRead": false,
            "hasAttachments": true,
            "flag": {"flagStatus": "flagged"}
        }))
        .unwrap();

        let email = parse_outlook_message(&message);
        assert_eq!(email.thread_id.as_deref(), Some("conv-9"));
        assert_eq!(email.from_address.as_deref(), Some("legal@example.com"));
        assert_eq!(email.from_name.as_deref(), Some("Legal"));
        assert_eq!(email.to_addresses, vec!["me@example.com"]);
        assert_eq!(email.body_text.as_deref(), Some("Please sign"));
        assert_eq!(email.body_html.as_deref(), Some("<p>Please sign</p>"));
        assert_eq!(email.received_at.as_deref(), Some("2025-03-01T09:30:00Z"));
        assert!(email.is_starred);
        assert!(email.has_attachments);
        assert!(!email.is_read);
    }

    #[test]
    fn test_graph_user_address_fallback() {
        let user = GraphUser {
            mail: None,
            user_principal_name: Some("upn@contoso.com".into()),
            display_name: None,
        };
        assert_eq!(user.address(), Some("upn@contoso.com"));
    }

    #[test]
    fn test_authorization_url_carries_pkce() {
        let config = MicrosoftConfig {
            client_id: Some("app-id".into()),
            ..crate::config::AppConfig::default().microsoft
        };
        let client = OutlookClient::new(config);
        let url = client.authorization_url("st", "verifier").unwrap();
        assert!(url.starts_with("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("code_challenge={}", code_challenge("verifier"))));
        assert!(url.contains("response_mode=query"));
    }
}
