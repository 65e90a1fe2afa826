use crate::models::{EmailAccount, Provider};
use crate::services::credential_service::{CredentialError, CredentialService};
use crate::services::gmail_client::GmailClient;
use crate::services::mail_provider::ProviderError;
use crate::services::outlook_client::OutlookClient;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Failed to build email message: {0}")]
    MessageBuild(String),
    #[error("{0}")]
    SendFailed(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Email account is not active")]
    AccountInactive,
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A reply ready to leave through the account's provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait EmailSender: Send + Sync {
    async fn send(&self, account: &EmailAccount, email: &OutgoingEmail) -> Result<(), SendError>;
}

/// Sends through the Gmail API, Microsoft Graph or SMTP depending on how
/// the account was connected.
pub struct ProviderEmailSender {
    credentials: CredentialService,
    gmail: GmailClient,
    outlook: OutlookClient,
}

impl ProviderEmailSender {
    pub fn new(credentials: CredentialService, gmail: GmailClient, outlook: OutlookClient) -> Self {
        Self {
            credentials,
            gmail,
            outlook,
        }
    }

    async fn send_smtp(&self, account: &EmailAccount, message: Message) -> Result<(), SendError> {
        let host = account
            .smtp_host
            .as_deref()
            .ok_or_else(|| SendError::ConfigError("SMTP host not configured".to_string()))?;
        let port = account
            .smtp_port
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(587);
        let password = self.credentials.password(account)?;
        let credentials = Credentials::new(account.login_name().to_string(), password);

        let mailer = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| SendError::ConfigError(format!("SMTP relay error: {}", e)))?
                .port(port)
                .credentials(credentials)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| SendError::ConfigError(format!("SMTP starttls error: {}", e)))?
                .port(port)
                .credentials(credentials)
                .build()
        };

        mailer
            .send(message)
            .await
            .map_err(|e| SendError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EmailSender for ProviderEmailSender {
    async fn send(&self, account: &EmailAccount, email: &OutgoingEmail) -> Result<(), SendError> {
        if !account.is_active {
            return Err(SendError::AccountInactive);
        }

        if account.uses_oauth() {
            let token = self.credentials.access_token(account).await?;
            match account.provider_kind() {
                Some(Provider::Gmail) => {
                    let message = build_message(account, email)?;
                    self.gmail.send_raw(&token, &message.formatted()).await?;
                }
                Some(Provider::Outlook) => {
                    self.outlook.send_mail(&token, graph_message(email)).await?;
                }
                _ => return Err(ProviderError::Unsupported(account.provider.clone()).into()),
            }
        } else {
            let message = build_message(account, email)?;
            self.send_smtp(account, message).await?;
        }

        tracing::info!(
            "Sent '{}' from {} to {}",
            email.subject,
            account.email_address,
            email.to.join(", ")
        );
        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, SendError> {
    address
        .parse()
        .map_err(|e| SendError::MessageBuild(format!("Invalid address {}: {}", address, e)))
}

/// RFC 2822 message for SMTP and the Gmail raw upload.
pub fn build_message(account: &EmailAccount, email: &OutgoingEmail) -> Result<Message, SendError> {
    if email.to.is_empty() {
        return Err(SendError::MessageBuild("No recipients".to_string()));
    }

    let from = match account.display_name.as_deref() {
        Some(name) if !name.is_empty() => Mailbox::new(
            Some(name.to_string()),
            account
                .email_address
                .parse()
                .map_err(|e| SendError::MessageBuild(format!("Invalid from address: {}", e)))?,
        ),
        _ => mailbox(&account.email_address)?,
    };

    let mut builder = Message::builder().from(from).subject(email.subject.clone());
    for to in &email.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &email.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    if let Some(in_reply_to) = &email.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
        let references = email.references.clone().unwrap_or_else(|| in_reply_to.clone());
        builder = builder.references(references);
    }

    let message = match &email.body_html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            email.body_text.clone(),
            html.clone(),
        )),
        None => builder.singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(email.body_text.clone()),
        ),
    };

    message.map_err(|e| SendError::MessageBuild(e.to_string()))
}

/// Graph `message` resource; HTML body when there is one.
pub fn graph_message(email: &OutgoingEmail) -> Value {
    let recipients = |addresses: &[String]| -> Vec<Value> {
        addresses
            .iter()
            .map(|a| json!({ "emailAddress": { "address": a } }))
            .collect()
    };

    let body = match &email.body_html {
        Some(html) => json!({ "contentType": "HTML", "content": html }),
        None => json!({ "contentType": "Text", "content": email.body_text }),
    };

    json!({
        "subject": email.subject,
        "body": body,
        "toRecipients": recipients(&email.to),
        "ccRecipients": recipients(&email.cc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> EmailAccount {
        serde_json::from_value(json!({
            "id": 1,
            "user_id": 1,
            "provider": "custom",
            "email_address": "me@example.com",
            "display_name": "Me Myself",
            "sync_enabled": true,
            "sync_frequency_minutes": 15,
            "connection_status": "connected",
            "is_active": true,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn outgoing() -> OutgoingEmail {
        OutgoingEmail {
            to: vec!["you@example.com".into()],
            cc: vec!["boss@example.com".into()],
            subject: "Re: Lunch".into(),
            body_text: "Sounds good".into(),
            body_html: None,
            in_reply_to: Some("<orig@example.com>".into()),
            references: None,
        }
    }

    #[test]
    fn test_build_message_headers() {
        let message = build_message(&account(), &outgoing()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: \"Me Myself\" <me@example.com>"));
        assert!(raw.contains("To: you@example.com"));
        assert!(raw.contains("Cc: boss@example.com"));
        assert!(raw.contains("Subject: Re: Lunch"));
        assert!(raw.contains("In-Reply-To: <orig@example.com>"));
        assert!(raw.contains("References: <orig@example.com>"));
        assert!(raw.contains("Sounds good"));
    }

    #[test]
    fn test_build_message_requires_recipient() {
        let email = OutgoingEmail {
            to: vec![],
            ..outgoing()
        };
        assert!(matches!(
            build_message(&account(), &email),
            Err(SendError::MessageBuild(_))
        ));
    }

    #[test]
    fn test_graph_message_prefers_html() {
        let mut email = outgoing();
        let plain = graph_message(&email);
        assert_eq!(plain["body"]["contentType"], "Text");
        assert_eq!(plain["toRecipients"][0]["emailAddress"]["address"], "you@example.com");

        email.body_html = Some("<p>Sounds good</p>".into());
        let html = graph_message(&email);
        assert_eq!(html["body"]["contentType"], "HTML");
        assert_eq!(html["body"]["content"], "<p>Sounds good</p>");
    }
}
