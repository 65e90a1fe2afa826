//! IMAP over implicit TLS for password-based mailboxes.

use crate::models::{format_timestamp, make_snippet, AttachmentMeta, EmailAccount, IncomingEmail};
use crate::services::mail_provider::{
    parse_address_list, parse_email_address, FetchWindow, MailFetcher, ProviderError,
};
use async_imap::types::{Fetch, Flag};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_native_tls::{native_tls, TlsStream};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Where and how to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapLogin {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Checks that credentials work before an account is saved.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ImapConnector: Send + Sync {
    async fn verify_login(&self, login: &ImapLogin) -> Result<(), ProviderError>;
}

/// Human-readable reason appended to "Failed to connect to email server. ".
pub fn connection_hint(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::AuthenticationFailed(_) => "Invalid email or password.",
        ProviderError::Timeout(_) => "Connection timeout - check server settings.",
        ProviderError::HostNotFound(_) => "Server not found - check IMAP host.",
        _ => "Please verify your email, password, and server settings.",
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImapClient;

impl ImapClient {
    pub fn new() -> Self {
        Self
    }

    async fn connect(login: &ImapLogin) -> Result<ImapSession, ProviderError> {
        let tcp = TcpStream::connect((login.host.as_str(), login.port))
            .await
            .map_err(|e| {
                let message = e.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("lookup") || lowered.contains("not known") {
                    ProviderError::HostNotFound(login.host.clone())
                } else {
                    ProviderError::Imap(format!(
                        "Failed to connect to {}:{}: {}",
                        login.host, login.port, message
                    ))
                }
            })?;

        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| ProviderError::Imap(format!("Failed to build TLS connector: {}", e)))?;
        let tls_stream = tokio_native_tls::TlsConnector::from(tls)
            .connect(&login.host, tcp)
            .await
            .map_err(|e| ProviderError::Imap(format!("TLS handshake failed: {}", e)))?;

        let client = async_imap::Client::new(tls_stream.compat());
        client
            .login(&login.username, &login.password)
            .await
            .map_err(|(e, _)| ProviderError::AuthenticationFailed(e.to_string()))
    }

    async fn fetch_inbox(
        session: &mut ImapSession,
        account: &EmailAccount,
        window: FetchWindow,
    ) -> Result<Vec<IncomingEmail>, ProviderError> {
        session
            .select("INBOX")
            .await
            .map_err(|e| ProviderError::Imap(format!("Failed to select INBOX: {}", e)))?;

        let query = format!("SINCE {}", window.since.format("%d-%b-%Y"));
        let mut uids: Vec<u32> = session
            .uid_search(&query)
            .await
            .map_err(|e| ProviderError::Imap(format!("Search failed: {}", e)))?
            .into_iter()
            .collect();
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        uids.sort_unstable();
        let keep = window.max_results as usize;
        let recent = &uids[uids.len().saturating_sub(keep)..];
        let uid_set = recent
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches: Vec<_> = session
            .uid_fetch(&uid_set, "(UID FLAGS BODY.PEEK[])")
            .await
            .map_err(|e| ProviderError::Imap(format!("Fetch failed: {}", e)))?
            .collect()
            .await;

        let mut emails = Vec::with_capacity(fetches.len());
        for fetch in fetches {
            match fetch {
                Ok(fetch) => match parse_fetch(account.id, &fetch) {
                    Ok(email) => emails.push(email),
                    Err(e) => tracing::warn!("Skipping unparseable IMAP message: {}", e),
                },
                Err(e) => tracing::warn!("Failed to fetch message: {}", e),
            }
        }
        Ok(emails)
    }
}

#[async_trait]
impl ImapConnector for ImapClient {
    async fn verify_login(&self, login: &ImapLogin) -> Result<(), ProviderError> {
        let attempt = async {
            let mut session = Self::connect(login).await?;
            session.logout().await.ok();
            Ok(())
        };
        tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), attempt)
            .await
            .map_err(|_| ProviderError::Timeout(CONNECT_TIMEOUT_SECS))?
    }
}

#[async_trait]
impl MailFetcher for ImapClient {
    async fn fetch(
        &self,
        account: &EmailAccount,
        secret: &str,
        window: FetchWindow,
    ) -> Result<Vec<IncomingEmail>, ProviderError> {
        let host = account
            .imap_host
            .clone()
            .ok_or_else(|| ProviderError::Imap("IMAP host not configured".to_string()))?;
        let login = ImapLogin {
            host,
            port: account.imap_port.and_then(|p| u16::try_from(p).ok()).unwrap_or(993),
            username: account.login_name().to_string(),
            password: secret.to_string(),
        };

        let mut session = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Self::connect(&login),
        )
        .await
        .map_err(|_| ProviderError::Timeout(CONNECT_TIMEOUT_SECS))??;

        let result = Self::fetch_inbox(&mut session, account, window).await;
        session.logout().await.ok();
        result
    }
}

fn parse_fetch(account_id: i64, fetch: &Fetch) -> Result<IncomingEmail, ProviderError> {
    let raw = fetch
        .body()
        .ok_or_else(|| ProviderError::Parse("No body in FETCH response".to_string()))?;
    let uid = fetch.uid.unwrap_or(0);
    let mut email = parse_raw_message(raw, &format!("{}-{}", account_id, uid))?;

    let mut seen = false;
    let mut flagged = false;
    for flag in fetch.flags() {
        match flag {
            Flag::Seen => seen = true,
            Flag::Flagged => flagged = true,
            _ => {}
        }
    }
    email.is_read = seen;
    email.is_starred = flagged;
    Ok(email)
}

fn walk_mime(
    part: &mailparse::ParsedMail,
    text: &mut Option<String>,
    html: &mut Option<String>,
    attachments: &mut Vec<AttachmentMeta>,
) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_mime(sub, text, html, attachments);
        }
        return;
    }

    let mimetype = part.ctype.mimetype.to_lowercase();
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    if disposition.disposition == mailparse::DispositionType::Attachment || filename.is_some() {
        attachments.push(AttachmentMeta {
            filename: filename.unwrap_or_else(|| "attachment".to_string()),
            content_type: mimetype,
            size: part.get_body_raw().map(|b| b.len() as i64).unwrap_or(0),
        });
    } else if mimetype == "text/plain" && text.is_none() {
        *text = part.get_body().ok();
    } else if mimetype == "text/html" && html.is_none() {
        *html = part.get_body().ok();
    }
}

/// Parses a full RFC 822 message. `fallback_id` is used when the message
/// carries no Message-ID header.
pub fn parse_raw_message(raw: &[u8], fallback_id: &str) -> Result<IncomingEmail, ProviderError> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let header = |name: &str| {
        parsed
            .headers
            .iter()
            .find(|h| h.get_key().eq_ignore_ascii_case(name))
            .map(|h| h.get_value())
            .filter(|v| !v.trim().is_empty())
    };

    let (from_address, from_name) = header("From")
        .map(|v| parse_email_address(&v))
        .unwrap_or_default();

    let mut text = None;
    let mut html = None;
    let mut attachments = Vec::new();
    walk_mime(&parsed, &mut text, &mut html, &mut attachments);

    let thread_id = header("In-Reply-To").or_else(|| {
        header("References").and_then(|r| r.split_whitespace().next().map(str::to_string))
    });

    let received_at = header("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(format_timestamp);

    Ok(IncomingEmail {
        message_id: header("Message-ID").unwrap_or_else(|| fallback_id.to_string()),
        thread_id,
        subject: Some(header("Subject").unwrap_or_else(|| "(No Subject)".to_string())),
        from_address: Some(from_address).filter(|a| !a.is_empty()),
        from_name,
        to_addresses: parse_address_list(header("To").as_deref()),
        cc_addresses: parse_address_list(header("Cc").as_deref()),
        snippet: text.as_deref().map(make_snippet),
        body_text: text,
        body_html: html,
        received_at,
        is_read: false,
        is_starred: false,
        labels: Vec::new(),
        has_attachments: !attachments.is_empty(),
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: \"Alan Turing\" <alan@example.com>\r\n\
To: me@example.com, Ops <ops@example.com>\r\n\
Subject: Weekly sync\r\n\
Message-ID: <abc123@example.com>\r\n\
In-Reply-To: <prev@example.com>\r\n\
Date: Tue, 14 Nov 2023 22:13:20 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Agenda   for\r\n   Monday\r\n\
--XYZ\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Agenda for Monday</p>\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"agenda.pdf\"\r\n\
Content-Disposition: attachment; filename=\"agenda.pdf\"\r\n\
\r\n\
JVBERi0=\r\n\
--XYZ--\r\n";

    #[test]
    fn test_parse_multipart_message() {
        let email = parse_raw_message(MULTIPART.as_bytes(), "7-1").unwrap();
        assert_eq!(email.message_id, "<abc123@example.com>");
        assert_eq!(email.thread_id.as_deref(), Some("<prev@example.com>"));
        assert_eq!(email.subject.as_deref(), Some("Weekly sync"));
        assert_eq!(email.from_address.as_deref(), Some("alan@example.com"));
        assert_eq!(email.from_name.as_deref(), Some("Alan Turing"));
        assert_eq!(email.to_addresses, vec!["me@example.com", "ops@example.com"]);
        assert!(email.body_text.as_deref().unwrap().contains("Agenda"));
        assert_eq!(email.snippet.as_deref(), Some("Agenda for Monday"));
        assert!(email.body_html.as_deref().unwrap().contains("<p>"));
        assert!(email.has_attachments);
        assert_eq!(email.attachments[0].filename, "agenda.pdf");
        assert_eq!(email.received_at.as_deref(), Some("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_missing_message_id_uses_fallback() {
        let raw = b"From: x@example.com\r\nSubject: hi\r\n\r\nbody\r\n";
        let email = parse_raw_message(raw, "42-9").unwrap();
        assert_eq!(email.message_id, "42-9");
        assert_eq!(email.body_text.as_deref().map(str::trim), Some("body"));
        assert!(!email.has_attachments);
    }

    #[test]
    fn test_connection_hints() {
        assert_eq!(
            connection_hint(&ProviderError::AuthenticationFailed("NO".into())),
            "Invalid email or password."
        );
        assert_eq!(
            connection_hint(&ProviderError::Timeout(15)),
            "Connection timeout - check server settings."
        );
        assert_eq!(
            connection_hint(&ProviderError::HostNotFound("x".into())),
            "Server not found - check IMAP host."
        );
        assert_eq!(
            connection_hint(&ProviderError::Imap("boom".into())),
            "Please verify your email, password, and server settings."
        );
    }
}
