use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Email {
    pub id: i64,
    pub email_account_id: i64,
    pub user_id: i64,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub to_addresses: Json<Vec<String>>,
    pub cc_addresses: Json<Vec<String>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: Option<String>,
    pub received_at: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub is_deleted: bool,
    pub labels: Json<Vec<String>>,
    pub has_attachments: bool,
    pub attachments: Json<Vec<AttachmentMeta>>,
    pub priority_score: Option<i64>,
    pub priority_level: Option<String>,
    pub category: Option<String>,
    pub sentiment: Option<String>,
    pub action_items: Json<Vec<ActionItem>>,
    pub summary: Option<String>,
    pub tags: Json<Vec<String>>,
    pub ai_analyzed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Email {
    /// Sender shown to people: the display name when there is one.
    pub fn sender_label(&self) -> &str {
        self.from_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.from_address.as_deref())
            .unwrap_or("Unknown sender")
    }
}

/// An email joined with the mailbox it was synced from.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EmailWithAccount {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub email: Email,
    pub account_email: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionItem {
    pub task: String,
    #[serde(default)]
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub filename: String,
    #[serde(rename = "mimeType")]
    pub content_type: String,
    pub size: i64,
}

/// A message as fetched from a provider, before it has a row id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomingEmail {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: Option<String>,
    pub received_at: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub labels: Vec<String>,
    pub has_attachments: bool,
    pub attachments: Vec<AttachmentMeta>,
}

/// First 200 characters of the text body with runs of whitespace collapsed.
pub fn make_snippet(body: &str) -> String {
    body.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(200)
        .collect()
}
