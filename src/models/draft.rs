use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};

pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Draft {
    pub id: i64,
    pub user_id: i64,
    pub email_account_id: i64,
    pub email_id: Option<i64>,
    pub to_addresses: Json<Vec<String>>,
    pub cc_addresses: Json<Vec<String>>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub ai_generated: bool,
    pub ai_confidence_score: Option<f64>,
    pub ai_prompt: Option<String>,
    pub status: String,
    pub sent_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Draft {
    pub fn is_sent(&self) -> bool {
        self.status == STATUS_SENT
    }
}

/// Draft listing row with the headline of the email it replies to.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DraftWithEmail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub draft: Draft,
    pub original_subject: Option<String>,
    pub original_from_address: Option<String>,
    pub original_from_name: Option<String>,
}

/// Adds a single `Re: ` unless the subject already carries one.
pub fn reply_subject(subject: Option<&str>) -> String {
    let subject = subject.unwrap_or("").trim();
    let has_prefix = subject
        .get(..3)
        .map(|p| p.eq_ignore_ascii_case("re:"))
        .unwrap_or(false);
    if has_prefix {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}
