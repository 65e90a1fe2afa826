use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const KIND_IMPORTANT_EMAIL: &str = "important_email";
pub const KIND_BUDGET_ALERT: &str = "budget_alert";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub email_id: Option<i64>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}
