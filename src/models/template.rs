use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_TONE: &str = "professional";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub tone: String,
    pub usage_count: i64,
    pub last_used_at: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}
