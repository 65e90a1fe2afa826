use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};

/// A stored filing rule. Conditions and actions are opaque to the server.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub conditions: Json<Vec<Value>>,
    pub actions: Json<Vec<Value>>,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}
