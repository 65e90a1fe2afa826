use crate::models::{now_timestamp, Rule};
use crate::validators::sanitize_input;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{types::Json, SqlitePool};

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Body of `POST /api/rules` and `PATCH /api/rules/{id}`. Conditions and
/// actions are kept as raw JSON so shape errors can be reported precisely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleInput {
    pub name: Option<String>,
    pub conditions: Option<Value>,
    pub actions: Option<Value>,
    pub enabled: Option<bool>,
}

fn non_empty_list(value: &Value, message: &str) -> Result<Vec<Value>, RuleError> {
    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(items.clone()),
        _ => Err(RuleError::Validation(message.to_string())),
    }
}

const CONDITIONS_REQUIRED: &str = "At least one condition is required";
const ACTIONS_REQUIRED: &str = "At least one action is required";

#[derive(Clone)]
pub struct RuleService {
    pool: SqlitePool,
}

impl RuleService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<Rule>, RuleError> {
        Ok(sqlx::query_as::<_, Rule>(
            "SELECT * FROM email_rules WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn create(&self, user_id: i64, input: RuleInput) -> Result<Rule, RuleError> {
        let (Some(name), Some(conditions), Some(actions)) = (
            input.name.as_deref().map(sanitize_input).filter(|n| !n.is_empty()),
            input.conditions.as_ref(),
            input.actions.as_ref(),
        ) else {
            return Err(RuleError::Validation(
                "Name, conditions, and actions are required".to_string(),
            ));
        };
        let conditions = non_empty_list(conditions, CONDITIONS_REQUIRED)?;
        let actions = non_empty_list(actions, ACTIONS_REQUIRED)?;

        let now = now_timestamp();
        let rule = sqlx::query_as::<_, Rule>(
            r#"
            INSERT INTO email_rules (user_id, name, conditions, actions, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(Json(conditions))
        .bind(Json(actions))
        .bind(input.enabled.unwrap_or(true))
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created rule {} for user {}", rule.id, user_id);
        Ok(rule)
    }

    pub async fn update(&self, user_id: i64, id: i64, input: RuleInput) -> Result<Rule, RuleError> {
        self.find(user_id, id).await?;

        let conditions = input
            .conditions
            .as_ref()
            .map(|c| non_empty_list(c, CONDITIONS_REQUIRED))
            .transpose()?;
        let actions = input
            .actions
            .as_ref()
            .map(|a| non_empty_list(a, ACTIONS_REQUIRED))
            .transpose()?;
        let name = input.name.as_deref().map(sanitize_input);

        if name.is_none() && conditions.is_none() && actions.is_none() && input.enabled.is_none() {
            return Err(RuleError::Validation("No fields to update".to_string()));
        }

        let rule = sqlx::query_as::<_, Rule>(
            r#"
            UPDATE email_rules SET
                name = COALESCE(?, name),
                conditions = COALESCE(?, conditions),
                actions = COALESCE(?, actions),
                enabled = COALESCE(?, enabled),
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(conditions.map(Json))
        .bind(actions.map(Json))
        .bind(input.enabled)
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(rule)
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), RuleError> {
        let result = sqlx::query("DELETE FROM email_rules WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RuleError::NotFound);
        }
        Ok(())
    }

    async fn find(&self, user_id: i64, id: i64) -> Result<Rule, RuleError> {
        sqlx::query_as::<_, Rule>("SELECT * FROM email_rules WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RuleError::NotFound)
    }
}
