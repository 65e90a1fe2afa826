use crate::models::template::{DEFAULT_CATEGORY, DEFAULT_TONE};
use crate::models::{now_timestamp, Template};
use crate::variables::TemplateRenderer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found")]
    NotFound,
    #[error("Template not found or inactive")]
    NotFoundOrInactive,
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateInput {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
    pub tone: Option<String>,
    pub is_active: Option<bool>,
}

impl TemplateInput {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.subject.is_none()
            && self.body.is_none()
            && self.category.is_none()
            && self.tone.is_none()
            && self.is_active.is_none()
    }
}

/// A template with its placeholders filled in.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub tone: String,
}

fn required(value: Option<&str>, message: &str) -> Result<String, TemplateError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TemplateError::Validation(message.to_string()))
}

#[derive(Clone)]
pub struct TemplateService {
    pool: SqlitePool,
}

impl TemplateService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most used first.
    pub async fn list(&self, user_id: i64) -> Result<Vec<Template>, TemplateError> {
        Ok(sqlx::query_as::<_, Template>(
            "SELECT * FROM email_templates WHERE user_id = ? \
             ORDER BY usage_count DESC, created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get(&self, user_id: i64, id: i64) -> Result<Template, TemplateError> {
        sqlx::query_as::<_, Template>("SELECT * FROM email_templates WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TemplateError::NotFound)
    }

    pub async fn create(
        &self,
        user_id: i64,
        input: TemplateInput,
    ) -> Result<Template, TemplateError> {
        let name = required(input.name.as_deref(), "Template name is required")?;
        let body = required(input.body.as_deref(), "Template body is required")?;
        let now = now_timestamp();

        let template = sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO email_templates (user_id, name, subject, body, category, tone, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(input.subject.unwrap_or_default())
        .bind(body)
        .bind(input.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()))
        .bind(input.tone.unwrap_or_else(|| DEFAULT_TONE.to_string()))
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created template {} for user {}", template.id, user_id);
        Ok(template)
    }

    pub async fn update(
        &self,
        user_id: i64,
        id: i64,
        input: TemplateInput,
    ) -> Result<Template, TemplateError> {
        if input.is_empty() {
            return Err(TemplateError::Validation("No fields to update".to_string()));
        }
        if input.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(TemplateError::Validation("Template name is required".to_string()));
        }
        if input.body.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(TemplateError::Validation("Template body is required".to_string()));
        }

        sqlx::query_as::<_, Template>(
            r#"
            UPDATE email_templates SET
                name = COALESCE(?, name),
                subject = COALESCE(?, subject),
                body = COALESCE(?, body),
                category = COALESCE(?, category),
                tone = COALESCE(?, tone),
                is_active = COALESCE(?, is_active),
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(input.name.map(|n| n.trim().to_string()))
        .bind(input.subject)
        .bind(input.body)
        .bind(input.category)
        .bind(input.tone)
        .bind(input.is_active)
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TemplateError::NotFound)
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), TemplateError> {
        let result = sqlx::query("DELETE FROM email_templates WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TemplateError::NotFound);
        }
        Ok(())
    }

    /// Counts a use of an active template and fills its placeholders.
    /// Returns the rendered template and the variable names supplied.
    pub async fn use_template(
        &self,
        user_id: i64,
        id: i64,
        variables: &HashMap<String, Value>,
    ) -> Result<(RenderedTemplate, Vec<String>), TemplateError> {
        let now = now_timestamp();
        let template = sqlx::query_as::<_, Template>(
            r#"
            UPDATE email_templates SET usage_count = usage_count + 1, last_used_at = ?
            WHERE id = ? AND user_id = ? AND is_active = 1
            RETURNING *
            "#,
        )
        .bind(&now)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TemplateError::NotFoundOrInactive)?;

        let renderer = TemplateRenderer::new();
        let rendered = RenderedTemplate {
            id: template.id,
            subject: renderer.render(&template.subject, variables),
            body: renderer.render(&template.body, variables),
            name: template.name,
            category: template.category,
            tone: template.tone,
        };

        let mut replaced: Vec<String> = variables.keys().cloned().collect();
        replaced.sort();
        Ok((rendered, replaced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::{create_test_db, insert_test_user};

    async fn setup() -> (TemplateService, i64) {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "t@example.com", "Password1").await.unwrap();
        (TemplateService::new(pool), user_id)
    }

    fn followup() -> TemplateInput {
        TemplateInput {
            name: Some(" Follow up ".into()),
            subject: Some("Checking in, {{name}}".into()),
            body: Some("Hi {{name}}, any news on {{topic}}?".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_defaults_and_validation() {
        let (templates, user_id) = setup().await;

        let template = templates.create(user_id, followup()).await.unwrap();
        assert_eq!(template.name, "Follow up");
        assert_eq!(template.category, "general");
        assert_eq!(template.tone, "professional");
        assert_eq!(template.usage_count, 0);

        let no_body = TemplateInput {
            body: Some("  ".into()),
            ..followup()
        };
        assert!(matches!(
            templates.create(user_id, no_body).await,
            Err(TemplateError::Validation(m)) if m == "Template body is required"
        ));
    }

    #[tokio::test]
    async fn test_use_template_renders_and_counts() {
        let (templates, user_id) = setup().await;
        let template = templates.create(user_id, followup()).await.unwrap();

        let variables: HashMap<String, Value> =
            [("name".to_string(), Value::from("Ada"))].into_iter().collect();
        let (rendered, replaced) = templates
            .use_template(user_id, template.id, &variables)
            .await
            .unwrap();
        assert_eq!(rendered.subject, "Checking in, Ada");
        assert_eq!(rendered.body, "Hi Ada, any news on {{topic}}?");
        assert_eq!(replaced, vec!["name"]);

        let stored = templates.get(user_id, template.id).await.unwrap();
        assert_eq!(stored.usage_count, 1);
        assert!(stored.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_inactive_template_cannot_be_used() {
        let (templates, user_id) = setup().await;
        let template = templates.create(user_id, followup()).await.unwrap();
        templates
            .update(
                user_id,
                template.id,
                TemplateInput {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            templates.use_template(user_id, template.id, &HashMap::new()).await,
            Err(TemplateError::NotFoundOrInactive)
        ));
        assert!(matches!(
            templates.delete(user_id + 1, template.id).await,
            Err(TemplateError::NotFound)
        ));
    }
}
