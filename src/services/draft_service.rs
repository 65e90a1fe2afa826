use crate::models::draft::{reply_subject, STATUS_DRAFT, STATUS_FAILED, STATUS_SENT};
use crate::models::{now_timestamp, Draft, DraftWithEmail};
use crate::repositories::{AccountRepository, RepositoryError};
use crate::services::email_sender::{EmailSender, OutgoingEmail};
use crate::services::inbox_service::InboxService;
use crate::services::llm_service::{DraftOptions, LlmError, LlmService};
use serde::Deserialize;
use sqlx::{types::Json, SqlitePool};
use std::sync::Arc;

const DRAFT_WITH_EMAIL_SELECT: &str = "SELECT d.*, e.subject AS original_subject, \
     e.from_address AS original_from_address, e.from_name AS original_from_name \
     FROM email_drafts d LEFT JOIN emails e ON e.id = d.email_id";

#[derive(Debug, thiserror::Error)]
pub enum DraftServiceError {
    #[error("Draft not found")]
    NotFound,
    #[error("Email not found")]
    EmailNotFound,
    #[error("Draft has already been sent")]
    AlreadySent,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("{0}")]
    SendFailed(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<RepositoryError> for DraftServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => DraftServiceError::Database(e),
            other => DraftServiceError::SendFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDraftRequest {
    pub email_id: Option<i64>,
    pub tone: Option<String>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub skip_ai: bool,
    pub draft_content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DraftChanges {
    pub subject: Option<String>,
    #[serde(alias = "draft_content")]
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub status: Option<String>,
}

impl DraftChanges {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none()
            && self.body_text.is_none()
            && self.body_html.is_none()
            && self.status.is_none()
    }
}

/// A freshly created draft plus whatever the model said about it.
#[derive(Debug, Clone)]
pub struct CreatedDraft {
    pub draft: Draft,
    pub notes: Option<String>,
}

pub struct DraftService {
    pool: SqlitePool,
    inbox: InboxService,
    accounts: Arc<dyn AccountRepository>,
    llm: LlmService,
    sender: Arc<dyn EmailSender>,
}

impl DraftService {
    pub fn new(
        pool: SqlitePool,
        inbox: InboxService,
        accounts: Arc<dyn AccountRepository>,
        llm: LlmService,
        sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            pool,
            inbox,
            accounts,
            llm,
            sender,
        }
    }

    pub async fn list(
        &self,
        user_id: i64,
        status: Option<&str>,
    ) -> Result<Vec<DraftWithEmail>, DraftServiceError> {
        let drafts = match status.filter(|s| !s.is_empty()) {
            Some(status) => {
                sqlx::query_as::<_, DraftWithEmail>(&format!(
                    "{} WHERE d.user_id = ? AND d.status = ? ORDER BY d.created_at DESC, d.id DESC",
                    DRAFT_WITH_EMAIL_SELECT
                ))
                .bind(user_id)
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DraftWithEmail>(&format!(
                    "{} WHERE d.user_id = ? ORDER BY d.created_at DESC, d.id DESC",
                    DRAFT_WITH_EMAIL_SELECT
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(drafts)
    }

    pub async fn get(&self, user_id: i64, id: i64) -> Result<DraftWithEmail, DraftServiceError> {
        sqlx::query_as::<_, DraftWithEmail>(&format!(
            "{} WHERE d.id = ? AND d.user_id = ?",
            DRAFT_WITH_EMAIL_SELECT
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DraftServiceError::NotFound)
    }

    async fn find(&self, user_id: i64, id: i64) -> Result<Draft, DraftServiceError> {
        sqlx::query_as::<_, Draft>("SELECT * FROM email_drafts WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DraftServiceError::NotFound)
    }

    /// Writes a reply to one of the user's emails, by hand when `skip_ai`
    /// comes with content, otherwise through the model.
    pub async fn create(
        &self,
        user_id: i64,
        request: CreateDraftRequest,
    ) -> Result<CreatedDraft, DraftServiceError> {
        let email_id = request
            .email_id
            .ok_or_else(|| DraftServiceError::Validation("email_id is required".to_string()))?;
        let email = self
            .inbox
            .find(user_id, email_id)
            .await?
            .ok_or(DraftServiceError::EmailNotFound)?;
        let reply_to = email
            .from_address
            .clone()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| {
                DraftServiceError::Validation("Original email has no sender address".to_string())
            })?;

        let manual = request
            .draft_content
            .as_deref()
            .filter(|c| request.skip_ai && !c.trim().is_empty());

        let (subject, body_text, body_html, confidence, prompt, notes, ai_generated) = match manual
        {
            Some(content) => (
                reply_subject(email.subject.as_deref()),
                content.to_string(),
                None,
                None,
                None,
                None,
                false,
            ),
            None => {
                let options = DraftOptions {
                    tone: request
                        .tone
                        .clone()
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| DraftOptions::default().tone),
                    instructions: request.instructions.clone(),
                };
                let reply = self
                    .llm
                    .generate_draft_reply(user_id, &email, &options)
                    .await?;
                let subject = if reply.subject.trim().is_empty() {
                    reply_subject(email.subject.as_deref())
                } else {
                    reply_subject(Some(&reply.subject))
                };
                (
                    subject,
                    reply.body_text,
                    reply.body_html,
                    reply.confidence_score,
                    options.instructions,
                    reply.notes,
                    true,
                )
            }
        };

        let now = now_timestamp();
        let draft = sqlx::query_as::<_, Draft>(
            r#"
            INSERT INTO email_drafts (
                user_id, email_account_id, email_id, to_addresses, cc_addresses, subject,
                body_text, body_html, ai_generated, ai_confidence_score, ai_prompt, status,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, '[]', ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(email.email_account_id)
        .bind(email.id)
        .bind(Json(vec![reply_to]))
        .bind(subject)
        .bind(body_text)
        .bind(body_html)
        .bind(ai_generated)
        .bind(confidence)
        .bind(prompt)
        .bind(STATUS_DRAFT)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "Created {} draft {} for email {}",
            if ai_generated { "AI" } else { "manual" },
            draft.id,
            email.id
        );
        Ok(CreatedDraft { draft, notes })
    }

    pub async fn update(
        &self,
        user_id: i64,
        id: i64,
        changes: DraftChanges,
    ) -> Result<Draft, DraftServiceError> {
        if changes.is_empty() {
            return Err(DraftServiceError::Validation(
                "No fields to update".to_string(),
            ));
        }
        if let Some(status) = changes.status.as_deref() {
            if ![STATUS_DRAFT, STATUS_SENT, STATUS_FAILED].contains(&status) {
                return Err(DraftServiceError::Validation("Invalid status".to_string()));
            }
        }

        let existing = self.find(user_id, id).await?;
        if existing.is_sent() {
            return Err(DraftServiceError::AlreadySent);
        }

        let draft = sqlx::query_as::<_, Draft>(
            r#"
            UPDATE email_drafts SET
                subject = COALESCE(?, subject),
                body_text = COALESCE(?, body_text),
                body_html = COALESCE(?, body_html),
                status = COALESCE(?, status),
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(changes.subject)
        .bind(changes.body_text)
        .bind(changes.body_html)
        .bind(changes.status)
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(draft)
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), DraftServiceError> {
        let result = sqlx::query("DELETE FROM email_drafts WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DraftServiceError::NotFound);
        }
        Ok(())
    }

    /// Sends a draft through the account it was created for. The outcome is
    /// recorded on the draft either way.
    pub async fn send(&self, user_id: i64, id: i64) -> Result<Draft, DraftServiceError> {
        let draft = self.find(user_id, id).await?;
        if draft.is_sent() {
            return Err(DraftServiceError::AlreadySent);
        }

        let outcome = self.deliver(user_id, &draft).await;
        let now = now_timestamp();

        match outcome {
            Ok(()) => {
                let sent = sqlx::query_as::<_, Draft>(
                    "UPDATE email_drafts SET status = ?, sent_at = ?, error_message = NULL, \
                     updated_at = ? WHERE id = ? RETURNING *",
                )
                .bind(STATUS_SENT)
                .bind(&now)
                .bind(&now)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
                tracing::info!("Draft {} sent", id);
                Ok(sent)
            }
            Err(reason) => {
                tracing::error!("Failed to send draft {}: {}", id, reason);
                sqlx::query(
                    "UPDATE email_drafts SET status = ?, error_message = ?, updated_at = ? \
                     WHERE id = ?",
                )
                .bind(STATUS_FAILED)
                .bind(&reason)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;
                Err(DraftServiceError::SendFailed(reason))
            }
        }
    }

    async fn deliver(&self, user_id: i64, draft: &Draft) -> Result<(), String> {
        let account = self
            .accounts
            .find_for_user(draft.email_account_id, user_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "Email account not found".to_string())?;

        let original = match draft.email_id {
            Some(email_id) => self
                .inbox
                .find(user_id, email_id)
                .await
                .map_err(|e| e.to_string())?,
            None => None,
        };
        // Only RFC 5322 ids are meaningful in In-Reply-To
        let in_reply_to = original
            .as_ref()
            .map(|e| e.message_id.clone())
            .filter(|id| id.starts_with('<'));
        let references = original
            .as_ref()
            .and_then(|e| e.thread_id.clone())
            .filter(|id| id.starts_with('<'))
            .or_else(|| in_reply_to.clone());

        let outgoing = OutgoingEmail {
            to: draft.to_addresses.0.clone(),
            cc: draft.cc_addresses.0.clone(),
            subject: draft.subject.clone(),
            body_text: draft.body_text.clone(),
            body_html: draft.body_html.clone(),
            in_reply_to,
            references,
        };

        self.sender
            .send(&account, &outgoing)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::repositories::SqliteAccountRepository;
    use crate::services::budget_service::BudgetService;
    use crate::services::email_sender::{MockEmailSender, SendError};
    use crate::services::notification_service::NotificationService;
    use crate::test_utils::test_helpers::{
        create_test_db, insert_test_account, insert_test_email, insert_test_user,
    };

    async fn setup(sender: MockEmailSender) -> (DraftService, i64, i64) {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "d@example.com", "Password1").await.unwrap();
        let account = insert_test_account(&pool, user_id, "d@example.com").await.unwrap();
        let email_id = insert_test_email(&pool, &account, "<orig@example.com>", "Lunch")
            .await
            .unwrap();

        let notifications = NotificationService::new(pool.clone());
        let budget = BudgetService::new(pool.clone(), 1000, notifications);
        let service = DraftService::new(
            pool.clone(),
            InboxService::new(pool.clone()),
            Arc::new(SqliteAccountRepository::new(pool.clone())),
            LlmService::new(AppConfig::default().claude, budget),
            Arc::new(sender),
        );
        (service, user_id, email_id)
    }

    fn manual(email_id: i64) -> CreateDraftRequest {
        CreateDraftRequest {
            email_id: Some(email_id),
            skip_ai: true,
            draft_content: Some("See you at noon".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_manual_draft_replies_to_sender() {
        let (service, user_id, email_id) = setup(MockEmailSender::new()).await;

        let created = service.create(user_id, manual(email_id)).await.unwrap();
        assert_eq!(created.draft.subject, "Re: Lunch");
        assert_eq!(created.draft.to_addresses.0, vec!["sender@example.com"]);
        assert_eq!(created.draft.status, "draft");
        assert!(!created.draft.ai_generated);

        let listed = service.list(user_id, Some("draft")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original_subject.as_deref(), Some("Lunch"));
        assert!(service.list(user_id, Some("sent")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_known_email() {
        let (service, user_id, _) = setup(MockEmailSender::new()).await;
        assert!(matches!(
            service.create(user_id, manual(9999)).await,
            Err(DraftServiceError::EmailNotFound)
        ));
        assert!(matches!(
            service.create(user_id, CreateDraftRequest::default()).await,
            Err(DraftServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_ai_draft_without_api_key_fails() {
        let (service, user_id, email_id) = setup(MockEmailSender::new()).await;
        let request = CreateDraftRequest {
            email_id: Some(email_id),
            ..Default::default()
        };
        assert!(matches!(
            service.create(user_id, request).await,
            Err(DraftServiceError::Llm(LlmError::NotConfigured))
        ));
    }

    #[tokio::test]
    async fn test_send_marks_draft_sent_once() {
        let mut sender = MockEmailSender::new();
        sender
            .expect_send()
            .withf(|_, email| {
                email.in_reply_to.as_deref() == Some("<orig@example.com>")
                    && email.to == vec!["sender@example.com".to_string()]
            })
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        let (service, user_id, email_id) = setup(sender).await;
        let draft = service.create(user_id, manual(email_id)).await.unwrap().draft;

        let sent = service.send(user_id, draft.id).await.unwrap();
        assert_eq!(sent.status, "sent");
        assert!(sent.sent_at.is_some());

        assert!(matches!(
            service.send(user_id, draft.id).await,
            Err(DraftServiceError::AlreadySent)
        ));
    }

    #[tokio::test]
    async fn test_send_failure_is_recorded() {
        let mut sender = MockEmailSender::new();
        sender.expect_send().returning(|_, _| {
            Box::pin(async { Err(SendError::SendFailed("relay refused".into())) })
        });
        let (service, user_id, email_id) = setup(sender).await;
        let draft = service.create(user_id, manual(email_id)).await.unwrap().draft;

        match service.send(user_id, draft.id).await {
            Err(DraftServiceError::SendFailed(reason)) => assert_eq!(reason, "relay refused"),
            other => panic!("unexpected: {:?}", other.map(|d| d.id)),
        }
        let stored = service.get(user_id, draft.id).await.unwrap();
        assert_eq!(stored.draft.status, "failed");
        assert_eq!(stored.draft.error_message.as_deref(), Some("relay refused"));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (service, user_id, email_id) = setup(MockEmailSender::new()).await;
        let draft = service.create(user_id, manual(email_id)).await.unwrap().draft;

        let changes: DraftChanges =
            serde_json::from_value(serde_json::json!({ "draft_content": "Make it 1pm" })).unwrap();
        let updated = service.update(user_id, draft.id, changes).await.unwrap();
        assert_eq!(updated.body_text, "Make it 1pm");
        assert_eq!(updated.subject, "Re: Lunch");

        assert!(matches!(
            service.update(user_id, draft.id, DraftChanges::default()).await,
            Err(DraftServiceError::Validation(_))
        ));

        service.delete(user_id, draft.id).await.unwrap();
        assert!(matches!(
            service.delete(user_id, draft.id).await,
            Err(DraftServiceError::NotFound)
        ));
    }
}
