use crate::config::SyncConfig;
use crate::models::notification::KIND_IMPORTANT_EMAIL;
use crate::models::{parse_timestamp, Email, EmailAccount, Provider};
use crate::repositories::{is_due_for_sync, AccountRepository, RepositoryError, UserRepository};
use crate::services::credential_service::{CredentialError, CredentialService};
use crate::services::inbox_service::InboxService;
use crate::services::llm_service::{EmailAnalysis, LlmService};
use crate::services::mail_provider::{FetchWindow, MailFetcher, ProviderError};
use crate::services::notification_service::NotificationService;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Email account not found")]
    AccountNotFound,
    #[error("Email account is not active")]
    AccountInactive,
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<RepositoryError> for SyncError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => SyncError::Database(e),
            RepositoryError::NotFound | RepositoryError::AlreadyExists => {
                SyncError::AccountNotFound
            }
        }
    }
}

/// The adapters a sync pass can pull from.
#[derive(Clone)]
pub struct Fetchers {
    pub gmail: Arc<dyn MailFetcher>,
    pub outlook: Arc<dyn MailFetcher>,
    pub imap: Arc<dyn MailFetcher>,
}

impl Fetchers {
    /// OAuth Gmail and Outlook accounts use their APIs; anything holding a
    /// password is read over IMAP.
    fn for_account(&self, account: &EmailAccount) -> Result<&Arc<dyn MailFetcher>, SyncError> {
        if !account.uses_oauth() {
            return Ok(&self.imap);
        }
        match account.provider_kind() {
            Some(Provider::Gmail) => Ok(&self.gmail),
            Some(Provider::Outlook) => Ok(&self.outlook),
            _ => Err(ProviderError::Unsupported(account.provider.clone()).into()),
        }
    }
}

/// Per-account outcome of a multi-account sync.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSyncResult {
    pub account_id: i64,
    pub email: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct EmailSyncService {
    fetchers: Fetchers,
    credentials: CredentialService,
    accounts: Arc<dyn AccountRepository>,
    users: Arc<dyn UserRepository>,
    inbox: InboxService,
    llm: LlmService,
    notifications: NotificationService,
    config: SyncConfig,
}

impl EmailSyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetchers: Fetchers,
        credentials: CredentialService,
        accounts: Arc<dyn AccountRepository>,
        users: Arc<dyn UserRepository>,
        inbox: InboxService,
        llm: LlmService,
        notifications: NotificationService,
        config: SyncConfig,
    ) -> Self {
        Self {
            fetchers,
            credentials,
            accounts,
            users,
            inbox,
            llm,
            notifications,
            config,
        }
    }

    /// Pulls new mail for one account and returns how many messages were
    /// stored. New messages are analyzed in the background.
    pub async fn sync_account(&self, account_id: i64) -> Result<usize, SyncError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(SyncError::AccountNotFound)?;
        if !account.is_active {
            return Err(SyncError::AccountInactive);
        }

        tracing::info!(
            "Syncing {} account {} ({})",
            account.provider,
            account.id,
            account.email_address
        );

        let stored = match self.pull(&account).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("Sync failed for account {}: {}", account.id, e);
                if let Err(mark_err) = self.accounts.mark_error(account.id, &e.to_string()).await {
                    tracing::error!(
                        "Failed to record sync error for account {}: {}",
                        account.id,
                        mark_err
                    );
                }
                return Err(e);
            }
        };

        self.accounts.mark_synced(account.id).await?;
        let count = stored.len();
        tracing::info!("Stored {} new emails for account {}", count, account.id);

        if !stored.is_empty() {
            let service = self.clone();
            let user_id = account.user_id;
            tokio::spawn(async move {
                service.analyze_new(user_id, stored).await;
            });
        }

        Ok(count)
    }

    async fn pull(&self, account: &EmailAccount) -> Result<Vec<Email>, SyncError> {
        let fetcher = self.fetchers.for_account(account)?;
        let secret = self.credentials.secret_for(account).await?;
        let window = self.window_for(account);

        let messages = fetcher.fetch(account, &secret, window).await?;
        tracing::debug!(
            "Fetched {} messages for account {}",
            messages.len(),
            account.id
        );

        let mut stored = Vec::new();
        for message in &messages {
            if let Some(email) = self.inbox.store(account, message).await? {
                stored.push(email);
            }
        }
        Ok(stored)
    }

    fn window_for(&self, account: &EmailAccount) -> FetchWindow {
        let since = account
            .last_sync_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(|| Utc::now() - Duration::days(self.config.lookback_days));
        FetchWindow {
            since,
            max_results: self.config.max_emails_per_sync,
        }
    }

    /// Runs AI analysis over freshly stored emails unless the user turned
    /// `autoAnalyze` off. Failures are logged and skipped.
    pub async fn analyze_new(&self, user_id: i64, emails: Vec<Email>) {
        let auto_analyze = match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => user.preferences().auto_analyze,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to load settings for user {}: {}", user_id, e);
                return;
            }
        };
        if !auto_analyze {
            tracing::debug!("Auto-analysis disabled for user {}", user_id);
            return;
        }

        for email in emails {
            let analysis = match self.llm.analyze_email(user_id, &email).await {
                Ok(analysis) => analysis,
                Err(e) => {
                    tracing::warn!("Analysis failed for email {}: {}", email.id, e);
                    continue;
                }
            };

            if let Err(e) = self.inbox.apply_analysis(email.id, &analysis).await {
                tracing::error!("Failed to save analysis for email {}: {}", email.id, e);
                continue;
            }

            if analysis.is_important() {
                self.notify_important(user_id, &email, &analysis).await;
            }
        }
    }

    async fn notify_important(&self, user_id: i64, email: &Email, analysis: &EmailAnalysis) {
        let (title, message) = important_notification(email, analysis);
        if let Err(e) = self
            .notifications
            .create(
                user_id,
                Some(email.id),
                KIND_IMPORTANT_EMAIL,
                &title,
                Some(&message),
            )
            .await
        {
            tracing::error!("Failed to create notification for email {}: {}", email.id, e);
        }
    }

    /// Syncs every active, sync-enabled account of a user concurrently.
    pub async fn sync_user(&self, user_id: i64) -> Result<Vec<AccountSyncResult>, SyncError> {
        let accounts = self.accounts.list_syncable(Some(user_id)).await?;

        let runs = accounts.into_iter().map(|account| async move {
            match self.sync_account(account.id).await {
                Ok(count) => AccountSyncResult {
                    account_id: account.id,
                    email: account.email_address,
                    success: true,
                    count: Some(count),
                    error: None,
                },
                Err(e) => AccountSyncResult {
                    account_id: account.id,
                    email: account.email_address,
                    success: false,
                    count: None,
                    error: Some(e.to_string()),
                },
            }
        });

        Ok(futures::future::join_all(runs).await)
    }

    /// Syncs accounts whose interval has elapsed; returns how many ran.
    pub async fn sync_due_accounts(&self) -> Result<usize, SyncError> {
        let now = Utc::now();
        let due: Vec<_> = self
            .accounts
            .list_syncable(None)
            .await?
            .into_iter()
            .filter(|account| is_due_for_sync(account, now))
            .collect();

        for account in &due {
            if let Err(e) = self.sync_account(account.id).await {
                tracing::warn!("Scheduled sync of account {} failed: {}", account.id, e);
            }
        }
        Ok(due.len())
    }

    /// Background loop for `AUTO_SYNC_INTERVAL_SECS`; `None` when disabled.
    pub fn spawn_auto_sync(self) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.auto_sync_interval_secs == 0 {
            return None;
        }
        let period = std::time::Duration::from_secs(self.config.auto_sync_interval_secs);
        tracing::info!("Auto-sync enabled every {}s", period.as_secs());

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match self.sync_due_accounts().await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Auto-sync processed {} accounts", n),
                    Err(e) => tracing::error!("Auto-sync pass failed: {}", e),
                }
            }
        }))
    }
}

/// Title and body of the notification raised for critical and high emails.
pub fn important_notification(email: &Email, analysis: &EmailAnalysis) -> (String, String) {
    let title = format!(
        "{}: {}",
        analysis.priority_level.to_uppercase(),
        email.subject.as_deref().unwrap_or("(no subject)")
    );
    let message = format!(
        "From: {}\n{}",
        email.sender_label(),
        analysis.summary.as_deref().unwrap_or("")
    );
    (title, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::IncomingEmail;
    use crate::repositories::{SqliteAccountRepository, SqliteUserRepository};
    use crate::services::budget_service::BudgetService;
    use crate::services::gmail_client::GmailClient;
    use crate::services::mail_provider::MockMailFetcher;
    use crate::services::outlook_client::OutlookClient;
    use crate::test_utils::test_helpers::{
        create_test_db, insert_test_account, insert_test_email, insert_test_user, test_secrets,
        TEST_IMAP_PASSWORD,
    };
    use sqlx::SqlitePool;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn unused_fetcher() -> Arc<dyn MailFetcher> {
        let mut fetcher = MockMailFetcher::new();
        fetcher.expect_fetch().never();
        Arc::new(fetcher)
    }

    fn service(pool: &SqlitePool, imap: MockMailFetcher) -> EmailSyncService {
        service_with(pool, imap, AppConfig::default())
    }

    fn service_with(pool: &SqlitePool, imap: MockMailFetcher, config: AppConfig) -> EmailSyncService {
        let accounts: Arc<dyn AccountRepository> =
            Arc::new(SqliteAccountRepository::new(pool.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(pool.clone()));
        let gmail = GmailClient::new(config.google.clone());
        let outlook = OutlookClient::new(config.microsoft.clone());
        let credentials = CredentialService::new(
            accounts.clone(),
            Arc::new(test_secrets()),
            gmail,
            outlook,
        );
        let notifications = NotificationService::new(pool.clone());
        let budget = BudgetService::new(pool.clone(), 1000, notifications.clone());
        let llm = LlmService::new(config.claude.clone(), budget);

        EmailSyncService::new(
            Fetchers {
                gmail: unused_fetcher(),
                outlook: unused_fetcher(),
                imap: Arc::new(imap),
            },
            credentials,
            accounts,
            users,
            InboxService::new(pool.clone()),
            llm,
            notifications,
            config.sync,
        )
    }

    fn message(id: &str) -> IncomingEmail {
        IncomingEmail {
            message_id: id.to_string(),
            subject: Some(format!("Subject {}", id)),
            from_address: Some("sender@example.com".into()),
            body_text: Some("Hello there".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sync_account_stores_new_messages_once() {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "sync@example.com", "Password1").await.unwrap();
        let account = insert_test_account(&pool, user_id, "sync@example.com").await.unwrap();

        let mut imap = MockMailFetcher::new();
        imap.expect_fetch()
            .withf(|_, secret, window| secret.to_string() == TEST_IMAP_PASSWORD && window.max_results == 100)
            .times(2)
            .returning(|_, _, _| Box::pin(async { Ok(vec![message("a"), message("b")]) }));
        let service = service(&pool, imap);

        assert_eq!(service.sync_account(account.id).await.unwrap(), 2);
        assert_eq!(service.sync_account(account.id).await.unwrap(), 0);

        let synced: (String, Option<String>) = sqlx::query_as(
            "SELECT connection_status, last_sync_at FROM email_accounts WHERE id = ?",
        )
        .bind(account.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(synced.0, "connected");
        assert!(synced.1.is_some());
    }

    #[tokio::test]
    async fn test_sync_failure_marks_account() {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "fail@example.com", "Password1").await.unwrap();
        let account = insert_test_account(&pool, user_id, "fail@example.com").await.unwrap();

        let mut imap = MockMailFetcher::new();
        imap.expect_fetch()
            .returning(|_, _, _| Box::pin(async { Err(ProviderError::Timeout(15)) }));
        let service = service(&pool, imap);

        let err = service.sync_account(account.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Provider(ProviderError::Timeout(15))));

        let (status, message): (String, Option<String>) = sqlx::query_as(
            "SELECT connection_status, error_message FROM email_accounts WHERE id = ?",
        )
        .bind(account.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "error");
        assert_eq!(message.as_deref(), Some("Connection timeout after 15 seconds"));
    }

    #[tokio::test]
    async fn test_sync_user_reports_each_account() {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "multi@example.com", "Password1").await.unwrap();
        let good = insert_test_account(&pool, user_id, "good@example.com").await.unwrap();
        let bad = insert_test_account(&pool, user_id, "bad@example.com").await.unwrap();

        let bad_id = bad.id;
        let mut imap = MockMailFetcher::new();
        imap.expect_fetch().returning(move |account, _, _| {
            let result = if account.id == bad_id {
                Err(ProviderError::AuthenticationFailed("no".into()))
            } else {
                Ok(vec![message("x")])
            };
            Box::pin(async move { result })
        });
        let service = service(&pool, imap);

        let mut results = service.sync_user(user_id).await.unwrap();
        results.sort_by_key(|r| r.account_id);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].account_id, good.id);
        assert_eq!(results[0].count, Some(1));
        assert!(!results[1].success);
        assert!(results[1].error.is_some());
    }

    #[tokio::test]
    async fn test_missing_account() {
        let pool = create_test_db().await.unwrap();
        let service = service(&pool, MockMailFetcher::new());
        assert!(matches!(
            service.sync_account(999).await,
            Err(SyncError::AccountNotFound)
        ));
    }

    fn critical_analysis() -> ResponseTemplate {
        let analysis = serde_json::json!({
            "priority_score": 96,
            "priority_level": "critical",
            "category": "work",
            "sentiment": "urgent",
            "action_items": [{ "task": "Restart the cluster", "deadline": null }],
            "summary": "Production is down.",
            "tags": ["outage"]
        });
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{ "type": "text", "text": analysis.to_string() }],
            "usage": { "input_tokens": 800, "output_tokens": 120 }
        }))
    }

    fn claude_at(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.claude.api_key = Some("test-key".into());
        config.claude.api_url = server.uri();
        config
    }

    async fn stored_email(pool: &SqlitePool, account: &EmailAccount, subject: &str) -> Email {
        let id = insert_test_email(pool, account, "<outage@example.com>", subject)
            .await
            .unwrap();
        sqlx::query_as::<_, Email>("SELECT * FROM emails WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_analysis_stores_fields_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(critical_analysis())
            .expect(1)
            .mount(&server)
            .await;

        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "ops@example.com", "Password1").await.unwrap();
        let account = insert_test_account(&pool, user_id, "ops@example.com").await.unwrap();
        let email = stored_email(&pool, &account, "Server down").await;
        let email_id = email.id;

        let service = service_with(&pool, MockMailFetcher::new(), claude_at(&server));
        service.analyze_new(user_id, vec![email]).await;

        let (score, level, category, summary, analyzed): (
            Option<i64>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        ) = sqlx::query_as(
            "SELECT priority_score, priority_level, category, summary, ai_analyzed_at \
             FROM emails WHERE id = ?",
        )
        .bind(email_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(score, Some(96));
        assert_eq!(level.as_deref(), Some("critical"));
        assert_eq!(category.as_deref(), Some("work"));
        assert_eq!(summary.as_deref(), Some("Production is down."));
        assert!(analyzed.is_some());

        let notifications = NotificationService::new(pool.clone())
            .list(user_id)
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, KIND_IMPORTANT_EMAIL);
        assert_eq!(notifications[0].title, "CRITICAL: Server down");
        assert_eq!(notifications[0].email_id, Some(email_id));
        assert_eq!(
            notifications[0].message.as_deref(),
            Some("From: Sender\nProduction is down.")
        );
    }

    #[tokio::test]
    async fn test_analysis_skipped_when_auto_analyze_off() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(critical_analysis())
            .expect(0)
            .mount(&server)
            .await;

        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "quiet@example.com", "Password1").await.unwrap();
        sqlx::query("UPDATE users SET settings = ? WHERE id = ?")
            .bind(r#"{"autoAnalyze": false}"#)
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();
        let account = insert_test_account(&pool, user_id, "quiet@example.com").await.unwrap();
        let email = stored_email(&pool, &account, "Server down").await;
        let email_id = email.id;

        let service = service_with(&pool, MockMailFetcher::new(), claude_at(&server));
        service.analyze_new(user_id, vec![email]).await;

        let level: Option<String> =
            sqlx::query_scalar("SELECT priority_level FROM emails WHERE id = ?")
                .bind(email_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(level.is_none());
        assert!(NotificationService::new(pool.clone())
            .list(user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_important_notification_text() {
        let email: Email = serde_json::from_value(serde_json::json!({
            "id": 7, "email_account_id": 1, "user_id": 1, "message_id": "m",
            "thread_id": null, "subject": "Server down", "from_address": "ops@example.com",
            "from_name": "Ops Team", "to_addresses": [], "cc_addresses": [],
            "body_text": null, "body_html": null, "snippet": null, "received_at": null,
            "is_read": false, "is_starred": false, "is_archived": false, "is_deleted": false,
            "labels": [], "has_attachments": false, "attachments": [],
            "priority_score": null, "priority_level": null, "category": null,
            "sentiment": null, "action_items": [], "summary": null, "tags": [],
            "ai_analyzed_at": null, "created_at": "", "updated_at": ""
        }))
        .unwrap();
        let analysis: EmailAnalysis = serde_json::from_value(serde_json::json!({
            "priority_score": 95, "priority_level": "critical", "category": "work",
            "sentiment": "urgent", "action_items": [], "summary": "Prod outage", "tags": []
        }))
        .unwrap();

        let (title, message) = important_notification(&email, &analysis);
        assert_eq!(title, "CRITICAL: Server down");
        assert_eq!(message, "From: Ops Team\nProd outage");
    }
}
