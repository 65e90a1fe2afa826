use crate::models::{now_timestamp, parse_timestamp, EmailAccount};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use super::RepositoryResult;

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, email_address, display_name, access_token, \
     refresh_token, token_expires_at, imap_host, imap_port, smtp_host, smtp_port, username, \
     password_encrypted, sync_enabled, sync_frequency_minutes, last_sync_at, connection_status, \
     error_message, is_active, created_at, updated_at";

/// Values written when a mailbox is connected or reconnected. Secrets must
/// already be encrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertAccount {
    pub user_id: i64,
    pub provider: String,
    pub email_address: String,
    pub display_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<i64>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i64>,
    pub username: Option<String>,
    pub password_encrypted: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountChanges {
    pub sync_frequency_minutes: Option<i64>,
    pub is_active: Option<bool>,
    pub sync_enabled: Option<bool>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        self.sync_frequency_minutes.is_none()
            && self.is_active.is_none()
            && self.sync_enabled.is_none()
    }
}

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait AccountRepository: Send + Sync {
    async fn upsert(&self, account: UpsertAccount) -> RepositoryResult<i64>;
    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<EmailAccount>>;
    async fn find_for_user(&self, id: i64, user_id: i64)
        -> RepositoryResult<Option<EmailAccount>>;
    async fn list_for_user(
        &self,
        user_id: i64,
        active_only: bool,
    ) -> RepositoryResult<Vec<EmailAccount>>;
    async fn list_syncable(&self, user_id: Option<i64>) -> RepositoryResult<Vec<EmailAccount>>;
    async fn update(
        &self,
        id: i64,
        user_id: i64,
        changes: AccountChanges,
    ) -> RepositoryResult<Option<EmailAccount>>;
    async fn deactivate(&self, id: i64, user_id: i64) -> RepositoryResult<bool>;
    async fn update_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<String>,
        expires_at: &str,
    ) -> RepositoryResult<()>;
    async fn mark_synced(&self, id: i64) -> RepositoryResult<()>;
    async fn mark_error(&self, id: i64, message: &str) -> RepositoryResult<()>;
}

pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn upsert(&self, account: UpsertAccount) -> RepositoryResult<i64> {
        let now = now_timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO email_accounts (
                user_id, provider, email_address, display_name, access_token, refresh_token,
                token_expires_at, imap_host, imap_port, smtp_host, smtp_port, username,
                password_encrypted, connection_status, is_active
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'connected', 1)
            ON CONFLICT (user_id, email_address) DO UPDATE SET
                provider = excluded.provider,
                display_name = COALESCE(excluded.display_name, email_accounts.display_name),
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, email_accounts.refresh_token),
                token_expires_at = excluded.token_expires_at,
                imap_host = excluded.imap_host,
                imap_port = excluded.imap_port,
                smtp_host = excluded.smtp_host,
                smtp_port = excluded.smtp_port,
                username = excluded.username,
                password_encrypted = excluded.password_encrypted,
                connection_status = 'connected',
                error_message = NULL,
                is_active = 1,
                updated_at = ?
            RETURNING id
            "#,
        )
        .bind(account.user_id)
        .bind(&account.provider)
        .bind(&account.email_address)
        .bind(&account.display_name)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(&account.token_expires_at)
        .bind(&account.imap_host)
        .bind(account.imap_port)
        .bind(&account.smtp_host)
        .bind(account.smtp_port)
        .bind(&account.username)
        .bind(&account.password_encrypted)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<EmailAccount>> {
        let account = sqlx::query_as::<_, EmailAccount>(&format!(
            "SELECT {} FROM email_accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn find_for_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> RepositoryResult<Option<EmailAccount>> {
        let account = sqlx::query_as::<_, EmailAccount>(&format!(
            "SELECT {} FROM email_accounts WHERE id = ? AND user_id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn list_for_user(
        &self,
        user_id: i64,
        active_only: bool,
    ) -> RepositoryResult<Vec<EmailAccount>> {
        let accounts = sqlx::query_as::<_, EmailAccount>(&format!(
            "SELECT {} FROM email_accounts WHERE user_id = ? AND (is_active = 1 OR ? = 0) \
             ORDER BY created_at DESC, id DESC",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn list_syncable(&self, user_id: Option<i64>) -> RepositoryResult<Vec<EmailAccount>> {
        let accounts = sqlx::query_as::<_, EmailAccount>(&format!(
            "SELECT {} FROM email_accounts \
             WHERE is_active = 1 AND sync_enabled = 1 AND (? IS NULL OR user_id = ?) \
             ORDER BY id",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn update(
        &self,
        id: i64,
        user_id: i64,
        changes: AccountChanges,
    ) -> RepositoryResult<Option<EmailAccount>> {
        let result = sqlx::query(
            r#"
            UPDATE email_accounts SET
                sync_frequency_minutes = COALESCE(?, sync_frequency_minutes),
                is_active = COALESCE(?, is_active),
                sync_enabled = COALESCE(?, sync_enabled),
                updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(changes.sync_frequency_minutes)
        .bind(changes.is_active)
        .bind(changes.sync_enabled)
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn deactivate(&self, id: i64, user_id: i64) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE email_accounts SET is_active = 0, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<String>,
        expires_at: &str,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE email_accounts SET
                access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expires_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_synced(&self, id: i64) -> RepositoryResult<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE email_accounts
            SET last_sync_at = ?, connection_status = 'connected', error_message = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_error(&self, id: i64, message: &str) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE email_accounts
            SET connection_status = 'error', error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(message)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// True when an account has never synced or its sync interval has elapsed.
pub fn is_due_for_sync(account: &EmailAccount, now: DateTime<Utc>) -> bool {
    match account.last_sync_at.as_deref().and_then(parse_timestamp) {
        Some(last) => now - last >= Duration::minutes(account.sync_frequency_minutes.max(1)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::{create_test_db, insert_test_user};

    fn imap_account(user_id: i64, email: &str) -> UpsertAccount {
        UpsertAccount {
            user_id,
            provider: "icloud".into(),
            email_address: email.into(),
            imap_host: Some("imap.mail.me.com".into()),
            imap_port: Some(993),
            smtp_host: Some("smtp.mail.me.com".into()),
            smtp_port: Some(587),
            username: Some(email.into()),
            password_encrypted: Some("sealed".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_user_and_address() {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "owner@example.com", "Password1").await.unwrap();
        let repo = SqliteAccountRepository::new(pool);

        let first = repo.upsert(imap_account(user_id, "me@icloud.com")).await.unwrap();
        repo.mark_error(first, "boom").await.unwrap();

        let mut again = imap_account(user_id, "me@icloud.com");
        again.password_encrypted = Some("resealed".into());
        let second = repo.upsert(again).await.unwrap();
        assert_eq!(first, second);

        let account = repo.find_by_id(first).await.unwrap().unwrap();
        assert_eq!(account.connection_status, "connected");
        assert_eq!(account.error_message, None);
        assert_eq!(account.password_encrypted.as_deref(), Some("resealed"));
    }

    #[tokio::test]
    async fn test_upsert_keeps_refresh_token_when_absent() {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "o@example.com", "Password1").await.unwrap();
        let repo = SqliteAccountRepository::new(pool);

        let oauth = UpsertAccount {
            user_id,
            provider: "gmail".into(),
            email_address: "me@gmail.com".into(),
            access_token: Some("a1".into()),
            refresh_token: Some("r1".into()),
            ..Default::default()
        };
        let id = repo.upsert(oauth.clone()).await.unwrap();
        repo.upsert(UpsertAccount {
            access_token: Some("a2".into()),
            refresh_token: None,
            ..oauth
        })
        .await
        .unwrap();

        let account = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(account.access_token.as_deref(), Some("a2"));
        assert_eq!(account.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_ownership_and_deactivate() {
        let pool = create_test_db().await.unwrap();
        let owner = insert_test_user(&pool, "a@example.com", "Password1").await.unwrap();
        let other = insert_test_user(&pool, "b@example.com", "Password1").await.unwrap();
        let repo = SqliteAccountRepository::new(pool);
        let id = repo.upsert(imap_account(owner, "me@icloud.com")).await.unwrap();

        assert!(repo.find_for_user(id, other).await.unwrap().is_none());
        assert!(!repo.deactivate(id, other).await.unwrap());
        assert!(repo.deactivate(id, owner).await.unwrap());

        assert!(repo.list_for_user(owner, true).await.unwrap().is_empty());
        assert_eq!(repo.list_for_user(owner, false).await.unwrap().len(), 1);
        assert!(repo.list_syncable(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_changes() {
        let pool = create_test_db().await.unwrap();
        let owner = insert_test_user(&pool, "c@example.com", "Password1").await.unwrap();
        let repo = SqliteAccountRepository::new(pool);
        let id = repo.upsert(imap_account(owner, "me@icloud.com")).await.unwrap();

        let updated = repo
            .update(
                id,
                owner,
                AccountChanges {
                    sync_frequency_minutes: Some(60),
                    sync_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.sync_frequency_minutes, 60);
        assert!(!updated.sync_enabled);
        assert!(updated.is_active);
    }

    #[tokio::test]
    async fn test_is_due_for_sync() {
        let pool = create_test_db().await.unwrap();
        let owner = insert_test_user(&pool, "d@example.com", "Password1").await.unwrap();
        let repo = SqliteAccountRepository::new(pool);
        let id = repo.upsert(imap_account(owner, "me@icloud.com")).await.unwrap();

        let account = repo.find_by_id(id).await.unwrap().unwrap();
        assert!(is_due_for_sync(&account, Utc::now()));

        repo.mark_synced(id).await.unwrap();
        let account = repo.find_by_id(id).await.unwrap().unwrap();
        assert!(!is_due_for_sync(&account, Utc::now()));
        assert!(is_due_for_sync(&account, Utc::now() + Duration::minutes(16)));
    }
}
