use crate::models::now_timestamp;
use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{map_unique, RepositoryResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: NewSession) -> RepositoryResult<i64>;
    /// Bumps `last_activity`; false when the session is gone or expired.
    async fn touch(&self, token_hash: &str) -> RepositoryResult<bool>;
    async fn delete(&self, token_hash: &str) -> RepositoryResult<bool>;
    async fn rotate(
        &self,
        old_hash: &str,
        new_hash: &str,
        expires_at: &str,
    ) -> RepositoryResult<bool>;
    async fn purge_expired(&self) -> RepositoryResult<u64>;
}

pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create(&self, session: NewSession) -> RepositoryResult<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO sessions (user_id, token_hash, expires_at, user_agent, ip_address)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.expires_at)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .execute(&self.pool)
        .await
        .map_err(map_unique)?
        .last_insert_rowid();

        Ok(id)
    }

    async fn touch(&self, token_hash: &str) -> RepositoryResult<bool> {
        let now = now_timestamp();
        let result = sqlx::query(
            "UPDATE sessions SET last_activity = ? WHERE token_hash = ? AND expires_at > ?",
        )
        .bind(&now)
        .bind(token_hash)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, token_hash: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate(
        &self,
        old_hash: &str,
        new_hash: &str,
        expires_at: &str,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET token_hash = ?, expires_at = ?, last_activity = ?
            WHERE token_hash = ?
            "#,
        )
        .bind(new_hash)
        .bind(expires_at)
        .bind(now_timestamp())
        .bind(old_hash)
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now_timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
