use crate::models::{now_timestamp, User};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{types::Json, SqlitePool};

use super::{map_unique, RepositoryError, RepositoryResult};

const USER_COLUMNS: &str = "id, email, password_hash, full_name, settings, is_active, \
                            last_login, created_at, updated_at";

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait UserRepository: Send + Sync {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<String>,
        settings: Value,
    ) -> RepositoryResult<User>;
    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;
    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<User>>;
    async fn record_login(&self, id: i64) -> RepositoryResult<()>;
    async fn update_full_name(&self, id: i64, full_name: &str) -> RepositoryResult<User>;
    async fn update_settings(&self, id: i64, settings: Value) -> RepositoryResult<User>;
    async fn set_active(&self, id: i64, active: bool) -> RepositoryResult<()>;
    async fn list_users(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> RepositoryResult<Vec<User>>;
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn require(&self, id: i64) -> RepositoryResult<User> {
        self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<String>,
        settings: Value,
    ) -> RepositoryResult<User> {
        let id = sqlx::query(
            "INSERT INTO users (email, password_hash, full_name, settings) VALUES (?, ?, ?, ?)",
        )
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .bind(Json(settings))
        .execute(&self.pool)
        .await
        .map_err(map_unique)?
        .last_insert_rowid();

        self.require(id).await
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn record_login(&self, id: i64) -> RepositoryResult<()> {
        let now = now_timestamp();
        sqlx::query("UPDATE users SET last_login = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_full_name(&self, id: i64, full_name: &str) -> RepositoryResult<User> {
        let result = sqlx::query("UPDATE users SET full_name = ?, updated_at = ? WHERE id = ?")
            .bind(full_name)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.require(id).await
    }

    async fn update_settings(&self, id: i64, settings: Value) -> RepositoryResult<User> {
        let result = sqlx::query("UPDATE users SET settings = ?, updated_at = ? WHERE id = ?")
            .bind(Json(settings))
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.require(id).await
    }

    async fn set_active(&self, id: i64, active: bool) -> RepositoryResult<()> {
        let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_users(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> RepositoryResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            USER_COLUMNS
        ))
        .bind(limit.unwrap_or(100))
        .bind(offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::create_test_db;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_find_user() {
        let pool = create_test_db().await.unwrap();
        let repo = SqliteUserRepository::new(pool);

        let user = repo
            .create_user("ada@example.com", "hash", Some("Ada".into()), json!({"autoDraft": false}))
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(user.is_active);
        assert_eq!(user.settings.0["autoDraft"], false);

        let found = repo.find_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.find_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let pool = create_test_db().await.unwrap();
        let repo = SqliteUserRepository::new(pool);

        repo.create_user("dup@example.com", "h", None, json!({}))
            .await
            .unwrap();
        let err = repo
            .create_user("dup@example.com", "h", None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists));
    }

    #[tokio::test]
    async fn test_updates() {
        let pool = create_test_db().await.unwrap();
        let repo = SqliteUserRepository::new(pool);
        let user = repo
            .create_user("u@example.com", "h", None, json!({}))
            .await
            .unwrap();

        let renamed = repo.update_full_name(user.id, "New Name").await.unwrap();
        assert_eq!(renamed.full_name.as_deref(), Some("New Name"));

        let updated = repo
            .update_settings(user.id, json!({"autoAnalyze": false}))
            .await
            .unwrap();
        assert_eq!(updated.settings.0["autoAnalyze"], false);

        repo.set_active(user.id, false).await.unwrap();
        assert!(!repo.find_by_id(user.id).await.unwrap().unwrap().is_active);

        repo.record_login(user.id).await.unwrap();
        assert!(repo.find_by_id(user.id).await.unwrap().unwrap().last_login.is_some());

        assert!(matches!(
            repo.set_active(9999, true).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
