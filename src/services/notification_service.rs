use crate::models::Notification;
use sqlx::SqlitePool;

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, email_id, type, title, message, is_read, created_at";
const LIST_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct NotificationService {
    pool: SqlitePool,
}

impl NotificationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: i64,
        email_id: Option<i64>,
        kind: &str,
        title: &str,
        message: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let id = sqlx::query(
            "INSERT INTO notifications (user_id, email_id, type, title, message) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email_id)
        .bind(kind)
        .bind(title)
        .bind(message)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        tracing::debug!("Created {} notification {} for user {}", kind, id, user_id);
        Ok(id)
    }

    /// The 50 newest notifications.
    pub async fn list(&self, user_id: i64) -> Result<Vec<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {} FROM notifications WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .bind(LIST_LIMIT)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
    }

    /// Returns false when the notification does not belong to the user.
    pub async fn set_read(&self, id: i64, user_id: i64, is_read: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE notifications SET is_read = ? WHERE id = ? AND user_id = ?")
            .bind(is_read)
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: i64, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::{create_test_db, insert_test_user};

    #[tokio::test]
    async fn test_notification_lifecycle() {
        let pool = create_test_db().await.unwrap();
        let user_id = insert_test_user(&pool, "n@example.com", "Password1").await.unwrap();
        let other = insert_test_user(&pool, "o@example.com", "Password1").await.unwrap();
        let service = NotificationService::new(pool);

        let first = service
            .create(user_id, None, "budget_alert", "Budget at 80%", Some("Careful"))
            .await
            .unwrap();
        service
            .create(user_id, None, "important_email", "HIGH: Contract", None)
            .await
            .unwrap();

        assert_eq!(service.list(user_id).await.unwrap().len(), 2);
        assert_eq!(service.unread_count(user_id).await.unwrap(), 2);

        assert!(!service.set_read(first, other, true).await.unwrap());
        assert!(service.set_read(first, user_id, true).await.unwrap());
        assert_eq!(service.unread_count(user_id).await.unwrap(), 1);

        assert_eq!(service.mark_all_read(user_id).await.unwrap(), 1);
        assert_eq!(service.unread_count(user_id).await.unwrap(), 0);

        assert!(service.delete(first, user_id).await.unwrap());
        assert!(!service.delete(first, user_id).await.unwrap());
        assert_eq!(service.list(user_id).await.unwrap()[0].kind, "important_email");
    }
}
