pub mod account_repository;
pub mod session_repository;
pub mod user_repository;

pub use account_repository::{
    is_due_for_sync, AccountChanges, AccountRepository, SqliteAccountRepository, UpsertAccount,
};
pub use session_repository::{NewSession, SessionRepository, SqliteSessionRepository};
pub use user_repository::{SqliteUserRepository, UserRepository};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Record already exists")]
    AlreadyExists,
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Maps a UNIQUE constraint violation to `AlreadyExists`.
pub(crate) fn map_unique(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::AlreadyExists,
        _ => RepositoryError::Database(e),
    }
}
