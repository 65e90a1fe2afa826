use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::auth::jwt::JwtError;
use crate::repositories::RepositoryError;
use crate::services::{
    account_service::AccountServiceError, draft_service::DraftServiceError, llm_service::LlmError,
    rule_service::RuleError, sync_service::SyncError, template_service::TemplateError,
    user_service::UserServiceError,
};

// Type alias for Result with our AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// A single field-level validation failure, reported in the `errors` array.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    InvalidFields {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Too many requests, please try again later")]
    TooManyRequests,

    /// Server-side failure with a message that is safe to show to clients.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidFields { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (message, errors) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                ("Internal server error".to_string(), None)
            }
            AppError::InvalidFields { message, errors } => (message, Some(errors)),
            other => (other.to_string(), None),
        };

        let body = json!({
            "success": false,
            "message": message,
            "errors": errors,
        });

        (status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::NotFound => AppError::NotFound("Resource not found".to_string()),
            RepositoryError::AlreadyExists => {
                AppError::Validation("Resource already exists".to_string())
            }
        }
    }
}

impl From<JwtError> for AppError {
    fn from(_: JwtError) -> Self {
        AppError::Unauthorized("Invalid or expired token".to_string())
    }
}

impl From<UserServiceError> for AppError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::InvalidEmail => {
                AppError::Validation("Valid email is required".to_string())
            }
            UserServiceError::WeakPassword => AppError::Validation(
                "Password must be at least 8 characters with uppercase, lowercase, and number"
                    .to_string(),
            ),
            UserServiceError::EmailTaken => {
                AppError::Validation("Email already registered".to_string())
            }
            UserServiceError::InvalidCredentials => {
                AppError::Unauthorized("Invalid email or password".to_string())
            }
            UserServiceError::AccountInactive => {
                AppError::Unauthorized("Account is inactive".to_string())
            }
            UserServiceError::UserNotFound => AppError::NotFound("User not found".to_string()),
            UserServiceError::Validation(msg) => AppError::Validation(msg),
            UserServiceError::Token(e) => e.into(),
            UserServiceError::Repository(e) => e.into(),
            UserServiceError::Database(e) => AppError::Database(e),
            UserServiceError::HashingError(msg) => {
                tracing::error!("Password hashing failed: {}", msg);
                AppError::Internal("Failed to process credentials".to_string())
            }
        }
    }
}

impl From<AccountServiceError> for AppError {
    fn from(err: AccountServiceError) -> Self {
        match err {
            AccountServiceError::NotFound => {
                AppError::NotFound("Email account not found".to_string())
            }
            AccountServiceError::Validation(errors) => AppError::InvalidFields {
                message: errors
                    .first()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "Invalid account details".to_string()),
                errors,
            },
            AccountServiceError::ConnectionFailed(msg) => AppError::Internal(msg),
            AccountServiceError::InvalidState => {
                AppError::Validation("Invalid OAuth state".to_string())
            }
            AccountServiceError::Provider(e) => {
                tracing::error!("Provider error: {}", e);
                AppError::Internal("Failed to connect email account".to_string())
            }
            AccountServiceError::Crypto(msg) => {
                tracing::error!("Credential encryption failed: {}", msg);
                AppError::Internal("Failed to store credentials".to_string())
            }
            AccountServiceError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::AccountNotFound => {
                AppError::NotFound("Email account not found".to_string())
            }
            SyncError::Database(e) => AppError::Database(e),
            other => {
                tracing::error!("Email sync failed: {}", other);
                AppError::Internal("Email sync failed".to_string())
            }
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::BudgetExceeded(reason) => AppError::Validation(reason),
            LlmError::Database(e) => AppError::Database(e),
            upstream @ (LlmError::Api { .. } | LlmError::Request(_)) => {
                tracing::error!("LLM request failed: {}", upstream);
                AppError::Internal("AI service request failed".to_string())
            }
            other => {
                tracing::error!("LLM request failed: {}", other);
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<DraftServiceError> for AppError {
    fn from(err: DraftServiceError) -> Self {
        match err {
            DraftServiceError::NotFound => AppError::NotFound("Draft not found".to_string()),
            DraftServiceError::EmailNotFound => {
                AppError::Validation("Email not found".to_string())
            }
            DraftServiceError::AlreadySent => {
                AppError::Validation("Draft has already been sent".to_string())
            }
            DraftServiceError::Validation(msg) => AppError::Validation(msg),
            DraftServiceError::Llm(e) => e.into(),
            DraftServiceError::SendFailed(msg) => {
                AppError::Internal(format!("Failed to send email: {}", msg))
            }
            DraftServiceError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<RuleError> for AppError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotFound => AppError::NotFound("Rule not found".to_string()),
            RuleError::Validation(msg) => AppError::Validation(msg),
            RuleError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::Validation(msg) => AppError::Validation(msg),
            TemplateError::Database(e) => AppError::Database(e),
            other => AppError::NotFound(other.to_string()),
        }
    }
}
