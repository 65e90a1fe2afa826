pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtService};
pub use middleware::{authenticate, extract_bearer_token, require_auth};

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;

use crate::error::AppError;

/// The caller behind a verified bearer token, placed in request extensions
/// by [`require_auth`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip)]
    pub token_hash: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("No token provided".to_string()))
    }
}
