use crate::auth::jwt::{JwtError, JwtService};
use crate::models::{format_timestamp, user::merge_settings, User, UserSettings};
use crate::repositories::{
    NewSession, RepositoryError, SessionRepository, UserRepository,
};
use crate::services::secrets_manager::hash_token;
use crate::validators::{is_valid_email, sanitize_input, validate_password};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Password too weak")]
    WeakPassword,
    #[error("Email already registered")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account is inactive")]
    AccountInactive,
    #[error("User not found")]
    UserNotFound,
    #[error("{0}")]
    Validation(String),
    #[error("Token error: {0}")]
    Token(#[from] JwtError),
    #[error("Repository error: {0}")]
    Repository(RepositoryError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Password hashing failed: {0}")]
    HashingError(String),
}

impl From<RepositoryError> for UserServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => UserServiceError::Database(e),
            other => UserServiceError::Repository(other),
        }
    }
}

pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Client details recorded alongside a session.
#[derive(Debug, Clone, Default)]
pub struct SessionMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// A user together with a freshly issued bearer token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

pub struct UserService {
    repository: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    jwt: Arc<JwtService>,
}

impl UserService {
    pub fn new(
        repository: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        jwt: Arc<JwtService>,
    ) -> Self {
        Self {
            repository,
            sessions,
            jwt,
        }
    }

    /// Validates and stores a new user with default settings.
    pub async fn create_user(&self, request: RegisterRequest) -> Result<User, UserServiceError> {
        let email = normalize_email(&request.email);
        if !is_valid_email(&email) {
            return Err(UserServiceError::InvalidEmail);
        }
        if !validate_password(&request.password) {
            return Err(UserServiceError::WeakPassword);
        }

        let password_hash = self.hash_password(&request.password)?;
        let full_name = request
            .full_name
            .as_deref()
            .map(sanitize_input)
            .filter(|n| !n.is_empty());

        match self
            .repository
            .create_user(
                &email,
                &password_hash,
                full_name,
                UserSettings::default().to_value(),
            )
            .await
        {
            Ok(user) => Ok(user),
            Err(RepositoryError::AlreadyExists) => Err(UserServiceError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn register(
        &self,
        request: RegisterRequest,
        meta: SessionMeta,
    ) -> Result<AuthSession, UserServiceError> {
        let user = self.create_user(request).await?;
        let token = self.start_session(&user, meta).await?;
        tracing::info!("Registered user {}", user.id);
        Ok(AuthSession { user, token })
    }

    pub async fn login(
        &self,
        request: LoginRequest,
        meta: SessionMeta,
    ) -> Result<AuthSession, UserServiceError> {
        let email = normalize_email(&request.email);
        let user = self
            .repository
            .find_by_email(&email)
            .await?
            .ok_or(UserServiceError::InvalidCredentials)?;

        if !self.verify_password(&request.password, &user.password_hash) {
            return Err(UserServiceError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(UserServiceError::AccountInactive);
        }

        self.repository.record_login(user.id).await?;
        let token = self.start_session(&user, meta).await?;
        Ok(AuthSession { user, token })
    }

    pub async fn logout(&self, token_hash: &str) -> Result<(), UserServiceError> {
        self.sessions.delete(token_hash).await?;
        Ok(())
    }

    /// Re-signs `token` and moves its session to the new token hash.
    pub async fn refresh(&self, token: &str) -> Result<String, UserServiceError> {
        let claims = self.jwt.verify(token)?;
        let new_token = self.jwt.sign(claims.user_id, &claims.email)?;
        let expires_at = format_timestamp(Utc::now() + self.jwt.expires_in());

        let rotated = self
            .sessions
            .rotate(&hash_token(token), &hash_token(&new_token), &expires_at)
            .await?;
        if !rotated {
            return Err(UserServiceError::Token(JwtError::Expired));
        }
        Ok(new_token)
    }

    pub async fn get_user(&self, id: i64) -> Result<User, UserServiceError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(UserServiceError::UserNotFound)
    }

    pub async fn update_profile(
        &self,
        id: i64,
        full_name: Option<&str>,
    ) -> Result<User, UserServiceError> {
        let full_name = full_name.map(sanitize_input).unwrap_or_default();
        if full_name.is_empty() {
            return Err(UserServiceError::Validation(
                "Full name is required".to_string(),
            ));
        }
        match self.repository.update_full_name(id, &full_name).await {
            Ok(user) => Ok(user),
            Err(RepositoryError::NotFound) => Err(UserServiceError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Shallow-merges `patch` into the stored settings.
    pub async fn update_settings(
        &self,
        id: i64,
        patch: &Map<String, Value>,
    ) -> Result<User, UserServiceError> {
        let user = self.get_user(id).await?;
        let merged = merge_settings(&user.settings.0, patch);
        match self.repository.update_settings(id, merged).await {
            Ok(user) => Ok(user),
            Err(RepositoryError::NotFound) => Err(UserServiceError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_users(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<User>, UserServiceError> {
        Ok(self.repository.list_users(limit, offset).await?)
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<(), UserServiceError> {
        match self.repository.set_active(id, active).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::NotFound) => Err(UserServiceError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_session(
        &self,
        user: &User,
        meta: SessionMeta,
    ) -> Result<String, UserServiceError> {
        let token = self.jwt.sign(user.id, &user.email)?;
        let expires_at = format_timestamp(Utc::now() + self.jwt.expires_in());
        self.sessions
            .create(NewSession {
                user_id: user.id,
                token_hash: hash_token(&token),
                expires_at,
                user_agent: meta.user_agent,
                ip_address: meta.ip_address,
            })
            .await?;
        Ok(token)
    }

    fn hash_password(&self, password: &str) -> Result<String, UserServiceError> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| UserServiceError::HashingError(e.to_string()))
    }

    pub fn verify_password(&self, password: &str, password_hash: &str) -> bool {
        if let Ok(parsed_hash) = PasswordHash::new(password_hash) {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .is_ok()
        } else {
            false
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
