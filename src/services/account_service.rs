use crate::auth::jwt::JwtService;
use crate::error::FieldError;
use crate::models::{format_timestamp, EmailAccount, Provider};
use crate::repositories::{AccountChanges, AccountRepository, RepositoryError, UpsertAccount};
use crate::services::gmail_client::GmailClient;
use crate::services::imap_client::{connection_hint, ImapConnector, ImapLogin};
use crate::services::mail_provider::{ProviderError, TokenResponse};
use crate::services::outlook_client::{generate_code_verifier, OutlookClient};
use crate::services::secrets_manager::SecretsManager;
use crate::validators::{validate_email_account, AccountInput};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const OAUTH_STATE_TTL_MINUTES: i64 = 10;
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, thiserror::Error)]
pub enum AccountServiceError {
    #[error("Email account not found")]
    NotFound,
    #[error("Invalid account details")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    ConnectionFailed(String),
    #[error("Invalid OAuth state")]
    InvalidState,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Encryption error: {0}")]
    Crypto(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<RepositoryError> for AccountServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AccountServiceError::Database(e),
            RepositoryError::NotFound => AccountServiceError::NotFound,
            RepositoryError::AlreadyExists => AccountServiceError::Validation(vec![
                FieldError::new("email_address", "Email account already connected"),
            ]),
        }
    }
}

/// Signed into the OAuth `state` parameter so the callback knows which user
/// started the flow. Outlook also carries its PKCE verifier here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthState {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub provider: String,
    #[serde(
        rename = "codeVerifier",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub code_verifier: Option<String>,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
    pub account_id: i64,
    pub email: String,
    pub provider: String,
}

/// Connecting, listing and disconnecting mailboxes.
pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
    secrets: Arc<SecretsManager>,
    imap: Arc<dyn ImapConnector>,
    gmail: GmailClient,
    outlook: OutlookClient,
    jwt: Arc<JwtService>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        secrets: Arc<SecretsManager>,
        imap: Arc<dyn ImapConnector>,
        gmail: GmailClient,
        outlook: OutlookClient,
        jwt: Arc<JwtService>,
    ) -> Self {
        Self {
            accounts,
            secrets,
            imap,
            gmail,
            outlook,
            jwt,
        }
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<EmailAccount>, AccountServiceError> {
        Ok(self.accounts.list_for_user(user_id, true).await?)
    }

    pub async fn find(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<EmailAccount, AccountServiceError> {
        self.accounts
            .find_for_user(id, user_id)
            .await?
            .ok_or(AccountServiceError::NotFound)
    }

    pub async fn update(
        &self,
        id: i64,
        user_id: i64,
        changes: AccountChanges,
    ) -> Result<EmailAccount, AccountServiceError> {
        if let Some(minutes) = changes.sync_frequency_minutes {
            if minutes < 1 {
                return Err(AccountServiceError::Validation(vec![FieldError::new(
                    "sync_frequency_minutes",
                    "Sync frequency must be at least 1 minute",
                )]));
            }
        }
        self.accounts
            .update(id, user_id, changes)
            .await?
            .ok_or(AccountServiceError::NotFound)
    }

    /// Soft disconnect: the row stays, sync stops.
    pub async fn disconnect(&self, id: i64, user_id: i64) -> Result<(), AccountServiceError> {
        if self.accounts.deactivate(id, user_id).await? {
            tracing::info!("User {} disconnected email account {}", user_id, id);
            Ok(())
        } else {
            Err(AccountServiceError::NotFound)
        }
    }

    /// Validates the details, proves the IMAP login works, then stores the
    /// account with its password encrypted.
    pub async fn connect_imap(
        &self,
        user_id: i64,
        input: AccountInput,
    ) -> Result<ConnectedAccount, AccountServiceError> {
        let errors = validate_email_account(&input);
        if !errors.is_empty() {
            return Err(AccountServiceError::Validation(errors));
        }

        let provider: Provider = input
            .provider
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|_| {
                AccountServiceError::Validation(vec![FieldError::new(
                    "provider",
                    "Invalid provider",
                )])
            })?;
        let email = input.email_address.unwrap_or_default().trim().to_string();
        let password = input.password.unwrap_or_default();

        let (imap_host, imap_port, smtp_host, smtp_port) = match provider.preset() {
            Some(preset) => (
                preset.imap_host,
                preset.imap_port,
                preset.smtp_host,
                preset.smtp_port,
            ),
            None => (
                input.imap_host.unwrap_or_default().trim().to_string(),
                input.imap_port.unwrap_or(DEFAULT_IMAP_PORT),
                input.smtp_host.unwrap_or_default().trim().to_string(),
                input.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            ),
        };

        let login = ImapLogin {
            host: imap_host.clone(),
            port: imap_port,
            username: email.clone(),
            password: password.clone(),
        };
        if let Err(e) = self.imap.verify_login(&login).await {
            tracing::warn!("IMAP connection test failed for {}: {}", email, e);
            return Err(AccountServiceError::ConnectionFailed(format!(
                "Failed to connect to email server. {}",
                connection_hint(&e)
            )));
        }

        let password_encrypted = self.encrypt(&password)?;
        let account_id = self
            .accounts
            .upsert(UpsertAccount {
                user_id,
                provider: provider.as_str().to_string(),
                email_address: email.clone(),
                imap_host: Some(imap_host),
                imap_port: Some(i64::from(imap_port)),
                smtp_host: Some(smtp_host),
                smtp_port: Some(i64::from(smtp_port)),
                username: Some(email.clone()),
                password_encrypted: Some(password_encrypted),
                ..Default::default()
            })
            .await?;

        tracing::info!(
            "Connected {} account {} for user {}",
            provider,
            account_id,
            user_id
        );
        Ok(ConnectedAccount {
            account_id,
            email,
            provider: provider.as_str().to_string(),
        })
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, AccountServiceError> {
        self.secrets
            .encrypt(plaintext)
            .map_err(|e| AccountServiceError::Crypto(e.to_string()))
    }

    fn sign_state(
        &self,
        user_id: i64,
        provider: Provider,
        code_verifier: Option<String>,
    ) -> Result<String, AccountServiceError> {
        let state = OAuthState {
            user_id,
            provider: provider.as_str().to_string(),
            code_verifier,
            exp: (Utc::now() + Duration::minutes(OAUTH_STATE_TTL_MINUTES)).timestamp(),
        };
        self.jwt
            .sign_payload(&state)
            .map_err(|e| AccountServiceError::Crypto(e.to_string()))
    }

    /// Verifies a returned `state` and checks it was issued for `provider`.
    pub fn verify_state(
        &self,
        token: &str,
        provider: Provider,
    ) -> Result<OAuthState, AccountServiceError> {
        let state: OAuthState = self
            .jwt
            .verify_payload(token)
            .map_err(|_| AccountServiceError::InvalidState)?;
        if state.provider != provider.as_str() {
            return Err(AccountServiceError::InvalidState);
        }
        Ok(state)
    }

    pub fn gmail_authorization_url(&self, user_id: i64) -> Result<String, AccountServiceError> {
        let state = self.sign_state(user_id, Provider::Gmail, None)?;
        Ok(self.gmail.authorization_url(&state)?)
    }

    pub fn outlook_authorization_url(&self, user_id: i64) -> Result<String, AccountServiceError> {
        let verifier = generate_code_verifier();
        let state = self.sign_state(user_id, Provider::Outlook, Some(verifier.clone()))?;
        Ok(self.outlook.authorization_url(&state, &verifier)?)
    }

    /// Finishes the Gmail consent flow started by `gmail_authorization_url`.
    pub async fn complete_gmail(
        &self,
        code: &str,
        state: &str,
    ) -> Result<ConnectedAccount, AccountServiceError> {
        let state = self.verify_state(state, Provider::Gmail)?;
        let tokens = self.gmail.exchange_code(code).await?;
        let profile = self.gmail.profile(&tokens.access_token).await?;

        self.store_oauth_account(
            state.user_id,
            Provider::Gmail,
            profile.email_address,
            None,
            &tokens,
        )
        .await
    }

    /// Finishes the Outlook flow from the redirect callback, where the signed
    /// state is the only proof of who started it.
    pub async fn complete_outlook_callback(
        &self,
        code: &str,
        state: &str,
    ) -> Result<ConnectedAccount, AccountServiceError> {
        let state = self.verify_state(state, Provider::Outlook)?;
        self.finish_outlook(state.user_id, code, state.code_verifier.as_deref())
            .await
    }

    /// Finishes the Outlook flow for an authenticated caller posting the code.
    pub async fn complete_outlook_for_user(
        &self,
        user_id: i64,
        code: &str,
        state: Option<&str>,
    ) -> Result<ConnectedAccount, AccountServiceError> {
        let verifier = match state {
            Some(token) => {
                let state = self.verify_state(token, Provider::Outlook)?;
                if state.user_id != user_id {
                    return Err(AccountServiceError::InvalidState);
                }
                state.code_verifier
            }
            None => None,
        };
        self.finish_outlook(user_id, code, verifier.as_deref()).await
    }

    async fn finish_outlook(
        &self,
        user_id: i64,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<ConnectedAccount, AccountServiceError> {
        let tokens = self.outlook.exchange_code(code, verifier).await?;
        let me = self.outlook.me(&tokens.access_token).await?;
        let address = me
            .address()
            .ok_or_else(|| ProviderError::Parse("Graph profile has no email address".into()))?
            .to_string();

        self.store_oauth_account(
            user_id,
            Provider::Outlook,
            address,
            me.display_name.clone(),
            &tokens,
        )
        .await
    }

    async fn store_oauth_account(
        &self,
        user_id: i64,
        provider: Provider,
        email: String,
        display_name: Option<String>,
        tokens: &TokenResponse,
    ) -> Result<ConnectedAccount, AccountServiceError> {
        let access_token = self.encrypt(&tokens.access_token)?;
        let refresh_token = self
            .secrets
            .encrypt_optional(tokens.refresh_token.as_deref())
            .map_err(|e| AccountServiceError::Crypto(e.to_string()))?;

        let account_id = self
            .accounts
            .upsert(UpsertAccount {
                user_id,
                provider: provider.as_str().to_string(),
                email_address: email.clone(),
                display_name,
                access_token: Some(access_token),
                refresh_token,
                token_expires_at: Some(format_timestamp(tokens.expires_at(Utc::now()))),
                ..Default::default()
            })
            .await?;

        tracing::info!(
            "Connected {} account {} ({}) for user {}",
            provider.label(),
            account_id,
            email,
            user_id
        );
        Ok(ConnectedAccount {
            account_id,
            email,
            provider: provider.as_str().to_string(),
        })
    }
}
