use crate::models::{format_timestamp, parse_timestamp, EmailAccount, Provider};
use crate::repositories::{AccountRepository, RepositoryError};
use crate::services::gmail_client::GmailClient;
use crate::services::mail_provider::{ProviderError, TokenResponse};
use crate::services::outlook_client::OutlookClient;
use crate::services::secrets_manager::SecretsManager;
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Failed to decrypt credentials: {0}")]
    Crypto(String),
    #[error("Database error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Account has no stored credentials")]
    Missing,
}

/// Hands out usable secrets for a mailbox, refreshing expired OAuth tokens.
#[derive(Clone)]
pub struct CredentialService {
    accounts: Arc<dyn AccountRepository>,
    secrets: Arc<SecretsManager>,
    gmail: GmailClient,
    outlook: OutlookClient,
}

impl CredentialService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        secrets: Arc<SecretsManager>,
        gmail: GmailClient,
        outlook: OutlookClient,
    ) -> Self {
        Self {
            accounts,
            secrets,
            gmail,
            outlook,
        }
    }

    fn decrypt(&self, sealed: &str) -> Result<String, CredentialError> {
        self.secrets
            .decrypt(sealed)
            .map_err(|e| CredentialError::Crypto(e.to_string()))
    }

    /// Decrypted IMAP/SMTP password.
    pub fn password(&self, account: &EmailAccount) -> Result<String, CredentialError> {
        let sealed = account
            .password_encrypted
            .as_deref()
            .ok_or(CredentialError::Missing)?;
        self.decrypt(sealed)
    }

    /// Access token for an OAuth account, refreshed first when it has expired.
    pub async fn access_token(&self, account: &EmailAccount) -> Result<String, CredentialError> {
        let sealed = account
            .access_token
            .as_deref()
            .ok_or(CredentialError::Missing)?;

        let expired = account
            .token_expires_at
            .as_deref()
            .and_then(parse_timestamp)
            .map(|at| at <= Utc::now())
            .unwrap_or(false);

        if !expired {
            return self.decrypt(sealed);
        }

        tracing::info!(
            "{} token expired for {}, refreshing",
            account.provider,
            account.email_address
        );
        self.refresh(account).await
    }

    /// The secret the account's fetcher and sender need: an access token for
    /// OAuth accounts, the password otherwise.
    pub async fn secret_for(&self, account: &EmailAccount) -> Result<String, CredentialError> {
        if account.uses_oauth() {
            self.access_token(account).await
        } else {
            self.password(account)
        }
    }

    async fn refresh(&self, account: &EmailAccount) -> Result<String, CredentialError> {
        let provider = account.provider_kind();
        let label = match provider {
            Some(Provider::Gmail) => "Gmail",
            Some(Provider::Outlook) => "Outlook",
            _ => return Err(ProviderError::Unsupported(account.provider.clone()).into()),
        };

        let refresh_token = match account.refresh_token.as_deref() {
            Some(sealed) => self.decrypt(sealed)?,
            None => return Err(ProviderError::MissingRefreshToken(label).into()),
        };

        let tokens: TokenResponse = match provider {
            Some(Provider::Gmail) => self.gmail.refresh_token(&refresh_token).await?,
            _ => self.outlook.refresh_token(&refresh_token).await?,
        };

        let access = self
            .secrets
            .encrypt(&tokens.access_token)
            .map_err(|e| CredentialError::Crypto(e.to_string()))?;
        // Keep the stored refresh token when the provider does not rotate it
        let refresh = self
            .secrets
            .encrypt_optional(tokens.refresh_token.as_deref())
            .map_err(|e| CredentialError::Crypto(e.to_string()))?;
        let expires_at = format_timestamp(tokens.expires_at(Utc::now()));

        self.accounts
            .update_tokens(account.id, &access, refresh, &expires_at)
            .await?;

        tracing::info!(
            "Refreshed {} token for {}",
            label,
            account.email_address
        );
        Ok(tokens.access_token)
    }
}
