pub mod test_helpers {
    use crate::config::AppConfig;
    use crate::models::EmailAccount;
    use crate::services::secrets_manager::SecretsManager;
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
    use tempfile::NamedTempFile;

    pub const TEST_JWT_SECRET: &str = "test-jwt-secret-with-enough-length-0123456789";
    pub const TEST_ENCRYPTION_KEY: &str = "test-encryption-key-32-characters-long!!";
    pub const TEST_IMAP_PASSWORD: &str = "app-password";

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Create a temporary file-based SQLite database for testing
    /// Useful when you need to test features that don't work with in-memory databases
    pub async fn create_test_db_file() -> Result<(SqlitePool, NamedTempFile), sqlx::Error> {
        let temp_file = NamedTempFile::new().map_err(sqlx::Error::Io)?;
        let db_path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| sqlx::Error::Configuration("Invalid database path".into()))?;
        let database_url = format!("sqlite://{}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok((pool, temp_file))
    }

    /// Development defaults with fixed secrets so tokens and ciphertexts are
    /// reproducible across a test.
    pub fn test_config() -> AppConfig {
        AppConfig {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            encryption_key: TEST_ENCRYPTION_KEY.to_string(),
            ..AppConfig::default()
        }
    }

    pub fn test_secrets() -> SecretsManager {
        match SecretsManager::new(TEST_ENCRYPTION_KEY) {
            Ok(secrets) => secrets,
            Err(e) => panic!("Failed to build test secrets manager: {}", e),
        }
    }

    /// Insert a test user with hashed password and default settings
    pub async fn insert_test_user(
        pool: &SqlitePool,
        email: &str,
        password: &str,
    ) -> Result<i64, sqlx::Error> {
        use argon2::{
            password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
            Argon2,
        };

        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                sqlx::Error::Configuration(format!("Password hashing failed: {}", e).into())
            })?
            .to_string();

        let result = sqlx::query(
            "INSERT INTO users (email, password_hash, settings) VALUES (?, ?, ?)",
        )
        .bind(email)
        .bind(password_hash)
        .bind(crate::models::UserSettings::default().to_value().to_string())
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a connected iCloud-style IMAP account whose password is
    /// `TEST_IMAP_PASSWORD`, sealed with `TEST_ENCRYPTION_KEY`.
    pub async fn insert_test_account(
        pool: &SqlitePool,
        user_id: i64,
        email: &str,
    ) -> Result<EmailAccount, sqlx::Error> {
        let sealed = test_secrets()
            .encrypt(TEST_IMAP_PASSWORD)
            .map_err(|e| sqlx::Error::Configuration(e.to_string().into()))?;

        sqlx::query_as::<_, EmailAccount>(
            r#"
            INSERT INTO email_accounts (
                user_id, provider, email_address, imap_host, imap_port, smtp_host, smtp_port,
                username, password_encrypted, connection_status
            )
            VALUES (?, 'icloud', ?, 'imap.mail.me.com', 993, 'smtp.mail.me.com', 587, ?, ?, 'connected')
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(email)
        .bind(sealed)
        .fetch_one(pool)
        .await
    }

    /// Insert an OAuth account holding the given (already encrypted) tokens.
    pub async fn insert_oauth_account(
        pool: &SqlitePool,
        user_id: i64,
        provider: &str,
        email: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: &str,
    ) -> Result<EmailAccount, sqlx::Error> {
        sqlx::query_as::<_, EmailAccount>(
            r#"
            INSERT INTO email_accounts (
                user_id, provider, email_address, access_token, refresh_token,
                token_expires_at, connection_status
            )
            VALUES (?, ?, ?, ?, ?, ?, 'connected')
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(email)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .fetch_one(pool)
        .await
    }

    /// Insert a minimal unread email from `sender@example.com`.
    pub async fn insert_test_email(
        pool: &SqlitePool,
        account: &EmailAccount,
        message_id: &str,
        subject: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO emails (
                email_account_id, user_id, message_id, thread_id, subject, from_address,
                from_name, to_addresses, body_text, snippet, received_at
            )
            VALUES (?, ?, ?, ?, ?, 'sender@example.com', 'Sender', ?, ?, ?, ?)
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(message_id)
        .bind(format!("<{}>", message_id))
        .bind(subject)
        .bind(serde_json::json!([account.email_address]).to_string())
        .bind(format!("Body of {}", subject))
        .bind(format!("Body of {}", subject))
        .bind(crate::models::now_timestamp())
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Fully wired state whose mail providers are the in-memory `StubMailbox`.
    pub async fn test_app_state(
        pool: SqlitePool,
        config: AppConfig,
    ) -> (crate::AppState, std::sync::Arc<super::stub_mail::StubMailbox>) {
        let mailbox = std::sync::Arc::new(super::stub_mail::StubMailbox::default());
        match crate::AppState::with_adapters(pool, config, mailbox.adapters()) {
            Ok(state) => (state, mailbox),
            Err(e) => panic!("Failed to build test state: {}", e),
        }
    }
}

/// Mail provider stand-ins that never touch the network.
pub mod stub_mail {
    use crate::models::{EmailAccount, IncomingEmail};
    use crate::services::{
        email_sender::{EmailSender, OutgoingEmail, SendError},
        imap_client::{ImapConnector, ImapLogin},
        mail_provider::{FetchWindow, MailFetcher, ProviderError},
        sync_service::Fetchers,
    };
    use crate::MailAdapters;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Serves `inbox` to every fetch, records outgoing mail in `sent`, and
    /// accepts any IMAP login except `rejected_password`.
    #[derive(Debug, Default)]
    pub struct StubMailbox {
        pub inbox: Mutex<Vec<IncomingEmail>>,
        pub sent: Mutex<Vec<(i64, OutgoingEmail)>>,
        pub rejected_password: Option<String>,
    }

    impl StubMailbox {
        pub fn deliver(&self, email: IncomingEmail) {
            if let Ok(mut inbox) = self.inbox.lock() {
                inbox.push(email);
            }
        }

        pub fn sent(&self) -> Vec<(i64, OutgoingEmail)> {
            self.sent.lock().map(|s| s.clone()).unwrap_or_default()
        }

        pub fn adapters(self: &Arc<Self>) -> MailAdapters {
            MailAdapters {
                imap: self.clone(),
                fetchers: Fetchers {
                    gmail: self.clone(),
                    outlook: self.clone(),
                    imap: self.clone(),
                },
                sender: self.clone(),
            }
        }
    }

    #[async_trait]
    impl ImapConnector for StubMailbox {
        async fn verify_login(&self, login: &ImapLogin) -> Result<(), ProviderError> {
            if self.rejected_password.as_deref() == Some(login.password.as_str()) {
                return Err(ProviderError::AuthenticationFailed(
                    "invalid credentials".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MailFetcher for StubMailbox {
        async fn fetch(
            &self,
            _account: &EmailAccount,
            _secret: &str,
            window: FetchWindow,
        ) -> Result<Vec<IncomingEmail>, ProviderError> {
            let inbox = self
                .inbox
                .lock()
                .map_err(|_| ProviderError::Imap("stub mailbox poisoned".to_string()))?;
            Ok(inbox
                .iter()
                .take(window.max_results as usize)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl EmailSender for StubMailbox {
        async fn send(
            &self,
            account: &EmailAccount,
            email: &OutgoingEmail,
        ) -> Result<(), SendError> {
            self.sent
                .lock()
                .map_err(|_| SendError::SendFailed("stub mailbox poisoned".to_string()))?
                .push((account.id, email.clone()));
            Ok(())
        }
    }
}
