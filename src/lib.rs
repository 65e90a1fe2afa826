pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod response;
pub mod routes;
pub mod services;
pub mod validators;
pub mod variables;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;

use std::sync::Arc;

use auth::JwtService;
use config::AppConfig;
use middleware::RateLimiter;
use repositories::{
    AccountRepository, SessionRepository, SqliteAccountRepository, SqliteSessionRepository,
    SqliteUserRepository, UserRepository,
};
use services::{
    account_service::AccountService,
    analytics_service::AnalyticsService,
    budget_service::BudgetService,
    credential_service::CredentialService,
    draft_service::DraftService,
    email_sender::{EmailSender, ProviderEmailSender},
    gmail_client::GmailClient,
    imap_client::{ImapClient, ImapConnector},
    inbox_service::InboxService,
    llm_service::LlmService,
    notification_service::NotificationService,
    outlook_client::OutlookClient,
    rule_service::RuleService,
    secrets_manager::SecretsManager,
    sync_service::{EmailSyncService, Fetchers},
    template_service::TemplateService,
    user_service::UserService,
};

/// The network-facing mail adapters. Tests swap these for local stand-ins.
#[derive(Clone)]
pub struct MailAdapters {
    pub imap: Arc<dyn ImapConnector>,
    pub fetchers: Fetchers,
    pub sender: Arc<dyn EmailSender>,
}

impl MailAdapters {
    pub fn live(credentials: &CredentialService, gmail: &GmailClient, outlook: &OutlookClient) -> Self {
        Self {
            imap: Arc::new(ImapClient::new()),
            fetchers: Fetchers {
                gmail: Arc::new(gmail.clone()),
                outlook: Arc::new(outlook.clone()),
                imap: Arc::new(ImapClient::new()),
            },
            sender: Arc::new(ProviderEmailSender::new(
                credentials.clone(),
                gmail.clone(),
                outlook.clone(),
            )),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: Arc<JwtService>,
    pub user_repository: Arc<dyn UserRepository>,
    pub session_repository: Arc<dyn SessionRepository>,
    pub account_repository: Arc<dyn AccountRepository>,
    pub user_service: Arc<UserService>,
    pub account_service: Arc<AccountService>,
    pub sync_service: EmailSyncService,
    pub inbox_service: InboxService,
    pub draft_service: Arc<DraftService>,
    pub rule_service: RuleService,
    pub template_service: TemplateService,
    pub notification_service: NotificationService,
    pub budget_service: BudgetService,
    pub llm_service: LlmService,
    pub analytics_service: AnalyticsService,
    pub rate_limiter: Arc<RateLimiter>,
    pub pool: sqlx::SqlitePool,
}

impl AppState {
    /// Wires every service against the real providers.
    pub fn new(pool: sqlx::SqlitePool, config: AppConfig) -> anyhow::Result<Self> {
        let gmail = GmailClient::new(config.google.clone());
        let outlook = OutlookClient::new(config.microsoft.clone());
        let secrets = Arc::new(SecretsManager::new(&config.encryption_key)?);
        let account_repository: Arc<dyn AccountRepository> =
            Arc::new(SqliteAccountRepository::new(pool.clone()));
        let credentials = CredentialService::new(
            account_repository.clone(),
            secrets,
            gmail.clone(),
            outlook.clone(),
        );
        let adapters = MailAdapters::live(&credentials, &gmail, &outlook);
        Self::with_adapters(pool, config, adapters)
    }

    pub fn with_adapters(
        pool: sqlx::SqlitePool,
        config: AppConfig,
        adapters: MailAdapters,
    ) -> anyhow::Result<Self> {
        let jwt = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_expires_in));
        let secrets = Arc::new(SecretsManager::new(&config.encryption_key)?);

        let user_repository: Arc<dyn UserRepository> =
            Arc::new(SqliteUserRepository::new(pool.clone()));
        let session_repository: Arc<dyn SessionRepository> =
            Arc::new(SqliteSessionRepository::new(pool.clone()));
        let account_repository: Arc<dyn AccountRepository> =
            Arc::new(SqliteAccountRepository::new(pool.clone()));

        let gmail = GmailClient::new(config.google.clone());
        let outlook = OutlookClient::new(config.microsoft.clone());
        let credentials = CredentialService::new(
            account_repository.clone(),
            secrets.clone(),
            gmail.clone(),
            outlook.clone(),
        );

        let notification_service = NotificationService::new(pool.clone());
        let budget_service = BudgetService::new(
            pool.clone(),
            config.default_monthly_budget_cents,
            notification_service.clone(),
        );
        let llm_service = LlmService::new(config.claude.clone(), budget_service.clone());
        let inbox_service = InboxService::new(pool.clone());

        let user_service = Arc::new(UserService::new(
            user_repository.clone(),
            session_repository.clone(),
            jwt.clone(),
        ));
        let account_service = Arc::new(AccountService::new(
            account_repository.clone(),
            secrets,
            adapters.imap,
            gmail,
            outlook,
            jwt.clone(),
        ));
        let sync_service = EmailSyncService::new(
            adapters.fetchers,
            credentials,
            account_repository.clone(),
            user_repository.clone(),
            inbox_service.clone(),
            llm_service.clone(),
            notification_service.clone(),
            config.sync.clone(),
        );
        let draft_service = Arc::new(DraftService::new(
            pool.clone(),
            inbox_service.clone(),
            account_repository.clone(),
            llm_service.clone(),
            adapters.sender,
        ));

        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_window,
            config.rate_limit_max_requests,
        ));

        Ok(Self {
            config: Arc::new(config),
            jwt,
            user_repository,
            session_repository,
            account_repository,
            user_service,
            account_service,
            sync_service,
            inbox_service,
            draft_service,
            rule_service: RuleService::new(pool.clone()),
            template_service: TemplateService::new(pool.clone()),
            notification_service,
            budget_service,
            llm_service,
            analytics_service: AnalyticsService::new(pool.clone()),
            rate_limiter,
            pool,
        })
    }
}
