pub mod account_service;
pub mod analytics_service;
pub mod budget_service;
pub mod credential_service;
pub mod draft_service;
pub mod email_sender;
pub mod gmail_client;
pub mod imap_client;
pub mod inbox_service;
pub mod llm_service;
pub mod mail_provider;
pub mod notification_service;
pub mod outlook_client;
pub mod rule_service;
pub mod secrets_manager;
pub mod sync_service;
pub mod template_service;
pub mod user_service;
