pub mod account_handlers;
pub mod analytics_handlers;
pub mod auth_handlers;
pub mod budget_handlers;
pub mod draft_handlers;
pub mod email_handlers;
pub mod notification_handlers;
pub mod rule_handlers;
pub mod template_handlers;
