use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::middleware::require_auth;
use crate::error::AppError;
use crate::handlers::{
    account_handlers, analytics_handlers, auth_handlers, budget_handlers, draft_handlers,
    email_handlers, notification_handlers, rule_handlers, template_handlers,
};
use crate::middleware::{add_security_headers, cors_layer, rate_limit};
use crate::AppState;

/// Builds the complete `/api` router with its middleware stack.
pub fn build_router(state: AppState) -> Router {
    // Rate limited, no session required
    let auth_routes = Router::new()
        .route("/api/auth/register", post(auth_handlers::register))
        .route("/api/auth/login", post(auth_handlers::login))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    // Provider redirects arrive without a bearer token; the signed state carries the user
    let callback_routes = Router::new()
        .route(
            "/api/email/connect/gmail-callback",
            get(account_handlers::gmail_callback),
        )
        .route(
            "/api/email/connect/outlook-callback",
            get(account_handlers::outlook_callback),
        );

    let protected_routes = Router::new()
        // Session
        .route("/api/auth/logout", post(auth_handlers::logout))
        .route("/api/auth/refresh", post(auth_handlers::refresh))
        .route("/api/auth/me", get(auth_handlers::me))
        .route("/api/auth/profile", patch(auth_handlers::update_profile))
        .route("/api/auth/settings", patch(auth_handlers::update_settings))
        // Mail accounts
        .route("/api/email/accounts", get(account_handlers::list_accounts))
        .route(
            "/api/email/accounts/{id}",
            patch(account_handlers::update_account).delete(account_handlers::disconnect_account),
        )
        .route("/api/email/connect/imap", post(account_handlers::connect_imap))
        .route("/api/email/connect/gmail", get(account_handlers::start_gmail))
        .route(
            "/api/email/connect/outlook",
            get(account_handlers::start_outlook).post(account_handlers::complete_outlook),
        )
        // Inbox
        .route("/api/email/sync", post(email_handlers::sync))
        .route("/api/email/list", get(email_handlers::list_emails))
        .route("/api/email/batch", post(email_handlers::batch))
        .route("/api/email/search", get(email_handlers::search))
        .route("/api/email/statistics", get(email_handlers::statistics))
        .route("/api/email/export", get(email_handlers::export))
        .route("/api/email/summary", get(email_handlers::category_summary))
        .route(
            "/api/email/{id}",
            get(email_handlers::get_email)
                .patch(email_handlers::update_email)
                .delete(email_handlers::delete_email),
        )
        // Drafts
        .route(
            "/api/drafts",
            get(draft_handlers::list_drafts).post(draft_handlers::create_draft),
        )
        .route("/api/drafts/create", post(draft_handlers::create_draft))
        .route(
            "/api/drafts/{id}",
            get(draft_handlers::get_draft)
                .patch(draft_handlers::update_draft)
                .delete(draft_handlers::delete_draft),
        )
        .route("/api/drafts/{id}/send", post(draft_handlers::send_draft))
        // Rules
        .route(
            "/api/rules",
            get(rule_handlers::list_rules).post(rule_handlers::create_rule),
        )
        .route(
            "/api/rules/{id}",
            patch(rule_handlers::update_rule).delete(rule_handlers::delete_rule),
        )
        // Templates
        .route(
            "/api/templates",
            get(template_handlers::list_templates).post(template_handlers::create_template),
        )
        .route(
            "/api/templates/{id}",
            get(template_handlers::get_template)
                .patch(template_handlers::update_template)
                .delete(template_handlers::delete_template),
        )
        .route(
            "/api/templates/use/{id}",
            post(template_handlers::use_template),
        )
        // Notifications
        .route(
            "/api/notifications",
            get(notification_handlers::list_notifications),
        )
        .route(
            "/api/notifications/mark-all-read",
            post(notification_handlers::mark_all_read),
        )
        .route(
            "/api/notifications/{id}",
            patch(notification_handlers::update_notification)
                .delete(notification_handlers::delete_notification),
        )
        // Analytics and budget
        .route("/api/analytics", get(analytics_handlers::analytics))
        .route("/api/budget/status", get(budget_handlers::budget_status))
        .route("/api/budget/update", patch(budget_handlers::update_budget))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/api/health", get(auth_handlers::health))
        .merge(auth_routes)
        .merge(callback_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            add_security_headers,
        ))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::not_found("Route not found")
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}
