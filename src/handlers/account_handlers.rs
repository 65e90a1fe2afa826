use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json, Redirect},
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::Provider;
use crate::repositories::AccountChanges;
use crate::response::ApiResponse;
use crate::services::account_service::AccountServiceError;
use crate::validators::AccountInput;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateAccountBody {
    pub sync_frequency_minutes: Option<i64>,
    pub is_active: Option<bool>,
    pub sync_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OutlookCodeBody {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// GET /api/email/accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let accounts = state.account_service.list(user.id).await?;
    Ok(ApiResponse::ok(accounts))
}

/// PATCH /api/email/accounts/{id}
pub async fn update_account(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateAccountBody>,
) -> Result<impl IntoResponse> {
    let changes = AccountChanges {
        sync_frequency_minutes: body.sync_frequency_minutes,
        is_active: body.is_active,
        sync_enabled: body.sync_enabled,
    };
    if changes.is_empty() {
        return Err(AppError::validation("No fields to update"));
    }

    let account = state.account_service.update(id, user.id, changes).await?;
    Ok(ApiResponse::with_message(account, "Account updated successfully"))
}

/// DELETE /api/email/accounts/{id}
pub async fn disconnect_account(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.account_service.disconnect(id, user.id).await?;
    Ok(ApiResponse::with_message(
        json!({ "id": id }),
        "Account disconnected successfully",
    ))
}

/// POST /api/email/connect/imap
pub async fn connect_imap(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<AccountInput>,
) -> Result<impl IntoResponse> {
    let connected = state.account_service.connect_imap(user.id, input).await?;
    let label = connected
        .provider
        .parse::<Provider>()
        .map(|p| p.label())
        .unwrap_or("Email");
    let message = format!("{} account connected successfully", label);
    Ok(ApiResponse::with_message(connected, message))
}

/// GET /api/email/connect/gmail
pub async fn start_gmail(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let url = state.account_service.gmail_authorization_url(user.id)?;
    Ok(ApiResponse::with_message(
        json!({ "authUrl": url }),
        "Authorization URL generated",
    ))
}

/// GET /api/email/connect/outlook
pub async fn start_outlook(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let url = state.account_service.outlook_authorization_url(user.id)?;
    Ok(ApiResponse::with_message(
        json!({ "authUrl": url }),
        "Authorization URL generated",
    ))
}

/// POST /api/email/connect/outlook
pub async fn complete_outlook(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<OutlookCodeBody>,
) -> Result<impl IntoResponse> {
    let code = body
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::validation("Authorization code is required"))?;

    let connected = state
        .account_service
        .complete_outlook_for_user(user.id, &code, body.state.as_deref())
        .await?;
    Ok(ApiResponse::with_message(
        connected,
        "Outlook account connected successfully",
    ))
}

fn settings_redirect(state: &AppState, query: &str) -> Redirect {
    let base = state
        .config
        .app_url
        .as_deref()
        .map(|url| url.trim_end_matches('/'))
        .unwrap_or("");
    Redirect::to(&format!("{}/settings?{}", base, query))
}

fn error_redirect(state: &AppState, reason: &str) -> Redirect {
    settings_redirect(
        state,
        &format!("error={}", urlencoding::encode(reason)),
    )
}

/// Shared redirect handling for the provider consent callbacks.
async fn finish_callback<F, Fut>(
    state: &AppState,
    provider: Provider,
    query: OAuthCallbackQuery,
    complete: F,
) -> Redirect
where
    F: FnOnce(String, String) -> Fut,
    Fut: std::future::Future<
        Output = std::result::Result<
            crate::services::account_service::ConnectedAccount,
            AccountServiceError,
        >,
    >,
{
    if let Some(error) = query.error {
        tracing::warn!("{} authorization denied: {}", provider.label(), error);
        return error_redirect(state, "Authorization denied");
    }
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return settings_redirect(state, "error=missing_code");
    };
    let Some(oauth_state) = query.state.filter(|s| !s.is_empty()) else {
        return settings_redirect(state, "error=invalid_state");
    };

    match complete(code, oauth_state).await {
        Ok(connected) => {
            tracing::info!(
                "Connected {} account {} ({})",
                provider.label(),
                connected.account_id,
                connected.email
            );
            settings_redirect(state, &format!("success={}_connected", provider.as_str()))
        }
        Err(AccountServiceError::InvalidState) => settings_redirect(state, "error=invalid_state"),
        Err(e) => {
            tracing::error!("{} OAuth callback failed: {}", provider.label(), e);
            error_redirect(state, &format!("Failed to connect {}", provider.label()))
        }
    }
}

/// GET /api/email/connect/gmail-callback
pub async fn gmail_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Redirect {
    let service = state.account_service.clone();
    finish_callback(&state, Provider::Gmail, query, |code, oauth_state| async move {
        service.complete_gmail(&code, &oauth_state).await
    })
    .await
}

/// GET /api/email/connect/outlook-callback
pub async fn outlook_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Redirect {
    let service = state.account_service.clone();
    finish_callback(&state, Provider::Outlook, query, |code, oauth_state| async move {
        service
            .complete_outlook_callback(&code, &oauth_state)
            .await
    })
    .await
}
