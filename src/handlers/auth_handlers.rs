use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::{extract_bearer_token, AuthUser};
use crate::error::{AppError, Result};
use crate::middleware::client_identifier;
use crate::models::now_timestamp;
use crate::response::ApiResponse;
use crate::services::user_service::{LoginRequest, RegisterRequest, SessionMeta};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileBody {
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsBody {
    pub settings: Option<Value>,
}

fn session_meta(headers: &HeaderMap) -> SessionMeta {
    let ip = client_identifier(headers);
    SessionMeta {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ip_address: (ip != "anonymous").then_some(ip),
    }
}

/// GET /api/health
pub async fn health() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Email Assistant API is running",
            "timestamp": now_timestamp(),
        })),
    )
        .into_response()
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse> {
    let request = RegisterRequest {
        email: body.email.unwrap_or_default(),
        password: body.password.unwrap_or_default(),
        full_name: body.full_name,
    };
    let session = state
        .user_service
        .register(request, session_meta(&headers))
        .await?;

    state.budget_service.current(session.user.id).await?;

    Ok(ApiResponse::created(
        json!({
            "user": {
                "id": session.user.id,
                "email": session.user.email,
                "full_name": session.user.full_name,
                "created_at": session.user.created_at,
            },
            "token": session.token,
        }),
        "User registered successfully",
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse> {
    let (Some(email), Some(password)) = (
        body.email.filter(|e| !e.trim().is_empty()),
        body.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::validation("Email and password are required"));
    };

    let session = state
        .user_service
        .login(LoginRequest { email, password }, session_meta(&headers))
        .await?;

    Ok(ApiResponse::with_message(
        json!({
            "user": {
                "id": session.user.id,
                "email": session.user.email,
                "full_name": session.user.full_name,
            },
            "token": session.token,
        }),
        "Login successful",
    ))
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse> {
    state.user_service.logout(&user.token_hash).await?;
    Ok(ApiResponse::message("Logged out successfully"))
}

/// POST /api/auth/refresh
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("No token provided".to_string()))?;
    let token = state.user_service.refresh(token).await?;
    Ok(ApiResponse::with_message(
        json!({ "token": token }),
        "Token refreshed successfully",
    ))
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<impl IntoResponse> {
    let user = state.user_service.get_user(auth.id).await?;
    let accounts = state.account_repository.list_for_user(user.id, true).await?;
    let unread = state.inbox_service.unread_count(user.id).await?;
    let budget = state.budget_service.find_current(user.id).await?;

    let budget = match budget {
        Some(usage) => json!({
            "apiCalls": usage.api_calls_total,
            "estimatedCost": usage.estimated_cost_cents,
            "budgetLimit": usage.budget_limit_cents,
            "isPaused": usage.is_paused,
            "percentUsed": usage.percent_used(),
        }),
        None => json!({
            "apiCalls": 0,
            "estimatedCost": 0,
            "budgetLimit": state.config.default_monthly_budget_cents,
            "isPaused": false,
            "percentUsed": 0,
        }),
    };

    Ok(ApiResponse::ok(json!({
        "user": {
            "id": user.id,
            "email": user.email,
            "full_name": user.full_name,
            "settings": user.settings.0,
        },
        "stats": {
            "emailAccountsCount": accounts.len(),
            "unreadCount": unread,
        },
        "budget": budget,
    })))
}

/// PATCH /api/auth/profile
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<ProfileBody>,
) -> Result<impl IntoResponse> {
    let user = state
        .user_service
        .update_profile(auth.id, body.full_name.as_deref())
        .await?;
    Ok(ApiResponse::with_message(
        json!({
            "id": user.id,
            "email": user.email,
            "full_name": user.full_name,
            "created_at": user.created_at,
        }),
        "Profile updated successfully",
    ))
}

/// PATCH /api/auth/settings
pub async fn update_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SettingsBody>,
) -> Result<impl IntoResponse> {
    let patch: Map<String, Value> = match body.settings {
        Some(Value::Object(map)) => map,
        _ => return Err(AppError::validation("Valid settings object is required")),
    };

    let user = state.user_service.update_settings(auth.id, &patch).await?;
    Ok(ApiResponse::with_message(
        json!({
            "id": user.id,
            "email": user.email,
            "full_name": user.full_name,
            "settings": user.settings.0,
        }),
        "Settings updated successfully",
    ))
}
