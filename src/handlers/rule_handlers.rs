use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::response::ApiResponse;
use crate::services::rule_service::RuleInput;
use crate::AppState;

/// GET /api/rules
pub async fn list_rules(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    Ok(ApiResponse::ok(state.rule_service.list(user.id).await?))
}

/// POST /api/rules
pub async fn create_rule(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<RuleInput>,
) -> Result<impl IntoResponse> {
    let rule = state.rule_service.create(user.id, input).await?;
    Ok(ApiResponse::created(rule, "Rule created successfully"))
}

/// PATCH /api/rules/{id}
pub async fn update_rule(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<RuleInput>,
) -> Result<impl IntoResponse> {
    let rule = state.rule_service.update(user.id, id, input).await?;
    Ok(ApiResponse::with_message(rule, "Rule updated successfully"))
}

/// DELETE /api/rules/{id}
pub async fn delete_rule(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.rule_service.delete(user.id, id).await?;
    Ok(ApiResponse::with_message(
        json!({ "id": id }),
        "Rule deleted successfully",
    ))
}
