use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::response::ApiResponse;
use crate::services::budget_service::{BudgetChanges, BudgetSummary};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BudgetUpdateBody {
    pub budget_limit_cents: Option<i64>,
    pub is_paused: Option<bool>,
}

/// GET /api/budget/status
pub async fn budget_status(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let usage = state.budget_service.current(user.id).await?;
    let recent = state
        .budget_service
        .recent_usage(user.id, &usage.period_start)
        .await?;
    Ok(ApiResponse::ok(json!({
        "budget": BudgetSummary::from(&usage),
        "recentUsage": recent,
    })))
}

/// PATCH /api/budget/update
pub async fn update_budget(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<BudgetUpdateBody>,
) -> Result<impl IntoResponse> {
    if body.budget_limit_cents.is_some_and(|limit| limit < 0) {
        return Err(AppError::validation("Budget limit must be positive"));
    }
    if body.budget_limit_cents.is_none() && body.is_paused.is_none() {
        return Err(AppError::validation("No updates provided"));
    }

    let usage = state
        .budget_service
        .update(
            user.id,
            BudgetChanges {
                budget_limit_cents: body.budget_limit_cents,
                is_paused: body.is_paused,
            },
        )
        .await?;
    tracing::info!("User {} updated budget settings", user.id);
    Ok(ApiResponse::with_message(
        json!({ "budget": BudgetSummary::from(&usage) }),
        "Budget updated successfully",
    ))
}
