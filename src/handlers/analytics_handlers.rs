use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::response::ApiResponse;
use crate::services::analytics_service::AnalyticsRange;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub range: Option<String>,
}

/// GET /api/analytics?range=7d|30d|all
pub async fn analytics(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse> {
    let range = AnalyticsRange::parse(query.range.as_deref());
    let report = state.analytics_service.report(user.id, range).await?;
    Ok(ApiResponse::ok(report))
}
