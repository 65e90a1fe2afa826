use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::response::ApiResponse;
use crate::services::draft_service::{CreateDraftRequest, DraftChanges};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DraftListQuery {
    pub status: Option<String>,
}

/// GET /api/drafts
pub async fn list_drafts(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DraftListQuery>,
) -> Result<impl IntoResponse> {
    let drafts = state
        .draft_service
        .list(user.id, query.status.as_deref())
        .await?;
    Ok(ApiResponse::ok(drafts))
}

/// POST /api/drafts and /api/drafts/create
pub async fn create_draft(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateDraftRequest>,
) -> Result<impl IntoResponse> {
    let created = state.draft_service.create(user.id, request).await?;
    Ok(ApiResponse::with_message(
        json!({ "draft": created.draft, "notes": created.notes }),
        "Draft created successfully",
    ))
}

/// GET /api/drafts/{id}
pub async fn get_draft(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let draft = state.draft_service.get(user.id, id).await?;
    Ok(ApiResponse::ok(draft))
}

/// PATCH /api/drafts/{id}
pub async fn update_draft(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<DraftChanges>,
) -> Result<impl IntoResponse> {
    let draft = state.draft_service.update(user.id, id, changes).await?;
    Ok(ApiResponse::with_message(draft, "Draft updated successfully"))
}

/// DELETE /api/drafts/{id}
pub async fn delete_draft(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.draft_service.delete(user.id, id).await?;
    Ok(ApiResponse::with_message(
        json!({ "id": id }),
        "Draft deleted successfully",
    ))
}

/// POST /api/drafts/{id}/send
pub async fn send_draft(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let draft = state.draft_service.send(user.id, id).await?;
    Ok(ApiResponse::with_message(
        json!({ "id": draft.id, "sent_at": draft.sent_at }),
        "Email sent successfully",
    ))
}
