use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationUpdate {
    pub is_read: Option<bool>,
}

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let notifications = state.notification_service.list(user.id).await?;
    let unread_count = state.notification_service.unread_count(user.id).await?;
    Ok(ApiResponse::ok(json!({
        "notifications": notifications,
        "unread_count": unread_count,
    })))
}

/// PATCH /api/notifications/{id}
pub async fn update_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<NotificationUpdate>>,
) -> Result<impl IntoResponse> {
    let is_read = body.and_then(|Json(b)| b.is_read).unwrap_or(true);
    if !state
        .notification_service
        .set_read(id, user.id, is_read)
        .await?
    {
        return Err(AppError::not_found("Notification not found"));
    }
    Ok(ApiResponse::with_message(json!({ "id": id }), "Notification updated"))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    if !state.notification_service.delete(id, user.id).await? {
        return Err(AppError::not_found("Notification not found"));
    }
    Ok(ApiResponse::with_message(json!({ "id": id }), "Notification deleted"))
}

/// POST /api/notifications/mark-all-read
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let updated = state.notification_service.mark_all_read(user.id).await?;
    Ok(ApiResponse::with_message(
        json!({ "updated": updated }),
        "All notifications marked as read",
    ))
}
