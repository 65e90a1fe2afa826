use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::response::ApiResponse;
use crate::services::template_service::TemplateInput;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UseTemplateBody {
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

/// GET /api/templates
pub async fn list_templates(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let templates = state.template_service.list(user.id).await?;
    let total = templates.len();
    Ok(ApiResponse::ok(json!({ "templates": templates, "total": total })))
}

/// POST /api/templates
pub async fn create_template(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<TemplateInput>,
) -> Result<impl IntoResponse> {
    let template = state.template_service.create(user.id, input).await?;
    Ok(ApiResponse::created(
        json!({ "template": template }),
        "Template created successfully",
    ))
}

/// GET /api/templates/{id}
pub async fn get_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    Ok(ApiResponse::ok(state.template_service.get(user.id, id).await?))
}

/// PATCH /api/templates/{id}
pub async fn update_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<TemplateInput>,
) -> Result<impl IntoResponse> {
    let template = state.template_service.update(user.id, id, input).await?;
    Ok(ApiResponse::with_message(
        json!({ "template": template }),
        "Template updated successfully",
    ))
}

/// DELETE /api/templates/{id}
pub async fn delete_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.template_service.delete(user.id, id).await?;
    Ok(ApiResponse::message("Template deleted successfully"))
}

/// POST /api/templates/use/{id}
pub async fn use_template(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<UseTemplateBody>>,
) -> Result<impl IntoResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let (template, replaced) = state
        .template_service
        .use_template(user.id, id, &body.variables)
        .await?;
    Ok(ApiResponse::ok(json!({
        "template": template,
        "variables_replaced": replaced,
    })))
}
