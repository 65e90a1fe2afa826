use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{now_timestamp, Email};
use crate::response::ApiResponse;
use crate::services::inbox_service::{
    emails_to_csv, BatchAction, EmailFilter, EmailFlags, DEFAULT_EXPORT_LIMIT, MAX_BATCH_SIZE,
    MAX_EXPORT_LIMIT,
};
use crate::validators::Pagination;
use crate::AppState;

const SUMMARY_EMAIL_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct SyncBody {
    pub account_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub account_id: Option<i64>,
    pub search: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub sentiment: Option<String>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub has_attachments: Option<bool>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub limit: Option<i64>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub is_read: Option<bool>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub email_ids: Option<Vec<i64>>,
    pub action: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub category: Option<String>,
}

/// POST /api/email/sync
pub async fn sync(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<SyncBody>>,
) -> Result<impl IntoResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    if let Some(account_id) = body.account_id {
        state
            .account_repository
            .find_for_user(account_id, user.id)
            .await?
            .ok_or_else(|| AppError::not_found("Email account not found"))?;

        let count = state.sync_service.sync_account(account_id).await?;
        return Ok(ApiResponse::with_message(
            json!({ "accountId": account_id, "count": count }),
            "Email sync completed",
        ));
    }

    let results = state.sync_service.sync_user(user.id).await?;
    Ok(ApiResponse::with_message(
        json!({ "results": results }),
        "Email sync completed for all accounts",
    ))
}

/// GET /api/email/list
pub async fn list_emails(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse> {
    let pagination = Pagination::from_query(query.page, query.limit);
    let filter = EmailFilter {
        priority: query.priority,
        category: query.category,
        is_read: query.is_read,
        is_starred: query.is_starred,
        account_id: query.account_id,
        search: query.search,
        include_archived: query.include_archived,
        ..Default::default()
    };

    let (emails, total) = state.inbox_service.list(user.id, &filter, &pagination).await?;
    Ok(ApiResponse::ok(json!({
        "emails": emails,
        "pagination": {
            "page": pagination.page,
            "limit": pagination.limit,
            "total": total,
            "totalPages": pagination.total_pages(total),
        },
    })))
}

/// GET /api/email/{id}
pub async fn get_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let email = state
        .inbox_service
        .open(user.id, id)
        .await?
        .ok_or_else(|| AppError::not_found("Email not found"))?;
    Ok(ApiResponse::ok(json!({ "email": email })))
}

/// PATCH /api/email/{id}
pub async fn update_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(flags): Json<EmailFlags>,
) -> Result<impl IntoResponse> {
    if flags.is_empty() {
        return Ok(ApiResponse::message("No updates provided"));
    }
    if !state.inbox_service.update_flags(user.id, id, flags).await? {
        return Err(AppError::not_found("Email not found"));
    }
    Ok(ApiResponse::message("Email updated successfully"))
}

/// DELETE /api/email/{id}
pub async fn delete_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    if !state.inbox_service.soft_delete(user.id, id).await? {
        return Err(AppError::not_found("Email not found"));
    }
    Ok(ApiResponse::message("Email deleted successfully"))
}

/// POST /api/email/batch
pub async fn batch(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<BatchBody>,
) -> Result<impl IntoResponse> {
    let ids = body.email_ids.unwrap_or_default();
    if ids.is_empty() {
        return Err(AppError::validation("email_ids must be a non-empty array"));
    }
    if ids.len() > MAX_BATCH_SIZE {
        return Err(AppError::validation(format!(
            "Maximum {} emails can be processed at once",
            MAX_BATCH_SIZE
        )));
    }

    let action = BatchAction::parse(
        body.action.as_deref().unwrap_or(""),
        body.value.as_deref(),
    )
    .map_err(AppError::Validation)?;

    let affected = state.inbox_service.batch(user.id, &ids, &action).await?;
    let message = format!("{} email(s) {}", affected, action.verb());
    Ok(ApiResponse::with_message(
        json!({
            "affected_count": affected,
            "requested_count": ids.len(),
        }),
        message,
    ))
}

/// GET /api/email/search
pub async fn search(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse> {
    let pagination = Pagination::from_query(query.page, query.limit);
    let filter = EmailFilter {
        priority: query.priority,
        category: query.category,
        sentiment: query.sentiment,
        is_read: query.is_read,
        is_starred: query.is_starred,
        has_attachments: query.has_attachments,
        date_from: query.date_from,
        date_to: query.date_to,
        search: query.q.clone(),
        ..Default::default()
    };

    let (emails, total) = state
        .inbox_service
        .search(user.id, &filter, &pagination)
        .await?;
    let total_pages = pagination.total_pages(total);

    Ok(ApiResponse::ok(json!({
        "emails": emails,
        "pagination": {
            "current_page": pagination.page,
            "total_pages": total_pages,
            "total_count": total,
            "per_page": pagination.limit,
            "has_next": pagination.page < total_pages,
            "has_prev": pagination.page > 1,
        },
        "search_query": query.q,
        "filters": filter,
    })))
}

/// GET /api/email/statistics
pub async fn statistics(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let stats = state.inbox_service.statistics(user.id).await?;
    Ok(ApiResponse::ok(stats))
}

fn export_json(emails: &[Email], filter: &EmailFilter) -> Value {
    json!({
        "exported_at": now_timestamp(),
        "total_count": emails.len(),
        "filters": filter,
        "emails": emails.iter().map(|email| json!({
            "id": email.id,
            "subject": email.subject,
            "from": {
                "name": email.from_name,
                "email": email.from_address,
            },
            "to": email.to_addresses.0,
            "cc": email.cc_addresses.0,
            "body_text": email.body_text,
            "preview": email.snippet,
            "received_at": email.received_at,
            "is_read": email.is_read,
            "is_starred": email.is_starred,
            "priority": email.priority_level,
            "category": email.category,
            "sentiment": email.sentiment,
            "has_attachments": email.has_attachments,
            "ai_analysis": {
                "summary": email.summary,
                "action_items": email.action_items.0,
                "priority_score": email.priority_score,
                "tags": email.tags.0,
            },
            "created_at": email.created_at,
        })).collect::<Vec<_>>(),
    })
}

/// GET /api/email/export
pub async fn export(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let format = query.format.as_deref().unwrap_or("json");
    if format != "json" && format != "csv" {
        return Err(AppError::validation("Format must be json or csv"));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_EXPORT_LIMIT)
        .clamp(1, MAX_EXPORT_LIMIT);
    let filter = EmailFilter {
        priority: query.priority,
        category: query.category,
        is_read: query.is_read,
        date_from: query.date_from,
        date_to: query.date_to,
        include_archived: true,
        ..Default::default()
    };

    let emails = state.inbox_service.export(user.id, &filter, limit).await?;
    let disposition = format!(
        "attachment; filename=\"emails-export-{}.{}\"",
        Utc::now().format("%Y-%m-%d"),
        format
    );
    tracing::info!("User {} exported {} emails as {}", user.id, emails.len(), format);

    if format == "csv" {
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            emails_to_csv(&emails),
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_DISPOSITION, disposition)],
        Json(export_json(&emails, &filter)),
    )
        .into_response())
}

/// GET /api/email/summary
pub async fn category_summary(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SummaryQuery>,
) -> Result<impl IntoResponse> {
    let category = query
        .category
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::validation("category is required"))?;

    let emails = state
        .inbox_service
        .recent_in_category(user.id, &category, SUMMARY_EMAIL_LIMIT)
        .await?;
    if emails.is_empty() {
        return Ok(ApiResponse::ok(json!({
            "category": category,
            "summary": null,
            "email_count": 0,
        })));
    }

    let summary = state
        .llm_service
        .generate_category_summary(user.id, &emails, &category)
        .await?;
    Ok(ApiResponse::ok(json!({
        "category": category,
        "summary": summary,
        "email_count": emails.len(),
    })))
}
