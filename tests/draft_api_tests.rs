mod common;

use axum::http::StatusCode;
use common::{spawn_app_with, TestApp};
use mailpilot::test_utils::test_helpers;
use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn claude_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }],
        "usage": { "input_tokens": 1200, "output_tokens": 400 },
    }))
}

async fn app_with_claude(server: &MockServer) -> TestApp {
    let mut config = test_helpers::test_config();
    config.claude.api_key = Some("test-key".to_string());
    config.claude.api_url = server.uri();
    spawn_app_with(config).await
}

/// Registers a user owning one mailbox with one received email.
async fn seed(app: &TestApp) -> (String, i64) {
    let (token, user_id) = app.register("drafter@example.com").await;
    let account = test_helpers::insert_test_account(&app.pool, user_id, "drafter@icloud.com")
        .await
        .unwrap();
    let email_id =
        test_helpers::insert_test_email(&app.pool, &account, "<orig@example.com>", "Project update")
            .await
            .unwrap();
    (token, email_id)
}

#[tokio::test]
async fn test_ai_draft_then_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(claude_reply(
            "```json\n{\"subject\": \"Project update\", \"body_text\": \"Thanks, will review.\", \
             \"body_html\": \"<p>Thanks, will review.</p>\", \"confidence_score\": 1.7, \
             \"notes\": \"Short acknowledgement\"}\n```",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_with_claude(&server).await;
    let (token, email_id) = seed(&app).await;

    let created = app
        .post(
            "/api/drafts/create",
            &token,
            json!({ "email_id": email_id, "tone": "friendly" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::OK, "{}", created.text);
    assert_eq!(created.body["message"], "Draft created successfully");
    let draft = &created.body["data"]["draft"];
    assert_eq!(draft["subject"], "Re: Project update");
    assert_eq!(draft["status"], "draft");
    assert_eq!(draft["ai_generated"], true);
    assert_eq!(draft["ai_confidence_score"], 1.0);
    assert_eq!(created.body["data"]["notes"], "Short acknowledgement");
    let draft_id = draft["id"].as_i64().unwrap();

    // The call was charged to this month's budget
    let budget = app.get("/api/budget/status", &token).await;
    assert_eq!(budget.body["data"]["budget"]["apiCallsTotal"], 1);
    assert_eq!(budget.body["data"]["budget"]["tokensInput"], 1200);
    assert!(budget.body["data"]["budget"]["estimatedCostCents"].as_i64().unwrap() > 0);
    assert_eq!(
        budget.body["data"]["recentUsage"][0]["operation"],
        "generate_draft"
    );

    let edited = app
        .patch(
            &format!("/api/drafts/{}", draft_id),
            &token,
            json!({ "draft_content": "Thanks, reviewing today." }),
        )
        .await;
    assert_eq!(edited.status, StatusCode::OK);
    assert_eq!(edited.body["data"]["body_text"], "Thanks, reviewing today.");

    let sent = app
        .post(&format!("/api/drafts/{}/send", draft_id), &token, json!({}))
        .await;
    assert_eq!(sent.status, StatusCode::OK, "{}", sent.text);
    assert_eq!(sent.body["message"], "Email sent successfully");
    assert!(sent.body["data"]["sent_at"].is_string());

    let outbox = app.mailbox.sent();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].1.to, vec!["sender@example.com".to_string()]);
    assert_eq!(outbox[0].1.body_text, "Thanks, reviewing today.");
    assert_eq!(
        outbox[0].1.in_reply_to.as_deref(),
        Some("<orig@example.com>")
    );

    let again = app
        .post(&format!("/api/drafts/{}/send", draft_id), &token, json!({}))
        .await;
    assert_eq!(again.status, StatusCode::BAD_REQUEST);
    assert_eq!(again.body["message"], "Draft has already been sent");

    let sent_only = app.get("/api/drafts?status=sent", &token).await;
    assert_eq!(sent_only.body["data"].as_array().unwrap().len(), 1);
    let drafts_only = app.get("/api/drafts?status=draft", &token).await;
    assert_eq!(drafts_only.body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_manual_draft_skips_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(claude_reply("{}"))
        .expect(0)
        .mount(&server)
        .await;

    let app = app_with_claude(&server).await;
    let (token, email_id) = seed(&app).await;

    let created = app
        .post(
            "/api/drafts",
            &token,
            json!({ "email_id": email_id, "skip_ai": true, "draft_content": "On it." }),
        )
        .await;
    assert_eq!(created.status, StatusCode::OK);
    let draft = &created.body["data"]["draft"];
    assert_eq!(draft["ai_generated"], false);
    assert_eq!(draft["body_text"], "On it.");

    let id = draft["id"].as_i64().unwrap();
    let fetched = app.get(&format!("/api/drafts/{}", id), &token).await;
    assert_eq!(fetched.status, StatusCode::OK);

    let deleted = app.delete(&format!("/api/drafts/{}", id), &token).await;
    assert_eq!(deleted.body["message"], "Draft deleted successfully");
    let gone = app.get(&format!("/api/drafts/{}", id), &token).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    assert_eq!(gone.body["message"], "Draft not found");
}

#[tokio::test]
async fn test_draft_for_unknown_email() {
    let server = MockServer::start().await;
    let app = app_with_claude(&server).await;
    let (token, _) = seed(&app).await;

    let missing = app
        .post("/api/drafts/create", &token, json!({ "email_id": 987654 }))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["message"], "Email not found");

    let no_id = app.post("/api/drafts/create", &token, json!({})).await;
    assert_eq!(no_id.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_id.body["message"], "email_id is required");
}

#[tokio::test]
async fn test_paused_budget_blocks_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(claude_reply("{}"))
        .expect(0)
        .mount(&server)
        .await;

    let app = app_with_claude(&server).await;
    let (token, email_id) = seed(&app).await;

    let paused = app
        .patch("/api/budget/update", &token, json!({ "is_paused": true }))
        .await;
    assert_eq!(paused.status, StatusCode::OK);
    assert_eq!(paused.body["data"]["budget"]["isPaused"], true);

    let blocked = app
        .post("/api/drafts/create", &token, json!({ "email_id": email_id }))
        .await;
    assert_eq!(blocked.status, StatusCode::BAD_REQUEST);
    assert_eq!(blocked.body["message"], "Budget paused");
}

#[tokio::test]
async fn test_category_summary_uses_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(claude_reply("  Mostly project updates from one sender.  "))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_with_claude(&server).await;
    let (token, email_id) = seed(&app).await;
    sqlx::query("UPDATE emails SET category = 'work' WHERE id = ?")
        .bind(email_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let response = app.get("/api/email/summary?category=work", &token).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    assert_eq!(
        response.body["data"]["summary"],
        "Mostly project updates from one sender."
    );
    assert_eq!(response.body["data"]["email_count"], 1);
}
