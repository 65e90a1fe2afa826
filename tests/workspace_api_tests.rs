mod common;

use axum::http::StatusCode;
use common::spawn_app;
use mailpilot::test_utils::test_helpers;
use serde_json::json;

#[tokio::test]
async fn test_template_lifecycle() {
    let app = spawn_app().await;
    let (token, _) = app.register("templates@example.com").await;

    let missing = app
        .post("/api/templates", &token, json!({ "name": "Empty", "body": "   " }))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["message"], "Template body is required");

    let created = app
        .post(
            "/api/templates",
            &token,
            json!({
                "name": "Follow up",
                "subject": "Following up on {{topic}}",
                "body": "Hi {{name}}, any news on {{topic}}? {{signature}}",
            }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let template = &created.body["data"]["template"];
    assert_eq!(template["category"], "general");
    assert_eq!(template["tone"], "professional");
    let id = template["id"].as_i64().unwrap();

    let used = app
        .post(
            &format!("/api/templates/use/{}", id),
            &token,
            json!({ "variables": { "topic": "the contract", "name": "Sam" } }),
        )
        .await;
    assert_eq!(used.status, StatusCode::OK);
    let rendered = &used.body["data"]["template"];
    assert_eq!(rendered["subject"], "Following up on the contract");
    assert_eq!(
        rendered["body"],
        "Hi Sam, any news on the contract? {{signature}}"
    );
    assert_eq!(
        used.body["data"]["variables_replaced"],
        json!(["name", "topic"])
    );

    let listed = app.get("/api/templates", &token).await;
    assert_eq!(listed.body["data"]["total"], 1);
    assert_eq!(listed.body["data"]["templates"][0]["usage_count"], 1);

    let deactivated = app
        .patch(
            &format!("/api/templates/{}", id),
            &token,
            json!({ "is_active": false }),
        )
        .await;
    assert_eq!(deactivated.status, StatusCode::OK);

    let inactive = app
        .post(&format!("/api/templates/use/{}", id), &token, json!({}))
        .await;
    assert_eq!(inactive.status, StatusCode::NOT_FOUND);
    assert_eq!(inactive.body["message"], "Template not found or inactive");

    let deleted = app.delete(&format!("/api/templates/{}", id), &token).await;
    assert_eq!(deleted.body["message"], "Template deleted successfully");
    let gone = app.get(&format!("/api/templates/{}", id), &token).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    assert_eq!(gone.body["message"], "Template not found");
}

#[tokio::test]
async fn test_template_accepts_any_key_and_json_values() {
    let app = spawn_app().await;
    let (token, _) = app.register("vars@example.com").await;

    let created = app
        .post(
            "/api/templates",
            &token,
            json!({
                "name": "Order count",
                "subject": "Hello {{first-name}}",
                "body": "You have {{count}} open orders.",
            }),
        )
        .await;
    let id = created.body["data"]["template"]["id"].as_i64().unwrap();

    let used = app
        .post(
            &format!("/api/templates/use/{}", id),
            &token,
            json!({ "variables": { "first-name": "Sam", "count": 3 } }),
        )
        .await;
    assert_eq!(used.status, StatusCode::OK, "{}", used.text);
    let rendered = &used.body["data"]["template"];
    assert_eq!(rendered["subject"], "Hello Sam");
    assert_eq!(rendered["body"], "You have 3 open orders.");
}

#[tokio::test]
async fn test_rules_are_scoped_to_owner() {
    let app = spawn_app().await;
    let (token, _) = app.register("rules@example.com").await;
    let (other, _) = app.register("other@example.com").await;

    let incomplete = app
        .post("/api/rules", &token, json!({ "name": "Boss" }))
        .await;
    assert_eq!(incomplete.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        incomplete.body["message"],
        "Name, conditions, and actions are required"
    );

    let created = app
        .post(
            "/api/rules",
            &token,
            json!({
                "name": "Boss",
                "conditions": [{ "field": "from", "operator": "contains", "value": "boss@" }],
                "actions": [{ "type": "star" }],
            }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["data"]["enabled"], true);
    let id = created.body["data"]["id"].as_i64().unwrap();

    let foreign = app
        .patch(&format!("/api/rules/{}", id), &other, json!({ "enabled": false }))
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);
    assert_eq!(foreign.body["message"], "Rule not found");

    let disabled = app
        .patch(&format!("/api/rules/{}", id), &token, json!({ "enabled": false }))
        .await;
    assert_eq!(disabled.status, StatusCode::OK);
    assert_eq!(disabled.body["data"]["enabled"], false);

    let empty_actions = app
        .patch(&format!("/api/rules/{}", id), &token, json!({ "actions": [] }))
        .await;
    assert_eq!(empty_actions.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty_actions.body["message"], "At least one action is required");

    assert_eq!(
        app.get("/api/rules", &other).await.body["data"]
            .as_array()
            .unwrap()
            .len(),
        0
    );

    let deleted = app.delete(&format!("/api/rules/{}", id), &token).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.body["data"]["id"], id);
}

#[tokio::test]
async fn test_notifications_read_state() {
    let app = spawn_app().await;
    let (token, user_id) = app.register("notify@example.com").await;

    let first = app
        .state
        .notification_service
        .create(user_id, None, "important_email", "First", Some("one"))
        .await
        .unwrap();
    app.state
        .notification_service
        .create(user_id, None, "important_email", "Second", None)
        .await
        .unwrap();

    let listed = app.get("/api/notifications", &token).await;
    assert_eq!(listed.body["data"]["unread_count"], 2);
    assert_eq!(listed.body["data"]["notifications"][0]["type"], "important_email");

    let marked = app
        .patch(&format!("/api/notifications/{}", first), &token, json!({}))
        .await;
    assert_eq!(marked.status, StatusCode::OK);
    assert_eq!(marked.body["message"], "Notification updated");
    let listed = app.get("/api/notifications", &token).await;
    assert_eq!(listed.body["data"]["unread_count"], 1);

    let all = app
        .post("/api/notifications/mark-all-read", &token, json!({}))
        .await;
    assert_eq!(all.body["data"]["updated"], 1);

    let missing = app
        .patch("/api/notifications/999999", &token, json!({ "is_read": true }))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.body["message"], "Notification not found");

    let deleted = app
        .delete(&format!("/api/notifications/{}", first), &token)
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    let listed = app.get("/api/notifications", &token).await;
    assert_eq!(
        listed.body["data"]["notifications"].as_array().unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_budget_status_and_update() {
    let app = spawn_app().await;
    let (token, _) = app.register("budget@example.com").await;

    let status = app.get("/api/budget/status", &token).await;
    assert_eq!(status.status, StatusCode::OK);
    let budget = &status.body["data"]["budget"];
    assert_eq!(budget["budgetLimitCents"], 1000);
    assert_eq!(budget["percentUsed"], 0);
    assert_eq!(budget["isPaused"], false);

    let negative = app
        .patch(
            "/api/budget/update",
            &token,
            json!({ "budget_limit_cents": -5 }),
        )
        .await;
    assert_eq!(negative.status, StatusCode::BAD_REQUEST);
    assert_eq!(negative.body["message"], "Budget limit must be positive");

    let empty = app.patch("/api/budget/update", &token, json!({})).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.body["message"], "No updates provided");

    let raised = app
        .patch(
            "/api/budget/update",
            &token,
            json!({ "budget_limit_cents": 2500 }),
        )
        .await;
    assert_eq!(raised.status, StatusCode::OK);
    assert_eq!(raised.body["message"], "Budget updated successfully");
    assert_eq!(raised.body["data"]["budget"]["budgetLimitCents"], 2500);
}

#[tokio::test]
async fn test_analytics_report() {
    let app = spawn_app().await;
    let (token, user_id) = app.register("analytics@example.com").await;
    let account = test_helpers::insert_test_account(&app.pool, user_id, "a@icloud.com")
        .await
        .unwrap();
    for i in 0..3 {
        test_helpers::insert_test_email(
            &app.pool,
            &account,
            &format!("<a{}@example.com>", i),
            &format!("Subject {}", i),
        )
        .await
        .unwrap();
    }
    let deleted = test_helpers::insert_test_email(&app.pool, &account, "<gone@example.com>", "Gone")
        .await
        .unwrap();
    sqlx::query("UPDATE emails SET is_deleted = 1 WHERE id = ?")
        .bind(deleted)
        .execute(&app.pool)
        .await
        .unwrap();

    let report = app.get("/api/analytics?range=30d", &token).await;
    assert_eq!(report.status, StatusCode::OK);
    let data = &report.body["data"];
    assert_eq!(data["range"], "30d");
    assert_eq!(data["overview"]["totalEmails"], 3);
    assert_eq!(data["overview"]["unread"], 3);
    assert_eq!(data["topSenders"][0]["email"], "sender@example.com");
    assert_eq!(data["topSenders"][0]["count"], 3);

    let fallback = app.get("/api/analytics?range=bogus", &token).await;
    assert_eq!(fallback.body["data"]["range"], "7d");
}
