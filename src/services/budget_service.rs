//! Monthly LLM spend tracking.
//!
//! Each user has one `budget_usage` row per calendar month. Calls are gated
//! on it before they happen and charged to it afterwards.

use crate::models::{
    budget::{percent_used, BudgetPeriod},
    notification::KIND_BUDGET_ALERT,
    now_timestamp, ApiUsageLog, BudgetUsage,
};
use crate::services::notification_service::NotificationService;
use serde::Serialize;
use sqlx::{types::Json, SqlitePool};

const BUDGET_COLUMNS: &str = "id, user_id, period_start, period_end, api_calls_total, \
     api_calls_claude, tokens_input, tokens_output, estimated_cost_cents, budget_limit_cents, \
     is_paused, pause_reason, alerts_sent, created_at, updated_at";
const RECENT_USAGE_LIMIT: i64 = 20;
pub const LIMIT_REACHED_REASON: &str = "Monthly budget limit reached";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// One LLM call to be charged.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub user_id: i64,
    pub email_id: Option<i64>,
    pub provider: String,
    pub operation: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost_cents: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BudgetChanges {
    pub budget_limit_cents: Option<i64>,
    pub is_paused: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub period_start: String,
    pub period_end: String,
    pub api_calls_total: i64,
    pub api_calls_claude: i64,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub estimated_cost_cents: i64,
    pub budget_limit_cents: i64,
    pub percent_used: i64,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub alerts_sent: Vec<i64>,
}

impl From<&BudgetUsage> for BudgetSummary {
    fn from(usage: &BudgetUsage) -> Self {
        Self {
            period_start: usage.period_start.clone(),
            period_end: usage.period_end.clone(),
            api_calls_total: usage.api_calls_total,
            api_calls_claude: usage.api_calls_claude,
            tokens_input: usage.tokens_input,
            tokens_output: usage.tokens_output,
            estimated_cost_cents: usage.estimated_cost_cents,
            budget_limit_cents: usage.budget_limit_cents,
            percent_used: usage.percent_used(),
            is_paused: usage.is_paused,
            pause_reason: usage.pause_reason.clone(),
            alerts_sent: usage.alerts_sent.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BudgetService {
    pool: SqlitePool,
    default_limit_cents: i64,
    notifications: NotificationService,
}

impl BudgetService {
    pub fn new(pool: SqlitePool, default_limit_cents: i64, notifications: NotificationService) -> Self {
        Self {
            pool,
            default_limit_cents,
            notifications,
        }
    }

    pub async fn find_current(&self, user_id: i64) -> Result<Option<BudgetUsage>, sqlx::Error> {
        let period = BudgetPeriod::current();
        sqlx::query_as::<_, BudgetUsage>(&format!(
            "SELECT {} FROM budget_usage WHERE user_id = ? AND period_start = ?",
            BUDGET_COLUMNS
        ))
        .bind(user_id)
        .bind(&period.start)
        .fetch_optional(&self.pool)
        .await
    }

    /// This month's row, created with the default limit when missing.
    pub async fn current(&self, user_id: i64) -> Result<BudgetUsage, sqlx::Error> {
        let period = BudgetPeriod::current();
        sqlx::query(
            r#"
            INSERT INTO budget_usage (user_id, period_start, period_end, budget_limit_cents)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, period_start) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&period.start)
        .bind(&period.end)
        .bind(self.default_limit_cents)
        .execute(&self.pool)
        .await?;

        self.find_current(user_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Whether another LLM call is allowed this month.
    pub async fn check(&self, user_id: i64) -> Result<BudgetCheck, sqlx::Error> {
        let Some(usage) = self.find_current(user_id).await? else {
            return Ok(BudgetCheck {
                allowed: true,
                reason: None,
            });
        };

        if usage.is_paused {
            return Ok(BudgetCheck {
                allowed: false,
                reason: Some("Budget paused".to_string()),
            });
        }
        if usage.estimated_cost_cents >= usage.budget_limit_cents {
            return Ok(BudgetCheck {
                allowed: false,
                reason: Some("Budget limit reached".to_string()),
            });
        }
        Ok(BudgetCheck {
            allowed: true,
            reason: None,
        })
    }

    /// Logs the call, counts it against this month's usage and raises any
    /// alerts the new total crosses. Failed calls carry zero tokens and cost.
    pub async fn record_usage(&self, record: UsageRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO api_usage_logs
                (user_id, email_id, api_provider, operation, tokens_input, tokens_output,
                 cost_cents, success, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.user_id)
        .bind(record.email_id)
        .bind(&record.provider)
        .bind(&record.operation)
        .bind(record.tokens_input)
        .bind(record.tokens_output)
        .bind(record.cost_cents)
        .bind(record.success)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        let usage = self.current(record.user_id).await?;
        sqlx::query(
            r#"
            UPDATE budget_usage SET
                api_calls_total = api_calls_total + 1,
                api_calls_claude = api_calls_claude + CASE WHEN ? = 'claude' THEN 1 ELSE 0 END,
                tokens_input = tokens_input + ?,
                tokens_output = tokens_output + ?,
                estimated_cost_cents = estimated_cost_cents + ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.provider)
        .bind(record.tokens_input)
        .bind(record.tokens_output)
        .bind(record.cost_cents)
        .bind(now_timestamp())
        .bind(usage.id)
        .execute(&self.pool)
        .await?;

        self.raise_alerts(record.user_id).await
    }

    async fn raise_alerts(&self, user_id: i64) -> Result<(), sqlx::Error> {
        let Some(usage) = self.find_current(user_id).await? else {
            return Ok(());
        };
        let pending = usage.pending_alerts();
        if pending.is_empty() {
            return Ok(());
        }

        let spent = format_dollars(usage.estimated_cost_cents);
        let limit = format_dollars(usage.budget_limit_cents);
        let mut alerts_sent = usage.alerts_sent.0.clone();
        let mut pause = false;

        for threshold in pending {
            let (title, message) = if threshold >= 100 {
                pause = true;
                (
                    "Monthly AI budget reached".to_string(),
                    format!(
                        "You have used {} of your {} monthly AI budget. AI features are paused until next month or until you raise the limit.",
                        spent, limit
                    ),
                )
            } else {
                (
                    format!("AI budget {}% used", threshold),
                    format!("You have used {} of your {} monthly AI budget.", spent, limit),
                )
            };
            self.notifications
                .create(user_id, None, KIND_BUDGET_ALERT, &title, Some(&message))
                .await?;
            alerts_sent.push(threshold);
            tracing::info!("Budget alert at {}% for user {}", threshold, user_id);
        }

        sqlx::query(
            r#"
            UPDATE budget_usage SET
                alerts_sent = ?,
                is_paused = CASE WHEN ? THEN 1 ELSE is_paused END,
                pause_reason = CASE WHEN ? THEN ? ELSE pause_reason END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Json(alerts_sent))
        .bind(pause)
        .bind(pause)
        .bind(LIMIT_REACHED_REASON)
        .bind(now_timestamp())
        .bind(usage.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Applies limit and pause changes to this month's row. Unpausing clears
    /// the pause reason.
    pub async fn update(
        &self,
        user_id: i64,
        changes: BudgetChanges,
    ) -> Result<BudgetUsage, sqlx::Error> {
        let usage = self.current(user_id).await?;
        let clear_reason = changes.is_paused == Some(false);

        sqlx::query(
            r#"
            UPDATE budget_usage SET
                budget_limit_cents = COALESCE(?, budget_limit_cents),
                is_paused = COALESCE(?, is_paused),
                pause_reason = CASE WHEN ? THEN NULL ELSE pause_reason END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(changes.budget_limit_cents)
        .bind(changes.is_paused)
        .bind(clear_reason)
        .bind(now_timestamp())
        .bind(usage.id)
        .execute(&self.pool)
        .await?;

        self.current(user_id).await
    }

    /// The newest usage log entries since the period began.
    pub async fn recent_usage(
        &self,
        user_id: i64,
        since: &str,
    ) -> Result<Vec<ApiUsageLog>, sqlx::Error> {
        sqlx::query_as::<_, ApiUsageLog>(
            r#"
            SELECT id, user_id, email_id, api_provider, operation, tokens_input, tokens_output,
                   cost_cents, success, error_message, created_at
            FROM api_usage_logs
            WHERE user_id = ? AND created_at >= ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(RECENT_USAGE_LIMIT)
        .fetch_all(&self.pool)
        .await
    }

    /// Spend summary as shown on the profile page.
    pub async fn percent_used(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        Ok(self
            .find_current(user_id)
            .await?
            .map(|u| percent_used(u.estimated_cost_cents, u.budget_limit_cents))
            .unwrap_or(0))
    }
}

fn format_dollars(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}
