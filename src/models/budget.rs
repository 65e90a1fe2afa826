use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};

/// Alert thresholds, in percent of the monthly limit.
pub const ALERT_THRESHOLDS: [i64; 2] = [80, 100];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub id: i64,
    pub user_id: i64,
    pub period_start: String,
    pub period_end: String,
    pub api_calls_total: i64,
    pub api_calls_claude: i64,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub estimated_cost_cents: i64,
    pub budget_limit_cents: i64,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub alerts_sent: Json<Vec<i64>>,
    pub created_at: String,
    pub updated_at: String,
}

impl BudgetUsage {
    pub fn percent_used(&self) -> i64 {
        percent_used(self.estimated_cost_cents, self.budget_limit_cents)
    }

    /// Thresholds reached by current spend that have not been alerted yet.
    pub fn pending_alerts(&self) -> Vec<i64> {
        ALERT_THRESHOLDS
            .iter()
            .copied()
            .filter(|t| {
                self.budget_limit_cents > 0
                    && self.estimated_cost_cents * 100 >= self.budget_limit_cents * t
                    && !self.alerts_sent.0.contains(t)
            })
            .collect()
    }
}

/// Whole-number percentage of the limit spent; zero when there is no limit.
pub fn percent_used(spent_cents: i64, limit_cents: i64) -> i64 {
    if limit_cents <= 0 {
        return 0;
    }
    (spent_cents as f64 / limit_cents as f64 * 100.0).round() as i64
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiUsageLog {
    pub id: i64,
    pub user_id: i64,
    pub email_id: Option<i64>,
    pub api_provider: String,
    pub operation: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost_cents: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// Calendar month boundaries, as `YYYY-MM-DD` dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetPeriod {
    pub start: String,
    pub end: String,
}

impl BudgetPeriod {
    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    pub fn containing(now: DateTime<Utc>) -> Self {
        let date = now.date_naive();
        let start = date.with_day(1).unwrap_or(date);
        let (year, month) = if start.month() == 12 {
            (start.year() + 1, 1)
        } else {
            (start.year(), start.month() + 1)
        };
        let end = NaiveDate::from_ymd_opt(year, month, 1)
            .map(|next| next - Duration::days(1))
            .unwrap_or(start);
        Self {
            start: start.format("%Y-%m-%d").to_string(),
            end: end.format("%Y-%m-%d").to_string(),
        }
    }
}
