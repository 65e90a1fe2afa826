use crate::models::format_timestamp;
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

pub const DEFAULT_RANGE: &str = "7d";

/// Reporting window for `/api/analytics`: the last N days or everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsRange {
    Days(u32),
    All,
}

impl AnalyticsRange {
    /// Accepts `all` or `<N>d`; anything else falls back to seven days.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("all") => AnalyticsRange::All,
            Some(value) => value
                .strip_suffix('d')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .map(AnalyticsRange::Days)
                .unwrap_or(AnalyticsRange::Days(7)),
            None => AnalyticsRange::Days(7),
        }
    }

    pub fn label(&self) -> String {
        match self {
            AnalyticsRange::Days(n) => format!("{}d", n),
            AnalyticsRange::All => "all".to_string(),
        }
    }

    fn since(&self) -> Option<String> {
        match self {
            AnalyticsRange::Days(n) => {
                Some(format_timestamp(Utc::now() - Duration::days(i64::from(*n))))
            }
            AnalyticsRange::All => None,
        }
    }
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    pub total_emails: i64,
    pub ai_analyzed: i64,
    pub starred: i64,
    pub unread: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct CategoryCount {
    pub category: Option<String>,
    pub count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct PriorityCount {
    pub priority_level: String,
    pub count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct SenderCount {
    pub email: Option<String>,
    pub name: Option<String>,
    pub count: i64,
    pub unread: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub overview: AnalyticsOverview,
    pub by_category: Vec<CategoryCount>,
    pub by_priority: Vec<PriorityCount>,
    pub top_senders: Vec<SenderCount>,
    pub daily_activity: Vec<DailyCount>,
    pub range: String,
}

#[derive(Clone, Debug)]
pub struct AnalyticsService {
    pool: SqlitePool,
}

impl AnalyticsService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn report(
        &self,
        user_id: i64,
        range: AnalyticsRange,
    ) -> Result<AnalyticsReport, sqlx::Error> {
        let since = range.since();

        let overview = self
            .scoped(
                r#"SELECT
                    COUNT(*) AS total_emails,
                    COALESCE(SUM(CASE WHEN ai_analyzed_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS ai_analyzed,
                    COALESCE(SUM(CASE WHEN is_starred = 1 THEN 1 ELSE 0 END), 0) AS starred,
                    COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0) AS unread
                FROM emails"#,
                user_id,
                since.as_deref(),
            )
            .build_query_as::<AnalyticsOverview>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = self.scoped(
            "SELECT category, COUNT(*) AS count FROM emails",
            user_id,
            since.as_deref(),
        );
        qb.push(" GROUP BY category ORDER BY count DESC LIMIT 10");
        let by_category = qb
            .build_query_as::<CategoryCount>()
            .fetch_all(&self.pool)
            .await?;

        let mut qb = self.scoped(
            "SELECT priority_level, COUNT(*) AS count FROM emails",
            user_id,
            since.as_deref(),
        );
        qb.push(
            " AND priority_level IS NOT NULL GROUP BY priority_level \
             ORDER BY CASE priority_level WHEN 'critical' THEN 1 WHEN 'high' THEN 2 \
             WHEN 'medium' THEN 3 WHEN 'low' THEN 4 ELSE 5 END",
        );
        let by_priority = qb
            .build_query_as::<PriorityCount>()
            .fetch_all(&self.pool)
            .await?;

        let mut qb = self.scoped(
            "SELECT from_address AS email, from_name AS name, COUNT(*) AS count, \
             COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0) AS unread FROM emails",
            user_id,
            since.as_deref(),
        );
        qb.push(" GROUP BY from_address, from_name ORDER BY count DESC, from_address LIMIT 10");
        let top_senders = qb
            .build_query_as::<SenderCount>()
            .fetch_all(&self.pool)
            .await?;

        let mut qb = self.scoped(
            "SELECT DATE(received_at) AS date, COUNT(*) AS count FROM emails",
            user_id,
            since.as_deref(),
        );
        qb.push(
            " AND received_at IS NOT NULL GROUP BY DATE(received_at) ORDER BY date DESC LIMIT 30",
        );
        let mut daily_activity = qb
            .build_query_as::<DailyCount>()
            .fetch_all(&self.pool)
            .await?;
        daily_activity.reverse();

        Ok(AnalyticsReport {
            overview,
            by_category,
            by_priority,
            top_senders,
            daily_activity,
            range: range.label(),
        })
    }

    /// Starts a query over the user's non-deleted emails inside the window.
    fn scoped<'a>(
        &self,
        select: &str,
        user_id: i64,
        since: Option<&'a str>,
    ) -> QueryBuilder<'a, Sqlite> {
        let mut qb = QueryBuilder::<Sqlite>::new(select);
        qb.push(" WHERE user_id = ");
        qb.push_bind(user_id);
        qb.push(" AND is_deleted = 0");
        if let Some(since) = since {
            qb.push(" AND received_at >= ");
            qb.push_bind(since);
        }
        qb
    }
}
