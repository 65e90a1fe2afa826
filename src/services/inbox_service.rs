use crate::models::email::make_snippet;
use crate::models::{now_timestamp, Email, EmailAccount, EmailWithAccount, IncomingEmail};
use crate::services::llm_service::EmailAnalysis;
use crate::validators::{Pagination, PRIORITY_LEVELS};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, QueryBuilder, Sqlite, SqlitePool};

pub const MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_EXPORT_LIMIT: i64 = 1000;
pub const MAX_EXPORT_LIMIT: i64 = 10_000;

const EMAIL_WITH_ACCOUNT_SELECT: &str = "SELECT e.*, ea.email_address AS account_email, \
     ea.provider AS provider FROM emails e JOIN email_accounts ea ON ea.id = e.email_account_id";

/// Narrowing options shared by list, search and export.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailFilter {
    pub priority: Option<String>,
    pub category: Option<String>,
    pub sentiment: Option<String>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub has_attachments: Option<bool>,
    pub account_id: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    #[serde(skip_serializing)]
    pub search: Option<String>,
    #[serde(skip_serializing)]
    pub include_archived: bool,
}

impl EmailFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>, user_id: i64) {
        qb.push(" WHERE e.user_id = ").push_bind(user_id);
        qb.push(" AND e.is_deleted = 0");
        if !self.include_archived {
            qb.push(" AND e.is_archived = 0");
        }
        if let Some(priority) = non_empty(&self.priority) {
            qb.push(" AND e.priority_level = ").push_bind(priority.to_string());
        }
        if let Some(category) = non_empty(&self.category) {
            qb.push(" AND e.category = ").push_bind(category.to_string());
        }
        if let Some(sentiment) = non_empty(&self.sentiment) {
            qb.push(" AND e.sentiment = ").push_bind(sentiment.to_string());
        }
        if let Some(is_read) = self.is_read {
            qb.push(" AND e.is_read = ").push_bind(is_read);
        }
        if let Some(is_starred) = self.is_starred {
            qb.push(" AND e.is_starred = ").push_bind(is_starred);
        }
        if let Some(has_attachments) = self.has_attachments {
            qb.push(" AND e.has_attachments = ").push_bind(has_attachments);
        }
        if let Some(account_id) = self.account_id {
            qb.push(" AND e.email_account_id = ").push_bind(account_id);
        }
        if let Some(from) = non_empty(&self.date_from) {
            qb.push(" AND e.received_at >= ").push_bind(from.to_string());
        }
        if let Some(to) = non_empty(&self.date_to) {
            qb.push(" AND e.received_at <= ").push_bind(to.to_string());
        }
        if let Some(term) = non_empty(&self.search) {
            // SQLite LIKE is case-insensitive for ASCII
            let pattern = format!("%{}%", term.trim());
            qb.push(" AND (e.subject LIKE ")
                .push_bind(pattern.clone())
                .push(" OR e.from_address LIKE ")
                .push_bind(pattern.clone())
                .push(" OR e.from_name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR e.body_text LIKE ")
                .push_bind(pattern.clone())
                .push(" OR e.snippet LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Flag changes from `PATCH /api/email/{id}`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EmailFlags {
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub is_archived: Option<bool>,
}

impl EmailFlags {
    pub fn is_empty(&self) -> bool {
        self.is_read.is_none() && self.is_starred.is_none() && self.is_archived.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAction {
    MarkRead,
    MarkUnread,
    Star,
    Unstar,
    Archive,
    Unarchive,
    SetCategory(String),
    SetPriority(String),
    Delete,
}

impl BatchAction {
    pub fn parse(action: &str, value: Option<&str>) -> Result<Self, String> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        let action = match action {
            "mark_read" => Self::MarkRead,
            "mark_unread" => Self::MarkUnread,
            "star" => Self::Star,
            "unstar" => Self::Unstar,
            "archive" => Self::Archive,
            "unarchive" => Self::Unarchive,
            "delete" => Self::Delete,
            "set_category" => Self::SetCategory(
                value
                    .ok_or("value is required for set_category action")?
                    .to_string(),
            ),
            "set_priority" => {
                let level = value
                    .ok_or("value is required for set_priority action")?
                    .to_lowercase();
                if !PRIORITY_LEVELS.contains(&level.as_str()) {
                    return Err("Invalid priority level".to_string());
                }
                Self::SetPriority(level)
            }
            "" => return Err("action is required".to_string()),
            _ => return Err("Invalid action".to_string()),
        };
        Ok(action)
    }

    /// Past-tense phrase used in "<N> email(s) <verb>".
    pub fn verb(&self) -> String {
        match self {
            Self::MarkRead => "marked as read".to_string(),
            Self::MarkUnread => "marked as unread".to_string(),
            Self::Star => "starred".to_string(),
            Self::Unstar => "unstarred".to_string(),
            Self::Archive => "archived".to_string(),
            Self::Unarchive => "unarchived".to_string(),
            Self::SetCategory(c) => format!("categorized as {}", c),
            Self::SetPriority(p) => format!("priority set to {}", p),
            Self::Delete => "deleted".to_string(),
        }
    }
}

/// Compact row returned by `/api/email/search`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: i64,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub from_email: Option<String>,
    pub preview: Option<String>,
    pub received_at: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub sentiment: Option<String>,
    pub has_attachments: bool,
    pub ai_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Overview {
    pub total_emails: i64,
    pub unread_count: i64,
    pub starred_count: i64,
    pub archived_count: i64,
    pub with_attachments_count: i64,
    pub read_percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Bucket {
    pub label: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow)]
pub struct HourCount {
    pub hour: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow)]
pub struct AccountCount {
    pub email: String,
    pub provider: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AiAnalysisStats {
    pub analyzed_count: i64,
    pub avg_priority_score: Option<f64>,
    pub emails_with_actions: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BusiestDay {
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Insights {
    pub busiest_day: Option<BusiestDay>,
    pub avg_response_hours: Option<f64>,
    pub attachment_percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmailStatistics {
    pub overview: Overview,
    pub by_priority: Vec<Bucket>,
    pub by_category: Vec<Bucket>,
    pub by_sentiment: Vec<Bucket>,
    pub by_hour: Vec<HourCount>,
    pub by_account: Vec<AccountCount>,
    pub ai_analysis: AiAnalysisStats,
    pub insights: Insights,
}

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        0.0
    } else {
        round2(part as f64 * 100.0 / total as f64)
    }
}

fn buckets(rows: Vec<(String, i64)>) -> Vec<Bucket> {
    let total: i64 = rows.iter().map(|(_, c)| c).sum();
    rows.into_iter()
        .map(|(label, count)| Bucket {
            percentage: percentage(count, total),
            label,
            count,
        })
        .collect()
}

const CSV_HEADER: &str = "ID,Subject,From Name,From Address,To,Received At,Priority,Category,\
Sentiment,Is Read,Is Starred,Has Attachments,Summary";

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Renders emails as CSV; every field is quoted.
pub fn emails_to_csv(emails: &[Email]) -> String {
    let mut lines = vec![CSV_HEADER.to_string()];
    for email in emails {
        let fields = [
            email.id.to_string(),
            email.subject.clone().unwrap_or_default(),
            email.from_name.clone().unwrap_or_default(),
            email.from_address.clone().unwrap_or_default(),
            email.to_addresses.0.join("; "),
            email.received_at.clone().unwrap_or_default(),
            email.priority_level.clone().unwrap_or_default(),
            email.category.clone().unwrap_or_default(),
            email.sentiment.clone().unwrap_or_default(),
            email.is_read.to_string(),
            email.is_starred.to_string(),
            email.has_attachments.to_string(),
            email.summary.clone().unwrap_or_default(),
        ];
        lines.push(
            fields
                .iter()
                .map(|f| csv_field(f))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

/// Stored messages: ingestion from sync, reads and flag changes from the API.
#[derive(Clone)]
pub struct InboxService {
    pool: SqlitePool,
}

impl InboxService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a fetched message unless the account already has it.
    /// Returns the new row, or `None` for a duplicate.
    pub async fn store(
        &self,
        account: &EmailAccount,
        incoming: &IncomingEmail,
    ) -> Result<Option<Email>, sqlx::Error> {
        let now = now_timestamp();
        let received_at = incoming.received_at.clone().unwrap_or_else(|| now.clone());
        let snippet = incoming
            .snippet
            .clone()
            .or_else(|| incoming.body_text.as_deref().map(make_snippet));

        sqlx::query_as::<_, Email>(
            r#"
            INSERT INTO emails (
                email_account_id, user_id, message_id, thread_id, subject, from_address,
                from_name, to_addresses, cc_addresses, body_text, body_html, snippet,
                received_at, is_read, is_starred, labels, has_attachments, attachments,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (email_account_id, message_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(&incoming.message_id)
        .bind(&incoming.thread_id)
        .bind(&incoming.subject)
        .bind(&incoming.from_address)
        .bind(&incoming.from_name)
        .bind(Json(&incoming.to_addresses))
        .bind(Json(&incoming.cc_addresses))
        .bind(&incoming.body_text)
        .bind(&incoming.body_html)
        .bind(snippet)
        .bind(received_at)
        .bind(incoming.is_read)
        .bind(incoming.is_starred)
        .bind(Json(&incoming.labels))
        .bind(incoming.has_attachments)
        .bind(Json(&incoming.attachments))
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn apply_analysis(
        &self,
        email_id: i64,
        analysis: &EmailAnalysis,
    ) -> Result<(), sqlx::Error> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE emails SET
                priority_score = ?, priority_level = ?, category = ?, sentiment = ?,
                action_items = ?, summary = ?, tags = ?, ai_analyzed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(analysis.priority_score)
        .bind(&analysis.priority_level)
        .bind(&analysis.category)
        .bind(&analysis.sentiment)
        .bind(Json(&analysis.action_items))
        .bind(&analysis.summary)
        .bind(Json(&analysis.tags))
        .bind(&now)
        .bind(&now)
        .bind(email_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(
        &self,
        user_id: i64,
        filter: &EmailFilter,
        pagination: &Pagination,
    ) -> Result<(Vec<EmailWithAccount>, i64), sqlx::Error> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM emails e");
        filter.push_where(&mut count, user_id);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(EMAIL_WITH_ACCOUNT_SELECT);
        filter.push_where(&mut qb, user_id);
        qb.push(" ORDER BY e.received_at DESC, e.id DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset);
        let emails = qb
            .build_query_as::<EmailWithAccount>()
            .fetch_all(&self.pool)
            .await?;

        Ok((emails, total))
    }

    /// Loads an email without side effects.
    pub async fn find(&self, user_id: i64, id: i64) -> Result<Option<Email>, sqlx::Error> {
        sqlx::query_as::<_, Email>(
            "SELECT * FROM emails WHERE id = ? AND user_id = ? AND is_deleted = 0",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Loads an email for display and marks it read.
    pub async fn open(
        &self,
        user_id: i64,
        id: i64,
    ) -> Result<Option<EmailWithAccount>, sqlx::Error> {
        let email = sqlx::query_as::<_, EmailWithAccount>(&format!(
            "{} WHERE e.id = ? AND e.user_id = ? AND e.is_deleted = 0",
            EMAIL_WITH_ACCOUNT_SELECT
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(mut email) = email else {
            return Ok(None);
        };

        if !email.email.is_read {
            sqlx::query("UPDATE emails SET is_read = 1, updated_at = ? WHERE id = ?")
                .bind(now_timestamp())
                .bind(id)
                .execute(&self.pool)
                .await?;
            email.email.is_read = true;
        }
        Ok(Some(email))
    }

    pub async fn update_flags(
        &self,
        user_id: i64,
        id: i64,
        flags: EmailFlags,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE emails SET
                is_read = COALESCE(?, is_read),
                is_starred = COALESCE(?, is_starred),
                is_archived = COALESCE(?, is_archived),
                updated_at = ?
            WHERE id = ? AND user_id = ? AND is_deleted = 0
            "#,
        )
        .bind(flags.is_read)
        .bind(flags.is_starred)
        .bind(flags.is_archived)
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn soft_delete(&self, user_id: i64, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE emails SET is_deleted = 1, updated_at = ? \
             WHERE id = ? AND user_id = ? AND is_deleted = 0",
        )
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Applies one action to many of the user's emails; returns rows touched.
    pub async fn batch(
        &self,
        user_id: i64,
        ids: &[i64],
        action: &BatchAction,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE emails SET ");
        match action {
            BatchAction::MarkRead => qb.push("is_read = 1"),
            BatchAction::MarkUnread => qb.push("is_read = 0"),
            BatchAction::Star => qb.push("is_starred = 1"),
            BatchAction::Unstar => qb.push("is_starred = 0"),
            BatchAction::Archive => qb.push("is_archived = 1"),
            BatchAction::Unarchive => qb.push("is_archived = 0"),
            BatchAction::Delete => qb.push("is_deleted = 1"),
            BatchAction::SetCategory(category) => {
                qb.push("category = ").push_bind(category.clone())
            }
            BatchAction::SetPriority(level) => {
                qb.push("priority_level = ").push_bind(level.clone())
            }
        };
        qb.push(", updated_at = ").push_bind(now_timestamp());
        qb.push(" WHERE user_id = ").push_bind(user_id);
        qb.push(" AND is_deleted = 0 AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn search(
        &self,
        user_id: i64,
        filter: &EmailFilter,
        pagination: &Pagination,
    ) -> Result<(Vec<SearchHit>, i64), sqlx::Error> {
        let filter = EmailFilter {
            include_archived: false,
            ..filter.clone()
        };

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM emails e");
        filter.push_where(&mut count, user_id);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT e.id, e.subject, COALESCE(NULLIF(e.from_name, ''), e.from_address) AS \"from\", \
             e.from_address AS from_email, e.snippet AS preview, e.received_at, e.is_read, \
             e.is_starred, e.priority_level AS priority, e.category, e.sentiment, \
             e.has_attachments, e.summary AS ai_summary FROM emails e",
        );
        filter.push_where(&mut qb, user_id);
        qb.push(" ORDER BY e.received_at DESC, e.id DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset);
        let hits = qb
            .build_query_as::<SearchHit>()
            .fetch_all(&self.pool)
            .await?;

        Ok((hits, total))
    }

    pub async fn export(
        &self,
        user_id: i64,
        filter: &EmailFilter,
        limit: i64,
    ) -> Result<Vec<Email>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT e.* FROM emails e");
        filter.push_where(&mut qb, user_id);
        qb.push(" ORDER BY e.received_at DESC, e.id DESC LIMIT ")
            .push_bind(limit.clamp(1, MAX_EXPORT_LIMIT));
        qb.build_query_as::<Email>().fetch_all(&self.pool).await
    }

    /// Newest non-deleted emails in a category, for AI summaries.
    pub async fn recent_in_category(
        &self,
        user_id: i64,
        category: &str,
        limit: i64,
    ) -> Result<Vec<Email>, sqlx::Error> {
        sqlx::query_as::<_, Email>(
            "SELECT * FROM emails WHERE user_id = ? AND category = ? AND is_deleted = 0 \
             ORDER BY received_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM emails WHERE user_id = ? AND is_read = 0 AND is_deleted = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn statistics(&self, user_id: i64) -> Result<EmailStatistics, sqlx::Error> {
        let (total, unread, starred, archived, with_attachments): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_starred = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_archived = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN has_attachments = 1 THEN 1 ELSE 0 END), 0)
                FROM emails WHERE user_id = ? AND is_deleted = 0
                "#,
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let priority_rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT priority_level, COUNT(*) FROM emails
            WHERE user_id = ? AND is_deleted = 0 AND priority_level IS NOT NULL
            GROUP BY priority_level
            ORDER BY CASE priority_level
                WHEN 'critical' THEN 1 WHEN 'high' THEN 2
                WHEN 'medium' THEN 3 WHEN 'low' THEN 4 ELSE 5 END
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let category_rows = self.distribution(user_id, "category").await?;
        let sentiment_rows = self.distribution(user_id, "sentiment").await?;

        let by_hour = sqlx::query_as::<_, HourCount>(
            r#"
            SELECT CAST(strftime('%H', received_at) AS INTEGER) AS hour, COUNT(*) AS count
            FROM emails
            WHERE user_id = ? AND is_deleted = 0 AND received_at IS NOT NULL
            GROUP BY hour ORDER BY hour
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let by_account = sqlx::query_as::<_, AccountCount>(
            r#"
            SELECT ea.email_address AS email, ea.provider AS provider, COUNT(e.id) AS count
            FROM email_accounts ea
            LEFT JOIN emails e ON e.email_account_id = ea.id AND e.is_deleted = 0
            WHERE ea.user_id = ?
            GROUP BY ea.id, ea.email_address, ea.provider
            ORDER BY count DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let (analyzed_count, avg_priority_score, emails_with_actions): (i64, Option<f64>, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN ai_analyzed_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                    AVG(priority_score),
                    COALESCE(SUM(CASE WHEN action_items != '[]' THEN 1 ELSE 0 END), 0)
                FROM emails WHERE user_id = ? AND is_deleted = 0
                "#,
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let busiest: Option<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT CAST(strftime('%w', received_at) AS INTEGER) AS day_num, COUNT(*) AS count
            FROM emails
            WHERE user_id = ? AND is_deleted = 0 AND received_at IS NOT NULL
            GROUP BY day_num ORDER BY count DESC, day_num LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let avg_response_hours: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG((julianday(d.sent_at) - julianday(e.received_at)) * 24.0)
            FROM email_drafts d JOIN emails e ON e.id = d.email_id
            WHERE d.user_id = ? AND d.status = 'sent'
              AND d.sent_at IS NOT NULL AND e.received_at IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(EmailStatistics {
            overview: Overview {
                total_emails: total,
                unread_count: unread,
                starred_count: starred,
                archived_count: archived,
                with_attachments_count: with_attachments,
                read_percentage: percentage(total - unread, total),
            },
            by_priority: buckets(priority_rows),
            by_category: buckets(category_rows),
            by_sentiment: buckets(sentiment_rows),
            by_hour,
            by_account,
            ai_analysis: AiAnalysisStats {
                analyzed_count,
                avg_priority_score: avg_priority_score.map(round2),
                emails_with_actions,
            },
            insights: Insights {
                busiest_day: busiest.map(|(day, count)| BusiestDay {
                    day: WEEKDAYS
                        .get(day as usize)
                        .copied()
                        .unwrap_or("Unknown")
                        .to_string(),
                    count,
                }),
                avg_response_hours: avg_response_hours.map(round2),
                attachment_percentage: percentage(with_attachments, total),
            },
        })
    }

    async fn distribution(
        &self,
        user_id: i64,
        column: &'static str,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {col}, COUNT(*) AS count FROM emails \
             WHERE user_id = ? AND is_deleted = 0 AND {col} IS NOT NULL \
             GROUP BY {col} ORDER BY count DESC, {col}",
            col = column
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}
