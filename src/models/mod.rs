pub mod budget;
pub mod draft;
pub mod email;
pub mod email_account;
pub mod notification;
pub mod rule;
pub mod template;
pub mod user;

pub use budget::{ApiUsageLog, BudgetPeriod, BudgetUsage};
pub use draft::{Draft, DraftWithEmail};
pub use email::{make_snippet, ActionItem, AttachmentMeta, Email, EmailWithAccount, IncomingEmail};
pub use email_account::{EmailAccount, Provider, ProviderSettings};
pub use notification::Notification;
pub use rule::Rule;
pub use template::Template;
pub use user::{User, UserSettings};

use chrono::{DateTime, Utc};

/// Timestamps are stored as `YYYY-MM-DDTHH:MM:SSZ` so they sort lexically.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parses a stored or provider-supplied timestamp (RFC 3339 or RFC 2822).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(dt), "2025-03-04T05:06:07Z");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp("2025-03-04T05:06:07Z"), Some(expected));
        assert_eq!(
            parse_timestamp("2025-03-04T06:06:07+01:00"),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp("Tue, 4 Mar 2025 05:06:07 +0000"),
            Some(expected)
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
