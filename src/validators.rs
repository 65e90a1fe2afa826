use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::FieldError;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

pub const MAX_INPUT_LENGTH: usize = 10_000;
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const PROVIDERS: &[&str] = &["gmail", "outlook", "icloud", "yahoo", "spacemail", "custom"];
pub const PRIORITY_LEVELS: &[&str] = &["critical", "high", "medium", "low"];

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// At least 8 characters with an uppercase letter, a lowercase letter and a digit.
pub fn validate_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

pub fn sanitize_input(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(MAX_INPUT_LENGTH)
        .collect()
}

/// Account details submitted when connecting a password-based mailbox.
#[derive(Debug, Default, Deserialize)]
pub struct AccountInput {
    pub provider: Option<String>,
    pub email_address: Option<String>,
    pub password: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
}

pub fn validate_email_account(input: &AccountInput) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let provider = input.provider.as_deref().unwrap_or("").trim();
    if !PROVIDERS.contains(&provider) {
        errors.push(FieldError::new("provider", "Invalid provider"));
    }

    match input.email_address.as_deref() {
        Some(email) if is_valid_email(email.trim()) => {}
        _ => errors.push(FieldError::new("email_address", "Valid email is required")),
    }

    if input.password.as_deref().map(str::is_empty).unwrap_or(true) {
        errors.push(FieldError::new(
            "password",
            "Password is required for IMAP accounts",
        ));
    }

    if provider == "custom" {
        if input.imap_host.as_deref().map(str::trim).unwrap_or("").is_empty() {
            errors.push(FieldError::new(
                "imap_host",
                "IMAP host is required for custom provider",
            ));
        }
        if input.smtp_host.as_deref().map(str::trim).unwrap_or("").is_empty() {
            errors.push(FieldError::new(
                "smtp_host",
                "SMTP host is required for custom provider",
            ));
        }
    }

    errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn from_query(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        Self {
            page,
            limit,
            offset: (page - 1) * limit,
        }
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        (total + self.limit - 1) / self.limit
    }
}
