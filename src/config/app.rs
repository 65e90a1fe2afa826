use std::env;
use std::str::FromStr;

use chrono::Duration;
use tracing::warn;

const DEV_JWT_SECRET: &str = "mailpilot-development-jwt-secret-not-for-production";
const DEV_ENCRYPTION_KEY: &str = "mailpilot-development-encryption-key-0000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),
    #[error("{0} is too short (minimum {1} bytes)")]
    TooShort(&'static str, usize),
    #[error("{0} appears to be a default value")]
    Placeholder(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Clone)]
pub struct ClaudeConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub api_url: String,
}

#[derive(Clone)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub gmail_api_base: String,
}

#[derive(Clone)]
pub struct MicrosoftConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub tenant_id: String,
    pub login_base: String,
    pub graph_base: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_emails_per_sync: u32,
    pub lookback_days: i64,
    /// Zero disables the background sync loop.
    pub auto_sync_interval_secs: u64,
}

/// Runtime configuration, read once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub environment: String,
    pub app_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub encryption_key: String,
    pub rate_limit_window: std::time::Duration,
    pub rate_limit_max_requests: u32,
    pub default_monthly_budget_cents: i64,
    pub claude: ClaudeConfig,
    pub google: GoogleConfig,
    pub microsoft: MicrosoftConfig,
    pub sync: SyncConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("app_url", &self.app_url)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_expires_in", &self.jwt_expires_in)
            .field("encryption_key", &"[REDACTED]")
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field(
                "default_monthly_budget_cents",
                &self.default_monthly_budget_cents,
            )
            .field("claude_model", &self.claude.model)
            .field("sync", &self.sync)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            app_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expires_in: Duration::days(7),
            encryption_key: DEV_ENCRYPTION_KEY.to_string(),
            rate_limit_window: std::time::Duration::from_millis(900_000),
            rate_limit_max_requests: 100,
            default_monthly_budget_cents: 1000,
            claude: ClaudeConfig {
                api_key: None,
                model: "claude-sonnet-4-5".to_string(),
                max_tokens: 4096,
                api_url: "https://api.anthropic.com".to_string(),
            },
            google: GoogleConfig {
                client_id: None,
                client_secret: None,
                redirect_uri: "http://localhost:8080/api/email/connect/gmail-callback".to_string(),
                auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                gmail_api_base: "https://gmail.googleapis.com".to_string(),
            },
            microsoft: MicrosoftConfig {
                client_id: None,
                client_secret: None,
                redirect_uri: "http://localhost:8080/api/email/connect/outlook-callback"
                    .to_string(),
                tenant_id: "common".to_string(),
                login_base: "https://login.microsoftonline.com".to_string(),
                graph_base: "https://graph.microsoft.com/v1.0".to_string(),
            },
            sync: SyncConfig {
                max_emails_per_sync: 100,
                lookback_days: 7,
                auto_sync_interval_secs: 0,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("JWT_SECRET not set, using development secret (INSECURE!)");
                defaults.jwt_secret.clone()
            }
        };

        let encryption_key = match env::var("ENCRYPTION_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                warn!("ENCRYPTION_KEY not set, using development key (INSECURE!)");
                defaults.encryption_key.clone()
            }
        };

        let jwt_expires_in = match env::var("JWT_EXPIRES_IN") {
            Ok(raw) => parse_duration(&raw)
                .ok_or_else(|| ConfigError::Invalid("JWT_EXPIRES_IN", raw.clone()))?,
            Err(_) => defaults.jwt_expires_in,
        };

        let window_ms: u64 = env_parse("RATE_LIMIT_WINDOW_MS", 900_000)?;

        Ok(Self {
            environment: env_or("ENVIRONMENT", &defaults.environment),
            app_url: env_opt("APP_URL"),
            jwt_secret,
            jwt_expires_in,
            encryption_key,
            rate_limit_window: std::time::Duration::from_millis(window_ms),
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 100)?,
            default_monthly_budget_cents: env_parse("DEFAULT_MONTHLY_BUDGET_CENTS", 1000)?,
            claude: ClaudeConfig {
                api_key: env_opt("ANTHROPIC_API_KEY"),
                model: env_or("CLAUDE_MODEL", &defaults.claude.model),
                max_tokens: env_parse("CLAUDE_MAX_TOKENS", defaults.claude.max_tokens)?,
                api_url: env_or("ANTHROPIC_API_URL", &defaults.claude.api_url),
            },
            google: GoogleConfig {
                client_id: env_opt("GOOGLE_CLIENT_ID"),
                client_secret: env_opt("GOOGLE_CLIENT_SECRET"),
                redirect_uri: env_or("GOOGLE_REDIRECT_URI", &defaults.google.redirect_uri),
                auth_url: env_or("GOOGLE_AUTH_URL", &defaults.google.auth_url),
                token_url: env_or("GOOGLE_TOKEN_URL", &defaults.google.token_url),
                gmail_api_base: env_or("GMAIL_API_BASE", &defaults.google.gmail_api_base),
            },
            microsoft: MicrosoftConfig {
                client_id: env_opt("MICROSOFT_CLIENT_ID"),
                client_secret: env_opt("MICROSOFT_CLIENT_SECRET"),
                redirect_uri: env_or("MICROSOFT_REDIRECT_URI", &defaults.microsoft.redirect_uri),
                tenant_id: env_or("MICROSOFT_TENANT_ID", &defaults.microsoft.tenant_id),
                login_base: env_or("MICROSOFT_LOGIN_BASE", &defaults.microsoft.login_base),
                graph_base: env_or("MICROSOFT_GRAPH_BASE", &defaults.microsoft.graph_base),
            },
            sync: SyncConfig {
                max_emails_per_sync: env_parse("MAX_EMAILS_PER_SYNC", 100)?,
                lookback_days: env_parse("SYNC_LOOKBACK_DAYS", 7)?,
                auto_sync_interval_secs: env_parse("AUTO_SYNC_INTERVAL_SECS", 0)?,
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Refuses weak or missing secrets when running in production.
pub fn validate_production_config(config: &AppConfig) -> Result<(), ConfigError> {
    if !config.is_production() {
        return Ok(());
    }

    if config.jwt_secret == DEV_JWT_SECRET {
        return Err(ConfigError::Missing("JWT_SECRET"));
    }
    if config.jwt_secret.len() < 32 {
        return Err(ConfigError::TooShort("JWT_SECRET", 32));
    }
    let lowered = config.jwt_secret.to_ascii_lowercase();
    if lowered.contains("example") || lowered.contains("changeme") || lowered.contains("default") {
        return Err(ConfigError::Placeholder("JWT_SECRET"));
    }

    if config.encryption_key == DEV_ENCRYPTION_KEY {
        return Err(ConfigError::Missing("ENCRYPTION_KEY"));
    }

    Ok(())
}

/// Parses `30s`, `15m`, `24h`, `7d` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], Some(c)),
        _ => (raw, None),
    };

    let value: i64 = digits.trim().parse().ok()?;
    if value <= 0 {
        return None;
    }

    match unit {
        None | Some('s') => Some(Duration::seconds(value)),
        Some('m') => Some(Duration::minutes(value)),
        Some('h') => Some(Duration::hours(value)),
        Some('d') => Some(Duration::days(value)),
        _ => None,
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw.clone())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("7d"), Some(Duration::days(7)));
        assert_eq!(parse_duration("24h"), Some(Duration::hours(24)));
        assert_eq!(parse_duration("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_duration("45s"), Some(Duration::seconds(45)));
        assert_eq!(parse_duration("3600"), Some(Duration::seconds(3600)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("5w"), None);
        assert_eq!(parse_duration("0d"), None);
    }

    #[test]
    fn test_development_config_skips_validation() {
        let config = AppConfig::default();
        assert!(validate_production_config(&config).is_ok());
    }

    #[test]
    fn test_production_rejects_development_secrets() {
        let config = AppConfig {
            environment: "production".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            validate_production_config(&config),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));

        let config = AppConfig {
            environment: "production".to_string(),
            jwt_secret: "changeme-changeme-changeme-changeme-1234".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            validate_production_config(&config),
            Err(ConfigError::Placeholder("JWT_SECRET"))
        ));

        let config = AppConfig {
            environment: "production".to_string(),
            jwt_secret: "k3J9s8d7f6g5h4j3k2l1q0w9e8r7t6y5u4i3".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            validate_production_config(&config),
            Err(ConfigError::Missing("ENCRYPTION_KEY"))
        ));
    }

    const ENV_KEYS: &[&str] = &[
        "JWT_EXPIRES_IN",
        "RATE_LIMIT_MAX_REQUESTS",
        "DEFAULT_MONTHLY_BUDGET_CENTS",
        "ANTHROPIC_API_KEY",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_reads_overrides() {
        clear_env();
        env::set_var("JWT_EXPIRES_IN", "12h");
        env::set_var("RATE_LIMIT_MAX_REQUESTS", "5");
        env::set_var("DEFAULT_MONTHLY_BUDGET_CENTS", "2500");
        env::set_var("ANTHROPIC_API_KEY", "sk-test");

        let config = AppConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.jwt_expires_in, Duration::hours(12));
        assert_eq!(config.rate_limit_max_requests, 5);
        assert_eq!(config.default_monthly_budget_cents, 2500);
        assert_eq!(config.claude.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_rejects_bad_numbers() {
        clear_env();
        env::set_var("RATE_LIMIT_MAX_REQUESTS", "lots");
        let result = AppConfig::from_env();
        clear_env();

        assert!(result.is_err());

        env::set_var("JWT_EXPIRES_IN", "forever");
        let result = AppConfig::from_env();
        clear_env();

        assert!(matches!(
            result,
            Err(ConfigError::Invalid("JWT_EXPIRES_IN", _))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = AppConfig::default();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(DEV_JWT_SECRET));
        assert!(!rendered.contains(DEV_ENCRYPTION_KEY));
        assert!(rendered.contains("[REDACTED]"));
    }
}
