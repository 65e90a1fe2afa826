pub mod app;

pub use app::{
    parse_duration, validate_production_config, AppConfig, ClaudeConfig, ConfigError,
    GoogleConfig, MicrosoftConfig, SyncConfig,
};
