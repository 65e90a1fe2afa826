use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{types::Json, FromRow};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub settings: Json<Value>,
    pub is_active: bool,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Reads the typed view of the stored settings object.
    pub fn preferences(&self) -> UserSettings {
        UserSettings::from_value(&self.settings.0)
    }
}

/// Known preference flags. Unknown keys stay in the stored JSON untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSettings {
    pub email_notifications: bool,
    pub auto_analyze: bool,
    pub auto_draft: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            email_notifications: true,
            auto_analyze: true,
            auto_draft: false,
        }
    }
}

impl UserSettings {
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            value.get(key).and_then(Value::as_bool).unwrap_or(default)
        };
        Self {
            email_notifications: flag("emailNotifications", defaults.email_notifications),
            auto_analyze: flag("autoAnalyze", defaults.auto_analyze),
            auto_draft: flag("autoDraft", defaults.auto_draft),
        }
    }

    pub fn to_value(self) -> Value {
        json!({
            "emailNotifications": self.email_notifications,
            "autoAnalyze": self.auto_analyze,
            "autoDraft": self.auto_draft,
        })
    }
}

/// Shallow merge: top-level keys in `patch` replace those in `current`.
pub fn merge_settings(current: &Value, patch: &Map<String, Value>) -> Value {
    let mut merged = current.as_object().cloned().unwrap_or_default();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_for_missing_keys() {
        let settings = UserSettings::from_value(&json!({ "autoDraft": true }));
        assert!(settings.email_notifications);
        assert!(settings.auto_analyze);
        assert!(settings.auto_draft);
        assert_eq!(UserSettings::from_value(&json!(null)), UserSettings::default());
    }

    #[test]
    fn test_merge_settings_is_shallow() {
        let current = json!({ "autoAnalyze": true, "theme": { "mode": "dark" } });
        let patch = json!({ "autoAnalyze": false, "theme": { "accent": "blue" } });
        let merged = merge_settings(&current, patch.as_object().unwrap());
        assert_eq!(merged["autoAnalyze"], false);
        assert_eq!(merged["theme"], json!({ "accent": "blue" }));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            id: 1,
            email: "a@example.com".into(),
            password_hash: "secret-hash".into(),
            full_name: None,
            settings: Json(UserSettings::default().to_value()),
            is_active: true,
            last_login: None,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        };
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["settings"]["emailNotifications"], true);
    }
}
