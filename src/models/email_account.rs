use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailAccount {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub email_address: String,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<i64>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i64>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password_encrypted: Option<String>,
    pub sync_enabled: bool,
    pub sync_frequency_minutes: i64,
    pub last_sync_at: Option<String>,
    pub connection_status: String,
    pub error_message: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl EmailAccount {
    pub fn provider_kind(&self) -> Option<Provider> {
        self.provider.parse().ok()
    }

    /// OAuth-connected Gmail and Outlook accounts talk to the vendor APIs;
    /// everything holding a password goes through IMAP and SMTP.
    pub fn uses_oauth(&self) -> bool {
        self.password_encrypted.is_none()
            && self.access_token.is_some()
            && matches!(
                self.provider_kind(),
                Some(Provider::Gmail) | Some(Provider::Outlook)
            )
    }

    /// Login name for IMAP and SMTP, falling back to the address.
    pub fn login_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.email_address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gmail,
    Outlook,
    ICloud,
    Yahoo,
    Spacemail,
    Custom,
}

/// Server endpoints for a password-based mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Outlook => "outlook",
            Provider::ICloud => "icloud",
            Provider::Yahoo => "yahoo",
            Provider::Spacemail => "spacemail",
            Provider::Custom => "custom",
        }
    }

    /// Preset IMAP/SMTP endpoints. `Custom` has none.
    pub fn preset(&self) -> Option<ProviderSettings> {
        let (imap_host, imap_port, smtp_host, smtp_port) = match self {
            Provider::Gmail => ("imap.gmail.com", 993, "smtp.gmail.com", 587),
            Provider::Outlook => ("outlook.office365.com", 993, "smtp.office365.com", 587),
            Provider::ICloud => ("imap.mail.me.com", 993, "smtp.mail.me.com", 587),
            Provider::Yahoo => ("imap.mail.yahoo.com", 993, "smtp.mail.yahoo.com", 587),
            Provider::Spacemail => ("mail.spacemail.com", 993, "mail.spacemail.com", 465),
            Provider::Custom => return None,
        };
        Some(ProviderSettings {
            imap_host: imap_host.to_string(),
            imap_port,
            smtp_host: smtp_host.to_string(),
            smtp_port,
        })
    }

    /// Display label used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Gmail => "Gmail",
            Provider::Outlook => "Outlook",
            Provider::ICloud => "iCloud",
            Provider::Yahoo => "Yahoo",
            Provider::Spacemail => "Spacemail",
            Provider::Custom => "Custom",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Provider::Gmail),
            "outlook" => Ok(Provider::Outlook),
            "icloud" => Ok(Provider::ICloud),
            "yahoo" => Ok(Provider::Yahoo),
            "spacemail" => Ok(Provider::Spacemail),
            "custom" => Ok(Provider::Custom),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("Gmail".parse::<Provider>().unwrap(), Provider::Gmail);
        assert_eq!(" icloud ".parse::<Provider>().unwrap(), Provider::ICloud);
        assert!("aol".parse::<Provider>().is_err());
        assert_eq!(Provider::Spacemail.to_string(), "spacemail");
    }

    #[test]
    fn test_presets() {
        let spacemail = Provider::Spacemail.preset().unwrap();
        assert_eq!(spacemail.smtp_port, 465);
        assert_eq!(spacemail.imap_host, "mail.spacemail.com");

        let outlook = Provider::Outlook.preset().unwrap();
        assert_eq!(outlook.imap_host, "outlook.office365.com");
        assert_eq!(outlook.smtp_host, "smtp.office365.com");

        assert!(Provider::Custom.preset().is_none());
    }
}
