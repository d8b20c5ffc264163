use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::NotificationType;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub auth: bool,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Process-wide notification settings, stored as a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    #[serde(default)]
    pub smtp: SmtpSettings,
    pub push_provider_key: Option<String>,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub system_enabled: bool,
    pub whatsapp_enabled: bool,
    pub max_retry_attempts: i32,
    pub retry_interval_minutes: i64,
    pub max_notifications_per_hour: u32,
    #[serde(default)]
    pub email_templates: BTreeMap<NotificationType, String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            sender_email: None,
            sender_name: None,
            smtp: SmtpSettings {
                port: 587,
                tls: true,
                ..SmtpSettings::default()
            },
            push_provider_key: None,
            email_enabled: true,
            push_enabled: true,
            system_enabled: true,
            whatsapp_enabled: false,
            max_retry_attempts: 3,
            retry_interval_minutes: 5,
            max_notifications_per_hour: 100,
            email_templates: BTreeMap::new(),
        }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.trim().is_empty())
}

impl NotificationSettings {
    /// Email half of the validity check: SMTP host and sender address set.
    pub fn email_ready(&self) -> bool {
        present(&self.sender_email) && present(&self.smtp.host)
    }

    pub fn push_ready(&self) -> bool {
        present(&self.push_provider_key)
    }

    pub fn is_valid(&self) -> bool {
        (!self.email_enabled || self.email_ready()) && (!self.push_enabled || self.push_ready())
    }
}
