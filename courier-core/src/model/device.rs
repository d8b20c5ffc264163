use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A push-capable device registered by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub platform: String,
    pub model: Option<String>,
    pub app_version: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub active: bool,
}

impl Device {
    pub fn is_ios(&self) -> bool {
        self.platform.eq_ignore_ascii_case("ios")
    }
}
