//! Persistence seams. `PgStore` backs production, `MemoryStore` backs tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    Device, Notification, NotificationPreferences, NotificationSettings, NotificationStatus, Page,
    Recipient,
};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Notification>>;

    /// Takes the dispatch lease on `id` until `lease_until`, provided the
    /// version still equals `expected_version` and no other lease is live at
    /// `now`. Bumps the version and returns the claimed record. `None` means
    /// another worker holds it.
    async fn claim(
        &self,
        id: &str,
        expected_version: i64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Notification>>;

    /// Writes every mutable field, the lease included, if the stored version
    /// equals `notification.version`; the stored version is then incremented.
    /// Returns false on a lost update.
    async fn save(&self, notification: &Notification) -> Result<bool>;

    /// Newest first.
    async fn list_for_recipient(&self, recipient_id: &str, page: u32, size: u32) -> Result<Page<Notification>>;

    async fn list_by_status(&self, recipient_id: &str, status: NotificationStatus) -> Result<Vec<Notification>>;

    async fn count_by_status(&self, recipient_id: &str, status: NotificationStatus) -> Result<u64>;

    /// Moves every SENT notification of the recipient to READ.
    async fn mark_all_read(&self, recipient_id: &str, now: DateTime<Utc>) -> Result<u64>;

    /// PENDING, scheduled and due, highest priority first.
    async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;

    /// PENDING, unscheduled, with channels, created before `cutoff`: records
    /// whose delivery job never arrived. Oldest first.
    async fn stalled_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;

    /// ERROR with fewer than `max_attempts` retries.
    async fn retryable_errors(&self, max_attempts: i32, limit: i64) -> Result<Vec<Notification>>;

    /// Deletes READ notifications created before `cutoff`.
    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<NotificationPreferences>>;
    async fn upsert_preferences(&self, preferences: &NotificationPreferences) -> Result<()>;
    async fn delete_preferences(&self, user_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> Result<Option<NotificationSettings>>;
    async fn save_settings(&self, settings: &NotificationSettings) -> Result<()>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<Device>>;

    /// Inserts, or replaces the record holding the same token.
    async fn upsert_device(&self, device: &Device) -> Result<()>;

    async fn list_for_user(&self, user_id: &str, active_only: bool) -> Result<Vec<Device>>;

    /// Returns false when no device holds the token.
    async fn set_active(&self, token: &str, active: bool) -> Result<bool>;
}

/// Read-only view of the user directory.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn find_recipient(&self, user_id: &str) -> Result<Option<Recipient>>;
}
