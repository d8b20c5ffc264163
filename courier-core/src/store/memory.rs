use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{DeviceStore, NotificationStore, PreferenceStore, RecipientDirectory, SettingsStore};
use crate::error::{CourierError, Result};
use crate::model::{
    Device, Notification, NotificationPreferences, NotificationSettings, NotificationStatus, Page,
    Recipient,
};

#[derive(Default)]
struct State {
    notifications: HashMap<String, Notification>,
    preferences: HashMap<String, NotificationPreferences>,
    settings: Option<NotificationSettings>,
    devices: HashMap<String, Device>,
    recipients: HashMap<String, Recipient>,
}

/// In-process store implementing every store trait.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recipient(&self, recipient: Recipient) {
        if let Ok(mut state) = self.state.lock() {
            state.recipients.insert(recipient.id.clone(), recipient);
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CourierError::Storage("memory store poisoned".into()))?;
        Ok(f(&mut state))
    }
}

fn of_recipient<'a>(
    state: &'a State,
    recipient_id: &'a str,
) -> impl Iterator<Item = &'a Notification> + 'a {
    state
        .notifications
        .values()
        .filter(move |n| n.recipient_id == recipient_id)
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.with(|s| {
            s.notifications
                .insert(notification.id.clone(), notification.clone());
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        self.with(|s| s.notifications.get(id).cloned())
    }

    async fn claim(
        &self,
        id: &str,
        expected_version: i64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        self.with(|s| match s.notifications.get_mut(id) {
            Some(n) if n.version == expected_version && !n.is_in_flight(now) => {
                n.dispatching_until = Some(lease_until);
                n.version += 1;
                Some(n.clone())
            }
            _ => None,
        })
    }

    async fn save(&self, notification: &Notification) -> Result<bool> {
        self.with(|s| match s.notifications.get_mut(&notification.id) {
            Some(stored) if stored.version == notification.version => {
                *stored = notification.clone();
                stored.version += 1;
                true
            }
            _ => false,
        })
    }

    async fn list_for_recipient(&self, recipient_id: &str, page: u32, size: u32) -> Result<Page<Notification>> {
        self.with(|s| {
            let mut all: Vec<Notification> = of_recipient(s, recipient_id).cloned().collect();
            all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = all.len() as u64;
            let items = all
                .into_iter()
                .skip(page as usize * size as usize)
                .take(size as usize)
                .collect();
            Page {
                items,
                page,
                size,
                total,
            }
        })
    }

    async fn list_by_status(&self, recipient_id: &str, status: NotificationStatus) -> Result<Vec<Notification>> {
        self.with(|s| {
            let mut found: Vec<Notification> = of_recipient(s, recipient_id)
                .filter(|n| n.status == status)
                .cloned()
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            found
        })
    }

    async fn count_by_status(&self, recipient_id: &str, status: NotificationStatus) -> Result<u64> {
        self.with(|s| {
            of_recipient(s, recipient_id)
                .filter(|n| n.status == status)
                .count() as u64
        })
    }

    async fn mark_all_read(&self, recipient_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.with(|s| {
            let mut count = 0;
            for n in s.notifications.values_mut() {
                if n.recipient_id == recipient_id && n.status == NotificationStatus::Sent {
                    n.mark_read(now);
                    n.version += 1;
                    count += 1;
                }
            }
            count
        })
    }

    async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        self.with(|s| {
            let mut due: Vec<Notification> = s
                .notifications
                .values()
                .filter(|n| {
                    n.status == NotificationStatus::Pending
                        && n.scheduled
                        && n.scheduled_at.map_or(false, |at| at <= now)
                })
                .cloned()
                .collect();
            due.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
            due.truncate(limit.max(0) as usize);
            due
        })
    }

    async fn stalled_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        self.with(|s| {
            let mut stalled: Vec<Notification> = s
                .notifications
                .values()
                .filter(|n| {
                    n.status == NotificationStatus::Pending
                        && !n.scheduled
                        && !n.channels.is_empty()
                        && n.created_at < cutoff
                })
                .cloned()
                .collect();
            stalled.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            stalled.truncate(limit.max(0) as usize);
            stalled
        })
    }

    async fn retryable_errors(&self, max_attempts: i32, limit: i64) -> Result<Vec<Notification>> {
        self.with(|s| {
            let mut failed: Vec<Notification> = s
                .notifications
                .values()
                .filter(|n| n.status == NotificationStatus::Error && n.retry_count < max_attempts)
                .cloned()
                .collect();
            failed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            failed.truncate(limit.max(0) as usize);
            failed
        })
    }

    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.with(|s| {
            let before = s.notifications.len();
            s.notifications
                .retain(|_, n| !(n.status == NotificationStatus::Read && n.created_at < cutoff));
            (before - s.notifications.len()) as u64
        })
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<NotificationPreferences>> {
        self.with(|s| s.preferences.get(user_id).cloned())
    }

    async fn upsert_preferences(&self, preferences: &NotificationPreferences) -> Result<()> {
        self.with(|s| {
            s.preferences
                .insert(preferences.user_id.clone(), preferences.clone());
        })
    }

    async fn delete_preferences(&self, user_id: &str) -> Result<bool> {
        self.with(|s| s.preferences.remove(user_id).is_some())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load_settings(&self) -> Result<Option<NotificationSettings>> {
        self.with(|s| s.settings.clone())
    }

    async fn save_settings(&self, settings: &NotificationSettings) -> Result<()> {
        self.with(|s| s.settings = Some(settings.clone()))
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<Device>> {
        self.with(|s| s.devices.get(token).cloned())
    }

    async fn upsert_device(&self, device: &Device) -> Result<()> {
        self.with(|s| {
            s.devices.insert(device.token.clone(), device.clone());
        })
    }

    async fn list_for_user(&self, user_id: &str, active_only: bool) -> Result<Vec<Device>> {
        self.with(|s| {
            let mut devices: Vec<Device> = s
                .devices
                .values()
                .filter(|d| d.user_id == user_id && (!active_only || d.active))
                .cloned()
                .collect();
            devices.sort_by(|a, b| b.last_access_at.cmp(&a.last_access_at));
            devices
        })
    }

    async fn set_active(&self, token: &str, active: bool) -> Result<bool> {
        self.with(|s| match s.devices.get_mut(token) {
            Some(device) => {
                device.active = active;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl RecipientDirectory for MemoryStore {
    async fn find_recipient(&self, user_id: &str) -> Result<Option<Recipient>> {
        self.with(|s| s.recipients.get(user_id).cloned())
    }
}
