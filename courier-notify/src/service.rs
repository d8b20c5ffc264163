use chrono::{Local, NaiveDateTime, Utc};
use courier_core::error::{CourierError, Result};
use courier_core::model::{
    Device, Notification, NotificationPreferences, NotificationRequest, NotificationStatus,
    NotificationSummary, Page,
};
use courier_core::store::{NotificationStore, PreferenceStore, RecipientDirectory};
use courier_delivery::{DeliveryJobs, DeviceRegistry};
use std::sync::Arc;
use tracing;

use crate::eligibility::{evaluate, Decision};

const MAX_PAGE_SIZE: u32 = 100;

/// Wall clock used for the preference time gates.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

/// Producer, recipient and preferences APIs.
pub struct NotificationService {
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferenceStore>,
    recipients: Arc<dyn RecipientDirectory>,
    devices: DeviceRegistry,
    jobs: Arc<dyn DeliveryJobs>,
    clock: Clock,
}

impl NotificationService {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceStore>,
        recipients: Arc<dyn RecipientDirectory>,
        devices: DeviceRegistry,
        jobs: Arc<dyn DeliveryJobs>,
    ) -> Self {
        Self {
            notifications,
            preferences,
            recipients,
            devices,
            jobs,
            clock: local_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the eligibility gates and persists an approved notification.
    /// `None` means the recipient's preferences suppressed it.
    pub async fn create_notification(&self, request: NotificationRequest) -> Result<Option<NotificationSummary>> {
        request.validate()?;
        let recipient = self
            .recipients
            .find_recipient(&request.recipient_id)
            .await?
            .ok_or_else(|| {
                CourierError::Validation(format!("unknown recipient {}", request.recipient_id))
            })?;

        let prefs = self.get_preferences(&recipient.id).await?;
        let channels = match evaluate(&request, &prefs, (self.clock)()) {
            Decision::Deliver { channels } => channels,
            Decision::Suppress(reason) => {
                tracing::info!(
                    recipient_id = %recipient.id,
                    notification_type = %request.notification_type,
                    %reason,
                    "Notification suppressed"
                );
                return Ok(None);
            }
        };

        let now = Utc::now();
        let notification = Notification::from_request(request, &recipient, channels, now);
        self.notifications.insert(&notification).await?;
        tracing::info!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            channels = ?notification.channels,
            "Notification created"
        );

        if notification.channels.is_empty() {
            tracing::debug!(notification_id = %notification.id, "No channels resolved, nothing to deliver");
        } else if notification.is_due(now) {
            // Already persisted; the scheduler recovers it once it stalls.
            if let Err(e) = self.jobs.enqueue(&notification.id).await {
                tracing::error!(notification_id = %notification.id, "Failed to enqueue delivery: {}", e);
            }
        }

        Ok(Some(notification.summary()))
    }

    /// Newest first. `page` is zero-based.
    pub async fn list_for_user(&self, user_id: &str, page: u32, size: u32) -> Result<Page<NotificationSummary>> {
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let page = self.notifications.list_for_recipient(user_id, page, size).await?;
        Ok(page.map(|n| n.summary()))
    }

    /// Delivered but not yet read.
    pub async fn list_unread(&self, user_id: &str) -> Result<Vec<NotificationSummary>> {
        let unread = self
            .notifications
            .list_by_status(user_id, NotificationStatus::Sent)
            .await?;
        Ok(unread.iter().map(Notification::summary).collect())
    }

    pub async fn count_unread(&self, user_id: &str) -> Result<u64> {
        self.notifications
            .count_by_status(user_id, NotificationStatus::Sent)
            .await
    }

    /// Only the recipient may mark a notification read. Marking twice is a no-op.
    pub async fn mark_as_read(&self, notification_id: &str, user_id: &str) -> Result<NotificationSummary> {
        let mut notification = self.owned(notification_id, user_id).await?;
        if !notification.mark_read(Utc::now()) {
            return Ok(notification.summary());
        }

        if self.notifications.save(&notification).await? {
            return Ok(notification.summary());
        }

        // Lost the race with a dispatcher or another read; accept if the winner was a read.
        let current = self.owned(notification_id, user_id).await?;
        if current.status == NotificationStatus::Read {
            return Ok(current.summary());
        }
        let mut retry = current;
        retry.mark_read(Utc::now());
        if self.notifications.save(&retry).await? {
            Ok(retry.summary())
        } else {
            Err(CourierError::Conflict {
                entity: "notification",
                id: notification_id.to_string(),
            })
        }
    }

    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<u64> {
        let count = self.notifications.mark_all_read(user_id, Utc::now()).await?;
        tracing::debug!(user_id, count, "Marked notifications read");
        Ok(count)
    }

    async fn owned(&self, notification_id: &str, user_id: &str) -> Result<Notification> {
        let notification = self
            .notifications
            .get(notification_id)
            .await?
            .ok_or_else(|| CourierError::not_found("notification", notification_id))?;
        if notification.recipient_id != user_id {
            return Err(CourierError::Authorization(format!(
                "notification {} belongs to another user",
                notification_id
            )));
        }
        Ok(notification)
    }

    /// Creates and stores the defaults on first access.
    pub async fn get_preferences(&self, user_id: &str) -> Result<NotificationPreferences> {
        if let Some(prefs) = self.preferences.get_preferences(user_id).await? {
            return Ok(prefs);
        }
        let prefs = NotificationPreferences::defaults(user_id);
        self.preferences.upsert_preferences(&prefs).await?;
        tracing::debug!(user_id, "Created default preferences");
        Ok(prefs)
    }

    pub async fn update_preferences(
        &self,
        user_id: &str,
        mut prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences> {
        if prefs.enabled_weekdays.iter().any(|d| !(1..=7).contains(d)) {
            return Err(CourierError::Validation("weekdays must be between 1 and 7".into()));
        }
        if prefs.group_interval_minutes < 0 {
            return Err(CourierError::Validation("group interval must not be negative".into()));
        }
        prefs.user_id = user_id.to_string();
        prefs.updated_at = Utc::now();
        self.preferences.upsert_preferences(&prefs).await?;
        Ok(prefs)
    }

    /// Returns false when the user had no stored preferences.
    pub async fn delete_preferences(&self, user_id: &str) -> Result<bool> {
        self.preferences.delete_preferences(user_id).await
    }

    pub async fn register_device(
        &self,
        user_id: &str,
        token: &str,
        platform: &str,
        model: Option<&str>,
        app_version: Option<&str>,
    ) -> Result<Device> {
        self.devices
            .register_device(user_id, token, platform, model, app_version)
            .await
    }

    pub async fn deactivate_device(&self, user_id: &str, token: &str) -> Result<()> {
        self.devices.deactivate_device(user_id, token).await
    }

    pub async fn list_active_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        self.devices.list_active_tokens(user_id).await
    }

    pub async fn list_user_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        self.devices.list_user_devices(user_id).await
    }
}
