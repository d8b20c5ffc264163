use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courier_core::config::SchedulerConfig;
use courier_core::store::{NotificationStore, SettingsStore};
use courier_core::SettingsHandle;
use courier_delivery::Dispatcher;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing;

const BATCH_SIZE: i64 = 100;

/// Periodic jobs over the notification table.
pub struct Scheduler {
    notifications: Arc<dyn NotificationStore>,
    settings_store: Arc<dyn SettingsStore>,
    settings: SettingsHandle,
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        settings_store: Arc<dyn SettingsStore>,
        settings: SettingsHandle,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            notifications,
            settings_store,
            settings,
            dispatcher,
            config,
        }
    }

    /// Dispatches scheduled notifications whose time has come, highest priority first.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.notifications.due_scheduled(now, BATCH_SIZE).await?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::debug!("Found {} due scheduled notifications", due.len());
        Ok(self.dispatch_all(due.iter().map(|n| n.id.as_str())).await)
    }

    /// Dispatches PENDING records whose delivery job never arrived: the
    /// enqueue failed, or the job was dead-lettered before a dispatch.
    pub async fn recover_stalled(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - ChronoDuration::seconds(self.config.stalled_after_secs);
        let stalled = self.notifications.stalled_pending(cutoff, BATCH_SIZE).await?;
        if stalled.is_empty() {
            return Ok(0);
        }
        tracing::warn!(%cutoff, "Recovering {} stalled pending notifications", stalled.len());
        Ok(self.dispatch_all(stalled.iter().map(|n| n.id.as_str())).await)
    }

    /// Re-attempts ERROR notifications below the retry cap.
    pub async fn reprocess_errors(&self) -> Result<usize> {
        let Some(settings) = self.settings.current() else {
            tracing::warn!("Notification settings missing, skipping error reprocessing");
            return Ok(0);
        };
        let failed = self
            .notifications
            .retryable_errors(settings.max_retry_attempts, BATCH_SIZE)
            .await?;
        if failed.is_empty() {
            return Ok(0);
        }
        tracing::info!("Reprocessing {} failed notifications", failed.len());
        Ok(self.dispatch_all(failed.iter().map(|n| n.id.as_str())).await)
    }

    /// Deletes READ notifications older than the retention window.
    pub async fn retention_sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - ChronoDuration::days(self.config.retention_days);
        let deleted = self.notifications.delete_read_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!(%cutoff, "Deleted {} read notifications", deleted);
        }
        Ok(deleted)
    }

    pub async fn reload_settings(&self) -> Result<()> {
        self.settings.reload(self.settings_store.as_ref()).await?;
        Ok(())
    }

    /// Returns how many dispatches completed without error.
    async fn dispatch_all<'a>(&self, ids: impl Iterator<Item = &'a str>) -> usize {
        let mut dispatched = 0;
        for id in ids {
            match self.dispatcher.dispatch(id).await {
                Ok(outcome) => {
                    tracing::debug!(notification_id = id, ?outcome, "Scheduled dispatch finished");
                    dispatched += 1;
                }
                Err(e) => tracing::warn!(notification_id = id, "Scheduled dispatch failed: {}", e),
            }
        }
        dispatched
    }
}

async fn every<F, Fut>(name: &str, interval: Duration, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tracing::info!(job = name, interval_secs = interval.as_secs(), "Starting scheduler loop");
    loop {
        if let Err(e) = job().await {
            tracing::error!(job = name, "Error in scheduler job: {}", e);
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn run(scheduler: Arc<Scheduler>) -> Result<()> {
    tracing::info!("Starting notification scheduler");
    let s: &Scheduler = &scheduler;
    let config = &s.config;

    tokio::join!(
        every("promote_due", Duration::from_secs(config.promote_interval_secs), move || async move {
            let now = Utc::now();
            s.promote_due(now).await?;
            s.recover_stalled(now).await.map(|_| ())
        }),
        every("reprocess_errors", Duration::from_secs(config.reprocess_interval_secs), move || async move {
            s.reprocess_errors().await.map(|_| ())
        }),
        every("retention_sweep", Duration::from_secs(config.retention_interval_secs), move || async move {
            s.retention_sweep(Utc::now()).await.map(|_| ())
        }),
        every("reload_settings", Duration::from_secs(config.settings_reload_secs), move || async move {
            s.reload_settings().await
        }),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::model::{
        Channel, Notification, NotificationRequest, NotificationSettings, NotificationStatus,
        NotificationType, Priority, Recipient,
    };
    use courier_core::store::MemoryStore;
    use courier_core::MemoryRateLimiter;
    use courier_delivery::{ChannelError, ChannelSender};

    struct AlwaysFails;

    #[async_trait]
    impl ChannelSender for AlwaysFails {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _notification: &Notification) -> std::result::Result<(), ChannelError> {
            Err(ChannelError::Transport("smtp unreachable".into()))
        }
    }

    struct Succeeds;

    #[async_trait]
    impl ChannelSender for Succeeds {
        fn channel(&self) -> Channel {
            Channel::System
        }

        async fn send(&self, _notification: &Notification) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            promote_interval_secs: 60,
            stalled_after_secs: 300,
            reprocess_interval_secs: 300,
            retention_interval_secs: 86_400,
            retention_days: 90,
            settings_reload_secs: 60,
        }
    }

    fn scheduler(store: Arc<MemoryStore>, settings: Option<NotificationSettings>) -> Scheduler {
        let handle = SettingsHandle::new(settings);
        let dispatcher = Dispatcher::new(
            store.clone(),
            handle.clone(),
            Arc::new(MemoryRateLimiter::new()),
            std::time::Duration::from_secs(5),
        )
        .with_sender(Arc::new(AlwaysFails))
        .with_sender(Arc::new(Succeeds));
        Scheduler::new(store.clone(), store, handle, Arc::new(dispatcher), config())
    }

    async fn stored(store: &MemoryStore, channel: Channel, priority: Priority, created_at: DateTime<Utc>) -> Notification {
        let recipient = Recipient {
            id: "u-1".into(),
            name: "Ana".into(),
            email: Some("ana@example.org".into()),
        };
        let request = NotificationRequest::new(NotificationType::RoutingReceived, priority, "u-1", "Routed", "Item routed to your sector");
        let n = Notification::from_request(request, &recipient, vec![channel], created_at);
        store.insert(&n).await.unwrap();
        n
    }

    #[tokio::test]
    async fn retries_stop_at_the_cap() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), Some(NotificationSettings::default()));
        let n = stored(&store, Channel::Email, Priority::Normal, Utc::now()).await;

        scheduler.dispatcher.dispatch(&n.id).await.unwrap();
        assert_eq!(scheduler.reprocess_errors().await.unwrap(), 1);
        assert_eq!(scheduler.reprocess_errors().await.unwrap(), 1);

        let exhausted = store.get(&n.id).await.unwrap().unwrap();
        assert_eq!(exhausted.status, NotificationStatus::Error);
        assert_eq!(exhausted.retry_count, 3);
        assert_eq!(scheduler.reprocess_errors().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_settings_skip_reprocessing() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), None);
        let n = stored(&store, Channel::Email, Priority::Normal, Utc::now()).await;
        let mut failed = n.clone();
        failed.status = NotificationStatus::Error;
        failed.retry_count = 1;
        store.save(&failed).await.unwrap();

        assert_eq!(scheduler.reprocess_errors().await.unwrap(), 0);
        assert_eq!(store.get(&n.id).await.unwrap().unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn due_scheduled_notifications_are_promoted() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), Some(NotificationSettings::default()));
        let now = Utc::now();

        let mut due = stored(&store, Channel::System, Priority::High, now).await;
        due.scheduled = true;
        due.scheduled_at = Some(now - ChronoDuration::minutes(1));
        store.save(&due).await.unwrap();

        let mut later = stored(&store, Channel::System, Priority::High, now).await;
        later.scheduled = true;
        later.scheduled_at = Some(now + ChronoDuration::hours(1));
        store.save(&later).await.unwrap();

        assert_eq!(scheduler.promote_due(now).await.unwrap(), 1);
        assert_eq!(store.get(&due.id).await.unwrap().unwrap().status, NotificationStatus::Sent);
        assert_eq!(store.get(&later.id).await.unwrap().unwrap().status, NotificationStatus::Pending);
        assert_eq!(scheduler.promote_due(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stalled_pending_notifications_are_recovered() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), Some(NotificationSettings::default()));
        let now = Utc::now();

        let stalled = stored(&store, Channel::System, Priority::Normal, now - ChronoDuration::hours(3)).await;
        let fresh = stored(&store, Channel::System, Priority::Normal, now).await;

        assert_eq!(scheduler.promote_due(now).await.unwrap(), 0);
        assert_eq!(scheduler.recover_stalled(now).await.unwrap(), 1);
        assert_eq!(store.get(&stalled.id).await.unwrap().unwrap().status, NotificationStatus::Sent);
        assert_eq!(store.get(&fresh.id).await.unwrap().unwrap().status, NotificationStatus::Pending);
        assert_eq!(scheduler.recover_stalled(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retention_removes_only_old_read_notifications() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), Some(NotificationSettings::default()));
        let now = Utc::now();

        let mut old_read = stored(&store, Channel::System, Priority::Low, now - ChronoDuration::days(120)).await;
        old_read.mark_read(now - ChronoDuration::days(100));
        store.save(&old_read).await.unwrap();
        let old_unread = stored(&store, Channel::System, Priority::Low, now - ChronoDuration::days(120)).await;
        let mut recent_read = stored(&store, Channel::System, Priority::Low, now - ChronoDuration::days(10)).await;
        recent_read.mark_read(now);
        store.save(&recent_read).await.unwrap();

        assert_eq!(scheduler.retention_sweep(now).await.unwrap(), 1);
        assert!(store.get(&old_read.id).await.unwrap().is_none());
        assert!(store.get(&old_unread.id).await.unwrap().is_some());
        assert!(store.get(&recent_read.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reload_applies_stored_settings() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), None);
        store
            .save_settings(&NotificationSettings {
                max_notifications_per_hour: 10,
                ..NotificationSettings::default()
            })
            .await
            .unwrap();

        scheduler.reload_settings().await.unwrap();
        assert_eq!(scheduler.settings.require().unwrap().max_notifications_per_hour, 10);
    }
}
