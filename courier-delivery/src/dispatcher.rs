use chrono::{Duration as ChronoDuration, Utc};
use courier_core::error::{CourierError, Result};
use courier_core::model::{Channel, Notification, NotificationStatus};
use courier_core::rate_limit::RateLimiter;
use courier_core::store::NotificationStore;
use courier_core::SettingsHandle;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::channels::{ChannelError, ChannelSender};

/// A claim outlives the channel timeout by this much.
const LEASE_MARGIN_SECS: i64 = 30;

/// Result of one dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// SENT, READ, EXPIRED, or ERROR with its retries used up; nothing to do.
    AlreadySettled,
    /// Scheduled for later.
    NotDue,
    /// No channels to attempt.
    NoChannels,
    /// Past its expiration; marked EXPIRED.
    Expired,
    /// Hourly cap reached; rescheduled.
    Deferred,
    /// Another dispatcher holds the lease or updated the record first.
    Lost,
    /// Channels were attempted; carries the resulting status.
    Attempted(NotificationStatus),
}

/// Sends a persisted notification over its channels and records the outcome.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    settings: SettingsHandle,
    limiter: Arc<dyn RateLimiter>,
    channel_timeout: Duration,
    lease: ChronoDuration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        settings: SettingsHandle,
        limiter: Arc<dyn RateLimiter>,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            store,
            senders: HashMap::new(),
            settings,
            limiter,
            channel_timeout,
            lease: ChronoDuration::from_std(channel_timeout).unwrap_or_else(|_| ChronoDuration::hours(1))
                + ChronoDuration::seconds(LEASE_MARGIN_SECS),
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub async fn dispatch(&self, notification_id: &str) -> Result<DispatchOutcome> {
        let notification = self
            .store
            .get(notification_id)
            .await?
            .ok_or_else(|| CourierError::not_found("notification", notification_id))?;

        if matches!(
            notification.status,
            NotificationStatus::Sent | NotificationStatus::Read | NotificationStatus::Expired
        ) {
            return Ok(DispatchOutcome::AlreadySettled);
        }

        let settings = self.settings.current();
        if let Some(settings) = &settings {
            if notification.status == NotificationStatus::Error
                && notification.retry_count >= settings.max_retry_attempts
            {
                tracing::debug!(notification_id, retry_count = notification.retry_count, "Retries exhausted");
                return Ok(DispatchOutcome::AlreadySettled);
            }
        }

        let now = Utc::now();
        if notification.is_in_flight(now) {
            tracing::debug!(notification_id, "Notification is being dispatched elsewhere");
            return Ok(DispatchOutcome::Lost);
        }
        if notification.is_expired(now) {
            return self.expire(notification).await;
        }
        if !notification.is_due(now) {
            tracing::debug!(notification_id, "Notification not due yet");
            return Ok(DispatchOutcome::NotDue);
        }
        let channels = notification.pending_channels();
        if channels.is_empty() {
            return Ok(DispatchOutcome::NoChannels);
        }

        let claimed = self
            .store
            .claim(notification_id, notification.version, now, now + self.lease)
            .await?;
        let Some(mut notification) = claimed else {
            tracing::debug!(notification_id, "Dispatch claim lost to another worker");
            return Ok(DispatchOutcome::Lost);
        };

        if let Some(settings) = settings {
            match self
                .limiter
                .try_acquire(&notification.recipient_id, settings.max_notifications_per_hour, now)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    let retry_at = now + ChronoDuration::minutes(settings.retry_interval_minutes);
                    tracing::info!(
                        notification_id,
                        recipient_id = %notification.recipient_id,
                        %retry_at,
                        "Hourly cap reached, deferring"
                    );
                    notification.status = NotificationStatus::Pending;
                    notification.scheduled = true;
                    notification.scheduled_at = Some(retry_at);
                    return self.persist(notification, DispatchOutcome::Deferred).await;
                }
                Err(e) => tracing::warn!("Rate limiter unavailable, sending anyway: {}", e),
            }
        }

        let attempts = channels.iter().map(|&channel| self.attempt(channel, &notification));
        let results = join_all(attempts).await;
        let results: Vec<(Channel, std::result::Result<(), String>)> = channels
            .into_iter()
            .zip(results)
            .map(|(channel, result)| (channel, result.map_err(|e| e.to_string())))
            .collect();

        for (channel, result) in &results {
            if let Err(reason) = result {
                tracing::warn!(notification_id, %channel, "Channel delivery failed: {}", reason);
            }
        }

        notification.apply_attempt(results, Utc::now());
        let status = notification.status;
        tracing::info!(
            notification_id,
            %status,
            retry_count = notification.retry_count,
            "Dispatch attempt finished"
        );
        self.persist(notification, DispatchOutcome::Attempted(status)).await
    }

    async fn attempt(&self, channel: Channel, notification: &Notification) -> std::result::Result<(), ChannelError> {
        let sender = self
            .senders
            .get(&channel)
            .ok_or(ChannelError::ConfigurationMissing(channel))?;
        match tokio::time::timeout(self.channel_timeout, sender.send(notification)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.channel_timeout)),
        }
    }

    async fn expire(&self, mut notification: Notification) -> Result<DispatchOutcome> {
        tracing::info!(notification_id = %notification.id, "Notification expired before delivery");
        notification.status = NotificationStatus::Expired;
        self.persist(notification, DispatchOutcome::Expired).await
    }

    /// Saves the record and releases the lease.
    async fn persist(&self, mut notification: Notification, outcome: DispatchOutcome) -> Result<DispatchOutcome> {
        notification.dispatching_until = None;
        if self.store.save(&notification).await? {
            Ok(outcome)
        } else {
            tracing::warn!(notification_id = %notification.id, "Concurrent update, discarding dispatch result");
            Ok(DispatchOutcome::Lost)
        }
    }
}
