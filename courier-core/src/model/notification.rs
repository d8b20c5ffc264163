use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Channel, NotificationStatus, NotificationType, Priority};
use crate::error::{CourierError, Result};

/// Reference to the workflow entity a notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_type: String,
    pub entity_id: String,
}

/// A notification as submitted by a producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub detailed_message: Option<String>,
    #[serde(default)]
    pub related_entity: Option<RelatedEntity>,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub action_label: Option<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NotificationRequest {
    pub fn new(
        notification_type: NotificationType,
        priority: Priority,
        recipient_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notification_type,
            priority,
            recipient_id: recipient_id.into(),
            title: title.into(),
            message: message.into(),
            detailed_message: None,
            related_entity: None,
            action_url: None,
            action_label: None,
            extra: None,
            channels: None,
            scheduled_at: None,
            expires_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.recipient_id.trim().is_empty() {
            return Err(CourierError::Validation("recipient id is required".into()));
        }
        if self.title.trim().is_empty() {
            return Err(CourierError::Validation("title is required".into()));
        }
        if self.message.trim().is_empty() {
            return Err(CourierError::Validation("message is required".into()));
        }
        if let Some(extra) = &self.extra {
            if !extra.is_object() {
                return Err(CourierError::Validation("extra payload must be a JSON object".into()));
            }
        }
        Ok(())
    }
}

/// Recipient as known to the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// Result of the latest attempt on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, reason: String },
}

impl ChannelOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ChannelOutcome::Delivered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub recipient_id: String,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub title: String,
    pub message: String,
    pub detailed_message: Option<String>,
    pub related_entity: Option<RelatedEntity>,
    pub action_url: Option<String>,
    pub action_label: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub channels: Vec<Channel>,
    pub channel_outcomes: BTreeMap<Channel, ChannelOutcome>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    /// Lease held by the dispatcher currently sending the record.
    pub dispatching_until: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Notification {
    /// Builds a PENDING record from an approved request.
    pub fn from_request(
        request: NotificationRequest,
        recipient: &Recipient,
        channels: Vec<Channel>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type: request.notification_type,
            priority: request.priority,
            status: NotificationStatus::Pending,
            recipient_id: recipient.id.clone(),
            recipient_name: Some(recipient.name.clone()),
            recipient_email: recipient.email.clone(),
            title: request.title,
            message: request.message,
            detailed_message: request.detailed_message,
            related_entity: request.related_entity,
            action_url: request.action_url,
            action_label: request.action_label,
            extra: request.extra,
            channels,
            channel_outcomes: BTreeMap::new(),
            last_error: None,
            created_at: now,
            sent_at: None,
            read_at: None,
            scheduled: request.scheduled_at.is_some(),
            scheduled_at: request.scheduled_at,
            expires_at: request.expires_at,
            retry_count: 0,
            dispatching_until: None,
            version: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now > at)
    }

    /// True while another dispatcher's lease has not run out.
    pub fn is_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.dispatching_until.map_or(false, |until| until > now)
    }

    /// True unless the record is scheduled for a later time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.scheduled {
            return true;
        }
        self.scheduled_at.map_or(true, |at| now >= at)
    }

    /// Channels that have not been delivered yet, in request order.
    pub fn pending_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .copied()
            .filter(|c| {
                !self
                    .channel_outcomes
                    .get(c)
                    .map_or(false, ChannelOutcome::is_delivered)
            })
            .collect()
    }

    /// Folds one dispatch round into the record and recomputes the status.
    ///
    /// SENT when any channel has been delivered, ERROR (with the retry
    /// counter bumped) when every attempted channel failed.
    pub fn apply_attempt(&mut self, results: Vec<(Channel, std::result::Result<(), String>)>, now: DateTime<Utc>) {
        let mut errors = Vec::new();
        for (channel, result) in results {
            let outcome = match result {
                Ok(()) => ChannelOutcome::Delivered { at: now },
                Err(reason) => {
                    errors.push(format!("{}: {}", channel, reason));
                    ChannelOutcome::Failed { at: now, reason }
                }
            };
            self.channel_outcomes.insert(channel, outcome);
        }

        let any_delivered = self.channel_outcomes.values().any(ChannelOutcome::is_delivered);
        if any_delivered {
            self.status = NotificationStatus::Sent;
            self.sent_at = Some(now);
        } else {
            self.status = NotificationStatus::Error;
            self.retry_count += 1;
        }
        self.last_error = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };
    }

    /// Returns false when the record was already read.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == NotificationStatus::Read {
            return false;
        }
        self.status = NotificationStatus::Read;
        self.read_at = Some(now);
        true
    }

    pub fn summary(&self) -> NotificationSummary {
        NotificationSummary {
            id: self.id.clone(),
            notification_type: self.notification_type,
            priority: self.priority,
            status: self.status,
            recipient_name: self.recipient_name.clone(),
            title: self.title.clone(),
            message: self.message.clone(),
            action_url: self.action_url.clone(),
            action_label: self.action_label.clone(),
            extra: self.extra.clone(),
            channels: self.channels.clone(),
            created_at: self.created_at,
            read_at: self.read_at,
            read: self.status == NotificationStatus::Read,
        }
    }
}

/// What producers and recipients get back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub id: String,
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub recipient_name: Option<String>,
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    pub action_label: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn recipient() -> Recipient {
        Recipient {
            id: "u-1".into(),
            name: "Ana".into(),
            email: Some("ana@example.org".into()),
        }
    }

    fn request() -> NotificationRequest {
        NotificationRequest::new(
            NotificationType::OpinionRequested,
            Priority::High,
            "u-1",
            "Opinion requested",
            "Please review the bill",
        )
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let mut req = request();
        req.recipient_id = "  ".into();
        assert!(matches!(req.validate(), Err(CourierError::Validation(_))));

        let mut req = request();
        req.message = String::new();
        assert!(matches!(req.validate(), Err(CourierError::Validation(_))));

        let mut req = request();
        req.extra = Some(serde_json::json!([1, 2]));
        assert!(matches!(req.validate(), Err(CourierError::Validation(_))));

        assert!(request().validate().is_ok());
    }

    #[test]
    fn request_deserializes_with_optional_fields_missing() {
        let req: NotificationRequest = serde_json::from_value(serde_json::json!({
            "notification_type": "PROCESS_ASSIGNED",
            "priority": "NORMAL",
            "recipient_id": "u-9",
            "title": "Assigned",
            "message": "A process was assigned to you"
        }))
        .unwrap();
        assert_eq!(req.notification_type, NotificationType::ProcessAssigned);
        assert!(req.channels.is_none());
        assert!(req.scheduled_at.is_none());
    }

    #[test]
    fn from_request_snapshots_recipient_and_schedule() {
        let now = Utc::now();
        let mut req = request();
        req.scheduled_at = Some(now + Duration::hours(1));
        let n = Notification::from_request(req, &recipient(), vec![Channel::Email], now);

        assert_eq!(n.status, NotificationStatus::Pending);
        assert_eq!(n.recipient_name.as_deref(), Some("Ana"));
        assert!(n.scheduled);
        assert!(!n.is_due(now));
        assert!(n.is_due(now + Duration::hours(1)));
    }

    #[test]
    fn expiry_is_strictly_after_the_deadline() {
        let now = Utc::now();
        let mut req = request();
        req.expires_at = Some(now);
        let n = Notification::from_request(req, &recipient(), vec![], now);
        assert!(!n.is_expired(now));
        assert!(n.is_expired(now + Duration::seconds(1)));
    }

    #[test]
    fn lease_is_in_flight_until_it_runs_out() {
        let now = Utc::now();
        let mut n = Notification::from_request(request(), &recipient(), vec![Channel::Email], now);
        assert!(!n.is_in_flight(now));

        n.dispatching_until = Some(now + Duration::seconds(30));
        assert!(n.is_in_flight(now));
        assert!(!n.is_in_flight(now + Duration::seconds(30)));
    }

    #[test]
    fn partial_success_is_sent_and_keeps_failure_detail() {
        let now = Utc::now();
        let mut n = Notification::from_request(
            request(),
            &recipient(),
            vec![Channel::Email, Channel::Push],
            now,
        );
        n.apply_attempt(
            vec![
                (Channel::Email, Ok(())),
                (Channel::Push, Err("no devices registered".into())),
            ],
            now,
        );

        assert_eq!(n.status, NotificationStatus::Sent);
        assert_eq!(n.retry_count, 0);
        assert!(matches!(
            n.channel_outcomes.get(&Channel::Push),
            Some(ChannelOutcome::Failed { .. })
        ));
        assert_eq!(n.pending_channels(), vec![Channel::Push]);
    }

    #[test]
    fn total_failure_counts_a_retry() {
        let now = Utc::now();
        let mut n = Notification::from_request(request(), &recipient(), vec![Channel::Email], now);
        n.apply_attempt(vec![(Channel::Email, Err("smtp down".into()))], now);
        n.apply_attempt(vec![(Channel::Email, Err("smtp down".into()))], now);

        assert_eq!(n.status, NotificationStatus::Error);
        assert_eq!(n.retry_count, 2);
        assert_eq!(n.last_error.as_deref(), Some("EMAIL: smtp down"));
    }

    #[test]
    fn mark_read_reports_first_transition_only() {
        let now = Utc::now();
        let mut n = Notification::from_request(request(), &recipient(), vec![], now);
        assert!(n.mark_read(now));
        assert!(!n.mark_read(now + Duration::minutes(5)));
        assert_eq!(n.read_at, Some(now));
        assert!(n.summary().read);
    }
}
