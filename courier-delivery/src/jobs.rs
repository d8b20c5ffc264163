use async_trait::async_trait;
use courier_core::error::Result;
use courier_core::model::NotificationRequest;
use courier_core::{Category, Publisher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dispatcher::Dispatcher;

/// Body of a message on the notification queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationJob {
    Create { request: NotificationRequest },
    Deliver { notification_id: String },
}

/// Where a persisted notification goes to get delivered.
#[async_trait]
pub trait DeliveryJobs: Send + Sync {
    async fn enqueue(&self, notification_id: &str) -> Result<()>;
}

/// Publishes a `deliver` job on the notification queue.
pub struct BrokerJobs {
    publisher: Publisher,
}

impl BrokerJobs {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl DeliveryJobs for BrokerJobs {
    async fn enqueue(&self, notification_id: &str) -> Result<()> {
        let job = NotificationJob::Deliver {
            notification_id: notification_id.to_string(),
        };
        let payload = serde_json::to_vec(&job)?;
        self.publisher
            .publish_to(Category::Notification, Some(notification_id), &payload)
            .await?;
        tracing::debug!(notification_id, "Delivery job published");
        Ok(())
    }
}

/// Dispatches in the calling task.
pub struct InlineJobs {
    dispatcher: Arc<Dispatcher>,
}

impl InlineJobs {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl DeliveryJobs for InlineJobs {
    async fn enqueue(&self, notification_id: &str) -> Result<()> {
        let outcome = self.dispatcher.dispatch(notification_id).await?;
        tracing::debug!(notification_id, ?outcome, "Inline dispatch finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::model::{NotificationType, Priority};

    #[test]
    fn jobs_are_tagged_by_kind() {
        let job: NotificationJob =
            serde_json::from_str(r#"{"kind":"deliver","notification_id":"n-1"}"#).unwrap();
        assert!(matches!(job, NotificationJob::Deliver { ref notification_id } if notification_id == "n-1"));

        let create = NotificationJob::Create {
            request: NotificationRequest::new(
                NotificationType::SystemUpdate,
                Priority::Low,
                "u-1",
                "Maintenance",
                "Tonight at 22:00",
            ),
        };
        let value = serde_json::to_value(&create).unwrap();
        assert_eq!(value["kind"], "create");
        assert_eq!(value["request"]["recipient_id"], "u-1");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(serde_json::from_str::<NotificationJob>(r#"{"kind":"purge"}"#).is_err());
    }
}
