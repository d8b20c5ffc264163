use anyhow::{anyhow, Result};
use async_trait::async_trait;
use courier_core::{Category, CourierContext, MessageHandler, QueueConsumer};
use courier_delivery::{Dispatcher, NotificationJob};
use std::sync::Arc;
use tracing;

use crate::service::NotificationService;

/// Handles `create` and `deliver` jobs from the notification queue.
pub struct NotificationJobHandler {
    service: Arc<NotificationService>,
    dispatcher: Arc<Dispatcher>,
}

impl NotificationJobHandler {
    pub fn new(service: Arc<NotificationService>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { service, dispatcher }
    }
}

#[async_trait]
impl MessageHandler for NotificationJobHandler {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let job: NotificationJob =
            serde_json::from_slice(payload).map_err(|e| anyhow!("Malformed notification job: {}", e))?;

        match job {
            NotificationJob::Create { request } => {
                match self.service.create_notification(request).await? {
                    Some(summary) => tracing::debug!(notification_id = %summary.id, "Processed create job"),
                    None => tracing::debug!("Create job suppressed by preferences"),
                }
            }
            NotificationJob::Deliver { notification_id } => {
                let outcome = self.dispatcher.dispatch(&notification_id).await?;
                tracing::debug!(%notification_id, ?outcome, "Processed deliver job");
            }
        }
        Ok(())
    }
}

pub async fn run(ctx: CourierContext, handler: NotificationJobHandler) -> Result<()> {
    tracing::info!("Starting notification consumer");

    let consumer = QueueConsumer::new(&ctx.config.redpanda, Category::Notification, ctx.publisher.clone())?;
    consumer.run(&handler).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::model::{NotificationSettings, Recipient};
    use courier_core::store::{MemoryStore, NotificationStore};
    use courier_core::{MemoryRateLimiter, SettingsHandle};
    use courier_delivery::channels::SystemSender;
    use courier_delivery::{DeviceRegistry, InlineJobs};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn handler() -> (NotificationJobHandler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.add_recipient(Recipient {
            id: "u-1".into(),
            name: "Ana".into(),
            email: None,
        });
        let settings = SettingsHandle::new(Some(NotificationSettings::default()));
        let dispatcher = Arc::new(
            Dispatcher::new(
                store.clone(),
                settings.clone(),
                Arc::new(MemoryRateLimiter::new()),
                Duration::from_secs(5),
            )
            .with_sender(Arc::new(SystemSender::new(settings))),
        );
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let service = NotificationService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            DeviceRegistry::new(store.clone()),
            Arc::new(InlineJobs::new(dispatcher.clone())),
        )
        .with_clock(Arc::new(move || monday));
        (NotificationJobHandler::new(Arc::new(service), dispatcher), store)
    }

    #[tokio::test]
    async fn create_job_persists_and_delivers() {
        let (handler, store) = handler();
        let body = serde_json::json!({
            "kind": "create",
            "request": {
                "notification_type": "SYSTEM_UPDATE",
                "priority": "NORMAL",
                "recipient_id": "u-1",
                "title": "Maintenance",
                "message": "Tonight",
                "channels": ["SYSTEM"]
            }
        });
        handler.handle(body.to_string().as_bytes()).await.unwrap();

        let page = store.list_for_recipient("u-1", 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].status.as_str(), "SENT");
    }

    #[tokio::test]
    async fn invalid_jobs_are_rejected() {
        let (handler, _) = handler();
        assert!(handler.handle(b"not json").await.is_err());

        let unknown_recipient = serde_json::json!({
            "kind": "create",
            "request": {
                "notification_type": "SYSTEM_UPDATE",
                "priority": "LOW",
                "recipient_id": "ghost",
                "title": "t",
                "message": "m"
            }
        });
        assert!(handler.handle(unknown_recipient.to_string().as_bytes()).await.is_err());

        let missing = serde_json::json!({"kind": "deliver", "notification_id": "nope"});
        assert!(handler.handle(missing.to_string().as_bytes()).await.is_err());
    }
}
