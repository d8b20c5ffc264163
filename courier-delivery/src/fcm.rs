use async_trait::async_trait;
use courier_core::model::Device;
use fcm::{Client, ErrorReason, MessageBuilder, NotificationBuilder};

use crate::channels::{PushError, PushPayload, PushProvider};

/// Firebase Cloud Messaging for android and web tokens. The server key comes
/// from the notification settings on every send.
pub struct FcmProvider {
    client: Client,
}

impl FcmProvider {
    pub fn new() -> Self {
        tracing::info!("Initializing FCM client");
        Self {
            client: Client::new(),
        }
    }
}

impl Default for FcmProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(reason: ErrorReason) -> PushError {
    match reason {
        ErrorReason::InvalidRegistration | ErrorReason::NotRegistered | ErrorReason::MissingRegistration => {
            PushError::InvalidToken
        }
        other => PushError::Provider(format!("{:?}", other)),
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    async fn push(&self, device: &Device, payload: &PushPayload, provider_key: &str) -> Result<(), PushError> {
        let data = payload.data();

        let mut notification = NotificationBuilder::new();
        notification.title(&payload.title);
        notification.body(&payload.body);

        let mut builder = MessageBuilder::new(provider_key, &device.token);
        builder.notification(notification.finalize());
        builder
            .data(&data)
            .map_err(|e| PushError::Provider(format!("invalid FCM data payload: {}", e)))?;

        let response = self
            .client
            .send(builder.finalize())
            .await
            .map_err(|e| PushError::Provider(format!("FCM request failed: {:?}", e)))?;

        if let Some(reason) = response.error {
            return Err(classify(reason));
        }
        let rejected = response
            .results
            .unwrap_or_default()
            .into_iter()
            .find_map(|result| result.error);
        if let Some(reason) = rejected {
            return Err(classify(reason));
        }

        tracing::debug!(platform = %device.platform, "FCM notification accepted");
        Ok(())
    }
}
