use a2::{Client, LocalizedNotificationBuilder, NotificationBuilder, NotificationOptions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use courier_core::config::DeliveryConfig;
use courier_core::model::Device;
use std::fs;

use crate::channels::{PushError, PushPayload, PushProvider};

/// Apple Push Notification service for ios tokens.
pub struct ApnsProvider {
    client: Client,
    bundle_id: String,
}

impl ApnsProvider {
    /// `Ok(None)` when APNs is not configured.
    pub fn from_config(config: &DeliveryConfig) -> Result<Option<Self>> {
        let (Some(key_id), Some(team_id)) = (&config.apns_key_id, &config.apns_team_id) else {
            tracing::warn!("APNs delivery disabled (missing configuration)");
            return Ok(None);
        };
        let bundle_id = config.apns_bundle_id.clone().unwrap_or_default();

        let key_content = if let Some(encoded) = &config.apns_key_content {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| anyhow!("Failed to decode base64 APNs key: {}", e))?;
            String::from_utf8(decoded).map_err(|e| anyhow!("APNs key is not UTF-8: {}", e))?
        } else if let Some(key_path) = &config.apns_key_path {
            fs::read_to_string(key_path)
                .map_err(|e| anyhow!("Failed to read APNs key file {}: {}", key_path, e))?
        } else {
            return Err(anyhow!("Either APNS_KEY_PATH or APNS_KEY_CONTENT must be provided"));
        };

        let endpoint = if bundle_id.contains("sandbox") || bundle_id.contains("dev") {
            a2::Endpoint::Sandbox
        } else {
            a2::Endpoint::Production
        };
        let client = Client::token(key_content.as_bytes(), key_id, team_id, endpoint)
            .map_err(|e| anyhow!("Failed to create APNs client: {}", e))?;

        tracing::info!("APNs client initialized");
        Ok(Some(Self { client, bundle_id }))
    }
}

fn is_invalid_token(error: &a2::Error) -> bool {
    match error {
        a2::Error::ResponseError(response) => {
            response.code == 410
                || matches!(
                    response.error.as_ref().map(|body| &body.reason),
                    Some(a2::ErrorReason::BadDeviceToken) | Some(a2::ErrorReason::Unregistered)
                )
        }
        _ => false,
    }
}

#[async_trait]
impl PushProvider for ApnsProvider {
    async fn push(&self, device: &Device, payload: &PushPayload, _provider_key: &str) -> Result<(), PushError> {
        let mut builder = LocalizedNotificationBuilder::new(&payload.title, &payload.body);
        builder.set_sound("default");

        let mut options = NotificationOptions::default();
        if !self.bundle_id.is_empty() {
            options.apns_topic = Some(self.bundle_id.as_str());
        }

        let mut apns_payload = builder.build(&device.token, options);
        apns_payload
            .add_custom_data("data", &payload.data())
            .map_err(|e| PushError::Provider(format!("invalid APNs data payload: {}", e)))?;

        match self.client.send(apns_payload).await {
            Ok(response) => {
                tracing::debug!("APNs notification accepted: {:?}", response.apns_id);
                Ok(())
            }
            Err(e) if is_invalid_token(&e) => Err(PushError::InvalidToken),
            Err(e) => Err(PushError::Provider(format!("APNs request failed: {}", e))),
        }
    }
}
