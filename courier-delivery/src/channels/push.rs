use async_trait::async_trait;
use courier_core::model::{Channel, Device, Notification, RelatedEntity};
use courier_core::SettingsHandle;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::{ChannelError, ChannelSender};
use crate::devices::DeviceRegistry;

/// What every device receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub notification_type: String,
    pub notification_id: String,
    pub action_url: Option<String>,
    pub related_entity: Option<RelatedEntity>,
}

impl PushPayload {
    pub fn from_notification(notification: &Notification) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.message.clone(),
            notification_type: notification.notification_type.as_str().to_string(),
            notification_id: notification.id.clone(),
            action_url: notification.action_url.clone(),
            related_entity: notification.related_entity.clone(),
        }
    }

    /// Flat string map for provider data fields.
    pub fn data(&self) -> HashMap<String, String> {
        let mut data = HashMap::new();
        data.insert("type".to_string(), self.notification_type.clone());
        data.insert("notification_id".to_string(), self.notification_id.clone());
        if let Some(url) = &self.action_url {
            data.insert("action_url".to_string(), url.clone());
        }
        if let Some(entity) = &self.related_entity {
            data.insert("entity_type".to_string(), entity.entity_type.clone());
            data.insert("entity_id".to_string(), entity.entity_id.clone());
        }
        data
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    /// The provider no longer accepts this token.
    #[error("invalid device token")]
    InvalidToken,

    #[error("push provider error: {0}")]
    Provider(String),
}

/// A push gateway for one or more platforms.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn push(&self, device: &Device, payload: &PushPayload, provider_key: &str) -> Result<(), PushError>;
}

pub struct PushSender {
    settings: SettingsHandle,
    devices: DeviceRegistry,
    provider: Arc<dyn PushProvider>,
}

impl PushSender {
    pub fn new(settings: SettingsHandle, devices: DeviceRegistry, provider: Arc<dyn PushProvider>) -> Self {
        Self {
            settings,
            devices,
            provider,
        }
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let settings = self
            .settings
            .current()
            .ok_or(ChannelError::ConfigurationMissing(Channel::Push))?;
        if !settings.push_enabled {
            return Err(ChannelError::ChannelDisabled(Channel::Push));
        }
        if !settings.push_ready() {
            return Err(ChannelError::ConfigurationMissing(Channel::Push));
        }
        let provider_key = settings.push_provider_key.as_deref().unwrap_or_default();

        let devices = self
            .devices
            .list_active_devices(&notification.recipient_id)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if devices.is_empty() {
            return Err(ChannelError::NoDevicesRegistered(notification.recipient_id.clone()));
        }

        let payload = PushPayload::from_notification(notification);
        let attempts = devices
            .iter()
            .map(|device| self.provider.push(device, &payload, provider_key));
        let results = join_all(attempts).await;

        let mut delivered = 0usize;
        let mut failures = Vec::new();
        for (device, result) in devices.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(PushError::InvalidToken) => {
                    tracing::info!(user_id = %device.user_id, platform = %device.platform, "Deactivating rejected push token");
                    if let Err(e) = self.devices.invalidate_token(&device.token).await {
                        tracing::warn!("Failed to deactivate push token: {}", e);
                    }
                    failures.push(format!("{}: invalid token", device.platform));
                }
                Err(e) => failures.push(format!("{}: {}", device.platform, e)),
            }
        }

        if delivered == 0 {
            return Err(ChannelError::Transport(failures.join("; ")));
        }
        if !failures.is_empty() {
            tracing::debug!(
                notification_id = %notification.id,
                delivered,
                failed = failures.len(),
                "Push partially delivered"
            );
        }
        Ok(())
    }
}
