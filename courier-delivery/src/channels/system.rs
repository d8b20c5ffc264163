use async_trait::async_trait;
use courier_core::model::{Channel, Notification};
use courier_core::SettingsHandle;

use super::{ChannelError, ChannelSender};

/// In-app channel. The stored record is the notification, so sending is a no-op.
pub struct SystemSender {
    settings: SettingsHandle,
}

impl SystemSender {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ChannelSender for SystemSender {
    fn channel(&self) -> Channel {
        Channel::System
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let enabled = self
            .settings
            .current()
            .map_or(true, |settings| settings.system_enabled);
        if !enabled {
            return Err(ChannelError::ChannelDisabled(Channel::System));
        }
        tracing::debug!(notification_id = %notification.id, "In-app notification available");
        Ok(())
    }
}
