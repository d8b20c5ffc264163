//! Channel senders: one per delivery channel.

mod email;
mod push;
mod system;

pub use email::{render_email_body, EmailSender, MailTransport, OutgoingEmail};
pub use push::{PushError, PushPayload, PushProvider, PushSender};
pub use system::SystemSender;

use async_trait::async_trait;
use courier_core::model::{Channel, Notification};
use std::time::Duration;
use thiserror::Error;

/// Why a single channel attempt failed. Stored on the notification, never
/// surfaced to producers.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0} channel is disabled")]
    ChannelDisabled(Channel),

    #[error("no active devices registered for user {0}")]
    NoDevicesRegistered(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0} channel is not configured")]
    ConfigurationMissing(Channel),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError>;
}
