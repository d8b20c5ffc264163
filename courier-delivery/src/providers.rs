use async_trait::async_trait;
use courier_core::model::Device;
use std::sync::Arc;

use crate::channels::{PushError, PushPayload, PushProvider};

/// Picks the gateway by device platform: APNs for ios when configured,
/// FCM for everything else.
pub struct PlatformRouter {
    fcm: Arc<dyn PushProvider>,
    apns: Option<Arc<dyn PushProvider>>,
}

impl PlatformRouter {
    pub fn new(fcm: Arc<dyn PushProvider>, apns: Option<Arc<dyn PushProvider>>) -> Self {
        Self { fcm, apns }
    }
}

#[async_trait]
impl PushProvider for PlatformRouter {
    async fn push(&self, device: &Device, payload: &PushPayload, provider_key: &str) -> Result<(), PushError> {
        match &self.apns {
            Some(apns) if device.is_ios() => apns.push(device, payload, provider_key).await,
            _ => self.fcm.push(device, payload, provider_key).await,
        }
    }
}
