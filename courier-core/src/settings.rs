use std::sync::Arc;
use tokio::sync::watch;
use tracing;

use crate::error::{CourierError, Result};
use crate::model::NotificationSettings;
use crate::store::SettingsStore;

type Snapshot = Option<Arc<NotificationSettings>>;

/// Shared, reloadable view of the global notification settings.
///
/// Readers take a snapshot; the scheduler swaps in a fresh one on reload.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl SettingsHandle {
    pub fn new(initial: Option<NotificationSettings>) -> Self {
        let (tx, _rx) = watch::channel(initial.map(Arc::new));
        Self { tx: Arc::new(tx) }
    }

    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        let settings = store.load_settings().await?;
        if settings.is_none() {
            tracing::warn!("No notification settings stored; channels needing them will fail");
        }
        Ok(Self::new(settings))
    }

    pub fn current(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn require(&self) -> Result<Arc<NotificationSettings>> {
        self.current().ok_or(CourierError::ConfigurationMissing)
    }

    pub fn replace(&self, settings: Option<NotificationSettings>) {
        self.tx.send_replace(settings.map(Arc::new));
    }

    /// Re-reads the store. On error the previous snapshot stays in place.
    pub async fn reload(&self, store: &dyn SettingsStore) -> Result<()> {
        let fresh = store.load_settings().await?;
        let changed = self.current().as_deref() != fresh.as_ref();
        if changed {
            tracing::info!("Notification settings changed, applying new snapshot");
            self.replace(fresh);
        }
        Ok(())
    }
}
