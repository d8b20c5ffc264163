use chrono::Utc;
use courier_core::error::{CourierError, Result};
use courier_core::model::Device;
use courier_core::store::DeviceStore;
use std::sync::Arc;

/// Push device registrations, keyed by token.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CourierError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed)
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// Upserts by token. Re-registering a known token moves it to the
    /// latest user, platform and model and reactivates it.
    pub async fn register_device(
        &self,
        user_id: &str,
        token: &str,
        platform: &str,
        model: Option<&str>,
        app_version: Option<&str>,
    ) -> Result<Device> {
        let user_id = required(user_id, "user id")?;
        let token = required(token, "device token")?;
        let platform = required(platform, "platform")?.to_ascii_lowercase();
        let now = Utc::now();

        let device = match self.store.find_by_token(token).await? {
            Some(mut existing) => {
                if existing.user_id != user_id {
                    tracing::info!(from = %existing.user_id, to = %user_id, "Device token changed owner");
                }
                existing.user_id = user_id.to_string();
                existing.platform = platform;
                existing.model = model.map(str::to_string);
                if app_version.is_some() {
                    existing.app_version = app_version.map(str::to_string);
                }
                existing.last_access_at = now;
                existing.active = true;
                existing
            }
            None => Device {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                token: token.to_string(),
                platform,
                model: model.map(str::to_string),
                app_version: app_version.map(str::to_string),
                registered_at: now,
                last_access_at: now,
                active: true,
            },
        };

        self.store.upsert_device(&device).await?;
        tracing::debug!(user_id = %device.user_id, platform = %device.platform, "Device registered");
        Ok(device)
    }

    /// Deactivates a device owned by `user_id`.
    pub async fn deactivate_device(&self, user_id: &str, token: &str) -> Result<()> {
        let device = self
            .store
            .find_by_token(token)
            .await?
            .ok_or_else(|| CourierError::not_found("device", token))?;
        if device.user_id != user_id {
            return Err(CourierError::Authorization(
                "device belongs to another user".into(),
            ));
        }
        self.store.set_active(token, false).await?;
        Ok(())
    }

    /// Deactivates a token the push provider rejected. No ownership check.
    pub async fn invalidate_token(&self, token: &str) -> Result<bool> {
        self.store.set_active(token, false).await
    }

    pub async fn list_active_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .list_active_devices(user_id)
            .await?
            .into_iter()
            .map(|d| d.token)
            .collect())
    }

    pub async fn list_active_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        self.store.list_for_user(user_id, true).await
    }

    pub async fn list_user_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        self.store.list_for_user(user_id, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::store::MemoryStore;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn re_registration_keeps_one_record_with_latest_platform() {
        let registry = registry();
        let first = registry
            .register_device("U1", "T1", "android", Some("Pixel 7"), Some("1.0.0"))
            .await
            .unwrap();
        registry.deactivate_device("U1", "T1").await.unwrap();

        let second = registry
            .register_device("U1", "T1", "iOS", Some("iPhone 15"), None)
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.platform, "ios");
        assert_eq!(second.model.as_deref(), Some("iPhone 15"));
        assert_eq!(second.app_version.as_deref(), Some("1.0.0"));
        assert!(second.active);

        let devices = registry.list_user_devices("U1").await.unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn only_the_owner_can_deactivate() {
        let registry = registry();
        registry.register_device("U1", "T1", "web", None, None).await.unwrap();

        let err = registry.deactivate_device("U2", "T1").await.unwrap_err();
        assert!(matches!(err, CourierError::Authorization(_)));

        let err = registry.deactivate_device("U1", "missing").await.unwrap_err();
        assert!(matches!(err, CourierError::NotFound { .. }));
    }

    #[tokio::test]
    async fn invalidated_tokens_leave_the_active_list() {
        let registry = registry();
        registry.register_device("U1", "T1", "android", None, None).await.unwrap();
        registry.register_device("U1", "T2", "android", None, None).await.unwrap();

        assert!(registry.invalidate_token("T1").await.unwrap());
        assert!(!registry.invalidate_token("unknown").await.unwrap());
        assert_eq!(registry.list_active_tokens("U1").await.unwrap(), vec!["T2".to_string()]);
        assert_eq!(registry.list_user_devices("U1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn blank_token_is_rejected() {
        let err = registry()
            .register_device("U1", "  ", "android", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }
}
