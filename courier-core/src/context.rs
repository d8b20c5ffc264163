use std::sync::Arc;

use crate::broker::{create_producer, Publisher};
use crate::config::Config;
use crate::db::{create_pool as create_db_pool, DbPool};
use crate::rate_limit::RedisRateLimiter;
use crate::redis::{create_pool as create_redis_pool, RedisPool};
use crate::settings::SettingsHandle;
use crate::store::PgStore;

/// Process-wide connections and shared state.
#[derive(Clone)]
pub struct CourierContext {
    pub config: Arc<Config>,
    pub db_pool: Arc<DbPool>,
    pub redis_pool: RedisPool,
    pub publisher: Publisher,
    pub store: Arc<PgStore>,
    pub settings: SettingsHandle,
}

impl CourierContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db_pool = create_db_pool(&config.database).await?;
        let redis_pool = create_redis_pool(&config.redis).await?;
        let publisher = Publisher::new(create_producer(&config.redpanda)?);
        let store = Arc::new(PgStore::new(db_pool.clone()));
        let settings = SettingsHandle::load(store.as_ref()).await?;

        Ok(CourierContext {
            config: Arc::new(config),
            db_pool,
            redis_pool,
            publisher,
            store,
            settings,
        })
    }

    pub fn rate_limiter(&self) -> RedisRateLimiter {
        RedisRateLimiter::new(self.redis_pool.clone())
    }
}
