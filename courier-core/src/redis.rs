use anyhow::{anyhow, Result};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing;

use crate::config::RedisConfig;
use crate::db::mask_credentials;

/// Multiplexed connection that reconnects on its own. Cheap to clone.
pub type RedisPool = ConnectionManager;

pub async fn create_pool(config: &RedisConfig) -> Result<RedisPool> {
    tracing::info!(url = %mask_credentials(&config.url), "Connecting to Redis");

    let client = Client::open(config.url.as_str())
        .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;
    let mut manager = ConnectionManager::new(client)
        .await
        .map_err(|e| anyhow!("Failed to connect to Redis: {}", e))?;

    let _pong: String = redis::cmd("PING")
        .query_async(&mut manager)
        .await
        .map_err(|e| anyhow!("Failed to ping Redis: {}", e))?;

    tracing::info!("Redis connection established");
    Ok(manager)
}
