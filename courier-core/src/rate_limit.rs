use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CourierError, Result};
use crate::redis::RedisPool;

const WINDOW_SECS: i64 = 3600;

/// Per-recipient hourly delivery cap.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one delivery for the recipient if the hourly `limit` allows it.
    async fn try_acquire(&self, recipient_id: &str, limit: u32, now: DateTime<Utc>) -> Result<bool>;
}

fn window_key(recipient_id: &str, now: DateTime<Utc>) -> String {
    format!("RATE:{}:{}", recipient_id, now.timestamp().div_euclid(WINDOW_SECS))
}

/// Fixed hourly windows kept as Redis counters.
pub struct RedisRateLimiter {
    pool: RedisPool,
}

impl RedisRateLimiter {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn try_acquire(&self, recipient_id: &str, limit: u32, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.pool.clone();
        let key = window_key(recipient_id, now);

        let count: i64 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CourierError::Storage(format!("rate counter: {}", e)))?;

        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(WINDOW_SECS)
                .query_async(&mut conn)
                .await
                .map_err(|e| CourierError::Storage(format!("rate counter: {}", e)))?;
        }

        if count > i64::from(limit) {
            let _: i64 = redis::cmd("DECR")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| CourierError::Storage(format!("rate counter: {}", e)))?;
            return Ok(false);
        }

        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryRateLimiter {
    counters: Mutex<HashMap<String, u32>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn try_acquire(&self, recipient_id: &str, limit: u32, now: DateTime<Utc>) -> Result<bool> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| CourierError::Storage("rate counters poisoned".into()))?;
        let count = counters.entry(window_key(recipient_id, now)).or_insert(0);
        if *count >= limit {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }
}
