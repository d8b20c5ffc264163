pub mod broker;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod model;
pub mod rate_limit;
pub mod redis;
pub mod schema;
pub mod settings;
pub mod store;
pub mod topology;

pub use broker::{MessageHandler, Publisher, QueueConsumer};
pub use config::Config;
pub use context::CourierContext;
pub use db::DbPool;
pub use error::{CourierError, Result};
pub use rate_limit::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
pub use redis::RedisPool;
pub use settings::SettingsHandle;
pub use topology::{Category, Topology};
