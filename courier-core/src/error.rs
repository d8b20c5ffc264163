use thiserror::Error;

/// Errors surfaced by the notification engine to its callers.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Malformed request, e.g. a missing or unknown recipient.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller is not allowed to act on the resource.
    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// No global notification settings document exists.
    #[error("notification settings are missing")]
    ConfigurationMissing,

    /// An optimistic version check failed.
    #[error("concurrent update on {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CourierError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CourierError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<diesel::result::Error> for CourierError {
    fn from(e: diesel::result::Error) -> Self {
        CourierError::Storage(e.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for CourierError {
    fn from(e: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        CourierError::Storage(format!("connection pool: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
