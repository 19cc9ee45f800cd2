use thiserror::Error;

use crate::bus::ExceptionCode;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol exception: {0}")]
    Exception(ExceptionCode),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Lock acquisition timed out")]
    LockTimeout,

    #[error("Duplicate sensor key: {0}")]
    DuplicateSensor(String),

    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Command failed: {0}")]
    CommandError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Publish error: {0}")]
    PublishError(String),
}

impl GatewayError {
    /// True for the one error class that propagates up to the scheduler and
    /// triggers the reconnection sub-loop.
    pub fn is_disconnection(&self) -> bool {
        matches!(self, GatewayError::ConnectionError(_))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::PersistenceError(format!("IO error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GatewayError::LockTimeout
    }
}
