use common_kafka::ChannelError;
use health::HealthServerError;
use thiserror::Error;

use crate::message::MessageError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration from env: {0}")]
    Env(#[from] envconfig::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("configuration was not loaded")]
    NotLoaded,
}

/// A fault that ends the process with a non-zero exit code.
#[derive(Error, Debug)]
pub enum Fault {
    #[error("configuration fault: {0}")]
    Configuration(#[from] ConfigError),
    #[error("health check fault: {0}")]
    HealthCheck(#[from] HealthServerError),
    #[error("message channel fault: {0}")]
    Connection(#[from] ChannelError),
    #[error("serialization fault: {0}")]
    Serialization(#[from] MessageError),
    #[error("task panicked: {0}")]
    Panic(String),
    #[error("background task failed: {0}")]
    Background(String),
}

/// A failed shutdown step. Reported, never escalated.
#[derive(Error, Debug)]
#[error("cleanup step '{step}' failed: {source}")]
pub struct CleanupFault {
    pub step: &'static str,
    #[source]
    pub source: Fault,
}
