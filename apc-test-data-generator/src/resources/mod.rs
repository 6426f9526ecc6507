//! The resources the lifecycle controller opens and releases. The real
//! implementations are in [`kafka`], tests drive the controller with fakes.

use async_trait::async_trait;

use crate::error::Fault;
use crate::lifecycle::FaultReporter;
use crate::message::OutboundMessage;

pub mod kafka;

pub use self::kafka::KafkaBootstrap;

/// Readiness toggle of the health check endpoint, and the endpoint itself.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn set_ok(&self, ok: bool) -> Result<(), Fault>;

    async fn close(&self) -> Result<(), Fault>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn create_producer(&self) -> Result<Box<dyn Producer>, Fault>;

    async fn close(&self) -> Result<(), Fault>;
}

#[async_trait]
pub trait Producer: Send + Sync {
    /// Resolves once the channel acknowledged the message.
    async fn send(&self, message: OutboundMessage) -> Result<(), Fault>;

    async fn flush(&self) -> Result<(), Fault>;

    async fn close(&self) -> Result<(), Fault>;
}

/// Startup steps that open resources, in the order the controller calls them.
#[async_trait]
pub trait Bootstrap: Send {
    fn load_config(&mut self) -> Result<(), Fault>;

    /// Start the endpoint with the dependency marked not ok. Faults of the
    /// server task after startup go to `faults`.
    async fn start_health_check(
        &mut self,
        faults: FaultReporter,
    ) -> Result<Box<dyn HealthCheck>, Fault>;

    async fn open_connection(&mut self) -> Result<Box<dyn Connection>, Fault>;
}
