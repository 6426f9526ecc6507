use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use common_kafka::{KafkaConnection, KafkaProducer};
use health::{HealthHandle, HealthRegistry, HealthServer};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Config;
use crate::error::{ConfigError, Fault};
use crate::lifecycle::FaultReporter;
use crate::message::OutboundMessage;
use crate::metrics::setup_metrics_recorder;
use crate::resources::{Bootstrap, Connection, HealthCheck, Producer};

pub const SERVICE_NAME: &str = "apc-test-data-generator";

/// Opens the production resources: an axum health check server and a Kafka
/// connection, configured from the environment.
#[derive(Default)]
pub struct KafkaBootstrap {
    config: Option<Config>,
    metrics: Option<PrometheusHandle>,
}

impl KafkaBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` instead of reading the environment. It is still validated.
    pub fn with_config(config: Config) -> Self {
        Self {
            config: Some(config),
            metrics: None,
        }
    }

    fn config(&self) -> Result<&Config, Fault> {
        self.config
            .as_ref()
            .ok_or(Fault::Configuration(ConfigError::NotLoaded))
    }
}

#[async_trait]
impl Bootstrap for KafkaBootstrap {
    fn load_config(&mut self) -> Result<(), Fault> {
        let config = match self.config.take() {
            Some(config) => {
                config.validate()?;
                config
            }
            None => Config::init_validated()?,
        };

        if config.export_prometheus && self.metrics.is_none() {
            match setup_metrics_recorder() {
                Ok(handle) => self.metrics = Some(handle),
                Err(err) => warn!("failed to install metrics recorder: {}", err),
            }
        }

        self.config = Some(config);
        Ok(())
    }

    async fn start_health_check(
        &mut self,
        faults: FaultReporter,
    ) -> Result<Box<dyn HealthCheck>, Fault> {
        let config = self.config()?;

        let registry = HealthRegistry::new("readiness");
        let dependencies = registry.register("kafka");
        dependencies.report_unhealthy()?;

        let app = health::router(SERVICE_NAME, registry, self.metrics.clone());
        let server = HealthServer::start(&config.bind(), app).await?;

        let failed = server.failed();
        let watcher = tokio::spawn(async move {
            failed.await;
            faults.report("health check server stopped unexpectedly");
        });

        Ok(Box::new(HttpHealthCheck {
            dependencies,
            server: Mutex::new(Some(server)),
            watcher: Mutex::new(Some(watcher)),
        }))
    }

    async fn open_connection(&mut self) -> Result<Box<dyn Connection>, Fault> {
        let config = self.config()?;
        let connection = KafkaConnection::open(&config.kafka).await?;
        Ok(Box::new(connection))
    }
}

pub struct HttpHealthCheck {
    dependencies: HealthHandle,
    server: Mutex<Option<HealthServer>>,
    /// Forwards a failed serve loop to the controller until the server is closed.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    fn set_ok(&self, ok: bool) -> Result<(), Fault> {
        match ok {
            true => self.dependencies.report_healthy()?,
            false => self.dependencies.report_unhealthy()?,
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), Fault> {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let server = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(server) = server {
            server.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for KafkaConnection {
    async fn create_producer(&self) -> Result<Box<dyn Producer>, Fault> {
        let producer = KafkaConnection::create_producer(self)?;
        Ok(Box::new(producer))
    }

    async fn close(&self) -> Result<(), Fault> {
        KafkaConnection::close(self)?;
        Ok(())
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn send(&self, message: OutboundMessage) -> Result<(), Fault> {
        KafkaProducer::send(
            self,
            &message.key,
            &message.payload,
            message.event_timestamp_ms,
        )
        .await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Fault> {
        KafkaProducer::flush(self).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Fault> {
        KafkaProducer::close(self)?;
        Ok(())
    }
}
