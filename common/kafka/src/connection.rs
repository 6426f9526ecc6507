use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::ClientConfig;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::producer::KafkaProducer;
use crate::ChannelError;

/// An open, verified link to the Kafka brokers. Producers are created from it
/// and share its client configuration.
pub struct KafkaConnection {
    client_config: ClientConfig,
    topic: String,
    flush_timeout: Duration,
    admin: Mutex<Option<AdminClient<DefaultClientContext>>>,
}

impl KafkaConnection {
    /// Create the client and check that the brokers answer a metadata request
    /// within `kafka_metadata_timeout_ms`. The request runs on the blocking pool.
    pub async fn open(config: &KafkaConfig) -> Result<Self, ChannelError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let client_config = config.client_config();
        debug!("rdkafka configuration: {:?}", client_config);
        let admin: AdminClient<DefaultClientContext> =
            client_config.create().map_err(ChannelError::Client)?;

        // "Ping" the Kafka brokers by requesting metadata
        let timeout = config.metadata_timeout();
        let (admin, metadata) = tokio::task::spawn_blocking(move || {
            let topics = admin
                .inner()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.topics().len());
            (admin, topics)
        })
        .await
        .map_err(ChannelError::Task)?;
        let topics = metadata.map_err(ChannelError::Metadata)?;
        info!(
            "Successfully connected to Kafka brokers. Found {} topics.",
            topics
        );

        Ok(Self {
            client_config,
            topic: config.kafka_topic.clone(),
            flush_timeout: config.flush_timeout(),
            admin: Mutex::new(Some(admin)),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_open(&self) -> bool {
        self.admin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn create_producer(&self) -> Result<KafkaProducer, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed("connection"));
        }
        KafkaProducer::new(&self.client_config, &self.topic, self.flush_timeout)
    }

    /// Release the broker connection. Producers created earlier keep their own
    /// clients and must be closed separately.
    pub fn close(&self) -> Result<(), ChannelError> {
        let admin = self
            .admin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ChannelError::Closed("connection"))?;
        drop(admin);
        info!("closed Kafka connection");
        Ok(())
    }
}
