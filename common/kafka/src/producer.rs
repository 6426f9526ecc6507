use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, ClientContext, Statistics};
use tracing::{debug, info, warn};

use crate::ChannelError;

pub struct KafkaContext;

impl ClientContext for KafkaContext {
    fn stats(&self, stats: Statistics) {
        gauge!("kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("kafka_producer_queue_bytes").set(stats.msg_size as f64);
    }
}

/// Producer bound to one topic. Every send waits for the broker acknowledgement.
pub struct KafkaProducer {
    producer: Mutex<Option<FutureProducer<KafkaContext>>>,
    topic: String,
    flush_timeout: Duration,
}

impl KafkaProducer {
    pub(crate) fn new(
        client_config: &ClientConfig,
        topic: &str,
        flush_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let producer: FutureProducer<KafkaContext> = client_config
            .create_with_context(KafkaContext)
            .map_err(ChannelError::Client)?;
        info!("created Kafka producer for topic {}", topic);

        Ok(Self {
            producer: Mutex::new(Some(producer)),
            topic: topic.to_owned(),
            flush_timeout,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn current(&self) -> Result<FutureProducer<KafkaContext>, ChannelError> {
        self.producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ChannelError::Closed("producer"))
    }

    /// Enqueue one record and wait until the broker acknowledged it.
    pub async fn send(
        &self,
        key: &str,
        payload: &[u8],
        timestamp_ms: i64,
    ) -> Result<(), ChannelError> {
        let producer = self.current()?;
        let record = FutureRecord::to(&self.topic)
            .key(key)
            .payload(payload)
            .timestamp(timestamp_ms);

        let delivery = producer
            .send_result(record)
            .map_err(|(err, _)| ChannelError::Produce(err))?;

        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                counter!("kafka_produce_errors_total").increment(1);
                Err(ChannelError::DeliveryCanceled)
            }
            Ok(Err((err, _))) => {
                counter!("kafka_produce_errors_total").increment(1);
                Err(ChannelError::Delivery(err))
            }
            Ok(Ok(delivery)) => {
                debug!(topic = %self.topic, ?delivery, "message acknowledged");
                Ok(())
            }
        }
    }

    /// Wait until every queued record was acknowledged, or `kafka_flush_timeout_ms`.
    /// librdkafka blocks while flushing, so the call runs on the blocking pool.
    pub async fn flush(&self) -> Result<(), ChannelError> {
        let producer = self.current()?;
        let timeout = self.flush_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(ChannelError::Task)?
            .map_err(ChannelError::Flush)?;
        debug!(topic = %self.topic, "flushed Kafka producer");
        Ok(())
    }

    pub fn in_flight_count(&self) -> i32 {
        match self.current() {
            Ok(producer) => producer.in_flight_count(),
            Err(_) => 0,
        }
    }

    /// Drop the underlying client. Fails if records were still waiting for delivery,
    /// they are lost.
    pub fn close(&self) -> Result<(), ChannelError> {
        let producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ChannelError::Closed("producer"))?;

        let pending = producer.in_flight_count();
        drop(producer);
        if pending > 0 {
            warn!("closed Kafka producer with {} undelivered messages", pending);
            return Err(ChannelError::Undelivered(pending));
        }
        info!("closed Kafka producer");
        Ok(())
    }
}
