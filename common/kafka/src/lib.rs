pub mod config;
pub mod connection;
pub mod producer;

use rdkafka::error::KafkaError;
use thiserror::Error;

pub use config::KafkaConfig;
pub use connection::KafkaConnection;
pub use producer::KafkaProducer;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("failed to create kafka client: {0}")]
    Client(KafkaError),
    #[error("failed to fetch metadata from kafka brokers: {0}")]
    Metadata(KafkaError),
    #[error("failed to produce to kafka: {0}")]
    Produce(KafkaError),
    #[error("kafka rejected the message: {0}")]
    Delivery(KafkaError),
    #[error("failed to produce to kafka (timeout)")]
    DeliveryCanceled,
    #[error("failed to flush kafka producer: {0}")]
    Flush(KafkaError),
    #[error("kafka producer closed with {0} undelivered messages")]
    Undelivered(i32),
    #[error("blocking kafka call did not complete: {0}")]
    Task(tokio::task::JoinError),
    #[error("kafka {0} is already closed")]
    Closed(&'static str),
}
