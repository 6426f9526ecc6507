use common_kafka::config::COMPRESSION_CODECS;
use common_kafka::KafkaConfig;
use envconfig::Envconfig;

use crate::error::ConfigError;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    /// Load from the environment and check the values that envconfig cannot.
    pub fn init_validated() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "BIND_HOST",
                reason: "must not be empty".to_string(),
            });
        }
        if self.kafka.kafka_hosts.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "KAFKA_HOSTS",
                reason: "must not be empty".to_string(),
            });
        }
        if self.kafka.kafka_topic.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "KAFKA_TOPIC",
                reason: "must not be empty".to_string(),
            });
        }
        if !COMPRESSION_CODECS.contains(&self.kafka.kafka_compression_codec.as_str()) {
            return Err(ConfigError::Invalid {
                field: "KAFKA_COMPRESSION_CODEC",
                reason: format!(
                    "{} is not one of {}",
                    self.kafka.kafka_compression_codec,
                    COMPRESSION_CODECS.join(", ")
                ),
            });
        }
        Ok(())
    }

    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
