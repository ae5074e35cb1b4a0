use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Configuration for one harvesting run: where to consume from, where to
/// write, and how the processing loop paces itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub kafka: KafkaConfig,
    pub store: StoreConfig,
    pub processing: ProcessingConfig,
    /// Status document shared with the surrounding test harness.
    pub status_file: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            kafka: KafkaConfig::default(),
            store: StoreConfig::default(),
            processing: ProcessingConfig::default(),
            status_file: PathBuf::from("status-data.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub consumer_group: String,
    /// How long one poll may wait before the topic counts as exhausted.
    pub consumer_timeout_ms: u64,
    pub max_poll_records: u32,
    pub session_timeout_ms: u32,
    pub heartbeat_interval_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: "platform.receptor-controller.responses".to_string(),
            consumer_group: "kafka-harvest".to_string(),
            consumer_timeout_ms: 100_000,
            max_poll_records: 100,
            session_timeout_ms: 50_000,
            heartbeat_interval_ms: 10_000,
        }
    }
}

impl KafkaConfig {
    pub fn consumer_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// YAML file holding the `queries` mapping the store runs verbatim.
    pub tables_definition: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "harvest".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            tables_definition: PathBuf::from("tables.yaml"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    /// How long the pipeline tolerates flushes that store nothing before
    /// giving up on the run.
    pub max_quiet_period_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_quiet_period_secs: 300,
        }
    }
}

impl ProcessingConfig {
    pub fn max_quiet_period(&self) -> Duration {
        Duration::from_secs(self.max_quiet_period_secs)
    }
}

impl HarvestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolve the effective configuration: the YAML file when given,
    /// defaults otherwise, environment overrides on top, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("KAFKA_HOST");
        let port = lookup("KAFKA_PORT");
        if host.is_some() || port.is_some() {
            let host = host.unwrap_or_else(|| "localhost".to_string());
            let port = port.unwrap_or_else(|| "9092".to_string());
            self.kafka.bootstrap_servers = format!("{host}:{port}");
        }
        if let Some(topic) = lookup("KAFKA_TOPIC") {
            self.kafka.topic = topic;
        }
        if let Some(group) = lookup("KAFKA_GROUP") {
            self.kafka.consumer_group = group;
        }
        if let Some(raw) = lookup("KAFKA_TIMEOUT") {
            self.kafka.consumer_timeout_ms = parsed("KAFKA_TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("MAX_QUIET_PERIOD") {
            self.processing.max_quiet_period_secs = parsed("MAX_QUIET_PERIOD", &raw)?;
        }
        if let Some(path) = lookup("TABLES_DEFINITION") {
            self.store.tables_definition = PathBuf::from(path);
        }
        if let Some(host) = lookup("STORAGE_DB_HOST") {
            self.store.host = host;
        }
        if let Some(raw) = lookup("STORAGE_DB_PORT") {
            self.store.port = parsed("STORAGE_DB_PORT", &raw)?;
        }
        if let Some(database) = lookup("STORAGE_DB_NAME") {
            self.store.database = database;
        }
        if let Some(user) = lookup("STORAGE_DB_USER") {
            self.store.user = user;
        }
        if let Some(password) = lookup("STORAGE_DB_PASS") {
            self.store.password = password;
        }
        if let Some(path) = lookup("STATUS_DATA_FILE") {
            self.status_file = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(invalid("Kafka bootstrap servers cannot be empty"));
        }
        if self.kafka.topic.is_empty() {
            return Err(invalid("Kafka topic cannot be empty"));
        }
        if self.kafka.consumer_group.is_empty() {
            return Err(invalid("Kafka consumer group cannot be empty"));
        }
        if self.store.database.is_empty() {
            return Err(invalid("Store database name cannot be empty"));
        }
        if self.processing.batch_size == 0 {
            return Err(invalid("Batch size must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}

fn parsed<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e| ConfigError::Invalid {
        message: format!("{key}: {e}"),
    })
}
