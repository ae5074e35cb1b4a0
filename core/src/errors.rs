use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message source error: {0}")]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to create consumer: {reason}")]
    ConsumerCreation { reason: String },

    #[error("Failed to subscribe to topic {topic}: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("Failed to consume messages: {reason}")]
    Consumption { reason: String },

    #[error("Failed to commit offsets: {reason}")]
    OffsetCommit { reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to the store: {reason}")]
    Connection { reason: String },

    #[error("Query {name} failed: {reason}")]
    Query { name: &'static str, reason: String },

    #[error("Query {name} returned an unusable row: {reason}")]
    BadRow { name: &'static str, reason: String },

    #[error("Batch cannot be written: {reason}")]
    BadBatch { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration from {path}: {reason}")]
    Load { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, HarvestError>;
