//! Error types for FixBuddy.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(#[from] KnowledgeBaseError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chat platform errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to notify {recipient}: {reason}")]
    NotifyFailed { recipient: String, reason: String },

    #[error("Failed to download attachment {file}: {reason}")]
    DownloadFailed { file: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Knowledge base loading errors.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeBaseError {
    #[error("Knowledge base source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },
}

/// Image text-extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Text extraction failed: {0}")]
    Failed(String),

    #[error("Text extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Language detection errors.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("No language detected in {chars} characters of text")]
    Undetermined { chars: usize },
}
