//! Error types for the relay
//!
//! Defines transport errors, state invariant violations, collaborator
//! failures and configuration errors. Uses thiserror for ergonomic definitions.

use thiserror::Error;

use crate::types::ConnectionId;

/// Application-level errors
///
/// Fatal for the connection they occur on, never for the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The ChatServer actor is gone (command channel closed)
    #[error("Chat server closed")]
    ServerClosed,
}

/// Violations of the pairing invariants
///
/// These indicate a bug in the caller, not an expected runtime state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Attempted to pair a connection with itself
    #[error("Connection {0} cannot be paired with itself")]
    SelfPairing(ConnectionId),

    /// Attempted to pair a connection that already holds a session
    #[error("Connection {0} is already paired")]
    AlreadyPaired(ConnectionId),

    /// Attempted to pair a connection that is not registered
    #[error("Connection {0} is not registered")]
    Unregistered(ConnectionId),
}

/// Failures of external collaborators (geolocation, image hosting, persistence)
///
/// Always caught at the call boundary and degraded to a fallback.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Collaborator not configured
    #[error("Collaborator unavailable")]
    Unavailable,

    /// No result for the given input
    #[error("Not found")]
    NotFound,

    /// Payload exceeds the configured limit
    #[error("Payload too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Collaborator answered with something we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors (fatal at startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    /// Dotenv file could not be read or parsed
    #[error("Failed to load env file: {0}")]
    EnvFile(String),

    /// Geolocation table could not be loaded
    #[error("Failed to load geolocation table: {0}")]
    GeoTable(String),
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The receiver is not keeping up and the buffer is full
    #[error("Channel full")]
    Full,
}
