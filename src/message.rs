//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Look for a stranger (skips the current partner if paired)
    FindPartner,
    /// Send a chat message to the current partner
    Message {
        #[serde(default)]
        text: String,
        /// Raw image payload, usually a data URL
        #[serde(default)]
        image: Option<String>,
        /// Display expiry hint, carried through untouched
        #[serde(default)]
        expires_at: Option<i64>,
    },
    /// End the current chat without searching again
    EndChat,
    /// Diagnostic query
    Status,
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection successful, connection ID issued
    Connected { connection_id: String },
    /// Placed in the waiting pool
    Searching,
    /// Paired with a stranger
    Matched { country: String },
    /// Chat message from the partner
    Message {
        text: String,
        image_url: Option<String>,
        expires_at: Option<i64>,
    },
    /// The partner left the chat
    PeerDisconnected,
    /// Live pool and session counts
    Status {
        connection_count: usize,
        waiting_count: usize,
        active_session_count: usize,
    },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Message with neither text nor image
    EmptyMessage,
}

impl ServerMessage {
    /// Build an `invalid_message` error from a parse failure
    pub fn invalid(err: &serde_json::Error) -> Self {
        ServerMessage::Error {
            code: ErrorCode::InvalidMessage,
            message: format!("Invalid message format: {}", err),
        }
    }

    /// Build an `empty_message` error
    pub fn empty() -> Self {
        ServerMessage::Error {
            code: ErrorCode::EmptyMessage,
            message: "Message needs text or an image".to_string(),
        }
    }
}
