//! Connection record
//!
//! Represents one live socket with its ephemeral metadata and outbound channel.

use std::net::IpAddr;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::geo::GeoInfo;
use crate::message::ServerMessage;
use crate::types::{ConnectionId, SessionId};

/// Where a connection stands in the pairing flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Waiting,
    Paired,
}

/// Live connection information
///
/// A connection never holds a session and a waiting timestamp at the same
/// time; the setters below keep the two fields mutually exclusive.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Source network address, if the transport knew it
    pub address: Option<IpAddr>,
    /// Best-effort country label
    pub country: String,
    /// Full geolocation result, when there was one
    pub geo: Option<GeoInfo>,
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
    session: Option<SessionId>,
    enqueued_at: Option<Instant>,
}

impl Connection {
    /// Create a new idle connection
    pub fn new(
        id: ConnectionId,
        address: Option<IpAddr>,
        country: String,
        geo: Option<GeoInfo>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            address,
            country,
            geo,
            sender,
            session: None,
            enqueued_at: None,
        }
    }

    /// Queue a message for this connection without waiting
    ///
    /// Fails if the client disconnected or its outbound buffer is full.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            ConnectionState::Paired
        } else if self.enqueued_at.is_some() {
            ConnectionState::Waiting
        } else {
            ConnectionState::Idle
        }
    }

    /// Current session, if paired
    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// When the connection entered the waiting pool, if waiting
    pub fn enqueued_at(&self) -> Option<Instant> {
        self.enqueued_at
    }

    /// Enter the waiting state
    pub fn mark_waiting(&mut self, at: Instant) {
        self.session = None;
        self.enqueued_at = Some(at);
    }

    /// Enter the paired state
    pub fn mark_paired(&mut self, session: SessionId) {
        self.enqueued_at = None;
        self.session = Some(session);
    }

    /// Return to idle, dropping any session link or waiting mark
    pub fn mark_idle(&mut self) {
        self.session = None;
        self.enqueued_at = None;
    }
}
