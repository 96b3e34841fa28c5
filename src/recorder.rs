//! Persistence collaborator
//!
//! Connection, session and message lifecycle events are handed to an
//! `EventSink`, which forwards them to an `EventRecorder` on its own task.
//! The chat server never waits on persistence.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::CollaboratorError;
use crate::geo::GeoInfo;
use crate::types::{ConnectionId, SessionId};

/// Lifecycle events worth persisting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    ConnectionOpened {
        connection_id: ConnectionId,
        address: Option<IpAddr>,
        country: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        geo: Option<GeoInfo>,
    },
    ConnectionClosed {
        connection_id: ConnectionId,
    },
    SessionOpened {
        session_id: SessionId,
        participants: [ConnectionId; 2],
        countries: [String; 2],
    },
    SessionClosed {
        session_id: SessionId,
        duration_seconds: u64,
    },
    MessageSent {
        session_id: SessionId,
        sender_id: ConnectionId,
        text: String,
        has_image: bool,
        image_url: Option<String>,
    },
}

/// An event stamped with the time it was emitted
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ChatEvent,
}

/// Durable storage for lifecycle events
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: &RecordedEvent) -> Result<(), CollaboratorError>;
}

/// Emits each event as a structured tracing record
#[derive(Debug, Default)]
pub struct TracingRecorder;

#[async_trait]
impl EventRecorder for TracingRecorder {
    async fn record(&self, event: &RecordedEvent) -> Result<(), CollaboratorError> {
        let json = serde_json::to_string(event)?;
        info!(target: "stranger_relay::events", "{}", json);
        Ok(())
    }
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesRecorder {
    file: Mutex<File>,
}

impl JsonLinesRecorder {
    pub async fn open(path: &Path) -> Result<Self, CollaboratorError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl EventRecorder for JsonLinesRecorder {
    async fn record(&self, event: &RecordedEvent) -> Result<(), CollaboratorError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Fire-and-forget handle for recording events
///
/// Events are queued on an unbounded channel and written in emission order
/// by a background task. Recorder failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<RecordedEvent>,
}

impl EventSink {
    /// Spawn the background writer. Must be called inside a Tokio runtime.
    pub fn spawn(recorder: Arc<dyn EventRecorder>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<RecordedEvent>();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = recorder.record(&event).await {
                    warn!("Failed to record event: {}", e);
                }
            }
            debug!("Event sink closed");
        });

        Self { sender }
    }

    /// Queue an event; never blocks
    pub fn emit(&self, event: ChatEvent) {
        let recorded = RecordedEvent {
            at: Utc::now(),
            event,
        };
        if self.sender.send(recorded).is_err() {
            debug!("Event sink gone, dropping event");
        }
    }
}
