//! Anonymous Stranger-Pairing Relay Library
//!
//! A WebSocket server that pairs anonymous strangers into two-party chats
//! and relays their messages, built with tokio-tungstenite using the Actor
//! pattern for state management.
//!
//! # Features
//! - FIFO waiting pool with lazy skipping of vanished waiters
//! - One partner per connection; "find partner" while chatting skips
//! - Text and image relay, with images hosted by an external uploader
//! - Best-effort country labels from a CIDR table
//! - Fire-and-forget persistence of connection, session and message events
//! - Live waiting/session counts for monitoring
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning a `ChatState`
//!   (registry, waiting pool, sessions)
//! - Each connection has a `handler` task communicating with the server
//! - Image uploads and persistence run outside the actor, so a slow
//!   collaborator never stalls pairing for other connections
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use stranger_relay::{
//!     handle_connection, ChatServer, EventSink, NoGeoLocator, NoImageHost, Relay,
//!     TracingRecorder,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let events = EventSink::spawn(Arc::new(TracingRecorder));
//!     let server = ChatServer::spawn(256, Arc::new(NoGeoLocator), events);
//!     let relay = Relay::new(server.clone(), Arc::new(NoImageHost));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, server.clone(), relay.clone(), 32));
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod geo;
pub mod handler;
pub mod image;
pub mod message;
pub mod pairing;
pub mod pool;
pub mod recorder;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod state;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use connection::{Connection, ConnectionState};
pub use error::{AppError, CollaboratorError, ConfigError, SendError, StateError};
pub use geo::{CountryTable, GeoInfo, GeoLocator, NoGeoLocator};
pub use handler::handle_connection;
pub use image::{ImageHost, NoImageHost, UploadImageHost};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use pool::WaitingPool;
pub use recorder::{
    ChatEvent, EventRecorder, EventSink, JsonLinesRecorder, RecordedEvent, TracingRecorder,
};
pub use registry::{ConnectionRegistry, UNKNOWN_COUNTRY};
pub use relay::{Delivery, OutgoingMessage, Relay, RelayOutcome, Route};
pub use server::{ChatServer, ServerCommand, ServerHandle};
pub use session::{Session, SessionStore};
pub use state::{ChatState, Effects, Notice, Status};
pub use types::{ConnectionId, SessionId};
