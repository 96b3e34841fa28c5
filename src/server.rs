//! ChatServer Actor implementation
//!
//! The central actor that owns all pairing state: connections, the waiting
//! pool and sessions. Uses the Actor pattern with mpsc channels for message
//! passing, so every mutation is serialized without locks.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{AppError, SendError};
use crate::geo::GeoLocator;
use crate::message::ServerMessage;
use crate::recorder::EventSink;
use crate::relay::{Delivery, Route};
use crate::state::{ChatState, Effects, Status};
use crate::types::ConnectionId;

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection opened
    Connect {
        connection_id: ConnectionId,
        address: Option<IpAddr>,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection closed
    Disconnect { connection_id: ConnectionId },
    /// Look for a partner, skipping the current one
    FindPartner { connection_id: ConnectionId },
    /// End the current chat and go idle
    EndChat { connection_id: ConnectionId },
    /// Resolve the sender's current partner
    Route {
        connection_id: ConnectionId,
        reply: oneshot::Sender<Option<Route>>,
    },
    /// Deliver a relayed message; replies whether the partner got it
    Deliver {
        route: Route,
        sender: ConnectionId,
        delivery: Delivery,
        reply: oneshot::Sender<bool>,
    },
    /// Live counts
    Status { reply: oneshot::Sender<Status> },
}

/// The main ChatServer actor
///
/// Processes commands one at a time, then dispatches the resulting notices
/// to connections and hands events to the event sink. The actor never
/// waits on a client: a connection whose outbound buffer is full is
/// disconnected.
pub struct ChatServer {
    state: ChatState,
    events: EventSink,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        geo: Arc<dyn GeoLocator>,
        events: EventSink,
    ) -> Self {
        Self {
            state: ChatState::new(geo),
            events,
            receiver,
        }
    }

    /// Spawn the actor on the current runtime and return a handle to it
    pub fn spawn(buffer: usize, geo: Arc<dyn GeoLocator>, events: EventSink) -> ServerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        tokio::spawn(ChatServer::new(cmd_rx, geo, events).run());
        ServerHandle::new(cmd_tx)
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        let effects = match cmd {
            ServerCommand::Connect {
                connection_id,
                address,
                sender,
            } => self.state.connect(connection_id, address, sender),
            ServerCommand::Disconnect { connection_id } => self.state.disconnect(connection_id),
            ServerCommand::FindPartner { connection_id } => {
                self.state.find_partner(connection_id)
            }
            ServerCommand::EndChat { connection_id } => self.state.end_chat(connection_id),
            ServerCommand::Route {
                connection_id,
                reply,
            } => {
                let _ = reply.send(self.state.route(connection_id));
                return;
            }
            ServerCommand::Deliver {
                route,
                sender,
                delivery,
                reply,
            } => {
                let effects = self.state.deliver(&route, sender, delivery);
                let delivered = !effects.notices.is_empty();
                self.dispatch(effects);
                let _ = reply.send(delivered);
                return;
            }
            ServerCommand::Status { reply } => {
                let _ = reply.send(self.state.status());
                return;
            }
        };

        self.dispatch(effects);
    }

    /// Send notices, then queue events for persistence
    ///
    /// Connections that cannot take a notice are disconnected, and the
    /// effects of that disconnect are dispatched in turn.
    fn dispatch(&mut self, effects: Effects) {
        let mut pending = VecDeque::from([effects]);

        while let Some(effects) = pending.pop_front() {
            let mut dead = Vec::new();

            for notice in effects.notices {
                let Some(conn) = self.state.registry().get(notice.to) else {
                    debug!("Dropping notice for departed connection {}", notice.to);
                    continue;
                };
                let Err(e) = conn.send(notice.message) else {
                    continue;
                };
                match e {
                    SendError::Full => {
                        warn!("Connection {} is not reading, disconnecting it", notice.to)
                    }
                    SendError::ChannelClosed => {
                        debug!("Outbound channel closed for {}", notice.to)
                    }
                }
                if !dead.contains(&notice.to) {
                    dead.push(notice.to);
                }
            }

            for event in effects.events {
                self.events.emit(event);
            }

            for id in dead {
                pending.push_back(self.state.disconnect(id));
            }
        }
    }
}

/// Cloneable handle for talking to the ChatServer actor
#[derive(Debug, Clone)]
pub struct ServerHandle {
    sender: mpsc::Sender<ServerCommand>,
}

impl ServerHandle {
    pub fn new(sender: mpsc::Sender<ServerCommand>) -> Self {
        Self { sender }
    }

    async fn send(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.sender.send(cmd).await.map_err(|_| AppError::ServerClosed)
    }

    async fn ask<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<T>) -> ServerCommand,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.send(cmd(reply)).await?;
        response.await.map_err(|_| AppError::ServerClosed)
    }

    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        address: Option<IpAddr>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), AppError> {
        self.send(ServerCommand::Connect {
            connection_id,
            address,
            sender,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), AppError> {
        self.send(ServerCommand::Disconnect { connection_id }).await
    }

    pub async fn find_partner(&self, connection_id: ConnectionId) -> Result<(), AppError> {
        self.send(ServerCommand::FindPartner { connection_id }).await
    }

    pub async fn end_chat(&self, connection_id: ConnectionId) -> Result<(), AppError> {
        self.send(ServerCommand::EndChat { connection_id }).await
    }

    pub async fn route(&self, connection_id: ConnectionId) -> Result<Option<Route>, AppError> {
        self.ask(|reply| ServerCommand::Route {
            connection_id,
            reply,
        })
        .await
    }

    pub async fn deliver(
        &self,
        route: Route,
        sender: ConnectionId,
        delivery: Delivery,
    ) -> Result<bool, AppError> {
        self.ask(|reply| ServerCommand::Deliver {
            route,
            sender,
            delivery,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<Status, AppError> {
        self.ask(|reply| ServerCommand::Status { reply }).await
    }
}
