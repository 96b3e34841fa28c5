//! Owned chat state
//!
//! `ChatState` holds the registry, the waiting pool and the session store.
//! Its methods are synchronous and return `Effects`: the outbound notices
//! and persistence events the caller should dispatch afterwards.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::connection::ConnectionState;
use crate::geo::GeoLocator;
use crate::message::ServerMessage;
use crate::pool::WaitingPool;
use crate::recorder::ChatEvent;
use crate::registry::ConnectionRegistry;
use crate::session::SessionStore;
use crate::types::ConnectionId;

/// A message addressed to one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub to: ConnectionId,
    pub message: ServerMessage,
}

/// Work produced by a state transition
#[derive(Debug, Default)]
pub struct Effects {
    pub notices: Vec<Notice>,
    pub events: Vec<ChatEvent>,
}

impl Effects {
    pub fn notify(&mut self, to: ConnectionId, message: ServerMessage) {
        self.notices.push(Notice { to, message });
    }

    pub fn record(&mut self, event: ChatEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty() && self.events.is_empty()
    }

    /// Notices addressed to `id`, in emission order
    pub fn notices_for(&self, id: ConnectionId) -> Vec<&ServerMessage> {
        self.notices
            .iter()
            .filter(|n| n.to == id)
            .map(|n| &n.message)
            .collect()
    }
}

/// Live counts for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub connection_count: usize,
    pub waiting_count: usize,
    pub active_session_count: usize,
}

pub struct ChatState {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) pool: WaitingPool,
    pub(crate) sessions: SessionStore,
}

impl ChatState {
    pub fn new(geo: Arc<dyn GeoLocator>) -> Self {
        Self {
            registry: ConnectionRegistry::new(geo),
            pool: WaitingPool::new(),
            sessions: SessionStore::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WaitingPool {
        &self.pool
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Register a newly connected socket
    pub fn connect(
        &mut self,
        id: ConnectionId,
        address: Option<IpAddr>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Effects {
        let mut effects = Effects::default();
        let conn = self.registry.register(id, address, sender);
        info!("Connection {} registered from {}", id, conn.country);

        effects.record(ChatEvent::ConnectionOpened {
            connection_id: id,
            address,
            country: conn.country.clone(),
            geo: conn.geo.clone(),
        });
        effects
    }

    /// Leave the current chat or the waiting pool, staying registered
    pub fn end_chat(&mut self, id: ConnectionId) -> Effects {
        let mut effects = Effects::default();
        self.teardown(id, &mut effects);

        if self.pool.remove(id) {
            debug!("Connection {} left the waiting pool", id);
        }
        if let Some(conn) = self.registry.get_mut(id) {
            conn.mark_idle();
        }
        effects
    }

    /// Purge a connection, ending its chat first
    pub fn disconnect(&mut self, id: ConnectionId) -> Effects {
        let mut effects = self.end_chat(id);

        if self.registry.remove(id).is_some() {
            info!("Connection {} removed", id);
            effects.record(ChatEvent::ConnectionClosed { connection_id: id });
        }
        debug!(
            "Total connections: {}, waiting: {}, sessions: {}",
            self.registry.len(),
            self.pool.len(),
            self.sessions.len()
        );
        effects
    }

    pub fn status(&self) -> Status {
        Status {
            connection_count: self.registry.len(),
            waiting_count: self.pool.live_count(&self.registry),
            active_session_count: self.sessions.len(),
        }
    }

    pub fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.registry.get(id).map(|c| c.state())
    }
}
