//! Connection registry
//!
//! Tracks every live connection. Knows nothing about the waiting pool or
//! sessions; those consult the registry, never the other way round.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::Connection;
use crate::geo::GeoLocator;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Country label used when geolocation has no answer
pub const UNKNOWN_COUNTRY: &str = "Unknown";

pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    geo: Arc<dyn GeoLocator>,
}

impl ConnectionRegistry {
    pub fn new(geo: Arc<dyn GeoLocator>) -> Self {
        Self {
            connections: HashMap::new(),
            geo,
        }
    }

    /// Register a new idle connection, geolocating it best-effort
    ///
    /// Re-registering an existing id replaces the old record.
    pub fn register(
        &mut self,
        id: ConnectionId,
        address: Option<IpAddr>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> &Connection {
        let geo = match address.map(|addr| (addr, self.geo.locate(addr))) {
            Some((_, Ok(info))) => Some(info),
            Some((addr, Err(e))) => {
                debug!("No geolocation for {}: {}", addr, e);
                None
            }
            None => None,
        };
        let country = geo
            .as_ref()
            .map_or_else(|| UNKNOWN_COUNTRY.to_string(), |info| info.country.clone());

        self.connections
            .insert(id, Connection::new(id, address, country, geo, sender));
        &self.connections[&id]
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Purge a connection. Safe to call for unknown ids.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
