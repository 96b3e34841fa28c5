//! Pairing engine
//!
//! Matches a searching connection with the oldest live waiter, and tears
//! sessions down. A connection that searches while paired is first moved
//! `paired -> waiting` by closing its session; its old partner is told.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::connection::ConnectionState;
use crate::error::StateError;
use crate::message::ServerMessage;
use crate::recorder::ChatEvent;
use crate::state::{ChatState, Effects};
use crate::types::ConnectionId;

impl ChatState {
    /// Pair `id` with the oldest live waiter, or queue it
    pub fn find_partner(&mut self, id: ConnectionId) -> Effects {
        let mut effects = Effects::default();

        if !self.registry.contains(id) {
            debug!("find_partner for unknown connection {}", id);
            return effects;
        }

        if self.teardown(id, &mut effects) {
            info!("Connection {} skipped its partner", id);
        }

        // Duplicate searches must not leave the id queued twice.
        self.pool.remove(id);

        loop {
            let Some(candidate) = self.pool.dequeue_next_live(&self.registry) else {
                self.pool.enqueue(id);
                if let Some(conn) = self.registry.get_mut(id) {
                    conn.mark_waiting(Instant::now());
                }
                effects.notify(id, ServerMessage::Searching);
                debug!("Connection {} is waiting ({} in pool)", id, self.pool.len());
                return effects;
            };

            match self.pair(id, candidate, &mut effects) {
                Ok(()) => return effects,
                Err(e) => error!("Discarding waiter {}: {}", candidate, e),
            }
        }
    }

    /// Open a session between `a` and the waiter `b`
    fn pair(
        &mut self,
        a: ConnectionId,
        b: ConnectionId,
        effects: &mut Effects,
    ) -> Result<(), StateError> {
        let a_country = self.pairable_country(a)?;
        let b_country = self.pairable_country(b)?;
        let waited = self
            .registry
            .get(b)
            .and_then(|conn| conn.enqueued_at())
            .map(|at| at.elapsed());

        let session = self.sessions.create(a, b)?;
        let session_id = session.id.clone();
        let participants = session.participants();

        for id in [a, b] {
            if let Some(conn) = self.registry.get_mut(id) {
                conn.mark_paired(session_id.clone());
            }
        }

        effects.notify(
            a,
            ServerMessage::Matched {
                country: b_country.clone(),
            },
        );
        effects.notify(
            b,
            ServerMessage::Matched {
                country: a_country.clone(),
            },
        );
        effects.record(ChatEvent::SessionOpened {
            session_id: session_id.clone(),
            participants,
            countries: [a_country, b_country],
        });

        info!("Matched {} with {} in session {}", a, b, session_id);
        if let Some(waited) = waited {
            debug!("Waiter {} waited {:?}", b, waited);
        }
        Ok(())
    }

    /// Country of a connection that is free to be paired
    fn pairable_country(&self, id: ConnectionId) -> Result<String, StateError> {
        match self.registry.get(id) {
            Some(conn) if conn.state() == ConnectionState::Paired => {
                Err(StateError::AlreadyPaired(id))
            }
            Some(conn) => Ok(conn.country.clone()),
            None => Err(StateError::Unregistered(id)),
        }
    }

    /// Close the session `id` belongs to, if any
    ///
    /// Clears both participants' session links and notifies the partner.
    /// Returns whether a session link existed.
    pub(crate) fn teardown(&mut self, id: ConnectionId, effects: &mut Effects) -> bool {
        let Some(conn) = self.registry.get_mut(id) else {
            return false;
        };
        let Some(session_id) = conn.session().cloned() else {
            return false;
        };
        conn.mark_idle();

        let Some(session) = self.sessions.close(&session_id) else {
            warn!("Connection {} pointed at closed session {}", id, session_id);
            return true;
        };

        if let Some(partner_id) = session.partner_of(id) {
            if let Some(partner) = self.registry.get_mut(partner_id) {
                if partner.session() == Some(&session_id) {
                    partner.mark_idle();
                    effects.notify(partner_id, ServerMessage::PeerDisconnected);
                }
            }
        }

        let duration_seconds = session.duration_seconds.unwrap_or(0);
        effects.record(ChatEvent::SessionClosed {
            session_id: session_id.clone(),
            duration_seconds,
        });
        info!("Session {} closed after {}s", session_id, duration_seconds);
        true
    }
}
