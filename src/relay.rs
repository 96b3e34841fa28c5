//! Message relay
//!
//! Forwards a message from a sender to its current partner. The partner is
//! looked up once, before any image upload; the upload runs outside the
//! chat server so other connections are never held up by it. Delivery then
//! re-checks only that the partner is still registered.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::AppError;
use crate::image::ImageHost;
use crate::message::ServerMessage;
use crate::recorder::ChatEvent;
use crate::server::ServerHandle;
use crate::state::{ChatState, Effects};
use crate::types::{ConnectionId, SessionId};

/// A sender's partner, resolved when a relay starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub session_id: SessionId,
    pub partner: ConnectionId,
}

/// A message as received from the sender
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub image: Option<String>,
    pub expires_at: Option<i64>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Text may only be empty when an image is attached
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.image.is_none()
    }
}

/// A message ready for the partner, image already hosted (or dropped)
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub text: String,
    pub image_url: Option<String>,
    pub expires_at: Option<i64>,
    /// Whether the sender attached an image, hosted or not
    pub has_image: bool,
}

/// How a relay call ended
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Sender had no partner; nothing was sent
    Unpaired,
    /// Partner disconnected before delivery
    PartnerGone,
    Delivered { image_url: Option<String> },
}

impl ChatState {
    /// Resolve the sender's current partner
    pub fn route(&self, sender: ConnectionId) -> Option<Route> {
        let session_id = self.registry.get(sender)?.session()?.clone();
        let partner = self.sessions.get(&session_id)?.partner_of(sender)?;
        Some(Route {
            session_id,
            partner,
        })
    }

    /// Deliver to a previously resolved partner
    ///
    /// The partner must still be registered and must not have moved on to
    /// another session since the route was resolved.
    pub fn deliver(&self, route: &Route, sender: ConnectionId, delivery: Delivery) -> Effects {
        let mut effects = Effects::default();

        let Some(partner) = self.registry.get(route.partner) else {
            debug!("Partner {} gone, dropping message from {}", route.partner, sender);
            return effects;
        };
        if let Some(current) = partner.session() {
            if current != &route.session_id {
                debug!(
                    "Partner {} moved on to session {}, dropping message from {}",
                    route.partner, current, sender
                );
                return effects;
            }
        }

        effects.notify(
            route.partner,
            ServerMessage::Message {
                text: delivery.text.clone(),
                image_url: delivery.image_url.clone(),
                expires_at: delivery.expires_at,
            },
        );
        effects.record(ChatEvent::MessageSent {
            session_id: route.session_id.clone(),
            sender_id: sender,
            text: delivery.text,
            has_image: delivery.has_image,
            image_url: delivery.image_url,
        });
        effects
    }
}

/// Relays messages on behalf of one or more connections
///
/// Calls for the same sender must be awaited one after another; that is
/// what keeps a sender's messages in order.
#[derive(Clone)]
pub struct Relay {
    server: ServerHandle,
    images: Arc<dyn ImageHost>,
}

impl Relay {
    pub fn new(server: ServerHandle, images: Arc<dyn ImageHost>) -> Self {
        Self { server, images }
    }

    pub async fn relay(
        &self,
        sender: ConnectionId,
        message: OutgoingMessage,
    ) -> Result<RelayOutcome, AppError> {
        let Some(route) = self.server.route(sender).await? else {
            debug!("Dropping message from unpaired connection {}", sender);
            return Ok(RelayOutcome::Unpaired);
        };

        let has_image = message.image.is_some();
        let image_url = match message.image {
            Some(payload) => match self.images.host_image(&payload).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Image hosting failed for {}, sending text only: {}", sender, e);
                    None
                }
            },
            None => None,
        };

        let delivery = Delivery {
            text: message.text,
            image_url: image_url.clone(),
            expires_at: message.expires_at,
            has_image,
        };

        if self.server.deliver(route, sender, delivery).await? {
            Ok(RelayOutcome::Delivered { image_url })
        } else {
            Ok(RelayOutcome::PartnerGone)
        }
    }
}
