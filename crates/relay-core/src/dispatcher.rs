//! Relay dispatcher: connection lifecycle and message forwarding.
//!
//! The dispatcher owns the registry and the outbound sink of every live
//! connection. It is driven by exactly one caller at a time (the relay loop),
//! so neither table needs a lock.
//!
//! Per-connection state:
//!
//! ```text
//! on_connect ──► Connected ──on_register──► Registered ──┐
//!                    │                          ▲         │ on_register
//!                    │                          └─────────┘
//!                    └───────── on_disconnect ──────────► Disconnected
//! ```
//!
//! Delivery is fire-and-forget. The sender never learns whether a message
//! reached anyone; [`DeliveryResult`] exists for metrics and tests only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::SinkError;
use crate::ids::{ConnectionId, UserId};
use crate::protocol::{ChatMessage, OutboundEvent, ReceivedMessage, encode_frame};
use crate::registry::{ConnectionRegistry, InMemoryRegistry};

/// Outbound side of one connection.
///
/// `try_send` must not block: the dispatcher never waits on a slow client.
pub trait ConnectionSink: Send + Sync {
    /// Queue an encoded frame for the connection's writer.
    fn try_send(&self, frame: Arc<String>) -> Result<(), SinkError>;
}

/// What happened to a single `send_message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Queued on the recipient's connection.
    Delivered,
    /// No connection is registered for the recipient.
    UnknownRecipient,
    /// The recipient's connection could not take the frame.
    RecipientUnreachable,
    /// The sending connection was already cleaned up.
    SenderDisconnected,
}

impl DeliveryResult {
    /// Stable label for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::UnknownRecipient => "unknown_recipient",
            Self::RecipientUnreachable => "recipient_unreachable",
            Self::SenderDisconnected => "sender_disconnected",
        }
    }
}

/// Routes relay events against a [`ConnectionRegistry`].
pub struct RelayDispatcher<R = InMemoryRegistry> {
    registry: R,
    connections: HashMap<ConnectionId, Arc<dyn ConnectionSink>>,
}

impl Default for RelayDispatcher<InMemoryRegistry> {
    fn default() -> Self {
        Self::new(InMemoryRegistry::new())
    }
}

impl<R: ConnectionRegistry> RelayDispatcher<R> {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
        }
    }

    /// A transport connection was accepted.
    pub fn on_connect(&mut self, handle: ConnectionId, sink: Arc<dyn ConnectionSink>) {
        debug!(conn_id = %handle, "connection opened");
        let _ = self.connections.insert(handle, sink);
    }

    /// Bind `identity` to `handle`.
    ///
    /// Returns `false` when the handle is no longer live; the registration is
    /// then ignored so a late event cannot resurrect a closed connection.
    pub fn on_register(&mut self, handle: &ConnectionId, identity: UserId) -> bool {
        if !self.connections.contains_key(handle) {
            debug!(conn_id = %handle, user_id = %identity, "register from closed connection ignored");
            return false;
        }

        if let Some(displaced) = self.registry.register(identity.clone(), handle.clone()) {
            debug!(
                conn_id = %handle,
                user_id = %identity,
                displaced = %displaced,
                "identity moved to a newer connection"
            );
        }
        info!(conn_id = %handle, user_id = %identity, "user registered");
        true
    }

    /// Forward `msg` to its recipient, stamped with the current time.
    pub fn on_message(&mut self, handle: &ConnectionId, msg: ChatMessage) -> DeliveryResult {
        self.on_message_at(handle, msg, Utc::now())
    }

    /// Forward `msg` to its recipient, stamped with `at`.
    pub fn on_message_at(
        &mut self,
        handle: &ConnectionId,
        msg: ChatMessage,
        at: DateTime<Utc>,
    ) -> DeliveryResult {
        if !self.connections.contains_key(handle) {
            debug!(conn_id = %handle, "message from closed connection ignored");
            return DeliveryResult::SenderDisconnected;
        }

        let Some(target) = self.registry.lookup(&msg.to) else {
            debug!(from = %msg.from, to = %msg.to, "recipient not registered, message dropped");
            return DeliveryResult::UnknownRecipient;
        };

        let Some(sink) = self.connections.get(&target).cloned() else {
            // Entry outlived its connection; clean it up now.
            let _ = self.registry.remove_by_handle(&target);
            debug!(to = %msg.to, conn_id = %target, "recipient connection gone, message dropped");
            return DeliveryResult::RecipientUnreachable;
        };

        let from = msg.from.clone();
        let to = msg.to.clone();
        let event = OutboundEvent::ReceiveMessage(ReceivedMessage::from_chat(msg, at));
        let frame = match encode_frame(&event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to encode receive_message");
                return DeliveryResult::RecipientUnreachable;
            }
        };

        match sink.try_send(frame) {
            Ok(()) => {
                debug!(%from, %to, conn_id = %target, "message relayed");
                DeliveryResult::Delivered
            }
            Err(SinkError::Full) => {
                warn!(%from, %to, conn_id = %target, "recipient queue full, message dropped");
                DeliveryResult::RecipientUnreachable
            }
            Err(SinkError::Closed) => {
                info!(%to, conn_id = %target, "recipient connection closed, cleaning up");
                let _ = self.on_disconnect(&target);
                DeliveryResult::RecipientUnreachable
            }
        }
    }

    /// The transport connection closed. Idempotent.
    ///
    /// Returns the identity that was unbound, if any.
    pub fn on_disconnect(&mut self, handle: &ConnectionId) -> Option<UserId> {
        let was_live = self.connections.remove(handle).is_some();
        let removed = self.registry.remove_by_handle(handle);
        match &removed {
            Some(identity) => info!(conn_id = %handle, user_id = %identity, "user unregistered"),
            None if was_live => debug!(conn_id = %handle, "unregistered connection closed"),
            None => {}
        }
        removed
    }

    /// Whether `handle` is a live connection.
    pub fn is_connected(&self, handle: &ConnectionId) -> bool {
        self.connections.contains_key(handle)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of registered identities.
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Read access to the underlying registry.
    pub fn registry(&self) -> &R {
        &self.registry
    }
}
