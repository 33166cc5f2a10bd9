//! Event Classifier/Dispatcher.
//!
//! Routes each [`TraceEvent`] to the handler registered for its type tag and
//! keeps the per-peer event counters. Registration conflicts are the only
//! fatal error; everything per-event is reported and skipped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use super::handlers::{
    ConnectionHandler, DisconnectionHandler, EventContext, EventHandler, GoodbyeHandler,
    HandlerError, MeshHandler, PeerScoreHandler, StatusHandler,
};
use super::types::{self, TraceEvent, UNKNOWN_PEER};
use crate::peer::{short_peer_id, MeshKind, PeerStore, SessionPolicy};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Handler must specify a non-empty event type")]
    EmptyEventType,
    #[error("Handler for event type {0} already registered")]
    Duplicate(String),
}

/// What happened to one dispatched event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler processed the event
    Handled,
    /// No handler is registered for the type tag
    Unhandled,
    /// The payload carried no peer id; counted only
    UnknownPeer,
}

pub struct Dispatcher {
    store: Arc<dyn PeerStore>,
    handlers: HashMap<String, Box<dyn EventHandler>>,
}

impl Dispatcher {
    /// Dispatcher with no handlers registered.
    pub fn new(store: Arc<dyn PeerStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Dispatcher with every built-in handler registered.
    pub fn with_default_handlers(
        store: Arc<dyn PeerStore>,
        policy: SessionPolicy,
    ) -> Result<Self, RegistrationError> {
        let mut dispatcher = Self::new(store);
        dispatcher.register_default_handlers(policy)?;
        Ok(dispatcher)
    }

    pub fn register_handler(
        &mut self,
        event_type: &str,
        handler: Box<dyn EventHandler>,
    ) -> Result<(), RegistrationError> {
        if event_type.is_empty() {
            return Err(RegistrationError::EmptyEventType);
        }
        if self.handlers.contains_key(event_type) {
            return Err(RegistrationError::Duplicate(event_type.to_string()));
        }

        self.handlers.insert(event_type.to_string(), handler);
        log::debug!("Registered event handler for {}", event_type);
        Ok(())
    }

    pub fn register_default_handlers(
        &mut self,
        policy: SessionPolicy,
    ) -> Result<(), RegistrationError> {
        self.register_handler(types::CONNECTED, Box::new(ConnectionHandler::new(policy)))?;
        self.register_handler(types::DISCONNECTED, Box::new(DisconnectionHandler::new(policy)))?;
        self.register_handler(types::REQUEST_STATUS, Box::new(StatusHandler::new(policy)))?;
        self.register_handler(types::PEERSCORE, Box::new(PeerScoreHandler::new(policy)))?;
        self.register_handler(types::HANDLE_GOODBYE, Box::new(GoodbyeHandler::new(policy)))?;
        self.register_handler(types::GRAFT, Box::new(MeshHandler::new(MeshKind::Graft, policy)))?;
        self.register_handler(types::PRUNE, Box::new(MeshHandler::new(MeshKind::Prune, policy)))?;
        Ok(())
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn store(&self) -> &Arc<dyn PeerStore> {
        &self.store
    }

    /// Count and route one event.
    ///
    /// The counter for `(peer, type)` is incremented before routing, whether
    /// or not a handler exists.
    pub fn dispatch(&self, event: &TraceEvent) -> Result<DispatchOutcome, HandlerError> {
        let peer_id = event.peer_id();
        self.store.increment_event_count(&peer_id, &event.event_type);

        let Some(handler) = self.handlers.get(&event.event_type) else {
            log::debug!("Unhandled event type {}", event.event_type);
            return Ok(DispatchOutcome::Unhandled);
        };

        if peer_id == UNKNOWN_PEER {
            log::warn!("{} event without a peer id", event.event_type);
            return Ok(DispatchOutcome::UnknownPeer);
        }

        let ctx = EventContext {
            peer_id: &peer_id,
            event_type: &event.event_type,
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
            payload: &event.payload,
        };
        log::debug!(
            "Dispatching {} for {}",
            event.event_type,
            short_peer_id(&peer_id)
        );

        handler.handle(self.store.as_ref(), &ctx)?;
        Ok(DispatchOutcome::Handled)
    }
}
