//! Per-event-type handlers.
//!
//! A handler decodes its payload into a [`PeerEvent`] and applies it to the
//! Peer Store through the [`SessionMachine`]. Events that may be the first
//! evidence of a peer go through `update_or_create`; the rest require the
//! peer to exist already.

use serde_json::Value;

use super::payload;
use crate::peer::{
    short_peer_id, MeshKind, PeerEvent, PeerRecord, PeerStore, SessionMachine, SessionPolicy,
    Timestamp, Transition,
};

/// Per-event failures; logged by the caller, never fatal to a run
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Malformed {event_type} payload: {source}")]
    MalformedPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything a handler needs to know about one dispatched event
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    pub peer_id: &'a str,
    pub event_type: &'a str,
    pub timestamp: Timestamp,
    pub payload: &'a Value,
}

impl EventContext<'_> {
    fn malformed(&self, source: serde_json::Error) -> HandlerError {
        HandlerError::MalformedPayload {
            event_type: self.event_type.to_string(),
            source,
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, store: &dyn PeerStore, ctx: &EventContext<'_>) -> Result<(), HandlerError>;
}

/// Apply `event` to the peer's record and return the resulting transition.
///
/// `None` means the peer was unknown and the event class may not create it.
fn apply(
    store: &dyn PeerStore,
    machine: &SessionMachine,
    peer_id: &str,
    event: PeerEvent,
) -> Option<Transition> {
    let class = event.class();
    let mut event = Some(event);
    let mut transition = None;
    let mut mutator = |record: &mut PeerRecord| {
        if let Some(event) = event.take() {
            transition = Some(machine.apply(record, event));
        }
    };

    if machine.policy().creates_peer(class) {
        store.update_or_create(peer_id, &mut mutator);
    } else {
        store.update(peer_id, &mut mutator);
    }

    if let Some(t) = transition.as_ref().filter(|t| !t.mutated()) {
        log::debug!("{:?} event left {} unchanged ({:?})", class, short_peer_id(peer_id), t);
    }
    transition
}

/// Handles `CONNECTED`
#[derive(Debug, Default)]
pub struct ConnectionHandler {
    machine: SessionMachine,
}

impl ConnectionHandler {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            machine: SessionMachine::new(policy),
        }
    }
}

impl EventHandler for ConnectionHandler {
    fn handle(&self, store: &dyn PeerStore, ctx: &EventContext<'_>) -> Result<(), HandlerError> {
        let event = payload::decode_connect(ctx.timestamp, ctx.payload)
            .map_err(|e| ctx.malformed(e))?;

        if let Some(Transition::Opened) = apply(store, &self.machine, ctx.peer_id, event) {
            log::info!("Peer {} connected", short_peer_id(ctx.peer_id));
        }
        Ok(())
    }
}

/// Handles `DISCONNECTED`
#[derive(Debug, Default)]
pub struct DisconnectionHandler {
    machine: SessionMachine,
}

impl DisconnectionHandler {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            machine: SessionMachine::new(policy),
        }
    }
}

impl EventHandler for DisconnectionHandler {
    fn handle(&self, store: &dyn PeerStore, ctx: &EventContext<'_>) -> Result<(), HandlerError> {
        let event = payload::decode_disconnect(ctx.timestamp, ctx.payload)
            .map_err(|e| ctx.malformed(e))?;

        if let Some(Transition::Closed { duration }) =
            apply(store, &self.machine, ctx.peer_id, event)
        {
            log::info!(
                "Peer {} disconnected after {}",
                short_peer_id(ctx.peer_id),
                humantime_serde::re::humantime::format_duration(duration)
            );
        }
        Ok(())
    }
}

/// Handles `REQUEST_STATUS`, the identification handshake
#[derive(Debug, Default)]
pub struct StatusHandler {
    machine: SessionMachine,
}

impl StatusHandler {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            machine: SessionMachine::new(policy),
        }
    }
}

impl EventHandler for StatusHandler {
    fn handle(&self, store: &dyn PeerStore, ctx: &EventContext<'_>) -> Result<(), HandlerError> {
        let event = payload::decode_status(ctx.timestamp, ctx.payload)
            .map_err(|e| ctx.malformed(e))?;

        if let PeerEvent::Identify { error: Some(error), .. } = &event {
            log::debug!(
                "Status exchange with {} failed: {}",
                short_peer_id(ctx.peer_id),
                error
            );
        }

        if let Some(Transition::Identified { session_marked: true }) =
            apply(store, &self.machine, ctx.peer_id, event)
        {
            if let Some(record) = store.get(ctx.peer_id) {
                log::info!(
                    "Peer {} identified as {} ({})",
                    short_peer_id(ctx.peer_id),
                    record.client_type,
                    record.client_agent
                );
            }
        }
        Ok(())
    }
}

/// Handles `PEERSCORE`
#[derive(Debug, Default)]
pub struct PeerScoreHandler {
    machine: SessionMachine,
}

impl PeerScoreHandler {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            machine: SessionMachine::new(policy),
        }
    }
}

impl EventHandler for PeerScoreHandler {
    fn handle(&self, store: &dyn PeerStore, ctx: &EventContext<'_>) -> Result<(), HandlerError> {
        let event = payload::decode_score(ctx.timestamp, ctx.payload)
            .map_err(|e| ctx.malformed(e))?;

        if let PeerEvent::Score(score) = &event {
            log::debug!(
                "Score {:.3} for {} across {} topics",
                score.score,
                short_peer_id(ctx.peer_id),
                score.topics.len()
            );
        }

        if let Some(Transition::NoOpenSession) = apply(store, &self.machine, ctx.peer_id, event) {
            log::warn!(
                "Dropped peer score for {}: no open session",
                short_peer_id(ctx.peer_id)
            );
        }
        Ok(())
    }
}

/// Handles `HANDLE_GOODBYE`
#[derive(Debug, Default)]
pub struct GoodbyeHandler {
    machine: SessionMachine,
}

impl GoodbyeHandler {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            machine: SessionMachine::new(policy),
        }
    }
}

impl EventHandler for GoodbyeHandler {
    fn handle(&self, store: &dyn PeerStore, ctx: &EventContext<'_>) -> Result<(), HandlerError> {
        let event = payload::decode_goodbye(ctx.timestamp, ctx.payload)
            .map_err(|e| ctx.malformed(e))?;

        if let PeerEvent::Goodbye(goodbye) = &event {
            log::debug!(
                "Goodbye from {}: code={} reason={:?}",
                short_peer_id(ctx.peer_id),
                goodbye.code,
                goodbye.reason
            );
        }

        if let Some(Transition::NoOpenSession) = apply(store, &self.machine, ctx.peer_id, event) {
            log::warn!(
                "Dropped goodbye from {}: no open session",
                short_peer_id(ctx.peer_id)
            );
        }
        Ok(())
    }
}

/// Handles `GRAFT` or `PRUNE`, one instance per kind
#[derive(Debug)]
pub struct MeshHandler {
    kind: MeshKind,
    machine: SessionMachine,
}

impl MeshHandler {
    pub fn new(kind: MeshKind, policy: SessionPolicy) -> Self {
        Self {
            kind,
            machine: SessionMachine::new(policy),
        }
    }
}

impl EventHandler for MeshHandler {
    fn handle(&self, store: &dyn PeerStore, ctx: &EventContext<'_>) -> Result<(), HandlerError> {
        let event = payload::decode_mesh(self.kind, ctx.timestamp, ctx.payload)
            .map_err(|e| ctx.malformed(e))?;

        if let PeerEvent::Mesh(mesh) = &event {
            log::debug!(
                "{} {} {} on {}",
                mesh.kind,
                mesh.direction,
                short_peer_id(ctx.peer_id),
                mesh.topic
            );
        }

        if let Some(Transition::NoOpenSession) = apply(store, &self.machine, ctx.peer_id, event) {
            log::warn!(
                "Dropped {} for {}: no open session",
                self.kind,
                short_peer_id(ctx.peer_id)
            );
        }
        Ok(())
    }
}
