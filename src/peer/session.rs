//! Session State Machine.
//!
//! Rules for how a classified peer event mutates a [`PeerRecord`]. The
//! machine itself holds no state between calls beyond its [`SessionPolicy`];
//! it is always invoked with exclusive access to the record it mutates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::client::ClientKind;
use super::types::{
    short_peer_id, ConnectionSession, GoodbyeEvent, MeshEvent, PeerRecord, PeerScoreSnapshot,
    Timestamp,
};

/// Semantic class of a peer event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Connect,
    Disconnect,
    Identify,
    Score,
    Goodbye,
    Mesh,
}

/// Strongly-typed event, decoded at the transport boundary
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Connect {
        at: Timestamp,
        agent: Option<String>,
    },
    Disconnect {
        at: Timestamp,
    },
    /// Status handshake; `error` is set when the exchange failed
    Identify {
        at: Timestamp,
        agent: Option<String>,
        error: Option<String>,
    },
    Score(PeerScoreSnapshot),
    Goodbye(GoodbyeEvent),
    Mesh(MeshEvent),
}

impl PeerEvent {
    pub fn class(&self) -> EventClass {
        match self {
            PeerEvent::Connect { .. } => EventClass::Connect,
            PeerEvent::Disconnect { .. } => EventClass::Disconnect,
            PeerEvent::Identify { .. } => EventClass::Identify,
            PeerEvent::Score(_) => EventClass::Score,
            PeerEvent::Goodbye(_) => EventClass::Goodbye,
            PeerEvent::Mesh(_) => EventClass::Mesh,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            PeerEvent::Connect { at, .. }
            | PeerEvent::Disconnect { at }
            | PeerEvent::Identify { at, .. } => *at,
            PeerEvent::Score(score) => score.timestamp,
            PeerEvent::Goodbye(goodbye) => goodbye.timestamp,
            PeerEvent::Mesh(mesh) => mesh.timestamp,
        }
    }
}

/// Which event classes may open a session when none is open.
///
/// Score and mesh events imply an ongoing connection and synthesize a
/// session by default. A goodbye alone does not, and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    pub score_opens_session: bool,
    pub mesh_opens_session: bool,
    pub goodbye_opens_session: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            score_opens_session: true,
            mesh_opens_session: true,
            goodbye_opens_session: false,
        }
    }
}

impl SessionPolicy {
    /// Whether an event of `class` may synthesize a session.
    pub fn opens_session(&self, class: EventClass) -> bool {
        match class {
            EventClass::Connect => true,
            EventClass::Disconnect | EventClass::Identify => false,
            EventClass::Score => self.score_opens_session,
            EventClass::Mesh => self.mesh_opens_session,
            EventClass::Goodbye => self.goodbye_opens_session,
        }
    }

    /// Whether an event of `class` may be the first evidence of a peer.
    ///
    /// Same answer as [`SessionPolicy::opens_session`]: an event that cannot
    /// open a session has nothing to record on a brand new peer.
    pub fn creates_peer(&self, class: EventClass) -> bool {
        self.opens_session(class)
    }
}

/// Result of applying one event to a record
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A new session was opened
    Opened,
    /// Connect while a session is already open; nothing changed
    DuplicateConnect,
    /// The open session was closed
    Closed { duration: Duration },
    /// Handshake recorded; `session_marked` if the open session was stamped
    Identified { session_marked: bool },
    /// Value appended to the open session
    Appended,
    /// No open session existed, one was synthesized at the event time
    AppendedToNewSession,
    /// No open session and the policy forbids opening one; nothing changed
    NoOpenSession,
}

impl Transition {
    /// True if the record was modified.
    pub fn mutated(&self) -> bool {
        !matches!(self, Transition::DuplicateConnect | Transition::NoOpenSession)
    }
}

/// Applies [`PeerEvent`]s to [`PeerRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionMachine {
    policy: SessionPolicy,
}

impl SessionMachine {
    pub fn new(policy: SessionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Apply any event to `record`.
    pub fn apply(&self, record: &mut PeerRecord, event: PeerEvent) -> Transition {
        match event {
            PeerEvent::Connect { at, agent } => self.connect(record, at, agent.as_deref()),
            PeerEvent::Disconnect { at } => self.disconnect(record, at),
            PeerEvent::Identify { at, agent, error } => {
                self.identify(record, at, agent.as_deref(), error.is_some())
            }
            PeerEvent::Score(score) => self.add_score(record, score),
            PeerEvent::Goodbye(goodbye) => self.add_goodbye(record, goodbye),
            PeerEvent::Mesh(mesh) => self.add_mesh(record, mesh),
        }
    }

    pub fn connect(
        &self,
        record: &mut PeerRecord,
        at: Timestamp,
        agent: Option<&str>,
    ) -> Transition {
        if record.open_session().is_some() {
            log::debug!("Duplicate connection event for {}", short_peer_id(&record.peer_id));
            return Transition::DuplicateConnect;
        }

        record.push_session(ConnectionSession::open(at));
        record.total_connections += 1;
        if let Some(agent) = agent {
            assign_client(record, agent);
        }
        record.touch(at);

        log::debug!(
            "Started session {} for {}",
            record.sessions().len(),
            short_peer_id(&record.peer_id)
        );
        Transition::Opened
    }

    pub fn disconnect(&self, record: &mut PeerRecord, at: Timestamp) -> Transition {
        let Some(session) = record.open_session_mut() else {
            log::warn!(
                "No open session to disconnect for {}",
                short_peer_id(&record.peer_id)
            );
            return Transition::NoOpenSession;
        };

        let duration = session.close(at);
        record.touch(at);

        log::debug!(
            "Ended session for {} after {:?}",
            short_peer_id(&record.peer_id),
            duration
        );
        Transition::Closed { duration }
    }

    /// Record a status handshake.
    ///
    /// Stamps `identified_at` on the open session the first time a
    /// successful status arrives. Client classification is only filled in
    /// while it is still unknown.
    pub fn identify(
        &self,
        record: &mut PeerRecord,
        at: Timestamp,
        agent: Option<&str>,
        failed: bool,
    ) -> Transition {
        let session_marked = match record.open_session_mut() {
            Some(session) if !failed && session.identified_at.is_none() => {
                session.identified_at = Some(at);
                true
            }
            _ => false,
        };

        if let Some(agent) = agent {
            assign_client(record, agent);
        }

        if failed {
            record.failed_handshakes += 1;
        } else {
            record.successful_handshakes += 1;
        }
        record.touch(at);

        Transition::Identified { session_marked }
    }

    pub fn add_score(&self, record: &mut PeerRecord, score: PeerScoreSnapshot) -> Transition {
        let at = score.timestamp;
        self.append(record, EventClass::Score, at, |session| {
            session.peer_scores.push(score)
        })
    }

    pub fn add_goodbye(&self, record: &mut PeerRecord, goodbye: GoodbyeEvent) -> Transition {
        let at = goodbye.timestamp;
        self.append(record, EventClass::Goodbye, at, |session| {
            session.goodbye_events.push(goodbye)
        })
    }

    pub fn add_mesh(&self, record: &mut PeerRecord, mesh: MeshEvent) -> Transition {
        let at = mesh.timestamp;
        self.append(record, EventClass::Mesh, at, |session| {
            session.mesh_events.push(mesh)
        })
    }

    fn append(
        &self,
        record: &mut PeerRecord,
        class: EventClass,
        at: Timestamp,
        push: impl FnOnce(&mut ConnectionSession),
    ) -> Transition {
        let transition = if let Some(session) = record.open_session_mut() {
            push(session);
            session.message_count += 1;
            Transition::Appended
        } else if self.policy.opens_session(class) {
            log::debug!(
                "Creating new session for {:?} event from {}",
                class,
                short_peer_id(&record.peer_id)
            );
            let session = record.push_session(ConnectionSession::open(at));
            push(session);
            session.message_count += 1;
            Transition::AppendedToNewSession
        } else {
            return Transition::NoOpenSession;
        };

        record.total_message_count += 1;
        record.touch(at);
        transition
    }
}

/// Fill in client details the record does not have yet.
fn assign_client(record: &mut PeerRecord, agent: &str) {
    let agent = agent.trim();
    if agent.is_empty() {
        return;
    }

    if record.client_type.is_unknown() {
        record.client_type = ClientKind::classify(agent);
    }
    if record.client_agent.is_empty() {
        record.client_agent = agent.to_string();
    }
}
