//! Core data types for peer session aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::client::ClientKind;

/// Wall-clock timestamp of a trace event
pub type Timestamp = DateTime<Utc>;

/// Elapsed time from `start` to `end`, clamped at zero.
///
/// Trace timestamps are best-effort; an end that precedes its start yields
/// [`Duration::ZERO`] rather than a negative span.
pub fn elapsed(start: Timestamp, end: Timestamp) -> Duration {
    (end - start).to_std().unwrap_or(Duration::ZERO)
}

/// Per-topic component of a gossipsub peer score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicScore {
    #[serde(with = "humantime_serde")]
    pub time_in_mesh: Duration,
    pub first_message_deliveries: f64,
    pub mesh_message_deliveries: f64,
    pub invalid_message_deliveries: f64,
}

/// A peer's score as reported at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerScoreSnapshot {
    pub timestamp: Timestamp,
    pub score: f64,
    pub app_specific_score: f64,
    pub ip_colocation_factor: f64,
    pub behaviour_penalty: f64,
    pub topics: BTreeMap<String, TopicScore>,
}

/// Goodbye message received from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodbyeEvent {
    pub timestamp: Timestamp,
    pub code: u64,
    pub reason: String,
}

/// Gossip mesh membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeshKind {
    /// Topic mesh join
    Graft,
    /// Topic mesh leave
    Prune,
}

impl fmt::Display for MeshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshKind::Graft => write!(f, "GRAFT"),
            MeshKind::Prune => write!(f, "PRUNE"),
        }
    }
}

/// Which side of the connection issued a mesh control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshDirection {
    Sent,
    Received,
    #[default]
    Unknown,
}

impl MeshDirection {
    /// Lenient parse of the direction labels used by trace producers.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "sent" | "send" | "outbound" | "out" => MeshDirection::Sent,
            "received" | "recv" | "receive" | "inbound" | "in" => MeshDirection::Received,
            _ => MeshDirection::Unknown,
        }
    }
}

impl fmt::Display for MeshDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshDirection::Sent => write!(f, "sent"),
            MeshDirection::Received => write!(f, "received"),
            MeshDirection::Unknown => write!(f, "unknown"),
        }
    }
}

/// GRAFT/PRUNE event recorded against a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshEvent {
    pub timestamp: Timestamp,
    pub kind: MeshKind,
    pub direction: MeshDirection,
    pub topic: String,
    pub reason: String,
}

/// One contiguous connect -> disconnect interval for a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSession {
    pub connected_at: Timestamp,
    pub identified_at: Option<Timestamp>,
    pub disconnected_at: Option<Timestamp>,
    /// Set together with `disconnected_at`, never on its own
    #[serde(with = "humantime_serde")]
    pub duration: Option<Duration>,
    pub disconnected: bool,
    pub message_count: u64,
    pub peer_scores: Vec<PeerScoreSnapshot>,
    pub goodbye_events: Vec<GoodbyeEvent>,
    pub mesh_events: Vec<MeshEvent>,
}

impl ConnectionSession {
    /// Start a new open session.
    pub fn open(connected_at: Timestamp) -> Self {
        Self {
            connected_at,
            identified_at: None,
            disconnected_at: None,
            duration: None,
            disconnected: false,
            message_count: 0,
            peer_scores: Vec::new(),
            goodbye_events: Vec::new(),
            mesh_events: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.disconnected
    }

    /// Close the session at `disconnected_at` and return its duration.
    pub fn close(&mut self, disconnected_at: Timestamp) -> Duration {
        let duration = elapsed(self.connected_at, disconnected_at);
        self.disconnected = true;
        self.disconnected_at = Some(disconnected_at);
        self.duration = Some(duration);
        duration
    }

    /// Time from connect to protocol identification, if identified.
    pub fn identification_latency(&self) -> Option<Duration> {
        self.identified_at
            .map(|identified_at| elapsed(self.connected_at, identified_at))
    }
}

/// Everything known about one remote peer
///
/// At most one session is open at any time and, if present, it is the last
/// element of the session list. Sessions are appended only through
/// [`PeerRecord::push_session`], which upholds that rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub client_type: ClientKind,
    pub client_agent: String,
    #[serde(rename = "connection_sessions")]
    sessions: Vec<ConnectionSession>,
    pub total_connections: u64,
    pub total_message_count: u64,
    pub successful_handshakes: u64,
    pub failed_handshakes: u64,
    pub first_seen_at: Timestamp,
    pub last_seen_at: Timestamp,
    /// False until the first event is applied; creation time is only a
    /// placeholder for the seen bounds
    #[serde(skip, default = "observed_on_load")]
    observed: bool,
}

fn observed_on_load() -> bool {
    true
}

impl PeerRecord {
    /// Create an empty record first seen at `now`.
    pub fn new(peer_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            peer_id: peer_id.into(),
            client_type: ClientKind::Unknown,
            client_agent: String::new(),
            sessions: Vec::new(),
            total_connections: 0,
            total_message_count: 0,
            successful_handshakes: 0,
            failed_handshakes: 0,
            first_seen_at: now,
            last_seen_at: now,
            observed: false,
        }
    }

    pub fn sessions(&self) -> &[ConnectionSession] {
        &self.sessions
    }

    /// The open session, which can only ever be the last one.
    pub fn open_session(&self) -> Option<&ConnectionSession> {
        self.sessions.last().filter(|session| session.is_open())
    }

    pub(crate) fn open_session_mut(&mut self) -> Option<&mut ConnectionSession> {
        self.sessions.last_mut().filter(|session| session.is_open())
    }

    /// Append a freshly opened session.
    ///
    /// Any session still open is closed at the new session's connect time
    /// first, so the single-open-session rule holds for every caller.
    pub(crate) fn push_session(&mut self, session: ConnectionSession) -> &mut ConnectionSession {
        if let Some(previous) = self.sessions.last_mut().filter(|s| s.is_open()) {
            log::warn!(
                "Closing dangling session for {} before opening a new one",
                short_peer_id(&self.peer_id)
            );
            previous.close(session.connected_at);
        }
        self.sessions.push(session);
        let last = self.sessions.len() - 1;
        &mut self.sessions[last]
    }

    pub fn is_connected(&self) -> bool {
        self.open_session().is_some()
    }

    /// True if any session completed protocol identification.
    pub fn is_identified(&self) -> bool {
        self.sessions.iter().any(|s| s.identified_at.is_some())
    }

    /// Record evidence of the peer at `at`.
    ///
    /// The seen bounds span every applied event, whatever order events
    /// arrive in.
    pub fn touch(&mut self, at: Timestamp) {
        if !self.observed {
            self.observed = true;
            self.first_seen_at = at;
            self.last_seen_at = at;
            return;
        }
        if at < self.first_seen_at {
            self.first_seen_at = at;
        }
        if at > self.last_seen_at {
            self.last_seen_at = at;
        }
    }

    /// All goodbye events across sessions, oldest session first.
    pub fn goodbye_events(&self) -> impl Iterator<Item = &GoodbyeEvent> {
        self.sessions.iter().flat_map(|s| s.goodbye_events.iter())
    }
}

/// Shorten a peer identifier for log output
pub fn short_peer_id(peer_id: &str) -> &str {
    match peer_id.char_indices().nth(12) {
        Some((idx, _)) => &peer_id[..idx],
        None => peer_id,
    }
}
