//! Client implementation classification.
//!
//! Agent strings reported during the handshake are free text
//! (`Lighthouse/v5.1.3-3058b96/x86_64-linux`, `teku/v24.4.0`, ...). They are
//! reduced to a canonical client name with an ordered substring table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name used for peers whose client could not be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Consensus clients recognised by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KnownClient {
    Lighthouse,
    Prysm,
    Teku,
    Nimbus,
    Lodestar,
    Grandine,
    Caplin,
}

impl KnownClient {
    pub const ALL: [KnownClient; 7] = [
        KnownClient::Lighthouse,
        KnownClient::Prysm,
        KnownClient::Teku,
        KnownClient::Nimbus,
        KnownClient::Lodestar,
        KnownClient::Grandine,
        KnownClient::Caplin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KnownClient::Lighthouse => "lighthouse",
            KnownClient::Prysm => "prysm",
            KnownClient::Teku => "teku",
            KnownClient::Nimbus => "nimbus",
            KnownClient::Lodestar => "lodestar",
            KnownClient::Grandine => "grandine",
            KnownClient::Caplin => "caplin",
        }
    }
}

/// Classification rules, evaluated in order against the lower-cased agent.
///
/// The first rule whose needle occurs in the agent string wins.
pub const CLIENT_RULES: &[(&str, KnownClient)] = &[
    ("lighthouse", KnownClient::Lighthouse),
    ("prysm", KnownClient::Prysm),
    ("teku", KnownClient::Teku),
    ("nimbus", KnownClient::Nimbus),
    ("lodestar", KnownClient::Lodestar),
    ("grandine", KnownClient::Grandine),
    ("caplin", KnownClient::Caplin),
    ("erigon", KnownClient::Caplin),
];

/// Classified client implementation of a peer.
///
/// Serialized as its plain name so reports read `"lighthouse"` rather than
/// an enum structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClientKind {
    Known(KnownClient),
    /// First token of an agent string that matched no rule
    Other(String),
    #[default]
    Unknown,
}

impl ClientKind {
    /// Classify a raw agent string.
    ///
    /// Falls back to the first whitespace-delimited token of the agent, and to
    /// [`ClientKind::Unknown`] when the agent is blank.
    pub fn classify(agent: &str) -> Self {
        let agent = agent.to_lowercase();

        for (needle, client) in CLIENT_RULES {
            if agent.contains(needle) {
                return ClientKind::Known(*client);
            }
        }

        match agent.split_whitespace().next() {
            Some(token) => ClientKind::from_name(token),
            None => ClientKind::Unknown,
        }
    }

    /// Parse a canonical name back into a client kind.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(UNKNOWN_CLIENT) {
            return ClientKind::Unknown;
        }

        KnownClient::ALL
            .iter()
            .find(|client| client.name().eq_ignore_ascii_case(name))
            .map(|client| ClientKind::Known(*client))
            .unwrap_or_else(|| ClientKind::Other(name.to_string()))
    }

    pub fn name(&self) -> &str {
        match self {
            ClientKind::Known(client) => client.name(),
            ClientKind::Other(name) => name,
            ClientKind::Unknown => UNKNOWN_CLIENT,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ClientKind::Unknown)
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for ClientKind {
    fn from(name: String) -> Self {
        ClientKind::from_name(&name)
    }
}

impl From<ClientKind> for String {
    fn from(kind: ClientKind) -> Self {
        kind.name().to_string()
    }
}
