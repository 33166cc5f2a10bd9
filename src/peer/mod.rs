//! Per-peer state and the analytics computed over it.
//!
//! This module owns the data model, the concurrent Peer Store, the rules that
//! apply classified events to sessions, and the pure analyzers used at report
//! time.

pub mod client;
pub mod goodbye;
pub mod session;
pub mod stats;
pub mod store;
pub mod types;

pub use client::{ClientKind, KnownClient};
pub use goodbye::{GoodbyeSummary, ReasonStats};
pub use session::{EventClass, PeerEvent, SessionMachine, SessionPolicy, Transition};
pub use stats::AggregateStats;
pub use store::{EventCounts, InMemoryPeerStore, PeerStore};
pub use types::*;
