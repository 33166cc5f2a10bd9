//! # Peerscore - Peer session aggregation for gossip network traces
//!
//! This library turns a stream of trace events recorded by a monitoring node
//! into per-peer connection histories and population-wide statistics.
//!
//! ## Overview
//!
//! A monitoring node on a gossip-based peer-to-peer network emits trace
//! events for every connection, status handshake, score update, goodbye
//! message and mesh change involving a remote peer. Peerscore replays those
//! events into a concurrent model of what is true about each peer, then
//! summarizes why peers leave and how healthy the node's participation is.
//!
//! ## Key Features
//!
//! - **Session tracking**: connect/disconnect pairs become sessions, with
//!   duplicate connects and out-of-order events handled explicitly
//! - **Client classification**: agent strings map onto known consensus clients
//! - **Goodbye analysis**: reasons grouped case-insensitively and ranked
//! - **Aggregate statistics**: session durations, identification latency,
//!   message counts and client distribution
//! - **Concurrent ingestion**: several trace feeds replayed in parallel into
//!   one store
//!
//! ## Architecture
//!
//! - `peer`: data model, Peer Store, Session State Machine and analyzers
//! - `events`: raw trace events, payload decoding, handlers and dispatcher
//! - `config`: YAML configuration and validation
//! - `tool`: the run driver tying ingestion, status reporting and reports
//! - `report`: JSON and text report writers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use peerscore::config::Config;
//! use peerscore::tool::PeerScoreTool;
//!
//! let tool = PeerScoreTool::new(Config::default())?;
//! let summary = tool.ingest_files(&["trace.jsonl".into()])?;
//! let report = tool.generate_report(&summary);
//! peerscore::report::print_summary(&report);
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Trace Format
//!
//! Feeds are JSON lines, one event per line:
//!
//! ```json
//! {"Type":"CONNECTED","Timestamp":"2024-05-01T12:00:00Z","Payload":{"PeerID":"16Uiu2...","AgentVersion":"Lighthouse/v5.1.0"}}
//! ```
//!
//! ## Error Handling
//!
//! Per-event problems are logged and counted, never fatal. Setup and I/O
//! paths return `color_eyre::eyre::Result` with context.

pub mod config;
pub mod events;
pub mod peer;
pub mod report;
pub mod tool;
