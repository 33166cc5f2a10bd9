//! Report generation for peer session analysis.
//!
//! Generates both JSON and human-readable text reports from a single
//! [`PeerScoreReport`] value.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use humantime_serde::re::humantime::format_duration;
use serde::{Deserialize, Serialize};

use crate::peer::stats::AggregateStats;
use crate::peer::{goodbye, EventCounts, GoodbyeSummary, PeerRecord, Timestamp};
use crate::tool::IngestSummary;

/// Number of clients and reasons listed in the text report and summary
const TOP_N: usize = 10;

/// Everything known at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerScoreReport {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    #[serde(with = "humantime_serde")]
    pub run_duration: Duration,
    pub ingest: IngestSummary,
    pub total_peers: usize,
    pub active_peers: usize,
    pub stats: AggregateStats,
    pub goodbyes: GoodbyeSummary,
    /// Empty when the configuration excludes per-peer detail
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peers: BTreeMap<String, PeerRecord>,
    pub event_counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl PeerScoreReport {
    /// Build a report from store snapshots.
    pub fn build(
        started_at: Timestamp,
        finished_at: Timestamp,
        ingest: IngestSummary,
        peers: HashMap<String, PeerRecord>,
        event_counts: EventCounts,
        include_peers: bool,
    ) -> Self {
        let stats = AggregateStats::compute(&peers);
        let goodbyes = goodbye::summarize(&peers);

        Self {
            started_at,
            finished_at,
            run_duration: crate::peer::elapsed(started_at, finished_at),
            ingest,
            total_peers: peers.len(),
            active_peers: stats.connections.connected_peers,
            stats,
            goodbyes,
            peers: if include_peers {
                peers.into_iter().collect()
            } else {
                BTreeMap::new()
            },
            event_counts: event_counts
                .into_iter()
                .map(|(peer_id, counts)| (peer_id, counts.into_iter().collect()))
                .collect(),
        }
    }

    /// Total events counted per type across every peer.
    pub fn event_type_totals(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::new();
        for counts in self.event_counts.values() {
            for (event_type, count) in counts {
                *totals.entry(event_type.clone()).or_insert(0) += count;
            }
        }
        totals
    }
}

/// Generate JSON report
pub fn generate_json_report(report: &PeerScoreReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Generate human-readable text report
pub fn generate_text_report(report: &PeerScoreReport, output_path: &Path) -> Result<()> {
    let content = render_text(report);
    fs::write(output_path, content)
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

fn section(lines: &mut Vec<String>, title: &str) {
    lines.push("=".repeat(80));
    lines.push(format!("{:^80}", title));
    lines.push("=".repeat(80));
    lines.push(String::new());
}

/// Render the text report as a single string.
pub fn render_text(report: &PeerScoreReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    section(&mut lines, "PEER SCORE ANALYSIS");

    lines.push(format!("Run Start: {}", report.started_at.to_rfc3339()));
    lines.push(format!("Run End: {}", report.finished_at.to_rfc3339()));
    lines.push(format!("Run Duration: {}", format_duration(report.run_duration)));
    lines.push(format!(
        "Events: {} read, {} handled, {} unhandled, {} without peer, {} malformed",
        report.ingest.events,
        report.ingest.handled,
        report.ingest.unhandled,
        report.ingest.unknown_peer,
        report.ingest.malformed
    ));
    lines.push(format!(
        "Peers: {} total, {} connected at end of run",
        report.total_peers, report.active_peers
    ));
    lines.push(String::new());

    section(&mut lines, "CONNECTIONS");

    let connections = &report.stats.connections;
    lines.push(format!("Total sessions: {}", connections.total_connections));
    lines.push(format!(
        "Identified sessions: {} ({} never identified)",
        connections.successful_handshakes, connections.failed_handshakes
    ));

    let durations = &report.stats.durations;
    if durations.sessions > 0 {
        lines.push(format!("Closed sessions: {}", durations.sessions));
        lines.push(format!("  Average duration: {}", format_duration(durations.average)));
        lines.push(format!(
            "  Min: {}, Max: {}",
            format_duration(durations.min),
            format_duration(durations.max)
        ));
    } else {
        lines.push("Closed sessions: none".to_string());
    }

    let identification = &report.stats.identification;
    lines.push(format!(
        "Identified peers: {} of {}",
        identification.identified_peers, identification.total_peers
    ));
    if identification.identified_peers > 0 {
        lines.push(format!(
            "  Identification latency: avg {}, min {}, max {}",
            format_duration(identification.average_latency),
            format_duration(identification.min_latency),
            format_duration(identification.max_latency)
        ));
    }

    let messages = &report.stats.messages;
    lines.push(format!(
        "Messages: {} across {} peers",
        messages.total_messages, messages.peers_with_messages
    ));
    if messages.peers_with_messages > 0 {
        lines.push(format!(
            "  Per session: avg {:.1}, min {}, max {}",
            messages.average_messages_per_session,
            messages.min_messages_per_session,
            messages.max_messages_per_session
        ));
    }
    lines.push(String::new());

    section(&mut lines, "CLIENTS");

    let mut clients: Vec<(&String, &usize)> = report.stats.client_distribution.iter().collect();
    clients.sort_by(|a, b| b.1.cmp(a.1));
    for (client, count) in clients.iter().take(TOP_N) {
        let share = if report.total_peers > 0 {
            **count as f64 / report.total_peers as f64 * 100.0
        } else {
            0.0
        };
        lines.push(format!("  {:<12} {:>6} ({:.1}%)", client, count, share));
    }
    if clients.is_empty() {
        lines.push("  No peers observed".to_string());
    }
    lines.push(String::new());

    section(&mut lines, "GOODBYE REASONS");

    let goodbyes = &report.goodbyes;
    lines.push(format!(
        "Goodbye events: {} ({} distinct reasons)",
        goodbyes.total_events, goodbyes.unique_reasons
    ));
    for (i, stats) in goodbyes.reason_stats.iter().take(TOP_N).enumerate() {
        let codes: Vec<String> = stats.codes.iter().map(u64::to_string).collect();
        lines.push(format!(
            "  {}. {} - {} events (codes: {})",
            i + 1,
            stats.label(),
            stats.count,
            codes.join(", ")
        ));
    }
    if !goodbyes.code_frequency.is_empty() {
        lines.push(String::new());
        lines.push("Codes:".to_string());
        for (code, count) in &goodbyes.code_frequency {
            lines.push(format!("  {:>6}: {}", code, count));
        }
    }
    lines.push(String::new());

    let totals = report.event_type_totals();
    if !totals.is_empty() {
        section(&mut lines, "EVENT COUNTS");
        for (event_type, count) in &totals {
            lines.push(format!("  {:<16} {}", event_type, count));
        }
        lines.push(String::new());
    }

    lines.push("=".repeat(80));
    lines.join("\n")
}

/// Print a summary to stdout
pub fn print_summary(report: &PeerScoreReport) {
    println!("\n=== PEER SCORE ANALYSIS SUMMARY ===\n");
    println!("Run duration: {}", format_duration(report.run_duration));
    println!("Events: {}", report.ingest.events);
    println!("Peers: {} ({} connected)", report.total_peers, report.active_peers);

    let connections = &report.stats.connections;
    println!("\nSessions:");
    println!("  Total: {}", connections.total_connections);
    println!("  Identified: {}", connections.successful_handshakes);
    println!(
        "  Average duration: {}",
        format_duration(report.stats.durations.average)
    );

    if !report.goodbyes.top_reasons.is_empty() {
        println!("\nTop goodbye reasons:");
        for reason in &report.goodbyes.top_reasons {
            println!("  - {}", reason);
        }
    }

    println!();
}
