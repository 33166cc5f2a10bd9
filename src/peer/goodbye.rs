//! Goodbye reason analysis.
//!
//! Groups goodbye events by normalized reason text and ranks the groups
//! by frequency.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::types::{GoodbyeEvent, PeerRecord};

/// Group key for events with an empty reason
pub const UNKNOWN_REASON: &str = "unknown";

/// Label used in the top-reasons list for an empty original reason
pub const NO_REASON_LABEL: &str = "no reason provided";

/// Number of reasons listed in [`GoodbyeSummary::top_reasons`]
pub const TOP_REASON_COUNT: usize = 5;

/// Distinct example strings kept per reason group
pub const MAX_REASON_EXAMPLES: usize = 3;

/// Statistics for one normalized goodbye reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonStats {
    /// Normalized grouping key
    pub key: String,
    /// Original reason text of the first event in the group
    pub reason: String,
    pub count: usize,
    /// Distinct codes seen under this reason, in first-seen order
    pub codes: Vec<u64>,
    /// Up to [`MAX_REASON_EXAMPLES`] distinct non-empty originals
    pub examples: Vec<String>,
}

impl ReasonStats {
    /// Display label: the original reason, or [`NO_REASON_LABEL`] when it is blank.
    pub fn label(&self) -> &str {
        if self.reason.trim().is_empty() {
            NO_REASON_LABEL
        } else {
            &self.reason
        }
    }
}

/// Aggregated goodbye statistics across every peer and session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodbyeSummary {
    pub total_events: usize,
    /// Sorted by count, most common first
    pub reason_stats: Vec<ReasonStats>,
    pub unique_reasons: usize,
    pub top_reasons: Vec<String>,
    pub code_frequency: BTreeMap<u64, usize>,
}

/// Lower-case and trim a reason; empty reasons group under [`UNKNOWN_REASON`].
pub fn normalize_reason(reason: &str) -> String {
    let key = reason.trim().to_lowercase();
    if key.is_empty() {
        UNKNOWN_REASON.to_string()
    } else {
        key
    }
}

/// Group goodbye events by normalized reason.
///
/// Groups are returned in the order their first event was encountered.
pub fn analyze<'a, I>(events: I) -> Vec<ReasonStats>
where
    I: IntoIterator<Item = &'a GoodbyeEvent>,
{
    let mut groups: Vec<ReasonStats> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for event in events {
        let key = normalize_reason(&event.reason);

        match index.get(&key) {
            Some(&idx) => {
                let stats = &mut groups[idx];
                stats.count += 1;
                if !stats.codes.contains(&event.code) {
                    stats.codes.push(event.code);
                }
                if !event.reason.trim().is_empty()
                    && stats.examples.len() < MAX_REASON_EXAMPLES
                    && !stats.examples.contains(&event.reason)
                {
                    stats.examples.push(event.reason.clone());
                }
            }
            None => {
                let examples = if event.reason.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![event.reason.clone()]
                };
                index.insert(key.clone(), groups.len());
                groups.push(ReasonStats {
                    key,
                    reason: event.reason.clone(),
                    count: 1,
                    codes: vec![event.code],
                    examples,
                });
            }
        }
    }

    groups
}

/// Summarize goodbye events across all peers.
///
/// Events are visited by ascending peer id, then session order, then event
/// order. Groups with equal counts keep that first-encountered order.
pub fn summarize(peers: &HashMap<String, PeerRecord>) -> GoodbyeSummary {
    let mut peer_ids: Vec<&String> = peers.keys().collect();
    peer_ids.sort();

    let events: Vec<&GoodbyeEvent> = peer_ids
        .into_iter()
        .flat_map(|peer_id| peers[peer_id].goodbye_events())
        .collect();

    let mut code_frequency: BTreeMap<u64, usize> = BTreeMap::new();
    for event in &events {
        *code_frequency.entry(event.code).or_insert(0) += 1;
    }

    let mut reason_stats = analyze(events.iter().copied());
    // Stable sort keeps first-encountered order among equal counts.
    reason_stats.sort_by(|a, b| b.count.cmp(&a.count));

    let top_reasons = reason_stats
        .iter()
        .take(TOP_REASON_COUNT)
        .map(|stats| stats.label().to_string())
        .collect();

    GoodbyeSummary {
        total_events: events.len(),
        unique_reasons: reason_stats.len(),
        reason_stats,
        top_reasons,
        code_frequency,
    }
}
