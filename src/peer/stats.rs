//! Aggregate statistics over a snapshot of all peers.
//!
//! Every calculator is a pure function of the snapshot and returns
//! zero-valued results when nothing qualifies.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::PeerRecord;

/// Session-level connection statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub successful_handshakes: usize,
    pub failed_handshakes: usize,
    /// Peers with an open session
    pub connected_peers: usize,
}

/// Duration statistics over closed sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationStats {
    pub sessions: usize,
    #[serde(with = "humantime_serde")]
    pub average: Duration,
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageStats {
    pub total_messages: u64,
    pub peers_with_messages: usize,
    pub average_messages_per_session: f64,
    pub min_messages_per_session: u64,
    pub max_messages_per_session: u64,
}

/// Connect -> identify latency statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationStats {
    pub total_peers: usize,
    pub identified_peers: usize,
    #[serde(with = "humantime_serde")]
    pub average_latency: Duration,
    #[serde(with = "humantime_serde")]
    pub min_latency: Duration,
    #[serde(with = "humantime_serde")]
    pub max_latency: Duration,
}

/// All aggregate statistics computed from one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub connections: ConnectionStats,
    pub durations: DurationStats,
    pub messages: MessageStats,
    pub identification: IdentificationStats,
    pub client_distribution: BTreeMap<String, usize>,
}

impl AggregateStats {
    pub fn compute(peers: &HashMap<String, PeerRecord>) -> Self {
        Self {
            connections: connection_stats(peers),
            durations: duration_stats(peers),
            messages: message_stats(peers),
            identification: identification_stats(peers),
            client_distribution: client_distribution(peers),
        }
    }
}

/// Average, minimum and maximum of a set of durations.
fn summarize_durations(values: &[Duration]) -> (Duration, Duration, Duration) {
    let (Some(min), Some(max)) = (values.iter().min(), values.iter().max()) else {
        return (Duration::ZERO, Duration::ZERO, Duration::ZERO);
    };

    let total: u128 = values.iter().map(Duration::as_nanos).sum();
    let average = total / values.len() as u128;
    let average = Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX));

    (average, *min, *max)
}

pub fn connection_stats(peers: &HashMap<String, PeerRecord>) -> ConnectionStats {
    let mut stats = ConnectionStats::default();

    for record in peers.values() {
        for session in record.sessions() {
            stats.total_connections += 1;
            if session.identified_at.is_some() {
                stats.successful_handshakes += 1;
            } else {
                stats.failed_handshakes += 1;
            }
        }

        if record.sessions().iter().any(|s| s.is_open()) {
            stats.connected_peers += 1;
        }
    }

    stats
}

pub fn duration_stats(peers: &HashMap<String, PeerRecord>) -> DurationStats {
    let durations: Vec<Duration> = peers
        .values()
        .flat_map(|record| record.sessions())
        .filter_map(|session| session.duration)
        .filter(|duration| !duration.is_zero())
        .collect();

    let (average, min, max) = summarize_durations(&durations);
    DurationStats {
        sessions: durations.len(),
        average,
        min,
        max,
    }
}

pub fn message_stats(peers: &HashMap<String, PeerRecord>) -> MessageStats {
    let mut stats = MessageStats::default();
    let mut per_session: Vec<u64> = Vec::new();

    for record in peers.values() {
        let peer_total: u64 = record.sessions().iter().map(|s| s.message_count).sum();
        per_session.extend(
            record
                .sessions()
                .iter()
                .map(|s| s.message_count)
                .filter(|&count| count > 0),
        );

        stats.total_messages += peer_total;
        if peer_total > 0 {
            stats.peers_with_messages += 1;
        }
    }

    if let (Some(&min), Some(&max)) = (per_session.iter().min(), per_session.iter().max()) {
        let sum: u64 = per_session.iter().sum();
        stats.average_messages_per_session = sum as f64 / per_session.len() as f64;
        stats.min_messages_per_session = min;
        stats.max_messages_per_session = max;
    }

    stats
}

pub fn identification_stats(peers: &HashMap<String, PeerRecord>) -> IdentificationStats {
    let mut latencies: Vec<Duration> = Vec::new();
    let mut identified_peers = 0;

    for record in peers.values() {
        let before = latencies.len();
        latencies.extend(
            record
                .sessions()
                .iter()
                .filter_map(|session| session.identification_latency()),
        );
        if latencies.len() > before {
            identified_peers += 1;
        }
    }

    let (average_latency, min_latency, max_latency) = summarize_durations(&latencies);
    IdentificationStats {
        total_peers: peers.len(),
        identified_peers,
        average_latency,
        min_latency,
        max_latency,
    }
}

/// Peers per classified client, `unknown` included.
pub fn client_distribution(peers: &HashMap<String, PeerRecord>) -> BTreeMap<String, usize> {
    let mut distribution = BTreeMap::new();
    for record in peers.values() {
        *distribution
            .entry(record.client_type.name().to_string())
            .or_insert(0) += 1;
    }
    distribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::client::{ClientKind, KnownClient};
    use crate::peer::session::SessionMachine;
    use crate::peer::types::{GoodbyeEvent, Timestamp};
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn peers(records: Vec<PeerRecord>) -> HashMap<String, PeerRecord> {
        records
            .into_iter()
            .map(|record| (record.peer_id.clone(), record))
            .collect()
    }

    /// A peer with one closed session per `(connect, disconnect)` pair.
    fn peer_with_sessions(peer_id: &str, sessions: &[(i64, i64)]) -> PeerRecord {
        let machine = SessionMachine::default();
        let mut record = PeerRecord::new(peer_id, ts(0));
        for &(start, end) in sessions {
            machine.connect(&mut record, ts(start), None);
            machine.disconnect(&mut record, ts(end));
        }
        record
    }

    #[test]
    fn test_duration_stats() {
        let peers = peers(vec![
            peer_with_sessions("a", &[(0, 10), (100, 120)]),
            peer_with_sessions("b", &[(0, 30)]),
        ]);
        let stats = duration_stats(&peers);

        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.average, Duration::from_secs(20));
        assert_eq!(stats.min, Duration::from_secs(10));
        assert_eq!(stats.max, Duration::from_secs(30));
    }

    #[test]
    fn test_duration_stats_ignores_open_and_zero_sessions() {
        let machine = SessionMachine::default();
        let mut open = PeerRecord::new("open", ts(0));
        machine.connect(&mut open, ts(0), None);

        let peers = peers(vec![open, peer_with_sessions("zero", &[(5, 5)])]);
        assert_eq!(duration_stats(&peers), DurationStats::default());
        assert_eq!(duration_stats(&HashMap::new()), DurationStats::default());
    }

    #[test]
    fn test_connection_stats() {
        let machine = SessionMachine::default();

        let mut identified = PeerRecord::new("identified", ts(0));
        machine.connect(&mut identified, ts(0), None);
        machine.identify(&mut identified, ts(1), Some("teku"), false);
        machine.disconnect(&mut identified, ts(5));
        machine.connect(&mut identified, ts(6), None);

        let silent = peer_with_sessions("silent", &[(0, 3)]);

        let stats = connection_stats(&peers(vec![identified, silent]));
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.successful_handshakes, 1);
        assert_eq!(stats.failed_handshakes, 2);
        assert_eq!(stats.connected_peers, 1);
    }

    #[test]
    fn test_identification_stats() {
        let machine = SessionMachine::default();

        let mut fast = PeerRecord::new("fast", ts(0));
        machine.connect(&mut fast, ts(0), None);
        machine.identify(&mut fast, ts(2), None, false);

        let mut slow = PeerRecord::new("slow", ts(0));
        machine.connect(&mut slow, ts(10), None);
        machine.identify(&mut slow, ts(16), None, false);

        let never = peer_with_sessions("never", &[(0, 4)]);

        let stats = identification_stats(&peers(vec![fast, slow, never]));
        assert_eq!(stats.total_peers, 3);
        assert_eq!(stats.identified_peers, 2);
        assert_eq!(stats.average_latency, Duration::from_secs(4));
        assert_eq!(stats.min_latency, Duration::from_secs(2));
        assert_eq!(stats.max_latency, Duration::from_secs(6));
    }

    #[test]
    fn test_message_stats() {
        let machine = SessionMachine::default();
        let goodbye = |at| GoodbyeEvent {
            timestamp: at,
            code: 1,
            reason: "bye".to_string(),
        };

        let mut busy = PeerRecord::new("busy", ts(0));
        machine.connect(&mut busy, ts(0), None);
        machine.add_goodbye(&mut busy, goodbye(ts(1)));
        machine.add_goodbye(&mut busy, goodbye(ts(2)));
        machine.add_goodbye(&mut busy, goodbye(ts(3)));
        machine.disconnect(&mut busy, ts(4));
        machine.connect(&mut busy, ts(5), None);
        machine.add_goodbye(&mut busy, goodbye(ts(6)));

        let quiet = peer_with_sessions("quiet", &[(0, 1)]);

        let stats = message_stats(&peers(vec![busy, quiet]));
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.peers_with_messages, 1);
        assert_eq!(stats.average_messages_per_session, 2.0);
        assert_eq!(stats.min_messages_per_session, 1);
        assert_eq!(stats.max_messages_per_session, 3);
    }

    #[test]
    fn test_client_distribution_includes_unknown() {
        let mut lighthouse = PeerRecord::new("a", ts(0));
        lighthouse.client_type = ClientKind::Known(KnownClient::Lighthouse);
        let mut lighthouse_two = PeerRecord::new("b", ts(0));
        lighthouse_two.client_type = ClientKind::Known(KnownClient::Lighthouse);
        let unknown = PeerRecord::new("c", ts(0));

        let distribution = client_distribution(&peers(vec![lighthouse, lighthouse_two, unknown]));
        assert_eq!(distribution["lighthouse"], 2);
        assert_eq!(distribution["unknown"], 1);
        assert_eq!(distribution.len(), 2);
    }

    #[test]
    fn test_aggregate_on_empty_snapshot() {
        let stats = AggregateStats::compute(&HashMap::new());
        assert_eq!(stats, AggregateStats::default());
    }
}
