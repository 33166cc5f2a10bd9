#[cfg(test)]
mod session_lifecycle_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    use peerscore::events::{DispatchOutcome, Dispatcher, TraceEvent};
    use peerscore::peer::stats::{duration_stats, identification_stats};
    use peerscore::peer::{
        goodbye, ClientKind, InMemoryPeerStore, KnownClient, PeerRecord,
        PeerStore, SessionPolicy,
    };

    const PEER: &str = "16Uiu2HAmLifecyclePeer";

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_564_800 + secs, 0).unwrap()
    }

    fn event(event_type: &str, secs: i64, payload: serde_json::Value) -> TraceEvent {
        TraceEvent::new(event_type, Some(ts(secs)), payload)
    }

    fn setup() -> (Arc<InMemoryPeerStore>, Dispatcher) {
        let store = Arc::new(InMemoryPeerStore::new());
        let dispatcher =
            Dispatcher::with_default_handlers(store.clone(), SessionPolicy::default()).unwrap();
        (store, dispatcher)
    }

    fn assert_sessions_well_formed(record: &PeerRecord) {
        let sessions = record.sessions();
        for (i, session) in sessions.iter().enumerate() {
            if session.is_open() {
                assert_eq!(i, sessions.len() - 1, "open session is not last");
            }
            assert_eq!(session.duration.is_some(), session.disconnected_at.is_some());
        }
    }

    /// Connect creates exactly one peer with one open session; a second
    /// connect is a no-op
    #[test]
    fn test_connect_then_duplicate_connect() {
        let (store, dispatcher) = setup();

        dispatcher.dispatch(&event("CONNECTED", 0, json!({ "PeerID": PEER }))).unwrap();
        dispatcher.dispatch(&event("CONNECTED", 1, json!({ "PeerID": PEER }))).unwrap();

        assert_eq!(store.peer_count(), 1);
        let record = store.get(PEER).unwrap();
        assert_eq!(record.sessions().len(), 1);
        assert!(record.sessions()[0].is_open());
        assert_eq!(record.total_connections, 1);
        assert_eq!(store.snapshot_event_counts()[PEER]["CONNECTED"], 2);
        assert_sessions_well_formed(&record);
    }

    #[test]
    fn test_full_lifecycle() {
        let (store, dispatcher) = setup();
        let events = vec![
            event("CONNECTED", 0, json!({ "PeerID": PEER })),
            event(
                "REQUEST_STATUS",
                2,
                json!({ "PeerID": PEER, "AgentVersion": "erigon/caplin/v2.60" }),
            ),
            event(
                "GRAFT",
                3,
                json!({ "PeerID": PEER, "Topic": "beacon_block", "Direction": "received" }),
            ),
            event("PEERSCORE", 4, json!({ "PeerID": PEER, "Score": 0.5 })),
            event(
                "HANDLE_GOODBYE",
                9,
                json!({ "PeerID": PEER, "Code": 2, "Reason": "Fault/Error" }),
            ),
            event("DISCONNECTED", 10, json!({ "PeerID": PEER })),
            event("DISCONNECTED", 11, json!({ "PeerID": PEER })),
            event("CONNECTED", 20, json!({ "PeerID": PEER })),
        ];
        for e in &events {
            assert_eq!(dispatcher.dispatch(e).unwrap(), DispatchOutcome::Handled);
        }

        let record = store.get(PEER).unwrap();
        assert_sessions_well_formed(&record);
        assert_eq!(record.client_type, ClientKind::Known(KnownClient::Caplin));
        assert_eq!(record.sessions().len(), 2);
        assert_eq!(record.total_connections, 2);
        assert_eq!(record.total_message_count, 3);

        let first = &record.sessions()[0];
        assert_eq!(first.disconnected_at, Some(ts(10)));
        assert_eq!(first.duration, Some(Duration::from_secs(10)));
        assert_eq!(first.identification_latency(), Some(Duration::from_secs(2)));
        assert_eq!(first.mesh_events.len(), 1);
        assert_eq!(first.peer_scores.len(), 1);
        assert_eq!(first.goodbye_events.len(), 1);

        let peers = store.snapshot_all();
        assert_eq!(duration_stats(&peers).average, Duration::from_secs(10));
        let identification = identification_stats(&peers);
        assert_eq!(identification.identified_peers, 1);
        assert_eq!(identification.average_latency, Duration::from_secs(2));
    }

    #[test]
    fn test_disconnect_without_session_leaves_state() {
        let (store, dispatcher) = setup();

        dispatcher.dispatch(&event("DISCONNECTED", 0, json!({ "PeerID": PEER }))).unwrap();
        assert!(store.get(PEER).is_none());

        dispatcher.dispatch(&event("CONNECTED", 1, json!({ "PeerID": PEER }))).unwrap();
        dispatcher.dispatch(&event("DISCONNECTED", 2, json!({ "PeerID": PEER }))).unwrap();
        let before = store.get(PEER).unwrap();

        dispatcher.dispatch(&event("DISCONNECTED", 3, json!({ "PeerID": PEER }))).unwrap();
        assert_eq!(store.get(PEER).unwrap().sessions(), before.sessions());
    }

    #[test]
    fn test_goodbye_after_disconnect_is_dropped() {
        let (store, dispatcher) = setup();

        dispatcher.dispatch(&event("CONNECTED", 0, json!({ "PeerID": PEER }))).unwrap();
        dispatcher.dispatch(&event("DISCONNECTED", 5, json!({ "PeerID": PEER }))).unwrap();
        dispatcher
            .dispatch(&event("HANDLE_GOODBYE", 6, json!({ "PeerID": PEER, "Code": 1 })))
            .unwrap();

        let record = store.get(PEER).unwrap();
        assert_eq!(record.sessions().len(), 1);
        assert!(record.sessions()[0].goodbye_events.is_empty());
        assert_eq!(goodbye::summarize(&store.snapshot_all()).total_events, 0);
    }

    #[test]
    fn test_goodbye_policy_opens_session_when_enabled() {
        let store = Arc::new(InMemoryPeerStore::new());
        let policy = SessionPolicy {
            goodbye_opens_session: true,
            ..SessionPolicy::default()
        };
        let dispatcher = Dispatcher::with_default_handlers(store.clone(), policy).unwrap();

        dispatcher
            .dispatch(&event("HANDLE_GOODBYE", 6, json!({ "PeerID": PEER, "Code": 1 })))
            .unwrap();

        let record = store.get(PEER).unwrap();
        assert_eq!(record.sessions().len(), 1);
        assert_eq!(record.sessions()[0].goodbye_events.len(), 1);
    }

    /// A snapshot never observes mutations made after it was taken
    #[test]
    fn test_snapshot_isolation() {
        let (store, dispatcher) = setup();
        dispatcher
            .dispatch(&event(
                "PEERSCORE",
                0,
                json!({ "PeerID": PEER, "Score": 1, "Topics": { "blocks": { "TimeInMesh": 1000 } } }),
            ))
            .unwrap();

        let snapshot = store.snapshot_all();

        store.update(PEER, &mut |record| {
            record.client_type = ClientKind::Known(KnownClient::Lodestar);
            record.client_agent = "lodestar".to_string();
        });
        dispatcher.dispatch(&event("DISCONNECTED", 5, json!({ "PeerID": PEER }))).unwrap();
        dispatcher
            .dispatch(&event(
                "PEERSCORE",
                6,
                json!({ "PeerID": PEER, "Score": 2, "Topics": { "blocks": { "TimeInMesh": 5000 } } }),
            ))
            .unwrap();

        let old = &snapshot[PEER];
        assert_eq!(old.client_type, ClientKind::Unknown);
        assert_eq!(old.client_agent, "");
        assert_eq!(old.sessions().len(), 1);
        assert!(old.sessions()[0].is_open());
        assert_eq!(old.sessions()[0].peer_scores.len(), 1);
        assert_eq!(
            old.sessions()[0].peer_scores[0].topics["blocks"].time_in_mesh,
            Duration::from_nanos(1000)
        );

        assert_eq!(store.get(PEER).unwrap().sessions().len(), 2);
    }

    #[test]
    fn test_concurrent_event_count_increments() {
        let store = InMemoryPeerStore::new();
        let workers = 8;
        let per_worker = 250;

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    for _ in 0..per_worker {
                        store.increment_event_count(PEER, "X");
                    }
                });
            }
        });

        assert_eq!(store.snapshot_event_counts()[PEER]["X"], (workers * per_worker) as u64);
    }

    #[test]
    fn test_concurrent_mutator_updates() {
        let store = InMemoryPeerStore::new();
        store.create_if_absent(PEER);
        let workers = 8;
        let per_worker = 250;

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    for _ in 0..per_worker {
                        store.update(PEER, &mut |record| record.total_message_count += 1);
                    }
                });
            }
            // Concurrent readers take snapshots while writers run.
            scope.spawn(|| {
                for _ in 0..50 {
                    let snapshot = store.snapshot_all();
                    assert!(snapshot[PEER].total_message_count <= (workers * per_worker) as u64);
                }
            });
        });

        assert_eq!(
            store.get(PEER).unwrap().total_message_count,
            (workers * per_worker) as u64
        );
    }

    #[test]
    fn test_concurrent_dispatch_keeps_single_open_session() {
        let (store, dispatcher) = setup();
        let peers: Vec<String> = (0..16).map(|i| format!("16Uiu2HAmConcurrent{:02}", i)).collect();

        thread::scope(|scope| {
            for peer in &peers {
                let dispatcher = &dispatcher;
                scope.spawn(move || {
                    for round in 0..20 {
                        let at = round * 10;
                        dispatcher
                            .dispatch(&event("CONNECTED", at, json!({ "PeerID": peer })))
                            .unwrap();
                        dispatcher
                            .dispatch(&event(
                                "GRAFT",
                                at + 1,
                                json!({ "PeerID": peer, "Topic": "t" }),
                            ))
                            .unwrap();
                        dispatcher
                            .dispatch(&event("DISCONNECTED", at + 5, json!({ "PeerID": peer })))
                            .unwrap();
                    }
                });
            }
        });

        let snapshot = store.snapshot_all();
        assert_eq!(snapshot.len(), peers.len());
        for record in snapshot.values() {
            assert_sessions_well_formed(record);
            assert_eq!(record.sessions().len(), 20);
            assert!(!record.is_connected());
        }
        assert_eq!(duration_stats(&snapshot).average, Duration::from_secs(5));
    }
}
