//! Run driver.
//!
//! Owns the Peer Store and the dispatcher, feeds trace files through them
//! and builds the final report. A background reporter logs progress while
//! feeds are being ingested.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use color_eyre::eyre::{eyre, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::events::{DispatchOutcome, Dispatcher, TraceEvent};
use crate::peer::{InMemoryPeerStore, PeerStore, Timestamp};
use crate::report::PeerScoreReport;

/// Lines decoded together before being dispatched in order
const DECODE_BATCH_SIZE: usize = 4096;

/// Counters describing what happened to ingested events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub files: usize,
    pub failed_files: usize,
    /// Non-blank lines read
    pub events: usize,
    pub handled: usize,
    pub unhandled: usize,
    pub unknown_peer: usize,
    /// Undecodable lines plus payloads rejected by a handler
    pub malformed: usize,
}

impl IngestSummary {
    pub fn merge(&mut self, other: &IngestSummary) {
        self.files += other.files;
        self.failed_files += other.failed_files;
        self.events += other.events;
        self.handled += other.handled;
        self.unhandled += other.unhandled;
        self.unknown_peer += other.unknown_peer;
        self.malformed += other.malformed;
    }

    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::Unhandled => self.unhandled += 1,
            DispatchOutcome::UnknownPeer => self.unknown_peer += 1,
        }
    }
}

pub struct PeerScoreTool {
    config: Config,
    store: Arc<InMemoryPeerStore>,
    dispatcher: Dispatcher,
    started_at: Timestamp,
}

impl PeerScoreTool {
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(InMemoryPeerStore::new());
        let dispatcher = Dispatcher::with_default_handlers(store.clone(), config.sessions)
            .context("Failed to register event handlers")?;

        Ok(Self {
            config,
            store,
            dispatcher,
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<InMemoryPeerStore> {
        &self.store
    }

    /// Ingest a JSON-lines trace feed.
    ///
    /// Lines are decoded in parallel per batch and then dispatched in file
    /// order. Bad lines, invalid UTF-8 included, are logged and counted, never
    /// fatal. On a read error the lines already buffered are still dispatched
    /// before the error is returned.
    pub fn ingest_reader<R: BufRead>(
        &self,
        mut reader: R,
        source: &str,
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut batch: Vec<(usize, Vec<u8>)> = Vec::with_capacity(DECODE_BATCH_SIZE);
        let mut line_no = 0;

        loop {
            let mut line = Vec::new();
            let read = match reader.read_until(b'\n', &mut line) {
                Ok(read) => read,
                Err(e) => {
                    self.process_batch(&batch, source, &mut summary);
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to read line {} of {} ({} earlier events dispatched)",
                            line_no + 1,
                            source,
                            summary.events
                        )
                    });
                }
            };
            if read == 0 {
                break;
            }
            line_no += 1;

            if line.trim_ascii().is_empty() {
                continue;
            }
            batch.push((line_no, line));

            if batch.len() == DECODE_BATCH_SIZE {
                self.process_batch(&batch, source, &mut summary);
                batch.clear();
            }
        }
        self.process_batch(&batch, source, &mut summary);

        Ok(summary)
    }

    fn process_batch(
        &self,
        batch: &[(usize, Vec<u8>)],
        source: &str,
        summary: &mut IngestSummary,
    ) {
        let decoded: Vec<serde_json::Result<TraceEvent>> = batch
            .par_iter()
            .map(|(_, line)| serde_json::from_slice(line))
            .collect();

        for ((line_no, _), event) in batch.iter().zip(decoded) {
            summary.events += 1;

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    log::error!("{}:{}: malformed trace event: {}", source, line_no, e);
                    summary.malformed += 1;
                    continue;
                }
            };

            match self.dispatcher.dispatch(&event) {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    log::error!("{}:{}: {}", source, line_no, e);
                    summary.malformed += 1;
                }
            }
        }
    }

    pub fn ingest_file(&self, path: &Path) -> Result<IngestSummary> {
        log::info!("Ingesting trace feed {}", path.display());

        let file = File::open(path)
            .with_context(|| format!("Failed to open trace feed {}", path.display()))?;
        let source = path.display().to_string();
        let mut summary = self.ingest_reader(BufReader::new(file), &source)?;
        summary.files = 1;

        log::info!(
            "Finished {}: {} events, {} handled, {} malformed",
            path.display(),
            summary.events,
            summary.handled,
            summary.malformed
        );
        Ok(summary)
    }

    /// Ingest several feeds concurrently into the same store.
    ///
    /// A status line is logged every `ingest.status_interval` until all
    /// feeds are done. Feeds that cannot be read are logged and skipped;
    /// it is an error only if every feed failed.
    pub fn ingest_files(&self, paths: &[PathBuf]) -> Result<IngestSummary> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.config.ingest.status_interval;

        let results: Vec<(PathBuf, Result<IngestSummary>)> = thread::scope(|scope| {
            scope.spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    self.log_status();
                }
            });

            let results: Vec<_> = paths
                .par_iter()
                .map(|path| (path.clone(), self.ingest_file(path)))
                .collect();
            drop(stop_tx);
            results
        });

        let mut summary = IngestSummary::default();
        for (path, result) in results {
            match result {
                Ok(file_summary) => summary.merge(&file_summary),
                Err(e) => {
                    log::error!("Failed to ingest {}: {:#}", path.display(), e);
                    summary.failed_files += 1;
                }
            }
        }

        if !paths.is_empty() && summary.failed_files == paths.len() {
            return Err(eyre!("None of the {} trace feeds could be ingested", paths.len()));
        }
        Ok(summary)
    }

    /// Log current peer and event counts.
    pub fn log_status(&self) {
        log::info!(
            "Status: peers={} active_peers={} events={}",
            self.store.peer_count(),
            self.store.active_peer_count(),
            self.store.total_event_count()
        );
    }

    /// Snapshot the store and build the final report.
    pub fn generate_report(&self, ingest: &IngestSummary) -> PeerScoreReport {
        PeerScoreReport::build(
            self.started_at,
            Utc::now(),
            *ingest,
            self.store.snapshot_all(),
            self.store.snapshot_event_counts(),
            self.config.report.include_peers,
        )
    }
}
