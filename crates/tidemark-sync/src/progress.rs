//! Throughput aggregation and progress publication
//!
//! The transfer pools never touch the broadcast channel directly. They
//! emit [`ProgressEvent`]s into a bounded mpsc channel - byte updates with
//! `try_send`, so a busy consumer coalesces them instead of back-pressuring
//! a transfer - and a single pump task folds events into the published
//! [`ProgressSnapshot`]. That keeps snapshot publication totally ordered
//! per account with exactly one writer.
//!
//! Throughput is a moving average over a ten-sample window of
//! `(timestamp, bytes_completed)` pairs, guarded against windows shorter
//! than 100 ms. An ETA is only emitted once the rate is meaningfully
//! non-zero.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use tidemark_core::domain::paths::PathKey;
use tidemark_core::domain::progress::{ProgressSnapshot, SyncState};
use tidemark_core::domain::records::SyncDirection;

/// Rolling window size of the throughput estimate
const MAX_SAMPLES: usize = 10;

/// Minimum elapsed window before a rate is computed
const MIN_ELAPSED_MS: u128 = 100;

/// Minimum rate (MB/s) below which no ETA is emitted
const MIN_RATE_MB_PER_SEC: f64 = 0.01;

// ============================================================================
// Aggregator
// ============================================================================

/// Moving-average throughput and ETA calculator
///
/// Single-threaded by design; the pump task owns it and serializes all
/// updates through the event channel.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    samples: VecDeque<(Instant, u64)>,
}

impl ProgressAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current cumulative completed-byte count
    pub fn record(&mut self, completed_bytes: u64) {
        self.record_at(Instant::now(), completed_bytes);
    }

    fn record_at(&mut self, now: Instant, completed_bytes: u64) {
        self.samples.push_back((now, completed_bytes));
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Moving-average throughput in MB/s over the sample window
    ///
    /// Zero until the window spans at least 100 ms.
    #[must_use]
    pub fn mb_per_sec(&self) -> f64 {
        let (Some((tail_t, tail_b)), Some((head_t, head_b))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };

        let elapsed = head_t.duration_since(*tail_t);
        if elapsed.as_millis() < MIN_ELAPSED_MS {
            return 0.0;
        }

        let bytes = head_b.saturating_sub(*tail_b);
        (bytes as f64 / elapsed.as_secs_f64()) / 1_000_000.0
    }

    /// Estimated seconds until `remaining_bytes` complete, rounded up
    ///
    /// `None` while the rate is below 0.01 MB/s.
    #[must_use]
    pub fn eta_secs(&self, remaining_bytes: u64) -> Option<u64> {
        let rate = self.mb_per_sec();
        if rate <= MIN_RATE_MB_PER_SEC {
            return None;
        }
        let bytes_per_sec = rate * 1_000_000.0;
        Some((remaining_bytes as f64 / bytes_per_sec).ceil() as u64)
    }
}

// ============================================================================
// Events and pump
// ============================================================================

/// One update from the engine to the progress pump
#[derive(Debug)]
pub enum ProgressEvent {
    /// Lifecycle state change
    State(SyncState),
    /// Folder currently being scanned (None when scanning ends)
    Scanning(Option<PathKey>),
    /// Plan totals, known once reconciliation finishes
    PlanTotals {
        /// Files planned for transfer
        files: u64,
        /// Bytes planned for transfer
        bytes: u64,
        /// Conflicts recorded by the planner
        conflicts: u64,
    },
    /// A transfer entered a pool worker
    TransferStarted(SyncDirection),
    /// Incremental bytes moved by an in-flight transfer
    BytesMoved(u64),
    /// A transfer left its pool worker
    TransferFinished {
        /// Transfer direction
        direction: SyncDirection,
        /// Size of the file (counted once, on completion)
        bytes: u64,
        /// Whether the transfer succeeded
        succeeded: bool,
    },
    /// One file was deleted
    Deleted,
}

/// Channel capacity for progress events
///
/// Byte updates are sent with `try_send` and dropped when the pump lags;
/// structural events use `send` and never drop.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Folds progress events into published snapshots
///
/// Runs until the event channel closes, then returns the final snapshot.
pub async fn pump(
    initial: ProgressSnapshot,
    mut events: mpsc::Receiver<ProgressEvent>,
    publisher: watch::Sender<ProgressSnapshot>,
) -> ProgressSnapshot {
    let mut snapshot = initial;
    let mut aggregator = ProgressAggregator::new();
    // Bytes from finished transfers, plus a live component from in-flight
    // progress callbacks.
    let mut finished_bytes: u64 = 0;
    let mut inflight_bytes: u64 = 0;

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::State(state) => {
                snapshot.status = state;
            }
            ProgressEvent::Scanning(folder) => {
                snapshot.scanning_folder = folder;
            }
            ProgressEvent::PlanTotals {
                files,
                bytes,
                conflicts,
            } => {
                snapshot.total_files = files;
                snapshot.total_bytes = bytes;
                snapshot.conflicts_detected = conflicts;
            }
            ProgressEvent::TransferStarted(direction) => match direction {
                SyncDirection::Upload => snapshot.files_uploading += 1,
                SyncDirection::Download => snapshot.files_downloading += 1,
            },
            ProgressEvent::BytesMoved(delta) => {
                inflight_bytes += delta;
            }
            ProgressEvent::TransferFinished {
                direction,
                bytes,
                succeeded,
            } => {
                match direction {
                    SyncDirection::Upload => {
                        snapshot.files_uploading = snapshot.files_uploading.saturating_sub(1);
                    }
                    SyncDirection::Download => {
                        snapshot.files_downloading = snapshot.files_downloading.saturating_sub(1);
                    }
                }
                inflight_bytes = inflight_bytes.saturating_sub(bytes);
                if succeeded {
                    snapshot.completed_files += 1;
                    finished_bytes += bytes;
                }
            }
            ProgressEvent::Deleted => {
                snapshot.files_deleted += 1;
            }
        }

        let completed = finished_bytes + inflight_bytes;
        snapshot.completed_bytes = completed;
        aggregator.record(completed);
        snapshot.mb_per_sec = aggregator.mb_per_sec();
        snapshot.eta_secs =
            aggregator.eta_secs(snapshot.total_bytes.saturating_sub(completed));
        snapshot.last_update_utc = chrono::Utc::now();

        // Subscribers may come and go; send_replace stores the snapshot
        // even while zero receivers are attached, so a late subscriber
        // still observes the latest state.
        publisher.send_replace(snapshot.clone());
    }

    debug!(account = %snapshot.account.short(), "progress pump drained");
    snapshot
}
