use super::{DepthDiff, DepthSnapshot, OrderBook};
use derive_more::{Constructor, Display};
use smol_str::SmolStr;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info, warn};

/// Default upper bound on diffs held while waiting for a snapshot.
///
/// Binance emits a diff every 100ms, so this covers several minutes of a stalled snapshot.
pub const DEFAULT_MAX_BUFFERED_DIFFS: usize = 4096;

/// Default number of consecutive failed reconciliations before giving up.
pub const DEFAULT_MAX_RESYNC_ATTEMPTS: u32 = 5;

/// Default delay before the second snapshot attempt. Doubles for each further attempt.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Default cap on the snapshot retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Lifecycle of an [`OrderBookSynchronizer`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display)]
pub enum SyncState {
    /// No symbol selected.
    Idle,
    /// Waiting for the first snapshot, diffs are buffered.
    Buffering,
    /// Book is live, diffs are applied directly.
    Synchronized,
    /// A gap was detected, diffs are buffered until a fresh snapshot reconciles.
    Resyncing,
}

/// Bounds applied by the [`OrderBookSynchronizer`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SyncConfig {
    pub max_buffered_diffs: usize,
    pub max_resync_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_buffered_diffs: DEFAULT_MAX_BUFFERED_DIFFS,
            max_resync_attempts: DEFAULT_MAX_RESYNC_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl SyncConfig {
    /// Delay to wait before issuing snapshot request number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 2).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Instruction for the REST collaborator to fetch a depth snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Constructor)]
pub struct SnapshotRequest {
    pub symbol: SmolStr,
    pub attempt: u32,
    pub delay: Duration,
}

/// Reconciles a REST [`DepthSnapshot`] with the buffered WebSocket [`DepthDiff`] stream.
///
/// Sole writer of the [`OrderBook`] it owns. Every transition that needs a new snapshot
/// returns a [`SnapshotRequest`] rather than performing I/O.
#[derive(Debug, Clone)]
pub struct OrderBookSynchronizer {
    config: SyncConfig,
    state: SyncState,
    book: OrderBook,
    buffer: VecDeque<DepthDiff>,
    attempts: u32,
    persistent_desync: bool,
}

impl OrderBookSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: SyncState::Idle,
            book: OrderBook::default(),
            buffer: VecDeque::new(),
            attempts: 0,
            persistent_desync: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consecutive snapshot requests issued without a successful reconciliation.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once `max_resync_attempts` reconciliations failed in a row.
    pub fn is_persistently_desynced(&self) -> bool {
        self.persistent_desync
    }

    /// Discard all prior state and start buffering diffs for `symbol`.
    pub fn change_symbol(&mut self, symbol: impl Into<SmolStr>) -> SnapshotRequest {
        let symbol = symbol.into();
        info!(%symbol, from = %self.state, "order book synchronizer switching symbol");

        self.book = OrderBook::new(symbol.clone());
        self.buffer.clear();
        self.attempts = 1;
        self.persistent_desync = false;
        self.state = SyncState::Buffering;

        SnapshotRequest::new(symbol, 1, self.config.backoff(1))
    }

    /// Process a live diff, returning a [`SnapshotRequest`] if a gap forces a resync.
    pub fn on_diff(&mut self, diff: DepthDiff) -> Option<SnapshotRequest> {
        match self.state {
            SyncState::Idle => {
                debug!(
                    final_update_id = diff.final_update_id,
                    "depth diff received without an active symbol, ignoring"
                );
                None
            }
            SyncState::Buffering | SyncState::Resyncing => {
                self.buffer_diff(diff);
                None
            }
            SyncState::Synchronized => match self.book.apply_diff(&diff) {
                Ok(()) => None,
                Err(error) if error.requires_resync() => {
                    warn!(
                        symbol = %self.book.symbol(),
                        %error,
                        "depth diff gap detected, resynchronising"
                    );
                    self.state = SyncState::Resyncing;
                    self.attempts = 0;
                    self.buffer.clear();
                    self.buffer.push_back(diff);
                    self.request_snapshot()
                }
                Err(error) => {
                    debug!(symbol = %self.book.symbol(), %error, "skipping stale depth diff");
                    None
                }
            },
        }
    }

    /// Process a REST snapshot, returning a [`SnapshotRequest`] if it could not be reconciled.
    pub fn on_snapshot(&mut self, snapshot: DepthSnapshot) -> Option<SnapshotRequest> {
        match self.state {
            SyncState::Idle => {
                debug!(
                    last_update_id = snapshot.last_update_id,
                    "depth snapshot received without an active symbol, ignoring"
                );
                None
            }
            SyncState::Synchronized => {
                if snapshot.last_update_id > self.book.last_update_id() {
                    debug!(
                        symbol = %self.book.symbol(),
                        last_update_id = snapshot.last_update_id,
                        "refreshing synchronised order book from newer snapshot"
                    );
                    self.book.apply_snapshot(snapshot);
                } else {
                    debug!(
                        symbol = %self.book.symbol(),
                        last_update_id = snapshot.last_update_id,
                        book_update_id = self.book.last_update_id(),
                        "ignoring snapshot older than the synchronised book"
                    );
                }
                None
            }
            SyncState::Buffering | SyncState::Resyncing => self.reconcile(snapshot),
        }
    }

    fn buffer_diff(&mut self, diff: DepthDiff) {
        self.buffer.push_back(diff);

        if self.buffer.len() > self.config.max_buffered_diffs {
            if let Some(dropped) = self.buffer.pop_front() {
                debug!(
                    symbol = %self.book.symbol(),
                    final_update_id = dropped.final_update_id,
                    "diff buffer full, dropping oldest diff"
                );
            }
        }
    }

    fn reconcile(&mut self, snapshot: DepthSnapshot) -> Option<SnapshotRequest> {
        let snapshot_id = snapshot.last_update_id;

        self.buffer.retain(|diff| diff.final_update_id > snapshot_id);
        self.buffer
            .make_contiguous()
            .sort_by_key(|diff| diff.first_update_id);

        if let Some(first) = self.buffer.front() {
            if first.first_update_id > snapshot_id.saturating_add(1) {
                warn!(
                    symbol = %self.book.symbol(),
                    snapshot_id,
                    first_update_id = first.first_update_id,
                    "snapshot predates the buffered diff stream, requesting another"
                );
                return self.request_snapshot();
            }
        }

        let mut book = OrderBook::new(self.book.symbol().clone());
        book.apply_snapshot(snapshot);

        let mut pending = std::mem::take(&mut self.buffer).into_iter();
        while let Some(diff) = pending.next() {
            match book.apply_diff(&diff) {
                Err(error) if error.requires_resync() => {
                    warn!(
                        symbol = %self.book.symbol(),
                        %error,
                        "gap inside buffered diffs, requesting another snapshot"
                    );
                    self.buffer.push_back(diff);
                    self.buffer.extend(pending);
                    return self.request_snapshot();
                }
                Ok(()) | Err(_) => {}
            }
        }

        info!(
            symbol = %book.symbol(),
            last_update_id = book.last_update_id(),
            from = %self.state,
            "order book synchronised"
        );

        if self.persistent_desync {
            info!(symbol = %book.symbol(), "order book recovered from persistent desync");
        }

        self.book = book;
        self.state = SyncState::Synchronized;
        self.attempts = 0;
        self.persistent_desync = false;
        None
    }

    fn request_snapshot(&mut self) -> Option<SnapshotRequest> {
        if self.attempts >= self.config.max_resync_attempts {
            if !self.persistent_desync {
                warn!(
                    symbol = %self.book.symbol(),
                    attempts = self.attempts,
                    "order book persistently desynchronised, awaiting the next depth poll"
                );
                self.persistent_desync = true;
            }
            return None;
        }

        self.attempts += 1;
        Some(SnapshotRequest::new(
            self.book.symbol().clone(),
            self.attempts,
            self.config.backoff(self.attempts),
        ))
    }
}
