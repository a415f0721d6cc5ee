use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chain::FastChain;
use containers::Hash32;
use parking_lot::Mutex;
use tracing::debug;

use super::config::{RATE_WINDOW, REBALANCE_RATIO};

/// One slot of partitioned download work.
///
/// Owns an ordered queue of block hashes no other slot holds. The channel
/// bound to this slot claims hashes into its backlog as it requests them and
/// returns unreceived ones if it drops. Imports feed a sliding-window rate
/// statistic the regulator uses to move work between slots.
#[derive(Debug)]
pub struct Reservation {
    slot: usize,
    inner: Mutex<ReservationInner>,
}

#[derive(Debug, Default)]
struct ReservationInner {
    pending: VecDeque<Hash32>,
    imports: VecDeque<(Instant, usize)>,
    connect_failures: u32,
    pruned: bool,
}

impl Reservation {
    fn new(slot: usize) -> Self {
        Reservation {
            slot,
            inner: Mutex::new(ReservationInner::default()),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Snapshot of the queue, front first.
    pub fn pending(&self) -> Vec<Hash32> {
        self.inner.lock().pending.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Claim every candidate this slot still owns, in candidate order,
    /// removing them from the pending queue.
    pub fn claim(&self, candidates: &[Hash32]) -> Vec<Hash32> {
        let mut inner = self.inner.lock();
        let mut claimed = Vec::new();

        for candidate in candidates {
            if let Some(position) = inner.pending.iter().position(|hash| hash == candidate) {
                inner.pending.remove(position);
                claimed.push(*candidate);
            }
        }

        claimed
    }

    /// Return unreceived hashes to the front of the queue, preserving their
    /// original order, so the next channel requests them first.
    pub fn restore(&self, hashes: Vec<Hash32>) {
        let mut inner = self.inner.lock();
        for hash in hashes.into_iter().rev() {
            inner.pending.push_front(hash);
        }
    }

    /// Record one imported block for the rate statistic.
    pub fn record_import(&self, bytes: usize) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.imports.push_back((now, bytes));
        Self::expire(&mut inner, now);
    }

    /// Import rate in bytes per second over the sliding window.
    pub fn rate(&self) -> f64 {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Self::expire(&mut inner, now);

        let bytes: usize = inner.imports.iter().map(|(_, size)| size).sum();
        bytes as f64 / RATE_WINDOW.as_secs_f64()
    }

    fn expire(inner: &mut ReservationInner, now: Instant) {
        while let Some((when, _)) = inner.imports.front() {
            if now.duration_since(*when) > RATE_WINDOW {
                inner.imports.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_connect_failure(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.connect_failures += 1;
        inner.connect_failures
    }

    pub fn reset_connect_failures(&self) {
        self.inner.lock().connect_failures = 0;
    }

    pub fn connect_failures(&self) -> u32 {
        self.inner.lock().connect_failures
    }

    pub fn is_pruned(&self) -> bool {
        self.inner.lock().pruned
    }

    fn take_tail(&self, count: usize) -> Vec<Hash32> {
        let mut inner = self.inner.lock();
        let keep = inner.pending.len().saturating_sub(count);
        inner.pending.split_off(keep).into()
    }

    fn push_back_many(&self, hashes: Vec<Hash32>) {
        let mut inner = self.inner.lock();
        inner.pending.extend(hashes);
    }

    fn drain_pending(&self) -> Vec<Hash32> {
        let mut inner = self.inner.lock();
        inner.pruned = true;
        inner.pending.drain(..).collect()
    }
}

/// The reservation table: every slot's queue, plus the write-lock gate over
/// the chain collaborator.
///
/// Invariant: queues are pairwise disjoint and their union plus in-flight
/// backlogs equals the needed-hash set minus blocks already received.
pub struct Reservations {
    chain: Arc<dyn FastChain>,
    rows: Mutex<Vec<Arc<Reservation>>>,
}

impl Reservations {
    /// Partition `hashes` round-robin across at most `slots` ordered queues.
    /// Deterministic, disjoint and cardinality preserving; slots beyond the
    /// hash count would start empty and are not created.
    pub fn partition(chain: Arc<dyn FastChain>, hashes: Vec<Hash32>, slots: usize) -> Self {
        // At least one slot whenever there is work, even if misconfigured.
        let count = match hashes.len() {
            0 => 0,
            len => slots.clamp(1, len),
        };
        let mut rows: Vec<Arc<Reservation>> =
            (0..count).map(|slot| Arc::new(Reservation::new(slot))).collect();

        for (index, hash) in hashes.into_iter().enumerate() {
            rows[index % count].inner.lock().pending.push_back(hash);
        }

        Reservations {
            chain,
            rows: Mutex::new(rows),
        }
    }

    /// Stable snapshot of the current rows.
    pub fn table(&self) -> Vec<Arc<Reservation>> {
        self.rows.lock().clone()
    }

    /// Remove a completed reservation from the table.
    pub fn remove(&self, row: &Arc<Reservation>) {
        self.rows.lock().retain(|other| other.slot() != row.slot());
    }

    /// Acquire exclusive organization rights for this session.
    pub fn start(&self) -> bool {
        self.chain.begin_write()
    }

    /// Release exclusive organization rights.
    pub fn stop(&self) -> bool {
        self.chain.end_write()
    }

    /// Refill an exhausted reservation by stealing the tail half of the
    /// fullest other queue. Returns whether any work moved.
    pub fn populate(&self, row: &Arc<Reservation>) -> bool {
        let rows = self.rows.lock();

        let fullest = rows
            .iter()
            .filter(|other| other.slot() != row.slot())
            .max_by_key(|other| other.pending_len());

        let Some(fullest) = fullest else {
            return false;
        };

        let available = fullest.pending_len();
        if available < 2 {
            return false;
        }

        let stolen = fullest.take_tail(available / 2);
        debug!(
            from = fullest.slot(),
            to = row.slot(),
            count = stolen.len(),
            "Stole hashes for exhausted block slot"
        );
        row.push_back_many(stolen);
        true
    }

    /// Donate pending work from the slowest slot to the fastest when their
    /// rates diverge beyond the rebalance ratio. Returns whether any moved.
    pub fn rebalance(&self) -> bool {
        let rows = self.rows.lock();
        if rows.len() < 2 {
            return false;
        }

        let fastest = rows
            .iter()
            .max_by(|a, b| a.rate().total_cmp(&b.rate()))
            .cloned();
        let slowest = rows
            .iter()
            .filter(|row| row.pending_len() >= 2)
            .min_by(|a, b| a.rate().total_cmp(&b.rate()))
            .cloned();

        let (Some(fastest), Some(slowest)) = (fastest, slowest) else {
            return false;
        };

        if fastest.slot() == slowest.slot() {
            return false;
        }

        if fastest.rate() < REBALANCE_RATIO * slowest.rate() || fastest.rate() == 0.0 {
            return false;
        }

        let moved = slowest.take_tail(slowest.pending_len() / 2);
        debug!(
            from = slowest.slot(),
            to = fastest.slot(),
            count = moved.len(),
            "Rebalanced hashes from stalled block slot"
        );
        fastest.push_back_many(moved);
        true
    }

    /// Prune a failing reservation: mark it pruned, remove it from the
    /// table and redistribute its pending hashes round-robin across the
    /// remaining rows. Refused when no other row could take the work.
    pub fn prune(&self, row: &Arc<Reservation>) -> bool {
        let mut rows = self.rows.lock();

        let others: Vec<Arc<Reservation>> = rows
            .iter()
            .filter(|other| other.slot() != row.slot())
            .cloned()
            .collect();
        if others.is_empty() {
            return false;
        }

        rows.retain(|other| other.slot() != row.slot());
        drop(rows);

        let orphaned = row.drain_pending();
        debug!(
            slot = row.slot(),
            redistributed = orphaned.len(),
            "Pruned block slot"
        );

        for (index, hash) in orphaned.into_iter().enumerate() {
            others[index % others.len()].push_back_many(vec![hash]);
        }

        true
    }
}
