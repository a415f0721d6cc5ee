use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::SyncError;

/// Countdown to the single terminal signal of a sync session.
///
/// Initialized to the reservation count; every slot holds one [`SlotToken`]
/// and signals it exactly once on its terminal transition. Signalling
/// consumes the token, so a double signal is unrepresentable. The waiter
/// wakes once the count reaches zero and observes the first failure code,
/// if any. A zero-count synchronizer completes immediately.
pub struct Synchronizer {
    remaining: AtomicUsize,
    first_error: Mutex<Option<SyncError>>,
    notify: Notify,
}

impl Synchronizer {
    /// Create a synchronizer expecting `count` signals, returning one token
    /// per expected slot.
    pub fn new(count: usize) -> (Arc<Synchronizer>, Vec<SlotToken>) {
        let synchronizer = Arc::new(Synchronizer {
            remaining: AtomicUsize::new(count),
            first_error: Mutex::new(None),
            notify: Notify::new(),
        });

        let tokens = (0..count)
            .map(|_| SlotToken {
                synchronizer: synchronizer.clone(),
            })
            .collect();

        (synchronizer, tokens)
    }

    /// Wait until every token has signalled. Returns the first failure code
    /// observed, or success when all slots completed.
    pub async fn wait(&self) -> Result<(), SyncError> {
        loop {
            let notified = self.notify.notified();

            if self.remaining.load(Ordering::Acquire) == 0 {
                break;
            }

            notified.await;
        }

        match self.first_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn signal(&self, result: Result<(), SyncError>) {
        if let Err(error) = result {
            let mut first_error = self.first_error.lock();
            if first_error.is_none() {
                *first_error = Some(error);
            }
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// One slot's right to signal the synchronizer, consumed on use.
pub struct SlotToken {
    synchronizer: Arc<Synchronizer>,
}

impl SlotToken {
    pub fn signal(self, result: Result<(), SyncError>) {
        self.synchronizer.signal(result);
    }
}
