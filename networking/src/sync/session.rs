use std::sync::Arc;

use chain::FastChain;
use containers::Hash32;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::transport::Connector;

use super::config::{
    SyncSettings, CONNECT_RETRY_DELAY, PRUNE_CONNECT_FAILURES, REGULATOR_INTERVAL,
};
use super::error::SyncError;
use super::protocol::{BlockProtocol, ProtocolOutcome};
use super::reservation::{Reservation, Reservations};
use super::states::SessionState;
use super::synchronizer::{SlotToken, Synchronizer};

/// One block download session across all peer slots.
///
/// Partitions the needed hashes into the reservation table, takes the chain
/// write lock, opens one connection per reservation and drives a
/// [`BlockProtocol`] on each, counting completion through a
/// [`Synchronizer`]. Produces exactly one terminal outcome.
pub struct SyncSession {
    chain: Arc<dyn FastChain>,
    connector: Arc<dyn Connector>,
    settings: SyncSettings,
    reservations: Arc<Reservations>,
    state: Mutex<SessionState>,
    stop: watch::Sender<bool>,
}

impl SyncSession {
    pub fn new(
        chain: Arc<dyn FastChain>,
        connector: Arc<dyn Connector>,
        settings: SyncSettings,
        needed: Vec<Hash32>,
    ) -> Self {
        let reservations = Arc::new(Reservations::partition(
            chain.clone(),
            needed,
            settings.sync_peers,
        ));
        let (stop, _) = watch::channel(false);

        SyncSession {
            chain,
            connector,
            settings,
            reservations,
            state: Mutex::new(SessionState::Idle),
            stop,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Stop the session: abandon pending connects, tear down channels and
    /// let the synchronizer drain. The terminal result still materializes.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Snapshot of the reservation table, for diagnostics.
    pub fn reservations(&self) -> Arc<Reservations> {
        self.reservations.clone()
    }

    /// Run the session to its terminal outcome. Fired exactly once; the
    /// first fatal slot error wins, else success.
    pub async fn run(&self) -> Result<(), SyncError> {
        self.set_state(SessionState::Starting);

        let table = self.reservations.table();
        info!(slots = table.len(), "Getting blocks");

        if table.is_empty() {
            self.set_state(SessionState::Completed);
            return Ok(());
        }

        if !self.reservations.start() {
            debug!("Failed to set write lock");
            self.set_state(SessionState::Failed);
            return Err(SyncError::OperationFailed);
        }

        self.set_state(SessionState::Connecting);

        let (synchronizer, tokens) = Synchronizer::new(table.len());

        for (row, token) in table.iter().cloned().zip(tokens) {
            tokio::spawn(slot_task(
                self.chain.clone(),
                self.connector.clone(),
                self.reservations.clone(),
                row,
                self.settings.clone(),
                self.stop.subscribe(),
                token,
            ));
        }

        self.set_state(SessionState::Downloading);
        let download = self.download(&synchronizer).await;

        self.set_state(SessionState::Draining);

        // Always release, but give the sync result priority for reporting.
        let released = self.reservations.stop();

        match download {
            Err(err) => {
                debug!(%err, "Failed to complete block sync");
                self.set_state(SessionState::Failed);
                Err(err)
            }
            Ok(()) if !released => {
                debug!("Failed to reset write lock");
                self.set_state(SessionState::Failed);
                Err(SyncError::OperationFailed)
            }
            Ok(()) => {
                debug!("Completed block sync");
                self.set_state(SessionState::Completed);
                Ok(())
            }
        }
    }

    /// Wait out the synchronizer while running the regulator and the
    /// optional session-wide sync timeout.
    async fn download(&self, synchronizer: &Synchronizer) -> Result<(), SyncError> {
        let mut regulator = interval(REGULATOR_INTERVAL);
        regulator.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it to arm the period.
        regulator.tick().await;

        let timeout = async {
            match self.settings.sync_timeout() {
                Some(limit) => sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);

        let wait = synchronizer.wait();
        tokio::pin!(wait);

        let mut timed_out = false;

        loop {
            tokio::select! {
                result = &mut wait => {
                    return match (timed_out, result) {
                        (true, Err(_)) => Err(SyncError::Timeout),
                        (_, result) => result,
                    };
                }

                _ = regulator.tick(), if !self.stopped() => {
                    self.regulate();
                }

                _ = &mut timeout, if !timed_out => {
                    debug!("Sync timeout expired, stopping session");
                    timed_out = true;
                    self.stop();
                }
            }
        }
    }

    /// Compare all-channel download performance: log slot rates, donate
    /// work away from stalled slots and prune slots that cannot connect
    /// while the rest of the table imports.
    fn regulate(&self) {
        debug!("Fired session regulator timer");

        let table = self.reservations.table();
        let importing = table.iter().any(|row| row.rate() > 0.0);

        for row in &table {
            debug!(
                slot = row.slot(),
                rate = row.rate(),
                pending = row.pending_len(),
                "Block slot performance"
            );
        }

        self.reservations.rebalance();

        if importing && table.len() > 1 {
            for row in &table {
                if row.connect_failures() >= PRUNE_CONNECT_FAILURES {
                    self.reservations.prune(row);
                }
            }
        }
    }

    fn set_state(&self, target: SessionState) {
        let mut state = self.state.lock();

        if *state == target {
            return;
        }

        if !state.can_transition_to(target) {
            warn!(
                from = ?*state,
                to = ?target,
                "Invalid session state transition attempted"
            );
            return;
        }

        debug!(from = ?*state, to = ?target, "Session state transition");
        *state = target;
    }
}

/// One peer slot: connect (retrying indefinitely), attach the block
/// protocol, reconnect on drops, and signal the synchronizer exactly once
/// when the reservation completes or the slot is abandoned.
async fn slot_task(
    chain: Arc<dyn FastChain>,
    connector: Arc<dyn Connector>,
    reservations: Arc<Reservations>,
    row: Arc<Reservation>,
    settings: SyncSettings,
    mut stop: watch::Receiver<bool>,
    token: SlotToken,
) {
    loop {
        if *stop.borrow() {
            debug!(slot = row.slot(), "Suspending block slot");
            token.signal(Err(SyncError::Stopped));
            return;
        }

        if row.is_pruned() {
            // The regulator redistributed this slot's work; completing the
            // slot quietly keeps the session result intact.
            token.signal(Ok(()));
            return;
        }

        debug!(slot = row.slot(), "Starting block slot");

        let channel = tokio::select! {
            result = connector.connect() => match result {
                Ok(channel) => {
                    row.reset_connect_failures();
                    channel
                }
                Err(err) => {
                    debug!(slot = row.slot(), %err, "Failure connecting block slot");
                    row.record_connect_failure();

                    tokio::select! {
                        _ = sleep(CONNECT_RETRY_DELAY) => {}
                        _ = stop.changed() => {}
                    }
                    continue;
                }
            },
            _ = stop.changed() => continue,
        };

        debug!(
            slot = row.slot(),
            peer = %channel.authority(),
            "Connected block slot"
        );

        let protocol = BlockProtocol::new(
            channel,
            chain.clone(),
            row.clone(),
            reservations.clone(),
            settings.clone(),
            stop.clone(),
        );

        match protocol.run().await {
            ProtocolOutcome::Complete => {
                reservations.remove(&row);
                debug!(slot = row.slot(), "Completed block slot");
                token.signal(Ok(()));
                return;
            }
            ProtocolOutcome::Dropped(reason) => {
                // The protocol returned unfinished work to the reservation;
                // a fresh connection picks it up.
                info!(slot = row.slot(), %reason, "Channel stopped on block slot");
            }
        }
    }
}
