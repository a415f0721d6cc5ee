use std::collections::VecDeque;
use std::sync::Arc;

use chain::{ChainError, ConnectedBlock, FastChain, OrganizeOutcome};
use containers::{locator_heights, Block, CompactBlock, Hash32};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::messages::{
    BlockTransactions, Capabilities, GetBlockTransactions, GetBlocks, GetData, GetHeaders,
    Headers, Inventory, InventoryVector, Message, NotFound, SendCompact,
};
use crate::transport::{Channel, Deadline};

use super::compact::{reconstruct, PendingAssembly, Reconstruction};
use super::config::SyncSettings;
use super::error::DropReason;
use super::reservation::{Reservation, Reservations};

/// Terminal result of one channel's protocol run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOutcome {
    /// The bound reservation is fully consumed and no more work could be
    /// stolen from the table.
    Complete,

    /// The channel was dropped; its unfinished work returned to the
    /// reservation for another connection.
    Dropped(DropReason),
}

enum Control {
    Continue,
    Complete,
}

/// Per-channel block protocol.
///
/// Drives one peer connection bound to one reservation: negotiates
/// capability flags from the version, walks the chain with locator
/// requests, claims this slot's hashes into a FIFO backlog, matches
/// deliveries strictly against the backlog head, forwards accepted blocks
/// to the chain and polices the peer with a staleness deadline.
pub struct BlockProtocol {
    channel: Box<dyn Channel>,
    chain: Arc<dyn FastChain>,
    reservation: Arc<Reservation>,
    reservations: Arc<Reservations>,
    capabilities: Capabilities,
    settings: SyncSettings,
    backlog: Mutex<VecDeque<Hash32>>,
    assembly: Option<PendingAssembly>,
    stop: watch::Receiver<bool>,
}

impl BlockProtocol {
    pub fn new(
        channel: Box<dyn Channel>,
        chain: Arc<dyn FastChain>,
        reservation: Arc<Reservation>,
        reservations: Arc<Reservations>,
        settings: SyncSettings,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let capabilities = Capabilities::from_version(channel.negotiated_version());

        BlockProtocol {
            channel,
            chain,
            reservation,
            reservations,
            capabilities,
            settings,
            backlog: Mutex::new(VecDeque::new()),
            assembly: None,
            stop,
        }
    }

    /// Drive the channel until its reservation is exhausted or the peer is
    /// dropped. Unreceived backlog hashes are returned to the reservation
    /// on every drop path.
    pub async fn run(mut self) -> ProtocolOutcome {
        match self.run_inner().await {
            Ok(()) => ProtocolOutcome::Complete,
            Err(reason) => {
                self.restore_backlog();
                ProtocolOutcome::Dropped(reason)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<(), DropReason> {
        if self.capabilities.prefer_headers {
            // Ask peer to announce blocks with headers vs. inventory.
            self.send(Message::SendHeaders).await?;
        }

        if self.capabilities.accept_compact {
            self.send(Message::SendCompact(SendCompact {
                high_bandwidth: self.settings.compact_high_bandwidth,
                version: 1,
            }))
            .await?;
        }

        self.send_get_blocks(None).await?;

        let mut deadline = Deadline::new(self.settings.block_latency());

        loop {
            tokio::select! {
                message = self.channel.recv() => {
                    let Some(message) = message else {
                        return Err(DropReason::Disconnected);
                    };

                    match self.handle(message, &mut deadline).await? {
                        Control::Continue => {}
                        Control::Complete => return Ok(()),
                    }
                }

                _ = deadline.wait() => {
                    if let Some(reason) = self.handle_timeout() {
                        return Err(reason);
                    }

                    // Quiet channel with work still assigned: walk the chain
                    // again, other slots have likely advanced the top since
                    // our last locator.
                    if !self.reservation.is_empty() && self.backlog.lock().is_empty() {
                        self.send_get_blocks(None).await?;
                    }

                    deadline.reset();
                }

                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        return Err(DropReason::Stopping);
                    }
                }
            }
        }
    }

    async fn handle(
        &mut self,
        message: Message,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        match message {
            Message::Headers(headers) => self.handle_headers(headers, deadline).await,
            Message::Inventory(inventory) => self.handle_inventory(inventory, deadline).await,
            Message::NotFound(not_found) => self.handle_not_found(not_found),
            Message::Block(block) => self.handle_block(*block, deadline).await,
            Message::CompactBlock(announcement) => {
                self.handle_compact_block(*announcement, deadline).await
            }
            Message::BlockTransactions(supplied) => {
                self.handle_block_transactions(supplied, deadline).await
            }
            // Requests are served by the outbound side; nothing to do here.
            _ => Ok(Control::Continue),
        }
    }

    // Send get_[headers|blocks] sequence.
    //-------------------------------------------------------------------------

    async fn send_get_blocks(&mut self, stop_hash: Option<Hash32>) -> Result<(), DropReason> {
        let heights = locator_heights(self.chain.top_height().await);

        let locator = match self.chain.fetch_block_locator(&heights).await {
            Ok(locator) => locator,
            Err(err) => {
                error!(
                    peer = %self.channel.authority(),
                    %err,
                    "Internal failure generating block locator"
                );
                return Err(err.into());
            }
        };

        let Some(last_hash) = locator.first().copied() else {
            return Ok(());
        };

        let request_type = if self.capabilities.request_headers {
            "headers"
        } else {
            "inventory"
        };

        match stop_hash {
            None => debug!(
                peer = %self.channel.authority(),
                request = request_type,
                after = %last_hash,
                "Asking peer for announcements"
            ),
            Some(stop) => debug!(
                peer = %self.channel.authority(),
                request = request_type,
                from = %last_hash,
                through = %stop,
                "Asking peer for announcements"
            ),
        }

        let stop_hash = stop_hash.unwrap_or(Hash32::ZERO);

        let message = if self.capabilities.request_headers {
            Message::GetHeaders(GetHeaders {
                start_hashes: locator,
                stop_hash,
            })
        } else {
            Message::GetBlocks(GetBlocks {
                start_hashes: locator,
                stop_hash,
            })
        };

        self.send(message).await
    }

    // Receive headers|inventory sequence.
    //-------------------------------------------------------------------------

    async fn handle_headers(
        &mut self,
        headers: Headers,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        // A batch of headers out of order cannot be requested in order.
        if !headers.is_sequential() {
            warn!(
                peer = %self.channel.authority(),
                "Block headers out of order"
            );
            return Err(DropReason::UnsequencedHeaders);
        }

        self.request_blocks(headers.block_hashes(), deadline).await
    }

    async fn handle_inventory(
        &mut self,
        inventory: Inventory,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        self.request_blocks(inventory.block_hashes(), deadline).await
    }

    async fn request_blocks(
        &mut self,
        candidates: Vec<Hash32>,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        if candidates.is_empty() {
            return Ok(Control::Continue);
        }

        // Remove hashes of blocks that we already have.
        let wanted = match self.chain.filter_blocks(candidates).await {
            Ok(wanted) => wanted,
            Err(err) => {
                error!(
                    peer = %self.channel.authority(),
                    %err,
                    "Internal failure filtering block hashes"
                );
                return Err(err.into());
            }
        };

        // Request only what this slot owns; other slots request their share.
        let claimed = self.reservation.claim(&wanted);
        if claimed.is_empty() {
            return Ok(Control::Continue);
        }

        let fresh = {
            let mut backlog = self.backlog.lock();
            let fresh = backlog.is_empty();
            backlog.extend(claimed.iter().copied());
            fresh
        };

        // There was no backlog so the latency budget starts now.
        if fresh {
            deadline.reset();
        }

        let inventories = claimed.into_iter().map(InventoryVector::block).collect();
        self.send(Message::GetData(GetData(inventories))).await?;
        Ok(Control::Continue)
    }

    // Receive not_found sequence.
    //-------------------------------------------------------------------------

    fn handle_not_found(&mut self, not_found: NotFound) -> Result<Control, DropReason> {
        let hashes = not_found.block_hashes();

        for hash in &hashes {
            debug!(
                peer = %self.channel.authority(),
                block = %hash,
                "Block not_found"
            );
        }

        // The peer cannot locate blocks it told us it had. Drop it so the
        // next channel generates a new locator and backlog.
        if !hashes.is_empty() {
            return Err(DropReason::NotFound);
        }

        Ok(Control::Continue)
    }

    // Receive block sequence.
    //-------------------------------------------------------------------------

    async fn handle_block(
        &mut self,
        block: Block,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        let hash = block.hash();

        let (matched, cleared) = {
            let mut backlog = self.backlog.lock();
            let matched = backlog.front() == Some(&hash);

            if matched {
                backlog.pop_front();
            }

            (matched, backlog.is_empty())
        };

        // A block we did not ask for next is either unsolicited or out of
        // order; neither is recoverable for this channel.
        if !matched {
            debug!(
                peer = %self.channel.authority(),
                block = %hash,
                "Block unexpected or out of order"
            );
            return Err(DropReason::BacklogMismatch);
        }

        self.reservation.record_import(block.serialized_size());

        let transactions = block.transactions.len();
        let inputs = block.total_inputs().max(1);
        let outcome = self.chain.organize(block).await;

        // A new request resets the deadline too, but the lack of response to
        // that request must still be bounded.
        deadline.reset();

        let requested = self
            .handle_organized(hash, transactions, inputs, outcome, true)
            .await?;

        if cleared {
            // Empty after pop: this slot needs new work before requesting.
            if self.reservation.is_empty() && !self.reservations.populate(&self.reservation) {
                return Ok(Control::Complete);
            }

            if !requested {
                self.send_get_blocks(None).await?;
            }
        }

        Ok(Control::Continue)
    }

    /// Handle the chain's verdict on one block. Returns whether a follow-up
    /// locator request was already sent. `claimed` marks blocks that came
    /// out of this slot's queue, so an unorganized orphan can go back in.
    async fn handle_organized(
        &mut self,
        hash: Hash32,
        transactions: usize,
        inputs: usize,
        outcome: Result<OrganizeOutcome, ChainError>,
        claimed: bool,
    ) -> Result<bool, DropReason> {
        match outcome {
            Ok(OrganizeOutcome::Connected(connected)) => {
                debug!(
                    peer = %self.channel.authority(),
                    block = %hash,
                    height = connected.height,
                    "Connected block"
                );
                self.report(hash, transactions, inputs, &connected);
                Ok(false)
            }
            Ok(OrganizeOutcome::Orphan) => {
                debug!(
                    peer = %self.channel.authority(),
                    block = %hash,
                    "Captured orphan block"
                );

                // The block was received but not organized; it is still
                // owed to the sync, so it goes back to the queue.
                if claimed {
                    self.reservation.restore(vec![hash]);
                }

                // Ask the peer for blocks from the chain top up to this orphan.
                self.send_get_blocks(Some(hash)).await?;
                Ok(true)
            }
            Ok(OrganizeOutcome::Duplicate) => {
                debug!(
                    peer = %self.channel.authority(),
                    block = %hash,
                    "Captured duplicate block"
                );
                Ok(false)
            }
            Ok(OrganizeOutcome::InsufficientWork) => {
                debug!(
                    peer = %self.channel.authority(),
                    block = %hash,
                    "Captured block with insufficient work"
                );
                Ok(false)
            }
            Err(err) => {
                debug!(
                    peer = %self.channel.authority(),
                    block = %hash,
                    %err,
                    "Rejected block"
                );
                Err(err.into())
            }
        }
    }

    // Receive compact block sequence.
    //-------------------------------------------------------------------------

    async fn handle_compact_block(
        &mut self,
        announcement: CompactBlock,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        let hash = announcement.header.hash();
        debug!(
            peer = %self.channel.authority(),
            block = %hash,
            short_ids = announcement.short_ids.len(),
            prefilled = announcement.prefilled.len(),
            "Compact block announcement"
        );

        let key = announcement.key();
        let resolved = self
            .chain
            .resolve_short_ids(&key, &announcement.short_ids)
            .await;

        match reconstruct(&announcement, resolved) {
            Ok(Reconstruction::Complete(block)) => {
                self.accept_reconstructed(block, deadline).await
            }
            Ok(Reconstruction::Incomplete(assembly)) => {
                let missing = assembly.missing_ids();
                debug!(
                    peer = %self.channel.authority(),
                    block = %hash,
                    missing = missing.len(),
                    "Requesting missing compact block transactions"
                );

                self.assembly = Some(assembly);
                self.send(Message::GetBlockTransactions(GetBlockTransactions {
                    block_hash: hash,
                    short_ids: missing,
                }))
                .await?;

                deadline.reset();
                Ok(Control::Continue)
            }
            Err(err) => Err(DropReason::MalformedCompact(err.to_string())),
        }
    }

    async fn handle_block_transactions(
        &mut self,
        supplied: BlockTransactions,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        let assembly = match self.assembly.take() {
            Some(assembly) if assembly.block_hash() == supplied.block_hash => assembly,
            _ => {
                return Err(DropReason::MalformedCompact(
                    "unsolicited block transactions".to_string(),
                ))
            }
        };

        match assembly.supply(supplied.transactions) {
            Ok(block) => self.accept_reconstructed(block, deadline).await,
            Err(err) => Err(DropReason::MalformedCompact(err.to_string())),
        }
    }

    /// Reconstructed announcements take the same acceptance path as a
    /// delivered block, minus the backlog match: announcements are
    /// unsolicited by construction.
    async fn accept_reconstructed(
        &mut self,
        block: Block,
        deadline: &mut Deadline,
    ) -> Result<Control, DropReason> {
        let hash = block.hash();
        let transactions = block.transactions.len();
        let inputs = block.total_inputs().max(1);

        let outcome = self.chain.organize(block).await;
        deadline.reset();

        self.handle_organized(hash, transactions, inputs, outcome, false)
            .await?;
        Ok(Control::Continue)
    }

    // Timer.
    //-------------------------------------------------------------------------

    fn handle_timeout(&mut self) -> Option<DropReason> {
        // Since we need blocks, do not stay connected in a bad version range.
        if !self.capabilities.serves_blocks {
            return Some(DropReason::NoBlocks);
        }

        let backlog_empty = self.backlog.lock().is_empty();

        // Requested blocks outstanding past the latency budget.
        if !backlog_empty {
            debug!(
                peer = %self.channel.authority(),
                "Peer exceeded configured block latency"
            );
            return Some(DropReason::Latency);
        }

        // Caught up with this peer, but if the whole node is stale another
        // peer may do better than this one.
        if self.chain.is_stale() {
            return Some(DropReason::StaleNode);
        }

        None
    }

    // Block reporting.
    //-------------------------------------------------------------------------

    fn report(&self, hash: Hash32, transactions: usize, inputs: usize, connected: &ConnectedBlock) {
        if !report_enabled(connected.height) {
            return;
        }

        let times = &connected.timings;
        let per_input = |micros: u128| (micros as f64 / inputs as f64).round() as u64;

        info!(
            block = %hash,
            height = connected.height,
            txs = transactions,
            inputs,
            wait_ms = times.wait.as_millis() as u64,
            validate_ms = times.validation_total().as_millis() as u64,
            validate_us = per_input(times.validation_total().as_micros()),
            deserialize_us = per_input(times.deserialize.as_micros()),
            check_us = per_input(times.check.as_micros()),
            populate_us = per_input(times.populate.as_micros()),
            accept_us = per_input(times.accept.as_micros()),
            connect_us = per_input(times.connect.as_micros()),
            deposit_us = per_input(times.deposit.as_micros()),
            cache = connected.cache_efficiency,
            "Block report"
        );
    }

    //-------------------------------------------------------------------------

    async fn send(&mut self, message: Message) -> Result<(), DropReason> {
        let command = message.command();
        self.channel
            .send(message)
            .await
            .map_err(|err| DropReason::SendFailed(format!("{command}: {err}")))
    }

    fn restore_backlog(&mut self) {
        let remnants: Vec<Hash32> = self.backlog.lock().drain(..).collect();
        if !remnants.is_empty() {
            self.reservation.restore(remnants);
        }
    }
}

/// Vary the block report interval by height: every 100th block early on,
/// every 10th in the mid range, every block once validation dominates.
fn report_enabled(height: u64) -> bool {
    let modulus = if height < 100_000 {
        100
    } else if height < 200_000 {
        10
    } else {
        1
    };

    height % modulus == 0
}
