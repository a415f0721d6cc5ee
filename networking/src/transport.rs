use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use crate::messages::Message;

/// Outbound connection factory.
///
/// Implementations own peer selection, dialing, handshake and version
/// negotiation; the sync engine receives a ready channel. Abstracted so the
/// engine can be driven by tests and simulations.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Channel>>;
}

/// One established peer connection, post-handshake.
#[async_trait]
pub trait Channel: Send {
    /// Peer address, for diagnostics.
    fn authority(&self) -> String;

    /// Protocol version agreed during the handshake.
    fn negotiated_version(&self) -> u32;

    /// Local nonce identifying this channel as a block originator.
    fn nonce(&self) -> u64;

    async fn send(&mut self, message: Message) -> Result<()>;

    /// Next inbound message; `None` once the peer has disconnected.
    async fn recv(&mut self) -> Option<Message>;
}

/// Restartable staleness deadline.
///
/// Tracks a monotonic expiry; handlers push it forward on progress and the
/// channel event loop sleeps until it. Re-creating the sleep each loop
/// iteration keeps resets race-free.
#[derive(Debug)]
pub struct Deadline {
    period: Duration,
    at: Instant,
}

impl Deadline {
    pub fn new(period: Duration) -> Self {
        Deadline {
            period,
            at: Instant::now() + period,
        }
    }

    /// Push the expiry one full period into the future.
    pub fn reset(&mut self) {
        self.at = Instant::now() + self.period;
    }

    /// Sleep until the current expiry.
    pub async fn wait(&self) {
        sleep_until(self.at).await;
    }
}
