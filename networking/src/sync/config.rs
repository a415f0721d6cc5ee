/// Sync engine configuration: session settings plus operational constants.
use std::time::Duration;

use serde::Deserialize;

/// Interval in which all-channel block download performance is evaluated.
pub const REGULATOR_INTERVAL: Duration = Duration::from_secs(5);

/// Sliding window over which per-slot import rates are measured.
pub const RATE_WINDOW: Duration = Duration::from_secs(30);

/// Ratio between the fastest and slowest slot rates beyond which the
/// regulator donates pending work from the slow slot.
pub const REBALANCE_RATIO: f64 = 3.0;

/// Consecutive connection failures on one slot, while another slot imports,
/// after which the regulator prunes the slot and redistributes its work.
pub const PRUNE_CONNECT_FAILURES: u32 = 25;

/// Pause between connection attempts on a slot.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Settings consumed by a sync session, supplied by the node configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Concurrent sync peer slots.
    pub sync_peers: usize,

    /// Per-peer block latency budget in seconds.
    pub block_latency_seconds: u64,

    /// Overall sync budget in seconds; zero disables the limit.
    pub sync_timeout_seconds: u64,

    /// Request high-bandwidth relay mode from compact-capable peers.
    pub compact_high_bandwidth: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            sync_peers: 4,
            block_latency_seconds: 60,
            sync_timeout_seconds: 0,
            compact_high_bandwidth: true,
        }
    }
}

impl SyncSettings {
    pub fn block_latency(&self) -> Duration {
        Duration::from_secs(self.block_latency_seconds)
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        if self.sync_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sync_timeout_seconds))
        }
    }
}
