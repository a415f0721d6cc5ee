use containers::{Block, BlockHeader, CompactBlock, Hash32, ShortId, Transaction};
use serde::{Deserialize, Serialize};

/// Protocol version thresholds gating optional peer behavior.
pub mod level {
    /// Locator requests may use `get_headers` instead of `get_blocks`.
    pub const HEADERS: u32 = 31_800;

    /// Peer understands `send_headers` and can announce blocks with headers
    /// instead of inventory.
    pub const SEND_HEADERS: u32 = 70_012;

    /// Peer understands `send_compact` and can announce blocks compactly.
    pub const SEND_COMPACT: u32 = 70_014;

    /// Inclusive bounds of the legacy version range that does not serve
    /// blocks at all.
    pub const NO_BLOCKS_START: u32 = 32_100;
    pub const NO_BLOCKS_END: u32 = 70_000;
}

/// Capability flags for one channel, computed once from the negotiated
/// version at attach time and branched on thereafter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Ask the peer to announce blocks with headers instead of inventory.
    pub prefer_headers: bool,

    /// Ask the peer to announce blocks compactly.
    pub accept_compact: bool,

    /// Locator requests go out as `get_headers` rather than `get_blocks`.
    pub request_headers: bool,

    /// Whether this peer's version serves block transfer at all. A channel
    /// that cannot serve blocks is torn down on the first staleness fire.
    pub serves_blocks: bool,
}

impl Capabilities {
    pub fn from_version(version: u32) -> Self {
        Capabilities {
            prefer_headers: version >= level::SEND_HEADERS,
            accept_compact: version >= level::SEND_COMPACT,
            request_headers: version >= level::HEADERS,
            serves_blocks: version > level::NO_BLOCKS_END || version < level::NO_BLOCKS_START,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryKind {
    Block,
    Transaction,
    CompactBlock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryVector {
    pub kind: InventoryKind,
    pub hash: Hash32,
}

impl InventoryVector {
    pub fn block(hash: Hash32) -> Self {
        InventoryVector {
            kind: InventoryKind::Block,
            hash,
        }
    }
}

/// Locator-anchored request for headers following the latest recognized
/// start hash, optionally bounded by a stop hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHeaders {
    pub start_hashes: Vec<Hash32>,
    pub stop_hash: Hash32,
}

/// Pre-headers variant of [`GetHeaders`]: same locator, inventory response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocks {
    pub start_hashes: Vec<Hash32>,
    pub stop_hash: Hash32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(pub Vec<BlockHeader>);

impl Headers {
    /// Whether each header chains onto the one before it. A batch that is
    /// not sequential cannot be converted to an ordered block request.
    pub fn is_sequential(&self) -> bool {
        self.0
            .windows(2)
            .all(|pair| pair[1].previous == pair[0].hash())
    }

    pub fn block_hashes(&self) -> Vec<Hash32> {
        self.0.iter().map(BlockHeader::hash).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory(pub Vec<InventoryVector>);

impl Inventory {
    pub fn block_hashes(&self) -> Vec<Hash32> {
        self.0
            .iter()
            .filter(|inventory| inventory.kind == InventoryKind::Block)
            .map(|inventory| inventory.hash)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetData(pub Vec<InventoryVector>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFound(pub Vec<InventoryVector>);

impl NotFound {
    pub fn block_hashes(&self) -> Vec<Hash32> {
        self.0
            .iter()
            .filter(|inventory| inventory.kind == InventoryKind::Block)
            .map(|inventory| inventory.hash)
            .collect()
    }
}

/// Announce-compactly preference, with the relay mode and compact version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendCompact {
    pub high_bandwidth: bool,
    pub version: u64,
}

/// Follow-up request for transactions a compact announcement could not
/// resolve locally, identified by their short ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockTransactions {
    pub block_hash: Hash32,
    pub short_ids: Vec<ShortId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTransactions {
    pub block_hash: Hash32,
    pub transactions: Vec<Transaction>,
}

/// Peer protocol messages consumed and produced by the sync engine. Framing
/// and codecs belong to the transport layer; the engine sees typed values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    GetHeaders(GetHeaders),
    GetBlocks(GetBlocks),
    Headers(Headers),
    Inventory(Inventory),
    GetData(GetData),
    NotFound(NotFound),
    Block(Box<Block>),
    CompactBlock(Box<CompactBlock>),
    SendHeaders,
    SendCompact(SendCompact),
    GetBlockTransactions(GetBlockTransactions),
    BlockTransactions(BlockTransactions),
}

impl Message {
    /// Wire command name, for diagnostics.
    pub fn command(&self) -> &'static str {
        match self {
            Message::GetHeaders(_) => "get_headers",
            Message::GetBlocks(_) => "get_blocks",
            Message::Headers(_) => "headers",
            Message::Inventory(_) => "inventory",
            Message::GetData(_) => "get_data",
            Message::NotFound(_) => "not_found",
            Message::Block(_) => "block",
            Message::CompactBlock(_) => "compact_block",
            Message::SendHeaders => "send_headers",
            Message::SendCompact(_) => "send_compact",
            Message::GetBlockTransactions(_) => "get_block_transactions",
            Message::BlockTransactions(_) => "block_transactions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use containers::hash256;

    #[test]
    fn capabilities_track_version_levels() {
        let legacy = Capabilities::from_version(31_402);
        assert!(!legacy.prefer_headers);
        assert!(!legacy.accept_compact);
        assert!(!legacy.request_headers);
        assert!(legacy.serves_blocks);

        let modern = Capabilities::from_version(70_015);
        assert!(modern.prefer_headers);
        assert!(modern.accept_compact);
        assert!(modern.request_headers);
        assert!(modern.serves_blocks);
    }

    #[test]
    fn no_blocks_range_is_inclusive() {
        assert!(!Capabilities::from_version(level::NO_BLOCKS_START).serves_blocks);
        assert!(!Capabilities::from_version(level::NO_BLOCKS_END).serves_blocks);
        assert!(Capabilities::from_version(level::NO_BLOCKS_START - 1).serves_blocks);
        assert!(Capabilities::from_version(level::NO_BLOCKS_END + 1).serves_blocks);
    }

    #[test]
    fn sequential_headers_detect_gaps() {
        let first = BlockHeader {
            nonce: 1,
            ..Default::default()
        };
        let second = BlockHeader {
            previous: first.hash(),
            nonce: 2,
            ..Default::default()
        };
        let unrelated = BlockHeader {
            previous: hash256(b"elsewhere"),
            nonce: 3,
            ..Default::default()
        };

        assert!(Headers(vec![]).is_sequential());
        assert!(Headers(vec![first.clone()]).is_sequential());
        assert!(Headers(vec![first.clone(), second]).is_sequential());
        assert!(!Headers(vec![first, unrelated]).is_sequential());
    }

    #[test]
    fn inventory_extracts_only_blocks() {
        let block_hash = hash256(b"block");
        let inventory = Inventory(vec![
            InventoryVector::block(block_hash),
            InventoryVector {
                kind: InventoryKind::Transaction,
                hash: hash256(b"tx"),
            },
        ]);
        assert_eq!(inventory.block_hashes(), vec![block_hash]);
    }
}
