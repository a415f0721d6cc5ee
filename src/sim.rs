/// In-process simulation used by the demo binary: a deterministic block
/// chain, an in-memory chain collaborator and peers that serve the chain
/// with a configurable delivery delay. Everything runs through the real
/// sync engine; only the collaborators are simulated.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chain::{ChainError, ConnectedBlock, FastChain, OrganizeOutcome, ValidationTimings};
use containers::{
    Block, BlockHeader, Hash32, OutPoint, ShortId, ShortIdKey, Transaction, TxInput, TxOutput,
};
use networking::messages::{Headers, Inventory, InventoryVector, Message};
use networking::transport::{Channel, Connector};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

const SERVED_PROTOCOL_VERSION: u32 = 70_015;

/// Largest header batch a simulated peer returns per locator request.
const MAX_HEADERS_PER_RESPONSE: usize = 500;

/// Build a deterministic chain of `length` blocks, genesis first.
pub fn generate_chain(length: usize, txs_per_block: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(length);
    let mut previous = Hash32::ZERO;

    for height in 0..length {
        let transactions = (0..txs_per_block)
            .map(|index| Transaction {
                version: 1,
                inputs: vec![TxInput {
                    previous_output: OutPoint {
                        hash: containers::hash256(&(height * 31 + index).to_le_bytes()),
                        index: index as u32,
                    },
                    script: vec![0x51],
                    sequence: u32::MAX,
                }],
                outputs: vec![TxOutput {
                    value: 50_000,
                    script: vec![0x76, 0xa9],
                }],
                lock_time: 0,
            })
            .collect();

        let block = Block {
            header: BlockHeader {
                version: 1,
                previous,
                merkle_root: containers::hash256(&height.to_le_bytes()),
                timestamp: 1_600_000_000 + height as u32,
                bits: 0x1d00ffff,
                nonce: height as u32,
            },
            transactions,
        };

        previous = block.hash();
        blocks.push(block);
    }

    blocks
}

/// In-memory chain collaborator: organizes blocks that extend the tip,
/// reports orphans and duplicates, and synthesizes validation timings from
/// the block size so the height-gated report has something to show.
pub struct SimChain {
    inner: Mutex<SimChainInner>,
    write_locked: AtomicBool,
}

struct SimChainInner {
    chain: Vec<Hash32>,
    organized: HashMap<Hash32, u64>,
}

impl SimChain {
    pub fn new(genesis: &Block) -> Self {
        let hash = genesis.hash();
        SimChain {
            inner: Mutex::new(SimChainInner {
                chain: vec![hash],
                organized: HashMap::from([(hash, 0)]),
            }),
            write_locked: AtomicBool::new(false),
        }
    }

    pub fn height(&self) -> u64 {
        (self.inner.lock().chain.len() - 1) as u64
    }

    fn synthesize_timings(block: &Block) -> ValidationTimings {
        let micros = (block.serialized_size() / 8).max(1) as u64;
        ValidationTimings {
            wait: Duration::from_micros(micros / 4),
            deserialize: Duration::from_micros(micros / 2),
            check: Duration::from_micros(micros),
            populate: Duration::from_micros(micros / 2),
            accept: Duration::from_micros(micros / 4),
            connect: Duration::from_micros(micros * 2),
            deposit: Duration::from_micros(micros),
        }
    }
}

#[async_trait]
impl FastChain for SimChain {
    async fn top_height(&self) -> u64 {
        self.height()
    }

    async fn fetch_block_locator(&self, heights: &[u64]) -> Result<Vec<Hash32>, ChainError> {
        let inner = self.inner.lock();
        Ok(heights
            .iter()
            .filter_map(|height| inner.chain.get(*height as usize).copied())
            .collect())
    }

    async fn filter_blocks(&self, hashes: Vec<Hash32>) -> Result<Vec<Hash32>, ChainError> {
        let inner = self.inner.lock();
        Ok(hashes
            .into_iter()
            .filter(|hash| !inner.organized.contains_key(hash))
            .collect())
    }

    async fn organize(&self, block: Block) -> Result<OrganizeOutcome, ChainError> {
        let hash = block.hash();
        let mut inner = self.inner.lock();

        if inner.organized.contains_key(&hash) {
            return Ok(OrganizeOutcome::Duplicate);
        }

        if block.header.previous != *inner.chain.last().unwrap() {
            return Ok(OrganizeOutcome::Orphan);
        }

        let height = inner.chain.len() as u64;
        inner.chain.push(hash);
        inner.organized.insert(hash, height);

        Ok(OrganizeOutcome::Connected(ConnectedBlock {
            height,
            timings: Self::synthesize_timings(&block),
            cache_efficiency: 0.85,
        }))
    }

    async fn resolve_short_ids(
        &self,
        _key: &ShortIdKey,
        ids: &[ShortId],
    ) -> Vec<Option<Transaction>> {
        // The simulation has no transaction pool.
        ids.iter().map(|_| None).collect()
    }

    fn is_stale(&self) -> bool {
        false
    }

    fn begin_write(&self) -> bool {
        !self.write_locked.swap(true, Ordering::AcqRel)
    }

    fn end_write(&self) -> bool {
        self.write_locked.swap(false, Ordering::AcqRel)
    }
}

/// Hands out simulated peers, each serving the full chain with a per-peer
/// delivery delay; later peers are slower, giving the regulator uneven
/// slot rates to look at.
pub struct SimConnector {
    blocks: Arc<Vec<Block>>,
    next_peer: AtomicUsize,
    delay: Duration,
}

impl SimConnector {
    pub fn new(blocks: Vec<Block>, delay: Duration) -> Self {
        SimConnector {
            blocks: Arc::new(blocks),
            next_peer: AtomicUsize::new(0),
            delay,
        }
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>> {
        let index = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay * (index % 3 + 1) as u32;

        Ok(serve_peer(self.blocks.clone(), index, delay))
    }
}

struct SimChannel {
    authority: String,
    nonce: u64,
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl Channel for SimChannel {
    fn authority(&self) -> String {
        self.authority.clone()
    }

    fn negotiated_version(&self) -> u32 {
        SERVED_PROTOCOL_VERSION
    }

    fn nonce(&self) -> u64 {
        self.nonce
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| anyhow::anyhow!("simulated peer gone"))
    }

    async fn recv(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }
}

fn serve_peer(blocks: Arc<Vec<Block>>, index: usize, delay: Duration) -> Box<dyn Channel> {
    let (to_peer, mut peer_inbox) = mpsc::unbounded_channel();
    let (from_peer, channel_inbox) = mpsc::unbounded_channel();

    let by_hash: HashMap<Hash32, usize> = blocks
        .iter()
        .enumerate()
        .map(|(position, block)| (block.hash(), position))
        .collect();

    tokio::spawn(async move {
        while let Some(message) = peer_inbox.recv().await {
            match message {
                Message::GetHeaders(get) => {
                    let anchor = get
                        .start_hashes
                        .iter()
                        .find_map(|hash| by_hash.get(hash).copied())
                        .unwrap_or(0);

                    let mut headers = Vec::new();
                    for block in blocks.iter().skip(anchor + 1).take(MAX_HEADERS_PER_RESPONSE) {
                        headers.push(block.header.clone());
                        if block.hash() == get.stop_hash {
                            break;
                        }
                    }

                    debug!(peer = index, count = headers.len(), "Serving headers");
                    if from_peer.send(Message::Headers(Headers(headers))).is_err() {
                        return;
                    }
                }
                Message::GetBlocks(get) => {
                    let anchor = get
                        .start_hashes
                        .iter()
                        .find_map(|hash| by_hash.get(hash).copied())
                        .unwrap_or(0);

                    let inventories = blocks
                        .iter()
                        .skip(anchor + 1)
                        .take(MAX_HEADERS_PER_RESPONSE)
                        .map(|block| InventoryVector::block(block.hash()))
                        .collect();

                    if from_peer
                        .send(Message::Inventory(Inventory(inventories)))
                        .is_err()
                    {
                        return;
                    }
                }
                Message::GetData(get) => {
                    for inventory in get.0 {
                        let Some(position) = by_hash.get(&inventory.hash) else {
                            continue;
                        };

                        tokio::time::sleep(delay).await;

                        let block = blocks[*position].clone();
                        if from_peer.send(Message::Block(Box::new(block))).is_err() {
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
    });

    Box::new(SimChannel {
        authority: format!("sim-peer-{index}:8333"),
        nonce: index as u64 + 1,
        inbound: channel_inbox,
        outbound: to_peer,
    })
}
