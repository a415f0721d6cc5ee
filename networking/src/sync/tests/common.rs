use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chain::{ChainError, ConnectedBlock, FastChain, OrganizeOutcome, ValidationTimings};
use containers::{
    Block, BlockHeader, Hash32, OutPoint, ShortId, ShortIdKey, Transaction, TxInput,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::messages::{Headers, Inventory, InventoryVector, Message};
use crate::transport::{Channel, Connector};

// Deterministic block fixtures
//-----------------------------------------------------------------------------

pub fn make_tx(seed: u32, index: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint {
                hash: containers::hash256(&[seed as u8, index, 0xab]),
                index: index as u32,
            },
            script: vec![index],
            sequence: u32::MAX,
        }],
        outputs: vec![],
        lock_time: seed,
    }
}

pub fn make_block(previous: Hash32, seed: u32, tx_count: u8) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            previous,
            merkle_root: Hash32::ZERO,
            timestamp: seed,
            bits: 0x1d00ffff,
            nonce: seed,
        },
        transactions: (0..tx_count).map(|index| make_tx(seed, index)).collect(),
    }
}

/// Build a chain of `length` blocks, genesis first.
pub fn make_chain(length: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(length);
    let mut previous = Hash32::ZERO;

    for height in 0..length {
        let block = make_block(previous, height as u32, 1);
        previous = block.hash();
        blocks.push(block);
    }

    blocks
}

// Chain double
//-----------------------------------------------------------------------------

/// In-memory chain collaborator. Organizes blocks that extend the tip,
/// reports orphans for unknown parents, and supports scripted outcomes and
/// failure injection for lock and staleness behavior.
pub struct TestChain {
    inner: Mutex<TestChainInner>,
    stale: AtomicBool,
    write_locked: AtomicBool,
    fail_acquire: AtomicBool,
    fail_release: AtomicBool,
}

struct TestChainInner {
    chain: Vec<Hash32>,
    organized: HashSet<Hash32>,
    pool: Vec<Transaction>,
    forced: VecDeque<Result<OrganizeOutcome, ChainError>>,
    organize_log: Vec<Hash32>,
}

impl TestChain {
    /// Chain with only `genesis` organized, at height zero.
    pub fn new(genesis: Hash32) -> Arc<Self> {
        Arc::new(TestChain {
            inner: Mutex::new(TestChainInner {
                chain: vec![genesis],
                organized: HashSet::from([genesis]),
                pool: Vec::new(),
                forced: VecDeque::new(),
                organize_log: Vec::new(),
            }),
            stale: AtomicBool::new(false),
            write_locked: AtomicBool::new(false),
            fail_acquire: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
        })
    }

    pub fn add_pool_transaction(&self, transaction: Transaction) {
        self.inner.lock().pool.push(transaction);
    }

    /// Queue an outcome returned by the next `organize` call, ahead of the
    /// built-in extend-the-tip behavior.
    pub fn force_outcome(&self, outcome: Result<OrganizeOutcome, ChainError>) {
        self.inner.lock().forced.push_back(outcome);
    }

    pub fn is_organized(&self, hash: &Hash32) -> bool {
        self.inner.lock().organized.contains(hash)
    }

    pub fn organize_log(&self) -> Vec<Hash32> {
        self.inner.lock().organize_log.clone()
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::Release);
    }

    pub fn set_fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::Release);
    }

    pub fn set_fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::Release);
    }

    pub fn write_locked(&self) -> bool {
        self.write_locked.load(Ordering::Acquire)
    }

    fn connected(height: u64) -> OrganizeOutcome {
        OrganizeOutcome::Connected(ConnectedBlock {
            height,
            timings: ValidationTimings::default(),
            cache_efficiency: 1.0,
        })
    }
}

#[async_trait]
impl FastChain for TestChain {
    async fn top_height(&self) -> u64 {
        (self.inner.lock().chain.len() - 1) as u64
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
            .filter(|hash| !inner.organized.contains(hash))
            .collect())
    }

    async fn organize(&self, block: Block) -> Result<OrganizeOutcome, ChainError> {
        let hash = block.hash();
        let mut inner = self.inner.lock();
        inner.organize_log.push(hash);

        if let Some(forced) = inner.forced.pop_front() {
            return forced;
        }

        if inner.organized.contains(&hash) {
            return Ok(OrganizeOutcome::Duplicate);
        }

        if block.header.previous == *inner.chain.last().unwrap() {
            inner.chain.push(hash);
            inner.organized.insert(hash);
            return Ok(Self::connected((inner.chain.len() - 1) as u64));
        }

        if inner.organized.contains(&block.header.previous) {
            // Extends a known block that is not the tip: a losing branch.
            return Ok(OrganizeOutcome::InsufficientWork);
        }

        Ok(OrganizeOutcome::Orphan)
    }

    async fn resolve_short_ids(
        &self,
        key: &ShortIdKey,
        ids: &[ShortId],
    ) -> Vec<Option<Transaction>> {
        let inner = self.inner.lock();
        ids.iter()
            .map(|id| {
                inner
                    .pool
                    .iter()
                    .find(|tx| key.short_id(&tx.hash()) == *id)
                    .cloned()
            })
            .collect()
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn begin_write(&self) -> bool {
        if self.fail_acquire.load(Ordering::Acquire) {
            return false;
        }
        !self.write_locked.swap(true, Ordering::AcqRel)
    }

    fn end_write(&self) -> bool {
        if self.fail_release.load(Ordering::Acquire) {
            return false;
        }
        self.write_locked.swap(false, Ordering::AcqRel)
    }
}

// Channel and connector doubles
//-----------------------------------------------------------------------------

pub struct TestChannel {
    authority: String,
    version: u32,
    nonce: u64,
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Test-side handle of a [`TestChannel`]: what the fake peer sees.
pub struct PeerHandle {
    pub to_channel: mpsc::UnboundedSender<Message>,
    pub from_channel: mpsc::UnboundedReceiver<Message>,
}

impl PeerHandle {
    pub fn send(&self, message: Message) {
        self.to_channel.send(message).expect("channel closed");
    }

    pub async fn expect(&mut self) -> Message {
        self.from_channel.recv().await.expect("channel closed")
    }
}

pub fn test_channel(version: u32) -> (TestChannel, PeerHandle) {
    let (to_channel, inbound) = mpsc::unbounded_channel();
    let (outbound, from_channel) = mpsc::unbounded_channel();

    (
        TestChannel {
            authority: "127.0.0.1:8333".to_string(),
            version,
            nonce: 7,
            inbound,
            outbound,
        },
        PeerHandle {
            to_channel,
            from_channel,
        },
    )
}

#[async_trait]
impl Channel for TestChannel {
    fn authority(&self) -> String {
        self.authority.clone()
    }

    fn negotiated_version(&self) -> u32 {
        self.version
    }

    fn nonce(&self) -> u64 {
        self.nonce
    }

    async fn send(&mut self, message: Message) -> anyhow::Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| anyhow::anyhow!("peer gone"))
    }

    async fn recv(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }
}

/// Connector handing out scripted channels in order; once the script is
/// exhausted, connection attempts hang like an unreachable network.
pub struct TestConnector {
    channels: Mutex<VecDeque<Box<dyn Channel>>>,
}

impl TestConnector {
    pub fn new(channels: Vec<Box<dyn Channel>>) -> Arc<Self> {
        Arc::new(TestConnector {
            channels: Mutex::new(channels.into_iter().collect()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self) -> anyhow::Result<Box<dyn Channel>> {
        let next = self.channels.lock().pop_front();
        match next {
            Some(channel) => Ok(channel),
            None => std::future::pending().await,
        }
    }
}

// Scripted serving peer
//-----------------------------------------------------------------------------

/// Channel backed by a task that honestly serves `blocks` (genesis first):
/// answers locator requests with the headers after the best-known anchor
/// and delivers requested blocks in order.
pub fn serving_peer(blocks: Vec<Block>, version: u32) -> Box<dyn Channel> {
    let (channel, mut handle) = test_channel(version);

    let by_hash: HashMap<Hash32, usize> = blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block.hash(), index))
        .collect();

    tokio::spawn(async move {
        while let Some(message) = handle.from_channel.recv().await {
            match message {
                Message::GetHeaders(get) => {
                    let headers =
                        headers_after(&blocks, &by_hash, &get.start_hashes, get.stop_hash);
                    if handle
                        .to_channel
                        .send(Message::Headers(Headers(headers)))
                        .is_err()
                    {
                        return;
                    }
                }
                Message::GetBlocks(get) => {
                    let inventories =
                        headers_after(&blocks, &by_hash, &get.start_hashes, get.stop_hash)
                            .into_iter()
                            .map(|header| InventoryVector::block(header.hash()))
                            .collect();
                    if handle
                        .to_channel
                        .send(Message::Inventory(Inventory(inventories)))
                        .is_err()
                    {
                        return;
                    }
                }
                Message::GetData(get) => {
                    for inventory in get.0 {
                        if let Some(index) = by_hash.get(&inventory.hash) {
                            let block = blocks[*index].clone();
                            if handle
                                .to_channel
                                .send(Message::Block(Box::new(block)))
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    });

    Box::new(channel)
}

fn headers_after(
    blocks: &[Block],
    by_hash: &HashMap<Hash32, usize>,
    start_hashes: &[Hash32],
    stop_hash: Hash32,
) -> Vec<BlockHeader> {
    // The locator is ordered best-first; anchor on the first hash we know.
    let anchor = start_hashes
        .iter()
        .find_map(|hash| by_hash.get(hash).copied())
        .unwrap_or(0);

    let mut headers = Vec::new();
    for block in blocks.iter().skip(anchor + 1).take(2_000) {
        headers.push(block.header.clone());
        if block.hash() == stop_hash {
            break;
        }
    }

    headers
}
