use containers::{Block, BlockHeader, CompactBlock, Hash32, ShortId, ShortIdKey, Transaction};
use thiserror::Error;

/// Fatal decode failures for one compact announcement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactDecodeError {
    #[error("transaction count overflows")]
    CountOverflow,

    #[error("prefilled gap of {gap} exceeds the {remaining} remaining short ids")]
    GapOverflow { gap: u64, remaining: usize },

    #[error("pool resolution count does not match short id count")]
    ResolutionMismatch,

    #[error("peer supplied a transaction matching no missing short id")]
    UnexpectedTransaction,

    #[error("{0} requested transactions still missing")]
    StillMissing(usize),
}

/// Result of one reconstruction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconstruction {
    /// Every short id resolved locally; the block is ready for organization.
    Complete(Block),

    /// Some short ids were not in the pool. The assembly parks until the
    /// announcing peer supplies the missing transactions.
    Incomplete(PendingAssembly),
}

/// Assemble the announced transaction order from prefilled entries and
/// pool-resolved short ids.
///
/// A prefilled entry's gap counts the short-id slots since the previous
/// prefilled entry, so the walk consumes `gap` short ids before each entry
/// and drains the remainder afterwards. `resolved` must carry one slot per
/// announced short id, in announcement order.
pub fn reconstruct(
    announcement: &CompactBlock,
    resolved: Vec<Option<Transaction>>,
) -> Result<Reconstruction, CompactDecodeError> {
    if resolved.len() != announcement.short_ids.len() {
        return Err(CompactDecodeError::ResolutionMismatch);
    }

    let total = announcement
        .prefilled
        .len()
        .checked_add(announcement.short_ids.len())
        .ok_or(CompactDecodeError::CountOverflow)?;

    let mut slots: Vec<Option<Transaction>> = Vec::with_capacity(total);
    let mut missing: Vec<(usize, ShortId)> = Vec::new();
    let mut resolved = resolved.into_iter();
    let mut next_short = 0usize;

    let mut take_short = |slots: &mut Vec<Option<Transaction>>,
                          missing: &mut Vec<(usize, ShortId)>,
                          next_short: &mut usize| {
        let id = announcement.short_ids[*next_short];
        let transaction = resolved.next().flatten();
        if transaction.is_none() {
            missing.push((slots.len(), id));
        }
        slots.push(transaction);
        *next_short += 1;
    };

    for prefilled in &announcement.prefilled {
        let gap =
            usize::try_from(prefilled.gap).map_err(|_| CompactDecodeError::CountOverflow)?;
        let remaining = announcement.short_ids.len() - next_short;

        if gap > remaining {
            return Err(CompactDecodeError::GapOverflow {
                gap: prefilled.gap,
                remaining,
            });
        }

        for _ in 0..gap {
            take_short(&mut slots, &mut missing, &mut next_short);
        }

        slots.push(Some(prefilled.transaction.clone()));
    }

    while next_short < announcement.short_ids.len() {
        take_short(&mut slots, &mut missing, &mut next_short);
    }

    if missing.is_empty() {
        let transactions = slots.into_iter().flatten().collect();
        return Ok(Reconstruction::Complete(Block {
            header: announcement.header.clone(),
            transactions,
        }));
    }

    Ok(Reconstruction::Incomplete(PendingAssembly {
        header: announcement.header.clone(),
        key: announcement.key(),
        slots,
        missing,
    }))
}

/// Partially reconstructed compact block awaiting missing transactions from
/// the announcing peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAssembly {
    header: BlockHeader,
    key: ShortIdKey,
    /// One slot per transaction of the final block; missing short-id slots
    /// are `None` and tracked in `missing`.
    slots: Vec<Option<Transaction>>,
    missing: Vec<(usize, ShortId)>,
}

impl PendingAssembly {
    pub fn block_hash(&self) -> Hash32 {
        self.header.hash()
    }

    /// Short ids to request from the announcing peer, in block order.
    pub fn missing_ids(&self) -> Vec<ShortId> {
        self.missing.iter().map(|(_, id)| *id).collect()
    }

    /// Fill outstanding slots with peer-supplied transactions.
    ///
    /// Each transaction must short-id (under the announcement key) to an
    /// outstanding slot, and none may remain outstanding afterwards;
    /// anything else is malformed and fatal for the announcement.
    pub fn supply(mut self, transactions: Vec<Transaction>) -> Result<Block, CompactDecodeError> {
        for transaction in transactions {
            let id = self.key.short_id(&transaction.hash());
            let position = self
                .missing
                .iter()
                .position(|(_, missing_id)| *missing_id == id)
                .ok_or(CompactDecodeError::UnexpectedTransaction)?;

            let (slot, _) = self.missing.swap_remove(position);
            self.slots[slot] = Some(transaction);
        }

        if !self.missing.is_empty() {
            return Err(CompactDecodeError::StillMissing(self.missing.len()));
        }

        Ok(Block {
            header: self.header,
            transactions: self.slots.into_iter().flatten().collect(),
        })
    }
}
