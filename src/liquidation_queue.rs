//! Liquidation bid priority queue.
//!
//! Competing bids against one account in one quote token are kept in a binary min-heap
//! keyed by rank: lower rank executes first. The heap is array-backed and 1-indexed with a
//! sentinel in slot 0, so the children of `i` sit at `2i` and `2i + 1`.

use crate::market_manager::OrderInputs;
use crate::types::{div_wad, mul_wad, AccountId, Address, MarketId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Liquidation bid heap is empty")]
    EmptyHeap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationBid {
    pub liquidator_account_id: AccountId,
    /// Penalty rate the liquidator asks for on the LMR it removes, in [0, 1].
    pub liquidator_reward_parameter: Decimal,
    pub hook_address: Option<Address>,
    pub quote_collateral: Address,
    pub market_ids: Vec<MarketId>,
    pub inputs: Vec<OrderInputs>,
}

impl LiquidationBid {
    pub fn orders(&self) -> impl Iterator<Item = (MarketId, &OrderInputs)> {
        self.market_ids.iter().copied().zip(self.inputs.iter())
    }
}

/// Heap key. Equal scores fall back to submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BidRank {
    pub score: Decimal,
    pub sequence: u64,
}

/// `w * (1 - reward) + (1 - w) * exposure-weighted slippage`.
///
/// `orders` holds `(annualized exposure, slippage)` per market order. A bid with no exposure
/// at all gets the worst slippage term, 1.
pub fn compute_liquidation_bid_rank(
    rank_weight: Decimal,
    liquidator_reward_parameter: Decimal,
    orders: &[(Decimal, Decimal)],
) -> Decimal {
    let total_exposure: Decimal = orders.iter().map(|(exposure, _)| exposure.abs()).sum();
    let slippage_term = if total_exposure.is_zero() {
        Decimal::ONE
    } else {
        let weighted: Decimal = orders
            .iter()
            .map(|(exposure, slippage)| mul_wad(exposure.abs(), *slippage))
            .sum();
        div_wad(weighted, total_exposure)
    };

    mul_wad(rank_weight, Decimal::ONE - liquidator_reward_parameter)
        + mul_wad(Decimal::ONE - rank_weight, slippage_term)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiquidationBidPriorityQueue {
    ranks: Vec<BidRank>,
    bids: HashMap<BidRank, LiquidationBid>,
    next_sequence: u64,
}

impl LiquidationBidPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bids in the heap, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.ranks.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw heap array, sentinel included at index 0.
    pub fn ranks(&self) -> &[BidRank] {
        &self.ranks
    }

    pub fn enqueue(&mut self, score: Decimal, bid: LiquidationBid) -> BidRank {
        if self.ranks.is_empty() {
            self.ranks.push(BidRank {
                score: Decimal::ZERO,
                sequence: 0,
            });
        }

        self.next_sequence += 1;
        let rank = BidRank {
            score,
            sequence: self.next_sequence,
        };
        self.ranks.push(rank);
        self.bids.insert(rank, bid);
        self.sift_up(self.ranks.len() - 1);
        rank
    }

    pub fn dequeue(&mut self) -> Result<(BidRank, LiquidationBid), QueueError> {
        if self.is_empty() {
            return Err(QueueError::EmptyHeap);
        }

        let top = self.ranks.swap_remove(1);
        if self.ranks.len() > 1 {
            self.sift_down(1);
        }
        let bid = self.bids.remove(&top).ok_or(QueueError::EmptyHeap)?;
        Ok((top, bid))
    }

    pub fn top(&self) -> Result<BidRank, QueueError> {
        self.ranks.get(1).copied().ok_or(QueueError::EmptyHeap)
    }

    pub fn top_bid(&self) -> Result<&LiquidationBid, QueueError> {
        let rank = self.top()?;
        self.bids.get(&rank).ok_or(QueueError::EmptyHeap)
    }

    /// Dequeues while the top score is below `threshold`. Returns what was removed.
    pub fn drain(&mut self, threshold: Decimal) -> Vec<(BidRank, LiquidationBid)> {
        let mut drained = Vec::new();
        while let Ok(top) = self.top() {
            if top.score >= threshold {
                break;
            }
            match self.dequeue() {
                Ok(entry) => drained.push(entry),
                Err(_) => break,
            }
        }
        drained
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 1 {
            let parent = index / 2;
            if self.ranks[parent] <= self.ranks[index] {
                break;
            }
            self.ranks.swap(parent, index);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.ranks.len();
        loop {
            let left = index * 2;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.ranks[left] < self.ranks[smallest] {
                smallest = left;
            }
            if right < len && self.ranks[right] < self.ranks[smallest] {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.ranks.swap(index, smallest);
            index = smallest;
        }
    }
}
