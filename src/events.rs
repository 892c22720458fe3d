// 11.0: every state change produces an event. used for audit trails and for checking what a
// liquidation actually paid out. the EventPayload enum lists all event types.

use crate::liquidation::PenaltyDistribution;
use crate::liquidation_queue::BidRank;
use crate::types::{AccountId, Address, CollateralPoolId, MarketId, RoundId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    // Setup events
    AccountCreated(AccountCreatedEvent),
    CollateralPoolCreated(CollateralPoolCreatedEvent),
    CollateralPoolMerged(CollateralPoolMergedEvent),
    CollateralConfigured(CollateralConfiguredEvent),
    MarketRegistered(MarketRegisteredEvent),

    // Collateral events
    Deposit(CollateralEvent),
    Withdrawal(CollateralEvent),
    WithdrawalRejected(WithdrawalRejectedEvent),
    AutoExchange(AutoExchangeEvent),

    // Trading events
    OrderExecuted(OrderExecutedEvent),
    UnfilledOrdersClosed(UnfilledOrdersClosedEvent),

    // Liquidation events
    LiquidationBidSubmitted(LiquidationBidSubmittedEvent),
    LiquidationBidExecuted(LiquidationBidExecutedEvent),
    LiquidationBidFailed(LiquidationBidFailedEvent),
    LiquidationBidsDrained(LiquidationBidsDrainedEvent),
    DutchLiquidation(DutchLiquidationEvent),
    BackstopLiquidation(BackstopLiquidationEvent),
    AutoDeleverage(AutoDeleverageEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCreatedEvent {
    pub account_id: AccountId,
    pub owner: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralPoolCreatedEvent {
    pub pool_id: CollateralPoolId,
    pub owner: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralPoolMergedEvent {
    pub parent_id: CollateralPoolId,
    pub child_id: CollateralPoolId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralConfiguredEvent {
    pub pool_id: CollateralPoolId,
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRegisteredEvent {
    pub market_id: MarketId,
    pub quote_token: Address,
    pub collateral_pool_id: CollateralPoolId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralEvent {
    pub account_id: AccountId,
    pub token: Address,
    pub amount: Decimal,
    pub new_net_deposits: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRejectedEvent {
    pub account_id: AccountId,
    pub token: Address,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoExchangeEvent {
    pub account_id: AccountId,
    pub auto_exchanger_id: AccountId,
    pub quote_token: Address,
    pub collateral: Address,
    pub quote_amount: Decimal,
    pub collateral_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExecutedEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfilledOrdersClosedEvent {
    pub account_id: AccountId,
    pub market_ids: Vec<MarketId>,
    pub raw_lmr_before: Decimal,
    pub raw_lmr_after: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationBidSubmittedEvent {
    pub account_id: AccountId,
    pub quote_token: Address,
    pub liquidator_account_id: AccountId,
    pub round: RoundId,
    pub rank: BidRank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationBidExecutedEvent {
    pub account_id: AccountId,
    pub quote_token: Address,
    pub liquidator_account_id: AccountId,
    pub keeper_account_id: Option<AccountId>,
    pub lmr_reduction: Decimal,
    pub distribution: PenaltyDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationBidFailedEvent {
    pub account_id: AccountId,
    pub quote_token: Address,
    pub liquidator_account_id: AccountId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationBidsDrainedEvent {
    pub account_id: AccountId,
    pub quote_token: Address,
    pub round: RoundId,
    pub drained: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutchLiquidationEvent {
    pub account_id: AccountId,
    pub liquidator_account_id: AccountId,
    pub market_id: MarketId,
    pub penalty_parameter: Decimal,
    pub lmr_reduction: Decimal,
    pub distribution: PenaltyDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackstopLiquidationEvent {
    pub account_id: AccountId,
    pub quote_token: Address,
    pub backstop_lp_account_id: AccountId,
    pub keeper_account_id: AccountId,
    pub lmr_reduction: Decimal,
    pub distribution: PenaltyDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoDeleverageEvent {
    pub account_id: AccountId,
    pub quote_token: Address,
    pub total_unrealized_loss: Decimal,
    pub real_balance_and_if: Decimal,
    pub insurance_fund_cover: Decimal,
    pub bankrupt: bool,
}

/// Position in the log that a failed transaction rolls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCheckpoint {
    next_id: u64,
}

/// Bounded in-memory event log.
#[derive(Debug, Clone)]
pub struct EventCollector {
    events: Vec<Event>,
    next_id: u64,
    max_events: usize,
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl EventCollector {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
            max_events,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        log::debug!("[Event {}] {:?}", id.0, payload);
        self.events.push(Event::new(id, timestamp, payload));

        if self.events.len() > self.max_events {
            let drain_count = self.events.len() - self.max_events;
            self.events.drain(0..drain_count);
        }
        id
    }

    pub fn checkpoint(&self) -> EventCheckpoint {
        EventCheckpoint {
            next_id: self.next_id,
        }
    }

    /// Drops every event recorded after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: EventCheckpoint) {
        self.events.retain(|e| e.id.0 < checkpoint.next_id);
        self.next_id = checkpoint.next_id;
    }
}
