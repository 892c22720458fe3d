//! Liquidation tiers, penalties and hooks.
//!
//! An account moves through the tiers as its margin deteriorates:
//! below MMR opens the bid queue, below LM forces unfilled orders closed and enables
//! dutch liquidation, below the dutch requirement lifts the bid-queue block on dutch,
//! and below ADL hands the account to the backstop LP or to auto-deleveraging.
//!
//! Penalties are charged on the reduction of the raw LMR a liquidation achieves and are
//! split insurance fund first, backstop LP second, keeper third. The liquidator keeps the
//! remainder, so the parts always sum to the penalty.

use crate::config::DutchConfiguration;
use crate::margin::MarginInfo;
use crate::types::{clamp_unit, mul_wad, AccountId, Address, MarketId, RoundId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationTier {
    /// Maintenance satisfied.
    Solvent,
    /// Below MMR, still above LM. Only bids may be submitted.
    BetweenMmrAndLm,
    /// Below LM, above the dutch requirement.
    BelowLm,
    /// Below the dutch requirement, above ADL.
    BelowDutch,
    BelowAdl,
}

impl LiquidationTier {
    pub fn classify(info: &MarginInfo) -> Self {
        if info.adl_delta < Decimal::ZERO {
            LiquidationTier::BelowAdl
        } else if info.dutch_delta <= Decimal::ZERO {
            LiquidationTier::BelowDutch
        } else if info.liquidation_delta <= Decimal::ZERO {
            LiquidationTier::BelowLm
        } else if info.maintenance_delta < Decimal::ZERO {
            LiquidationTier::BetweenMmrAndLm
        } else {
            LiquidationTier::Solvent
        }
    }
}

/// `min(1, d_min + (1 - health) * d_slope)`.
pub fn dutch_penalty_parameter(health: Decimal, config: &DutchConfiguration) -> Decimal {
    let health = clamp_unit(health);
    (config.d_min + mul_wad(Decimal::ONE - health, config.d_slope)).min(Decimal::ONE)
}

/// `parameter * ΔLMR`, zero when the liquidation removed no requirement.
pub fn liquidation_penalty(parameter: Decimal, lmr_reduction: Decimal) -> Decimal {
    mul_wad(parameter, lmr_reduction.max(Decimal::ZERO))
}

/// Fee shares taking part in one distribution. `None` skips that recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltyShares {
    pub insurance_fund_fee: Option<Decimal>,
    pub backstop_lp_fee: Option<Decimal>,
    pub keeper_fee: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltyDistribution {
    pub penalty: Decimal,
    pub insurance_fund_reward: Decimal,
    pub backstop_lp_reward: Decimal,
    pub keeper_reward: Decimal,
    pub liquidator_reward: Decimal,
}

pub fn distribute_penalty(penalty: Decimal, shares: &PenaltyShares) -> PenaltyDistribution {
    let cut = |fee: Option<Decimal>| fee.map(|f| mul_wad(f, penalty)).unwrap_or_default();

    let insurance_fund_reward = cut(shares.insurance_fund_fee);
    let backstop_lp_reward = cut(shares.backstop_lp_fee);
    let keeper_reward = cut(shares.keeper_fee);

    PenaltyDistribution {
        penalty,
        insurance_fund_reward,
        backstop_lp_reward,
        keeper_reward,
        liquidator_reward: penalty - insurance_fund_reward - backstop_lp_reward - keeper_reward,
    }
}

/// Passed to hooks around a bid's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationHookContext {
    pub liquidatable_account_id: AccountId,
    pub liquidator_account_id: AccountId,
    pub quote_token: Address,
    pub market_ids: Vec<MarketId>,
}

/// Liquidator-supplied callback run before and after its bid executes.
///
/// Hooks live outside the engine's transactional state. When a bid fails after
/// `pre_liquidation` ran, the engine rolls its own books back but anything the hook
/// recorded stays, so implementations must tolerate a `pre_liquidation` that is never
/// followed by a successful liquidation.
pub trait LiquidationHook {
    fn supports_liquidation_hook(&self) -> bool;

    fn pre_liquidation(&mut self, context: &LiquidationHookContext) -> Result<(), String>;

    fn post_liquidation(&mut self, context: &LiquidationHookContext) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiquidationError {
    #[error("{account_id} is not between MMR and LM (maintenance delta {maintenance_delta}, liquidation delta {liquidation_delta})")]
    AccountNotBetweenMmrAndLm {
        account_id: AccountId,
        maintenance_delta: Decimal,
        liquidation_delta: Decimal,
    },

    #[error("{account_id} is not below MMR (maintenance delta {maintenance_delta})")]
    AccountNotBelowMMR {
        account_id: AccountId,
        maintenance_delta: Decimal,
    },

    #[error("{account_id} is not below LM (liquidation delta {liquidation_delta})")]
    AccountNotBelowLM {
        account_id: AccountId,
        liquidation_delta: Decimal,
    },

    #[error("{account_id} is below ADL (adl delta {adl_delta})")]
    AccountBelowADL {
        account_id: AccountId,
        adl_delta: Decimal,
    },

    #[error("{account_id} is not below ADL (adl delta {adl_delta})")]
    AccountNotBelowADL {
        account_id: AccountId,
        adl_delta: Decimal,
    },

    #[error("{account_id} is above dutch and has pending {quote_token} bids")]
    AccountIsAboveDutchAndLiquidationBidQueueIsNotEmpty {
        account_id: AccountId,
        quote_token: Address,
    },

    #[error("{account_id} has unfilled orders on {market_id}")]
    AccountHasUnfilledOrders {
        account_id: AccountId,
        market_id: MarketId,
    },

    #[error("{round} of {quote_token} bids on {account_id} ended at {ended_at}")]
    LiquidationBidPriorityQueueExpired {
        account_id: AccountId,
        quote_token: Address,
        round: RoundId,
        ended_at: Timestamp,
    },

    #[error("{quote_token} bid queue of {account_id} already holds {max} bids")]
    LiquidationBidPriorityQueueOverflow {
        account_id: AccountId,
        quote_token: Address,
        max: usize,
    },

    #[error("Bid carries {orders} orders, max is {max}")]
    LiquidationBidOrdersOverflow { orders: usize, max: usize },

    #[error("Bid has {market_ids} market ids but {inputs} order inputs")]
    LiquidationBidOrderMismatch { market_ids: usize, inputs: usize },

    #[error("{market_id} settles in {actual}, bid is in {expected}")]
    LiquidationBidQuoteTokenMismatch {
        market_id: MarketId,
        expected: Address,
        actual: Address,
    },

    #[error("Liquidator reward parameter {0} above 1")]
    LiquidatorRewardParameterTooHigh(Decimal),

    #[error("{market_id} is not active on {account_id}")]
    MarketNotActive {
        account_id: AccountId,
        market_id: MarketId,
    },

    #[error("Liquidator {liquidator} and liquidatable {liquidatable} are in different collateral pools")]
    LiquidatorAndLiquidatableAccountsPoolMismatch {
        liquidator: AccountId,
        liquidatable: AccountId,
    },

    #[error("Liquidation raised raw LMR of {account_id} from {before} to {after}")]
    LiquidationCausedNegativeLMDeltaChange {
        account_id: AccountId,
        before: Decimal,
        after: Decimal,
    },

    #[error("{0} is not a liquidation hook")]
    InvalidLiquidationHook(Address),

    #[error("Hook {hook} failed: {reason}")]
    HookFailed { hook: Address, reason: String },

    #[error("No open {quote_token} bid round on {account_id}")]
    NoActiveBidRound {
        account_id: AccountId,
        quote_token: Address,
    },

    #[error("{quote_token} bid round on {account_id} is open until {ends_at}")]
    BidRoundStillActive {
        account_id: AccountId,
        quote_token: Address,
        ends_at: Timestamp,
    },
}
