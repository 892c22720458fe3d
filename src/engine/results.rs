// 8.0.2: result types and errors for engine operations.

use crate::account::AccountError;
use crate::collateral::CollateralError;
use crate::collateral_pool::PoolError;
use crate::liquidation::{LiquidationError, PenaltyDistribution};
use crate::liquidation_queue::{BidRank, QueueError};
use crate::market::MarketError;
use crate::market_manager::MarketManagerError;
use crate::oracle::OracleError;
use crate::types::{AccountId, Address, MarketId, RoundId};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct BidSubmission {
    pub round: RoundId,
    pub rank: BidRank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationResult {
    pub liquidator_account_id: AccountId,
    /// Fall in the quote token raw LMR the liquidation achieved.
    pub lmr_reduction: Decimal,
    pub distribution: PenaltyDistribution,
}

/// Outcome of popping the top bid. A failing bid is dropped, not retried.
#[derive(Debug, Clone, PartialEq)]
pub enum BidExecution {
    Executed(LiquidationResult),
    Failed {
        liquidator_account_id: AccountId,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DutchLiquidationResult {
    pub penalty_parameter: Decimal,
    pub liquidation: LiquidationResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdlResult {
    pub total_unrealized_loss: Decimal,
    pub real_balance_and_if: Decimal,
    pub insurance_fund_cover: Decimal,
    pub bankrupt: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackstopOutcome {
    /// The backstop LP took the positions over.
    Backstop(LiquidationResult),
    AutoDeleveraged(AdlResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnfilledOrdersResult {
    pub market_ids: Vec<MarketId>,
    pub raw_lmr_before: Decimal,
    pub raw_lmr_after: Decimal,
    pub penalty: Decimal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Market {0} not found")]
    MarketNotFound(MarketId),

    #[error("No market manager registered at {0}")]
    MarketManagerNotFound(Address),

    #[error("{account_id} would fall below initial margin (delta {initial_delta})")]
    AccountBelowIM {
        account_id: AccountId,
        initial_delta: Decimal,
    },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("{account_id} can withdraw at most {withdrawable} {token}, requested {requested}")]
    WithdrawalExceedsLimit {
        account_id: AccountId,
        token: Address,
        requested: Decimal,
        withdrawable: Decimal,
    },

    #[error("{account_id} has no {token} debt to auto-exchange (real balance {real_balance})")]
    AutoExchangeNotRequired {
        account_id: AccountId,
        token: Address,
        real_balance: Decimal,
    },

    #[error("Auto-exchange of {amount} {token} exceeds the {debt} debt of {account_id}")]
    AutoExchangeExceedsDebt {
        account_id: AccountId,
        token: Address,
        amount: Decimal,
        debt: Decimal,
    },

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Collateral pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Collateral error: {0}")]
    Collateral(#[from] CollateralError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Market manager error: {0}")]
    MarketManager(#[from] MarketManagerError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Liquidation error: {0}")]
    Liquidation(#[from] LiquidationError),
}
