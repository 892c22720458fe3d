// 7.0 config.rs: collateral pool settings in one place. risk multipliers, dutch curve,
// liquidation tiers, insurance fund and backstop LP.
// 7.1 every bundle validates itself; pools refuse configs that fail validation.

use crate::types::AccountId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Risk multipliers out of order: need im >= mmr >= 1 >= dutch >= adl >= 0, got im={im} mmr={mmr} dutch={dutch} adl={adl}")]
    InvalidRiskMultipliers {
        im: Decimal,
        mmr: Decimal,
        dutch: Decimal,
        adl: Decimal,
    },

    #[error("{field} must be within [0, 1], got {value}")]
    FractionOutOfRange { field: &'static str, value: Decimal },

    #[error("Liquidation fee shares sum to {total}, above 1")]
    FeeSharesExceedPenalty { total: Decimal },

    #[error("{field} must be positive")]
    ZeroLimit { field: &'static str },

    #[error("{field} must be at most {max}, got {value}")]
    LimitTooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

fn check_fraction(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigError::FractionOutOfRange { field, value });
    }
    Ok(())
}

/// Multipliers applied to the liquidation margin requirement (LMR) to get every other tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskMultipliers {
    pub im_multiplier: Decimal,
    pub mmr_multiplier: Decimal,
    pub dutch_multiplier: Decimal,
    pub adl_multiplier: Decimal,
}

impl Default for RiskMultipliers {
    fn default() -> Self {
        Self {
            im_multiplier: dec!(1.5),
            mmr_multiplier: dec!(1.2),
            dutch_multiplier: dec!(0.8),
            adl_multiplier: dec!(0.5),
        }
    }
}

impl RiskMultipliers {
    // MMR triggers before LM, dutch after LM, ADL last.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.im_multiplier > Decimal::ZERO
            && self.im_multiplier >= self.mmr_multiplier
            && self.mmr_multiplier >= Decimal::ONE
            && Decimal::ONE >= self.dutch_multiplier
            && self.dutch_multiplier >= self.adl_multiplier
            && self.adl_multiplier >= Decimal::ZERO;
        if !ordered {
            return Err(ConfigError::InvalidRiskMultipliers {
                im: self.im_multiplier,
                mmr: self.mmr_multiplier,
                dutch: self.dutch_multiplier,
                adl: self.adl_multiplier,
            });
        }
        Ok(())
    }
}

/// Dutch penalty curve: `d_min + (1 - health) * d_slope`, capped at 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DutchConfiguration {
    pub d_min: Decimal,
    pub d_slope: Decimal,
}

impl Default for DutchConfiguration {
    fn default() -> Self {
        Self {
            d_min: dec!(0.1),
            d_slope: dec!(0.5),
        }
    }
}

impl DutchConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("d_min", self.d_min)?;
        check_fraction("d_slope", self.d_slope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidationConfiguration {
    /// Share of a bid-tier penalty paid to the keeper that triggered execution.
    pub bid_keeper_fee: Decimal,
    /// Share of a backstop penalty paid to the keeper that triggered it.
    pub backstop_keeper_fee: Decimal,
    /// How long a bid round stays open after its first bid.
    pub queue_duration_secs: u64,
    pub max_orders_in_bid: usize,
    pub max_bids_in_queue: usize,
    /// Weight of the reward term in the bid rank; the slippage term gets `1 - weight`.
    pub bid_rank_weight: Decimal,
    /// Penalty parameter for force-closing unfilled orders.
    pub unfilled_penalty_parameter: Decimal,
    /// Penalty parameter for positions absorbed by the backstop LP.
    pub backstop_penalty_parameter: Decimal,
}

impl Default for LiquidationConfiguration {
    fn default() -> Self {
        Self {
            bid_keeper_fee: dec!(0.05),
            backstop_keeper_fee: dec!(0.05),
            queue_duration_secs: 60,
            max_orders_in_bid: 10,
            max_bids_in_queue: 20,
            bid_rank_weight: dec!(0.5),
            unfilled_penalty_parameter: dec!(0.01),
            backstop_penalty_parameter: dec!(0.5),
        }
    }
}

/// A bid round may stay open for at most a year.
pub const MAX_QUEUE_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

impl LiquidationConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("bid_keeper_fee", self.bid_keeper_fee)?;
        check_fraction("backstop_keeper_fee", self.backstop_keeper_fee)?;
        check_fraction("bid_rank_weight", self.bid_rank_weight)?;
        check_fraction("unfilled_penalty_parameter", self.unfilled_penalty_parameter)?;
        check_fraction("backstop_penalty_parameter", self.backstop_penalty_parameter)?;
        if self.queue_duration_secs == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "queue_duration_secs",
            });
        }
        if self.queue_duration_secs > MAX_QUEUE_DURATION_SECS {
            return Err(ConfigError::LimitTooLarge {
                field: "queue_duration_secs",
                value: self.queue_duration_secs,
                max: MAX_QUEUE_DURATION_SECS,
            });
        }
        if self.max_orders_in_bid == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_orders_in_bid",
            });
        }
        if self.max_bids_in_queue == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_bids_in_queue",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsuranceFundConfig {
    pub account_id: AccountId,
    /// Share of every liquidation penalty routed to the insurance fund.
    pub liquidation_fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackstopLpConfig {
    pub account_id: AccountId,
    /// Share of bid and dutch penalties routed to the backstop LP.
    pub liquidation_fee: Decimal,
    /// The backstop LP only earns fees or absorbs positions above this free collateral.
    pub min_free_collateral_threshold_in_usd: Decimal,
}

/// Everything a collateral pool owner can configure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralPoolConfig {
    pub risk: RiskMultipliers,
    pub dutch: DutchConfiguration,
    pub liquidation: LiquidationConfiguration,
    pub insurance_fund: Option<InsuranceFundConfig>,
    pub backstop_lp: Option<BackstopLpConfig>,
    pub fee_collector_account_id: Option<AccountId>,
}

impl Default for CollateralPoolConfig {
    fn default() -> Self {
        Self {
            risk: RiskMultipliers::default(),
            dutch: DutchConfiguration::default(),
            liquidation: LiquidationConfiguration::default(),
            insurance_fund: None,
            backstop_lp: None,
            fee_collector_account_id: None,
        }
    }
}

impl CollateralPoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk.validate()?;
        self.dutch.validate()?;
        self.liquidation.validate()?;

        let insurance_fee = self
            .insurance_fund
            .map(|c| c.liquidation_fee)
            .unwrap_or_default();
        let backstop_fee = self
            .backstop_lp
            .map(|c| c.liquidation_fee)
            .unwrap_or_default();
        check_fraction("insurance_fund.liquidation_fee", insurance_fee)?;
        check_fraction("backstop_lp.liquidation_fee", backstop_fee)?;

        // the liquidator keeps the remainder, which must never go negative
        let keeper_fee = self
            .liquidation
            .bid_keeper_fee
            .max(self.liquidation.backstop_keeper_fee);
        let total = insurance_fee + backstop_fee + keeper_fee;
        if total > Decimal::ONE {
            return Err(ConfigError::FeeSharesExceedPenalty { total });
        }
        Ok(())
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/** 7.2: the engine-wide knobs */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Oracle prices older than this are rejected.
    pub oracle_max_staleness_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            oracle_max_staleness_ms: 60_000,
        }
    }
}
