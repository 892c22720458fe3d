//! Market registry records.
//!
//! A market is one instrument/maturity traded on an external market manager. The engine
//! only keeps what risk needs: the quote token, the owning collateral pool, the risk
//! parameter that scales annualized notional into a liquidation margin requirement, and
//! the fee schedule.

use crate::types::{Address, CollateralPoolId, MarketId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Maker/taker fee pair as fractions of annualized notional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeePair {
    pub maker: Decimal,
    pub taker: Decimal,
}

impl FeePair {
    pub fn new(maker: Decimal, taker: Decimal) -> Self {
        Self { maker, taker }
    }
}

/// Fee tiers charged by a market. Liquidation penalties do not use these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketFeeConfig {
    pub protocol: FeePair,
    pub collateral_pool: FeePair,
    pub insurance_fund: FeePair,
}

impl Default for MarketFeeConfig {
    fn default() -> Self {
        Self {
            protocol: FeePair::new(dec!(0.0001), dec!(0.0005)),
            collateral_pool: FeePair::new(dec!(0), dec!(0.0002)),
            insurance_fund: FeePair::new(dec!(0), dec!(0.0001)),
        }
    }
}

impl MarketFeeConfig {
    pub fn validate(&self) -> Result<(), MarketError> {
        for fee in [
            self.protocol.maker,
            self.protocol.taker,
            self.collateral_pool.maker,
            self.collateral_pool.taker,
            self.insurance_fund.maker,
            self.insurance_fund.taker,
        ] {
            if fee < Decimal::ZERO || fee >= Decimal::ONE {
                return Err(MarketError::InvalidFee(fee));
            }
        }
        Ok(())
    }

    pub fn total_taker(&self) -> Decimal {
        self.protocol.taker + self.collateral_pool.taker + self.insurance_fund.taker
    }

    pub fn total_maker(&self) -> Decimal {
        self.protocol.maker + self.collateral_pool.maker + self.insurance_fund.maker
    }
}

/// Parameters supplied when registering a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub quote_token: Address,
    pub market_manager: Address,
    pub collateral_pool_id: CollateralPoolId,
    /// LMR = risk_parameter * |annualized notional|.
    pub risk_parameter: Decimal,
    /// Block of the risk matrix this market belongs to.
    pub risk_block_id: u32,
    pub fees: MarketFeeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub owner: Address,
    pub quote_token: Address,
    pub market_manager: Address,
    pub collateral_pool_id: CollateralPoolId,
    pub risk_parameter: Decimal,
    pub risk_block_id: u32,
    pub fees: MarketFeeConfig,
}

impl Market {
    pub fn new(id: MarketId, owner: Address, config: MarketConfig) -> Result<Self, MarketError> {
        validate_risk_parameter(config.risk_parameter)?;
        config.fees.validate()?;
        Ok(Self {
            id,
            owner,
            quote_token: config.quote_token,
            market_manager: config.market_manager,
            collateral_pool_id: config.collateral_pool_id,
            risk_parameter: config.risk_parameter,
            risk_block_id: config.risk_block_id,
            fees: config.fees,
        })
    }

    fn authorize(&self, caller: Address) -> Result<(), MarketError> {
        if caller != self.owner {
            return Err(MarketError::Unauthorized {
                market_id: self.id,
                caller,
            });
        }
        Ok(())
    }

    pub fn set_fees(&mut self, caller: Address, fees: MarketFeeConfig) -> Result<(), MarketError> {
        self.authorize(caller)?;
        fees.validate()?;
        self.fees = fees;
        Ok(())
    }

    pub fn set_risk_parameter(
        &mut self,
        caller: Address,
        risk_parameter: Decimal,
        risk_block_id: u32,
    ) -> Result<(), MarketError> {
        self.authorize(caller)?;
        validate_risk_parameter(risk_parameter)?;
        self.risk_parameter = risk_parameter;
        self.risk_block_id = risk_block_id;
        Ok(())
    }
}

fn validate_risk_parameter(value: Decimal) -> Result<(), MarketError> {
    if value <= Decimal::ZERO {
        return Err(MarketError::InvalidRiskParameter(value));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    #[error("Invalid fee {0}: must be in [0, 1)")]
    InvalidFee(Decimal),

    #[error("Invalid risk parameter {0}: must be positive")]
    InvalidRiskParameter(Decimal),

    #[error("{caller} is not the owner of {market_id}")]
    Unauthorized { market_id: MarketId, caller: Address },
}
