//! Margin requirements.
//!
//! The liquidation margin requirement (LMR) of a market exposure is
//! `risk_parameter * |annualized notional|`. Every other tier is a multiple of it:
//! IM, MMR, dutch and ADL. A tier's delta is the margin balance minus
//! `multiplier * LMR + highest unrealized loss`; negative means the tier is breached.
//!
//! Maker exposure comes as a lower/upper bound pair. Whichever bound carries the larger
//! LMR plus loss is the one that counts.
//!
//! Deltas are computed per collateral type, then rolled up the bubble tree. Surplus is
//! haircut on the way up, deficits convert at raw price.

use crate::collateral::ExchangeInfo;
use crate::config::RiskMultipliers;
use crate::market_manager::{MakerMarketExposure, MarketExposure, PnlComponents};
use crate::types::{div_wad, mul_wad, Address};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub fn liquidation_margin_requirement(risk_parameter: Decimal, annualized_notional: Decimal) -> Decimal {
    mul_wad(risk_parameter, annualized_notional.abs())
}

/// LMR and unrealized loss of one exposure bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureRequirement {
    pub liquidation_margin_requirement: Decimal,
    pub unrealized_loss: Decimal,
}

impl ExposureRequirement {
    pub fn of(exposure: &MarketExposure, risk_parameter: Decimal) -> Self {
        Self {
            liquidation_margin_requirement: liquidation_margin_requirement(
                risk_parameter,
                exposure.annualized_notional,
            ),
            unrealized_loss: exposure.unrealized_loss,
        }
    }

    pub fn total(&self) -> Decimal {
        self.liquidation_margin_requirement + self.unrealized_loss
    }
}

/// Picks the bound with the larger LMR plus loss. Ties resolve to the lower bound.
pub fn worst_case_requirement(exposure: &MakerMarketExposure, risk_parameter: Decimal) -> ExposureRequirement {
    let lower = ExposureRequirement::of(&exposure.lower, risk_parameter);
    let upper = ExposureRequirement::of(&exposure.upper, risk_parameter);
    if upper.total() > lower.total() {
        upper
    } else {
        lower
    }
}

/// Aggregate over every exposure of an account in one collateral type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementsAndLoss {
    pub liquidation_margin_requirement: Decimal,
    pub highest_unrealized_loss: Decimal,
}

impl RequirementsAndLoss {
    pub fn add(&mut self, requirement: ExposureRequirement) {
        self.liquidation_margin_requirement += requirement.liquidation_margin_requirement;
        self.highest_unrealized_loss += requirement.unrealized_loss;
    }

    pub fn from_exposures<'a>(
        exposures: impl IntoIterator<Item = (&'a MakerMarketExposure, Decimal)>,
    ) -> Self {
        let mut total = Self::default();
        for (exposure, risk_parameter) in exposures {
            total.add(worst_case_requirement(exposure, risk_parameter));
        }
        total
    }

    /// LMR plus loss, the figure liquidations must never increase.
    pub fn raw_liquidation_margin_requirement(&self) -> Decimal {
        self.liquidation_margin_requirement + self.highest_unrealized_loss
    }
}

/// Un-haircut figures used for health scoring and the no-worsening check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInformation {
    pub raw_margin_balance: Decimal,
    pub raw_liquidation_margin_requirement: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginInfo {
    pub collateral_type: Address,
    pub net_deposits: Decimal,
    pub margin_balance: Decimal,
    pub real_balance: Decimal,
    pub initial_delta: Decimal,
    pub maintenance_delta: Decimal,
    pub liquidation_delta: Decimal,
    pub dutch_delta: Decimal,
    pub adl_delta: Decimal,
    pub raw_info: RawInformation,
}

/// The two deltas pass/fail checks need.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequirementDeltas {
    pub initial_delta: Decimal,
    pub liquidation_delta: Decimal,
}

impl MarginInfo {
    pub fn compute(
        collateral_type: Address,
        net_deposits: Decimal,
        pnl: PnlComponents,
        requirements: RequirementsAndLoss,
        multipliers: &RiskMultipliers,
    ) -> Self {
        let margin_balance = net_deposits + pnl.total();
        let real_balance = net_deposits + pnl.realized();
        let lmr = requirements.liquidation_margin_requirement;
        let loss = requirements.highest_unrealized_loss;
        let delta = |multiplier: Decimal| margin_balance - (mul_wad(multiplier, lmr) + loss);

        Self {
            collateral_type,
            net_deposits,
            margin_balance,
            real_balance,
            initial_delta: delta(multipliers.im_multiplier),
            maintenance_delta: delta(multipliers.mmr_multiplier),
            liquidation_delta: margin_balance - (lmr + loss),
            dutch_delta: delta(multipliers.dutch_multiplier),
            adl_delta: delta(multipliers.adl_multiplier),
            raw_info: RawInformation {
                raw_margin_balance: margin_balance,
                raw_liquidation_margin_requirement: requirements.raw_liquidation_margin_requirement(),
            },
        }
    }

    /// A token with no balance and no exposure.
    pub fn empty(collateral_type: Address) -> Self {
        Self {
            collateral_type,
            net_deposits: Decimal::ZERO,
            margin_balance: Decimal::ZERO,
            real_balance: Decimal::ZERO,
            initial_delta: Decimal::ZERO,
            maintenance_delta: Decimal::ZERO,
            liquidation_delta: Decimal::ZERO,
            dutch_delta: Decimal::ZERO,
            adl_delta: Decimal::ZERO,
            raw_info: RawInformation::default(),
        }
    }

    /// Folds a child token's info into this one. `exchange` converts child units into ours.
    pub fn absorb(&mut self, child: &MarginInfo, exchange: &ExchangeInfo) {
        let up = |amount: Decimal| exchange.convert_with_haircut(amount);

        self.net_deposits += up(child.net_deposits);
        self.margin_balance += up(child.margin_balance);
        self.real_balance += up(child.real_balance);
        self.initial_delta += up(child.initial_delta);
        self.maintenance_delta += up(child.maintenance_delta);
        self.liquidation_delta += up(child.liquidation_delta);
        self.dutch_delta += up(child.dutch_delta);
        self.adl_delta += up(child.adl_delta);

        self.raw_info.raw_margin_balance += exchange.convert_raw(child.raw_info.raw_margin_balance);
        self.raw_info.raw_liquidation_margin_requirement +=
            exchange.convert_raw(child.raw_info.raw_liquidation_margin_requirement);
    }

    pub fn requirement_deltas(&self) -> RequirementDeltas {
        RequirementDeltas {
            initial_delta: self.initial_delta,
            liquidation_delta: self.liquidation_delta,
        }
    }

    pub fn is_im_satisfied(&self) -> bool {
        self.initial_delta >= Decimal::ZERO
    }

    /// `min(1, raw margin balance / raw LMR)`, or 1 with no requirement at all.
    pub fn health(&self) -> Decimal {
        let raw = self.raw_info;
        if raw.raw_liquidation_margin_requirement <= Decimal::ZERO {
            return Decimal::ONE;
        }
        div_wad(raw.raw_margin_balance, raw.raw_liquidation_margin_requirement).min(Decimal::ONE)
    }
}
