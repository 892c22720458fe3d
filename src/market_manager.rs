//! Market manager interface.
//!
//! Pricing, matching and position bookkeeping live in an external market manager. The
//! engine only asks it for exposures and tells it to execute orders. `SimulatedMarketManager`
//! is an in-memory implementation used by the simulation binary and the tests.

use crate::types::{AccountId, MarketId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketManagerError {
    #[error("Invalid order inputs: {0}")]
    InvalidOrderInputs(String),

    #[error("Order rejected on {market_id}: {reason}")]
    OrderRejected { market_id: MarketId, reason: String },
}

/// One bound of an exposure: signed annualized notional plus the loss realized if the
/// account ends up there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketExposure {
    pub annualized_notional: Decimal,
    pub unrealized_loss: Decimal,
}

/// Lower/upper bound pair. Taker exposures have `lower == upper`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MakerMarketExposure {
    pub lower: MarketExposure,
    pub upper: MarketExposure,
}

impl MakerMarketExposure {
    pub fn taker(annualized_notional: Decimal) -> Self {
        let exposure = MarketExposure {
            annualized_notional,
            unrealized_loss: Decimal::ZERO,
        };
        Self {
            lower: exposure,
            upper: exposure,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlComponents {
    pub realized_pnl: Decimal,
    pub accrued_interest: Decimal,
    pub unrealized_pnl: Decimal,
}

impl PnlComponents {
    /// Cash part of the pnl, counted in the real balance.
    pub fn realized(&self) -> Decimal {
        self.realized_pnl + self.accrued_interest
    }

    pub fn total(&self) -> Decimal {
        self.realized() + self.unrealized_pnl
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountExposures {
    pub exposures: Vec<MakerMarketExposure>,
    pub pnl: PnlComponents,
}

/// Opaque per-market order payload. Only the market manager knows how to read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInputs(pub Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdlOrderParams {
    pub adl_negative_upnl: bool,
    pub adl_positive_upnl: bool,
    /// Sum of unrealized losses across the account's markets in this quote token.
    pub total_unrealized_loss: Decimal,
    /// Real balance plus insurance fund cover plus pending auto-exchange funds.
    pub real_balance_and_if: Decimal,
}

impl AdlOrderParams {
    /// Losses are settled at a bankruptcy price once the available funds cannot cover them.
    pub fn is_bankrupt(&self) -> bool {
        self.total_unrealized_loss > self.real_balance_and_if
    }
}

pub trait MarketManager {
    fn get_account_taker_and_maker_exposures(
        &self,
        market_id: MarketId,
        account_id: AccountId,
    ) -> Result<AccountExposures, MarketManagerError>;

    fn has_unfilled_orders(&self, market_id: MarketId, account_id: AccountId) -> bool;

    fn close_all_unfilled_orders(
        &mut self,
        market_id: MarketId,
        account_id: AccountId,
    ) -> Result<(), MarketManagerError>;

    fn execute_order(
        &mut self,
        market_id: MarketId,
        account_id: AccountId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketManagerError>;

    fn validate_liquidation_order(
        &self,
        liquidatable_account_id: AccountId,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketManagerError>;

    fn execute_liquidation_order(
        &mut self,
        liquidatable_account_id: AccountId,
        liquidator_account_id: AccountId,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketManagerError>;

    fn execute_adl_order(
        &mut self,
        liquidatable_account_id: AccountId,
        market_id: MarketId,
        params: AdlOrderParams,
    ) -> Result<(), MarketManagerError>;

    /// Annualized notional the order would move and its expected price slippage.
    fn get_annualized_exposure_and_slippage(
        &self,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<(Decimal, Decimal), MarketManagerError>;
}

// ---------------------------------------------------------------------------------------
// in-memory manager
// ---------------------------------------------------------------------------------------

/// Order payload understood by `SimulatedMarketManager`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedOrder {
    /// Signed annualized notional the order moves to the submitting account. For liquidation
    /// orders it is the slice of the liquidatable position the liquidator takes over.
    pub annualized_notional: Decimal,
}

impl SimulatedOrder {
    pub fn new(annualized_notional: Decimal) -> Self {
        Self {
            annualized_notional,
        }
    }

    pub fn encode(&self) -> Result<OrderInputs, MarketManagerError> {
        serde_json::to_vec(self)
            .map(OrderInputs)
            .map_err(|e| MarketManagerError::InvalidOrderInputs(e.to_string()))
    }

    pub fn decode(inputs: &OrderInputs) -> Result<Self, MarketManagerError> {
        serde_json::from_slice(&inputs.0)
            .map_err(|e| MarketManagerError::InvalidOrderInputs(e.to_string()))
    }
}

/// Resting maker liquidity: how far the account's notional can move each way if filled,
/// and what filling it would cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnfilledOrders {
    pub long_notional: Decimal,
    pub short_notional: Decimal,
    pub long_unrealized_loss: Decimal,
    pub short_unrealized_loss: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPosition {
    pub annualized_notional: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub accrued_interest: Decimal,
    pub unfilled: Option<UnfilledOrders>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedMarketManager {
    positions: HashMap<(MarketId, AccountId), SimulatedPosition>,
    slippage: HashMap<MarketId, Decimal>,
}

impl SimulatedMarketManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, market_id: MarketId, account_id: AccountId) -> Option<&SimulatedPosition> {
        self.positions.get(&(market_id, account_id))
    }

    fn position_mut(&mut self, market_id: MarketId, account_id: AccountId) -> &mut SimulatedPosition {
        self.positions.entry((market_id, account_id)).or_default()
    }

    pub fn set_slippage(&mut self, market_id: MarketId, slippage: Decimal) {
        self.slippage.insert(market_id, slippage);
    }

    /// Marks a position to a new unrealized pnl, e.g. after a rate move.
    pub fn set_unrealized_pnl(&mut self, market_id: MarketId, account_id: AccountId, upnl: Decimal) {
        self.position_mut(market_id, account_id).unrealized_pnl = upnl;
    }

    pub fn set_accrued_interest(&mut self, market_id: MarketId, account_id: AccountId, accrued: Decimal) {
        self.position_mut(market_id, account_id).accrued_interest = accrued;
    }

    pub fn place_unfilled_orders(
        &mut self,
        market_id: MarketId,
        account_id: AccountId,
        orders: UnfilledOrders,
    ) {
        self.position_mut(market_id, account_id).unfilled = Some(orders);
    }
}

impl MarketManager for SimulatedMarketManager {
    fn get_account_taker_and_maker_exposures(
        &self,
        market_id: MarketId,
        account_id: AccountId,
    ) -> Result<AccountExposures, MarketManagerError> {
        let Some(position) = self.position(market_id, account_id) else {
            return Ok(AccountExposures::default());
        };

        let pnl = PnlComponents {
            realized_pnl: position.realized_pnl,
            accrued_interest: position.accrued_interest,
            unrealized_pnl: position.unrealized_pnl,
        };

        // maker bounds already include the filled notional
        let exposure = match position.unfilled {
            Some(unfilled) => MakerMarketExposure {
                lower: MarketExposure {
                    annualized_notional: position.annualized_notional - unfilled.short_notional,
                    unrealized_loss: unfilled.short_unrealized_loss,
                },
                upper: MarketExposure {
                    annualized_notional: position.annualized_notional + unfilled.long_notional,
                    unrealized_loss: unfilled.long_unrealized_loss,
                },
            },
            None => MakerMarketExposure::taker(position.annualized_notional),
        };

        Ok(AccountExposures {
            exposures: vec![exposure],
            pnl,
        })
    }

    fn has_unfilled_orders(&self, market_id: MarketId, account_id: AccountId) -> bool {
        self.position(market_id, account_id)
            .map(|p| p.unfilled.is_some())
            .unwrap_or(false)
    }

    fn close_all_unfilled_orders(
        &mut self,
        market_id: MarketId,
        account_id: AccountId,
    ) -> Result<(), MarketManagerError> {
        if let Some(position) = self.positions.get_mut(&(market_id, account_id)) {
            position.unfilled = None;
        }
        Ok(())
    }

    fn execute_order(
        &mut self,
        market_id: MarketId,
        account_id: AccountId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketManagerError> {
        let order = SimulatedOrder::decode(inputs)?;
        if order.annualized_notional.is_zero() {
            return Err(MarketManagerError::OrderRejected {
                market_id,
                reason: "zero notional".to_string(),
            });
        }
        // fills at market, so no pnl until the next mark
        self.position_mut(market_id, account_id).annualized_notional += order.annualized_notional;
        Ok(())
    }

    fn validate_liquidation_order(
        &self,
        liquidatable_account_id: AccountId,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketManagerError> {
        let order = SimulatedOrder::decode(inputs)?;
        let held = self
            .position(market_id, liquidatable_account_id)
            .map(|p| p.annualized_notional)
            .unwrap_or_default();

        let reduces = !order.annualized_notional.is_zero()
            && order.annualized_notional.is_sign_positive() == held.is_sign_positive()
            && order.annualized_notional.abs() <= held.abs();
        if !reduces {
            return Err(MarketManagerError::OrderRejected {
                market_id,
                reason: format!(
                    "liquidation order {} does not reduce position {}",
                    order.annualized_notional, held
                ),
            });
        }
        Ok(())
    }

    fn execute_liquidation_order(
        &mut self,
        liquidatable_account_id: AccountId,
        liquidator_account_id: AccountId,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketManagerError> {
        self.validate_liquidation_order(liquidatable_account_id, market_id, inputs)?;
        let order = SimulatedOrder::decode(inputs)?;

        // the transferred slice realizes its share of the pnl on the liquidatable side
        let liquidatable = self.position_mut(market_id, liquidatable_account_id);
        let fraction = order.annualized_notional / liquidatable.annualized_notional;
        let moved_pnl = liquidatable.unrealized_pnl * fraction;
        liquidatable.annualized_notional -= order.annualized_notional;
        liquidatable.unrealized_pnl -= moved_pnl;
        liquidatable.realized_pnl += moved_pnl;

        self.position_mut(market_id, liquidator_account_id).annualized_notional +=
            order.annualized_notional;
        Ok(())
    }

    fn execute_adl_order(
        &mut self,
        liquidatable_account_id: AccountId,
        market_id: MarketId,
        params: AdlOrderParams,
    ) -> Result<(), MarketManagerError> {
        let Some(position) = self.positions.get_mut(&(market_id, liquidatable_account_id)) else {
            return Ok(());
        };

        let upnl = position.unrealized_pnl;
        let selected = if upnl.is_sign_negative() && !upnl.is_zero() {
            params.adl_negative_upnl
        } else {
            params.adl_positive_upnl
        };
        if !selected {
            return Ok(());
        }

        let settled = if upnl < Decimal::ZERO && params.is_bankrupt() {
            // bankruptcy price: losses shrink to what the account and the fund can pay
            let available = params.real_balance_and_if.max(Decimal::ZERO);
            upnl * available / params.total_unrealized_loss
        } else {
            upnl
        };

        position.realized_pnl += settled;
        position.unrealized_pnl = Decimal::ZERO;
        position.annualized_notional = Decimal::ZERO;
        Ok(())
    }

    fn get_annualized_exposure_and_slippage(
        &self,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<(Decimal, Decimal), MarketManagerError> {
        let order = SimulatedOrder::decode(inputs)?;
        let slippage = self.slippage.get(&market_id).copied().unwrap_or_default();
        Ok((order.annualized_notional, slippage))
    }
}
