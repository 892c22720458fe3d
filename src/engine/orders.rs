//! Order routing and forced closing of unfilled orders.

use super::core::Engine;
use super::results::{EngineError, UnfilledOrdersResult};
use crate::account::Permission;
use crate::events::{EventPayload, OrderExecutedEvent, UnfilledOrdersClosedEvent};
use crate::liquidation::{liquidation_penalty, LiquidationError};
use crate::market_manager::{MarketManager, OrderInputs};
use crate::oracle::PriceOracle;
use crate::types::{AccountId, Address, MarketId};
use rust_decimal::Decimal;

impl<M, O> Engine<M, O>
where
    M: MarketManager + Clone,
    O: PriceOracle,
{
    /// Routes a trade to the market's manager. The account must stay above IM.
    pub fn execute_order(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_permission(account_id, caller, Permission::MatchOrder)?;

            engine.ensure_market_in_account_pool(account_id, market_id)?;
            engine
                .manager_for_mut(market_id)?
                .execute_order(market_id, account_id, inputs)?;
            engine.activate_market(account_id, market_id)?;
            engine.ensure_im_satisfied(account_id)?;

            engine.emit_event(EventPayload::OrderExecuted(OrderExecutedEvent {
                account_id,
                market_id,
            }));
            Ok(())
        })
    }

    /// Markets in `quote_token` where the account still has resting orders.
    pub fn markets_with_unfilled_orders(
        &self,
        account_id: AccountId,
        quote_token: Address,
    ) -> Result<Vec<MarketId>, EngineError> {
        let account = self.account(account_id)?;
        let mut markets = Vec::new();
        for market_id in account.active_markets(quote_token) {
            if self.manager_for(market_id)?.has_unfilled_orders(market_id, account_id) {
                markets.push(market_id);
            }
        }
        Ok(markets)
    }

    /// Closes every unfilled order in `quote_token` and checks raw LMR did not grow.
    /// Returns the markets touched and raw LMR before and after.
    pub(super) fn close_unfilled_orders_internal(
        &mut self,
        account_id: AccountId,
        quote_token: Address,
    ) -> Result<(Vec<MarketId>, Decimal, Decimal), EngineError> {
        let markets = self.markets_with_unfilled_orders(account_id, quote_token)?;
        let before = self.raw_lmr(account_id, quote_token)?;
        if markets.is_empty() {
            return Ok((markets, before, before));
        }

        for &market_id in &markets {
            self.manager_for_mut(market_id)?
                .close_all_unfilled_orders(market_id, account_id)?;
        }

        let after = self.raw_lmr(account_id, quote_token)?;
        self.ensure_lmr_not_increased(account_id, before, after)?;

        self.emit_event(EventPayload::UnfilledOrdersClosed(UnfilledOrdersClosedEvent {
            account_id,
            market_ids: markets.clone(),
            raw_lmr_before: before,
            raw_lmr_after: after,
        }));
        Ok((markets, before, after))
    }

    pub(super) fn ensure_lmr_not_increased(
        &self,
        account_id: AccountId,
        before: Decimal,
        after: Decimal,
    ) -> Result<(), EngineError> {
        if after > before {
            return Err(LiquidationError::LiquidationCausedNegativeLMDeltaChange {
                account_id,
                before,
                after,
            }
            .into());
        }
        Ok(())
    }

    /// Force-closes the unfilled orders of an account below LM. The liquidator earns
    /// `unfilled_penalty_parameter` on the LMR removed.
    pub fn close_all_unfilled_orders(
        &mut self,
        caller: Address,
        liquidatable_account_id: AccountId,
        liquidator_account_id: AccountId,
        quote_token: Address,
    ) -> Result<UnfilledOrdersResult, EngineError> {
        self.atomically(|engine| {
            engine.ensure_permission(liquidator_account_id, caller, Permission::Liquidate)?;
            engine.ensure_same_pool(liquidator_account_id, liquidatable_account_id)?;

            let info = engine.get_usd_margin_info(liquidatable_account_id)?;
            if info.liquidation_delta > Decimal::ZERO {
                return Err(LiquidationError::AccountNotBelowLM {
                    account_id: liquidatable_account_id,
                    liquidation_delta: info.liquidation_delta,
                }
                .into());
            }

            let (market_ids, before, after) =
                engine.close_unfilled_orders_internal(liquidatable_account_id, quote_token)?;

            let parameter = engine
                .account_pool(liquidatable_account_id)?
                .config
                .liquidation
                .unfilled_penalty_parameter;
            let penalty = liquidation_penalty(parameter, before - after);
            engine.transfer_collateral(
                liquidatable_account_id,
                liquidator_account_id,
                quote_token,
                penalty,
            )?;

            Ok(UnfilledOrdersResult {
                market_ids,
                raw_lmr_before: before,
                raw_lmr_after: after,
                penalty,
            })
        })
    }
}
