//! Dutch and backstop tiers, auto-deleveraging, and the penalty waterfall they share with
//! the bid tier.

use super::core::Engine;
use super::results::{
    AdlResult, BackstopOutcome, DutchLiquidationResult, EngineError, LiquidationResult,
};
use crate::account::Permission;
use crate::config::BackstopLpConfig;
use crate::events::{
    AutoDeleverageEvent, BackstopLiquidationEvent, DutchLiquidationEvent, EventPayload,
};
use crate::liquidation::{
    distribute_penalty, dutch_penalty_parameter, liquidation_penalty, LiquidationError,
    PenaltyDistribution, PenaltyShares,
};
use crate::market_manager::{AdlOrderParams, MarketManager, OrderInputs};
use crate::oracle::PriceOracle;
use crate::types::{AccountId, Address, MarketId};
use log::{info, warn};
use rust_decimal::Decimal;

/// Who receives which share of a penalty.
pub(super) struct PenaltyPayees {
    pub(super) shares: PenaltyShares,
    pub(super) insurance_fund: Option<AccountId>,
    pub(super) backstop_lp: Option<AccountId>,
    pub(super) keeper: Option<AccountId>,
}

impl<M, O> Engine<M, O>
where
    M: MarketManager + Clone,
    O: PriceOracle,
{
    /// Resolves the waterfall for a liquidation of `liquidatable_account_id`. The backstop LP
    /// only takes part when asked to and while its free collateral clears the threshold.
    pub(super) fn penalty_payees(
        &self,
        liquidatable_account_id: AccountId,
        keeper: Option<(AccountId, Decimal)>,
        include_backstop_lp: bool,
    ) -> Result<PenaltyPayees, EngineError> {
        let config = &self.account_pool(liquidatable_account_id)?.config;

        let insurance_fund = config.insurance_fund;
        let backstop_lp = match config.backstop_lp {
            Some(backstop) if include_backstop_lp => {
                let free = self.free_collateral_in_usd(backstop.account_id)?;
                (free > backstop.min_free_collateral_threshold_in_usd).then_some(backstop)
            }
            _ => None,
        };

        Ok(PenaltyPayees {
            shares: PenaltyShares {
                insurance_fund_fee: insurance_fund.map(|c| c.liquidation_fee),
                backstop_lp_fee: backstop_lp.map(|c| c.liquidation_fee),
                keeper_fee: keeper.map(|(_, fee)| fee),
            },
            insurance_fund: insurance_fund.map(|c| c.account_id),
            backstop_lp: backstop_lp.map(|c| c.account_id),
            keeper: keeper.map(|(account_id, _)| account_id),
        })
    }

    /// Moves every part of the distribution out of the liquidatable account.
    pub(super) fn pay_penalty(
        &mut self,
        liquidatable_account_id: AccountId,
        liquidator_account_id: AccountId,
        quote_token: Address,
        payees: &PenaltyPayees,
        distribution: &PenaltyDistribution,
    ) -> Result<(), EngineError> {
        let transfers = [
            (payees.insurance_fund, distribution.insurance_fund_reward),
            (payees.backstop_lp, distribution.backstop_lp_reward),
            (payees.keeper, distribution.keeper_reward),
            (Some(liquidator_account_id), distribution.liquidator_reward),
        ];
        for (recipient, amount) in transfers {
            if let Some(recipient) = recipient {
                self.transfer_collateral(liquidatable_account_id, recipient, quote_token, amount)?;
            }
        }
        Ok(())
    }

    // 9.1: dutch tier

    pub fn execute_dutch_liquidation(
        &mut self,
        caller: Address,
        liquidatable_account_id: AccountId,
        liquidator_account_id: AccountId,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<DutchLiquidationResult, EngineError> {
        self.atomically(|engine| {
            engine.ensure_permission(liquidator_account_id, caller, Permission::Liquidate)?;
            engine.ensure_same_pool(liquidator_account_id, liquidatable_account_id)?;

            let quote_token = engine.market(market_id)?.quote_token;
            let account = engine.account(liquidatable_account_id)?;
            if !account.is_market_active(quote_token, market_id) {
                return Err(LiquidationError::MarketNotActive {
                    account_id: liquidatable_account_id,
                    market_id,
                }
                .into());
            }

            let info = engine.get_usd_margin_info(liquidatable_account_id)?;
            if info.liquidation_delta > Decimal::ZERO {
                return Err(LiquidationError::AccountNotBelowLM {
                    account_id: liquidatable_account_id,
                    liquidation_delta: info.liquidation_delta,
                }
                .into());
            }
            if info.adl_delta < Decimal::ZERO {
                return Err(LiquidationError::AccountBelowADL {
                    account_id: liquidatable_account_id,
                    adl_delta: info.adl_delta,
                }
                .into());
            }

            if let Some(&open) = engine
                .markets_with_unfilled_orders(liquidatable_account_id, quote_token)?
                .first()
            {
                return Err(LiquidationError::AccountHasUnfilledOrders {
                    account_id: liquidatable_account_id,
                    market_id: open,
                }
                .into());
            }

            // bids keep priority until the account falls below the dutch requirement
            let now = engine.time();
            if info.dutch_delta > Decimal::ZERO
                && engine
                    .account(liquidatable_account_id)?
                    .has_pending_bids(quote_token, now)
            {
                return Err(
                    LiquidationError::AccountIsAboveDutchAndLiquidationBidQueueIsNotEmpty {
                        account_id: liquidatable_account_id,
                        quote_token,
                    }
                    .into(),
                );
            }

            let dutch = engine.account_pool(liquidatable_account_id)?.config.dutch;
            let penalty_parameter = dutch_penalty_parameter(info.health(), &dutch);

            let before = engine.raw_lmr(liquidatable_account_id, quote_token)?;
            engine.manager_for_mut(market_id)?.execute_liquidation_order(
                liquidatable_account_id,
                liquidator_account_id,
                market_id,
                inputs,
            )?;
            engine.activate_market(liquidator_account_id, market_id)?;
            let after = engine.raw_lmr(liquidatable_account_id, quote_token)?;
            engine.ensure_lmr_not_increased(liquidatable_account_id, before, after)?;

            let lmr_reduction = before - after;
            let penalty = liquidation_penalty(penalty_parameter, lmr_reduction);
            let payees = engine.penalty_payees(liquidatable_account_id, None, true)?;
            let distribution = distribute_penalty(penalty, &payees.shares);
            engine.pay_penalty(
                liquidatable_account_id,
                liquidator_account_id,
                quote_token,
                &payees,
                &distribution,
            )?;

            engine.ensure_im_satisfied(liquidator_account_id)?;

            engine.emit_event(EventPayload::DutchLiquidation(DutchLiquidationEvent {
                account_id: liquidatable_account_id,
                liquidator_account_id,
                market_id,
                penalty_parameter,
                lmr_reduction,
                distribution,
            }));
            info!(
                "dutch: {} took {} of {} on {} at parameter {}",
                liquidator_account_id, lmr_reduction, liquidatable_account_id, market_id, penalty_parameter
            );

            Ok(DutchLiquidationResult {
                penalty_parameter,
                liquidation: LiquidationResult {
                    liquidator_account_id,
                    lmr_reduction,
                    distribution,
                },
            })
        })
    }

    // 9.2: backstop tier

    /// Below ADL: the backstop LP absorbs `orders` when the account is still solvent in
    /// `quote_token` and the LP is eligible; otherwise the account is auto-deleveraged.
    pub fn execute_backstop_liquidation(
        &mut self,
        liquidatable_account_id: AccountId,
        keeper_account_id: AccountId,
        quote_token: Address,
        orders: &[(MarketId, OrderInputs)],
    ) -> Result<BackstopOutcome, EngineError> {
        self.atomically(|engine| {
            let info = engine.get_usd_margin_info(liquidatable_account_id)?;
            if info.adl_delta >= Decimal::ZERO {
                return Err(LiquidationError::AccountNotBelowADL {
                    account_id: liquidatable_account_id,
                    adl_delta: info.adl_delta,
                }
                .into());
            }

            engine.close_unfilled_orders_internal(liquidatable_account_id, quote_token)?;

            let raw_margin_balance = engine
                .get_margin_info_by_collateral_type(liquidatable_account_id, quote_token)?
                .raw_info
                .raw_margin_balance;
            let backstop = match engine.account_pool(liquidatable_account_id)?.config.backstop_lp {
                Some(backstop)
                    if raw_margin_balance >= Decimal::ZERO
                        && !orders.is_empty()
                        && backstop.account_id != liquidatable_account_id =>
                {
                    let free = engine.free_collateral_in_usd(backstop.account_id)?;
                    (free > backstop.min_free_collateral_threshold_in_usd).then_some(backstop)
                }
                _ => None,
            };

            match backstop {
                Some(backstop) => engine
                    .backstop_liquidation(
                        liquidatable_account_id,
                        keeper_account_id,
                        quote_token,
                        backstop,
                        orders,
                    )
                    .map(BackstopOutcome::Backstop),
                None => engine
                    .auto_deleverage(liquidatable_account_id, quote_token)
                    .map(BackstopOutcome::AutoDeleveraged),
            }
        })
    }

    fn backstop_liquidation(
        &mut self,
        liquidatable_account_id: AccountId,
        keeper_account_id: AccountId,
        quote_token: Address,
        backstop: BackstopLpConfig,
        orders: &[(MarketId, OrderInputs)],
    ) -> Result<LiquidationResult, EngineError> {
        let backstop_lp_account_id = backstop.account_id;
        self.ensure_same_pool(backstop_lp_account_id, liquidatable_account_id)?;

        let before = self.raw_lmr(liquidatable_account_id, quote_token)?;
        for (market_id, inputs) in orders {
            let market_id = *market_id;
            let market_quote = self.market(market_id)?.quote_token;
            if market_quote != quote_token {
                return Err(LiquidationError::LiquidationBidQuoteTokenMismatch {
                    market_id,
                    expected: quote_token,
                    actual: market_quote,
                }
                .into());
            }
            if !self
                .account(liquidatable_account_id)?
                .is_market_active(quote_token, market_id)
            {
                return Err(LiquidationError::MarketNotActive {
                    account_id: liquidatable_account_id,
                    market_id,
                }
                .into());
            }
            self.manager_for_mut(market_id)?.execute_liquidation_order(
                liquidatable_account_id,
                backstop_lp_account_id,
                market_id,
                inputs,
            )?;
            self.activate_market(backstop_lp_account_id, market_id)?;
        }
        let after = self.raw_lmr(liquidatable_account_id, quote_token)?;
        self.ensure_lmr_not_increased(liquidatable_account_id, before, after)?;

        let settings = self.account_pool(liquidatable_account_id)?.config.liquidation;
        let lmr_reduction = before - after;
        let penalty = liquidation_penalty(settings.backstop_penalty_parameter, lmr_reduction);
        let payees = self.penalty_payees(
            liquidatable_account_id,
            Some((keeper_account_id, settings.backstop_keeper_fee)),
            false,
        )?;
        let distribution = distribute_penalty(penalty, &payees.shares);
        self.pay_penalty(
            liquidatable_account_id,
            backstop_lp_account_id,
            quote_token,
            &payees,
            &distribution,
        )?;

        self.ensure_im_satisfied(backstop_lp_account_id)?;

        self.emit_event(EventPayload::BackstopLiquidation(BackstopLiquidationEvent {
            account_id: liquidatable_account_id,
            quote_token,
            backstop_lp_account_id,
            keeper_account_id,
            lmr_reduction,
            distribution,
        }));
        info!(
            "backstop: {} absorbed {} of {} in {}",
            backstop_lp_account_id, lmr_reduction, liquidatable_account_id, quote_token
        );

        Ok(LiquidationResult {
            liquidator_account_id: backstop_lp_account_id,
            lmr_reduction,
            distribution,
        })
    }

    /// Real balance of the insurance fund in `quote_token` that it can put towards a loss.
    fn insurance_fund_cover(
        &self,
        liquidatable_account_id: AccountId,
        quote_token: Address,
    ) -> Result<Option<(AccountId, Decimal)>, EngineError> {
        let Some(fund) = self.account_pool(liquidatable_account_id)?.config.insurance_fund else {
            return Ok(None);
        };
        if fund.account_id == liquidatable_account_id {
            return Ok(None);
        }
        let balance = self
            .get_margin_info_by_collateral_type(fund.account_id, quote_token)?
            .real_balance;
        Ok(Some((fund.account_id, balance.max(Decimal::ZERO))))
    }

    /// Winners are closed at market first, then losers, at a bankruptcy price when the
    /// account, the fund and the pending auto-exchange value cannot cover the losses.
    /// The fund then tops up whatever real balance deficit remains, up to its cover.
    fn auto_deleverage(
        &mut self,
        liquidatable_account_id: AccountId,
        quote_token: Address,
    ) -> Result<AdlResult, EngineError> {
        let markets = self
            .account(liquidatable_account_id)?
            .active_markets(quote_token);

        let mut total_unrealized_loss = Decimal::ZERO;
        for &market_id in &markets {
            let exposures = self
                .manager_for(market_id)?
                .get_account_taker_and_maker_exposures(market_id, liquidatable_account_id)?;
            total_unrealized_loss += (-exposures.pnl.unrealized_pnl).max(Decimal::ZERO);
        }

        let before = self.raw_lmr(liquidatable_account_id, quote_token)?;
        let cover = self.insurance_fund_cover(liquidatable_account_id, quote_token)?;
        let if_cover = cover.map(|(_, amount)| amount).unwrap_or_default();

        let mut real_balance_and_if = Decimal::ZERO;
        for (adl_negative_upnl, adl_positive_upnl) in [(false, true), (true, false)] {
            // recomputed so losses see the profits just realized
            let real_balance = self
                .get_margin_info_by_collateral_type(liquidatable_account_id, quote_token)?
                .real_balance;
            real_balance_and_if = real_balance
                + if_cover
                + self.pending_auto_exchange_funds(liquidatable_account_id, quote_token)?;

            let params = AdlOrderParams {
                adl_negative_upnl,
                adl_positive_upnl,
                total_unrealized_loss,
                real_balance_and_if,
            };
            for &market_id in &markets {
                self.manager_for_mut(market_id)?
                    .execute_adl_order(liquidatable_account_id, market_id, params)?;
            }
        }
        let bankrupt = total_unrealized_loss > real_balance_and_if;

        let after = self.raw_lmr(liquidatable_account_id, quote_token)?;
        self.ensure_lmr_not_increased(liquidatable_account_id, before, after)?;

        let real_balance = self
            .get_margin_info_by_collateral_type(liquidatable_account_id, quote_token)?
            .real_balance;
        let mut insurance_fund_cover = Decimal::ZERO;
        if let Some((fund_account_id, available)) = cover {
            if real_balance < Decimal::ZERO {
                insurance_fund_cover = available.min(-real_balance);
                self.transfer_collateral(
                    fund_account_id,
                    liquidatable_account_id,
                    quote_token,
                    insurance_fund_cover,
                )?;
            }
        }

        self.emit_event(EventPayload::AutoDeleverage(AutoDeleverageEvent {
            account_id: liquidatable_account_id,
            quote_token,
            total_unrealized_loss,
            real_balance_and_if,
            insurance_fund_cover,
            bankrupt,
        }));
        if bankrupt {
            warn!(
                "adl: {} bankrupt in {}: loss {} against {} available",
                liquidatable_account_id, quote_token, total_unrealized_loss, real_balance_and_if
            );
        } else {
            info!(
                "adl: {} deleveraged in {}, fund covered {}",
                liquidatable_account_id, quote_token, insurance_fund_cover
            );
        }

        Ok(AdlResult {
            total_unrealized_loss,
            real_balance_and_if,
            insurance_fund_cover,
            bankrupt,
        })
    }
}
