//! Bid tier.
//!
//! Accounts between MMR and LM collect competing bids per quote token. Bids are ranked on
//! submission and held in a per-round min-heap; keepers pop the best bid while the round is
//! open. A failing bid is discarded and the next one can be tried.

use super::core::Engine;
use super::results::{BidExecution, BidSubmission, EngineError, LiquidationResult};
use crate::account::Permission;
use crate::events::{
    EventPayload, LiquidationBidExecutedEvent, LiquidationBidFailedEvent,
    LiquidationBidSubmittedEvent, LiquidationBidsDrainedEvent,
};
use crate::liquidation::{
    distribute_penalty, liquidation_penalty, LiquidationError, LiquidationHook,
    LiquidationHookContext,
};
use crate::liquidation_queue::{compute_liquidation_bid_rank, LiquidationBid};
use crate::market_manager::MarketManager;
use crate::oracle::PriceOracle;
use crate::types::{AccountId, Address};
use log::{info, warn};
use rust_decimal::Decimal;

impl<M, O> Engine<M, O>
where
    M: MarketManager + Clone,
    O: PriceOracle,
{
    pub fn submit_liquidation_bid(
        &mut self,
        caller: Address,
        liquidatable_account_id: AccountId,
        bid: LiquidationBid,
    ) -> Result<BidSubmission, EngineError> {
        self.atomically(|engine| {
            let liquidator_account_id = bid.liquidator_account_id;
            let quote_token = bid.quote_collateral;
            engine.ensure_permission(liquidator_account_id, caller, Permission::Liquidate)?;
            engine.ensure_same_pool(liquidator_account_id, liquidatable_account_id)?;

            if bid.liquidator_reward_parameter > Decimal::ONE {
                return Err(LiquidationError::LiquidatorRewardParameterTooHigh(
                    bid.liquidator_reward_parameter,
                )
                .into());
            }
            if bid.market_ids.len() != bid.inputs.len() {
                return Err(LiquidationError::LiquidationBidOrderMismatch {
                    market_ids: bid.market_ids.len(),
                    inputs: bid.inputs.len(),
                }
                .into());
            }

            let settings = engine.account_pool(liquidatable_account_id)?.config.liquidation;
            if bid.market_ids.len() > settings.max_orders_in_bid {
                return Err(LiquidationError::LiquidationBidOrdersOverflow {
                    orders: bid.market_ids.len(),
                    max: settings.max_orders_in_bid,
                }
                .into());
            }

            let account = engine.account(liquidatable_account_id)?;
            let mut exposures = Vec::with_capacity(bid.market_ids.len());
            for (market_id, inputs) in bid.orders() {
                let market = engine.market(market_id)?;
                if market.quote_token != quote_token {
                    return Err(LiquidationError::LiquidationBidQuoteTokenMismatch {
                        market_id,
                        expected: quote_token,
                        actual: market.quote_token,
                    }
                    .into());
                }
                if !account.is_market_active(quote_token, market_id) {
                    return Err(LiquidationError::MarketNotActive {
                        account_id: liquidatable_account_id,
                        market_id,
                    }
                    .into());
                }
                let manager = engine.market_manager(market.market_manager)?;
                manager.validate_liquidation_order(liquidatable_account_id, market_id, inputs)?;
                exposures.push(manager.get_annualized_exposure_and_slippage(market_id, inputs)?);
            }

            if let Some(hook) = bid.hook_address {
                let supported = engine
                    .hooks
                    .get(&hook)
                    .map(|h| h.supports_liquidation_hook())
                    .unwrap_or(false);
                if !supported {
                    return Err(LiquidationError::InvalidLiquidationHook(hook).into());
                }
            }

            let info = engine.get_usd_margin_info(liquidatable_account_id)?;
            if info.maintenance_delta >= Decimal::ZERO || info.liquidation_delta <= Decimal::ZERO {
                return Err(LiquidationError::AccountNotBetweenMmrAndLm {
                    account_id: liquidatable_account_id,
                    maintenance_delta: info.maintenance_delta,
                    liquidation_delta: info.liquidation_delta,
                }
                .into());
            }

            let score = compute_liquidation_bid_rank(
                settings.bid_rank_weight,
                bid.liquidator_reward_parameter,
                &exposures,
            );

            let now = engine.time();
            let state = engine
                .account_mut(liquidatable_account_id)?
                .bid_queue_mut(quote_token);
            let round = state.open_round(now, settings.queue_duration_secs);
            let queue = state
                .queue_mut(round)
                .ok_or(LiquidationError::NoActiveBidRound {
                    account_id: liquidatable_account_id,
                    quote_token,
                })?;
            if queue.len() >= settings.max_bids_in_queue {
                return Err(LiquidationError::LiquidationBidPriorityQueueOverflow {
                    account_id: liquidatable_account_id,
                    quote_token,
                    max: settings.max_bids_in_queue,
                }
                .into());
            }
            let rank = queue.enqueue(score, bid);

            engine.emit_event(EventPayload::LiquidationBidSubmitted(LiquidationBidSubmittedEvent {
                account_id: liquidatable_account_id,
                quote_token,
                liquidator_account_id,
                round,
                rank,
            }));
            info!(
                "bid from {} on {} in {}: score {}",
                liquidator_account_id, liquidatable_account_id, round, rank.score
            );
            Ok(BidSubmission { round, rank })
        })
    }

    /// Pops the best bid of the open round and executes it. The pop sticks even when the bid
    /// itself fails.
    pub fn execute_top_ranked_liquidation_bid(
        &mut self,
        liquidatable_account_id: AccountId,
        quote_token: Address,
        keeper_account_id: Option<AccountId>,
    ) -> Result<BidExecution, EngineError> {
        let (rank, bid) = self.atomically(|engine| {
            let now = engine.time();
            let state = engine
                .account_mut(liquidatable_account_id)?
                .bid_queue_mut(quote_token);
            if state.latest_round_id.0 == 0 {
                return Err(LiquidationError::NoActiveBidRound {
                    account_id: liquidatable_account_id,
                    quote_token,
                }
                .into());
            }
            if state.has_expired_round(now) {
                return Err(LiquidationError::LiquidationBidPriorityQueueExpired {
                    account_id: liquidatable_account_id,
                    quote_token,
                    round: state.latest_round_id,
                    ended_at: state.latest_round_end,
                }
                .into());
            }
            let queue = state
                .latest_queue_mut()
                .ok_or(LiquidationError::NoActiveBidRound {
                    account_id: liquidatable_account_id,
                    quote_token,
                })?;
            Ok(queue.dequeue()?)
        })?;

        let liquidator_account_id = bid.liquidator_account_id;
        let outcome = self.atomically(|engine| {
            engine.execute_liquidation_bid(liquidatable_account_id, quote_token, keeper_account_id, &bid)
        });

        match outcome {
            Ok(result) => Ok(BidExecution::Executed(result)),
            Err(e) => {
                warn!(
                    "bid from {} (score {}) on {} failed: {}",
                    liquidator_account_id, rank.score, liquidatable_account_id, e
                );
                let reason = e.to_string();
                self.emit_event(EventPayload::LiquidationBidFailed(LiquidationBidFailedEvent {
                    account_id: liquidatable_account_id,
                    quote_token,
                    liquidator_account_id,
                    reason: reason.clone(),
                }));
                Ok(BidExecution::Failed {
                    liquidator_account_id,
                    reason,
                })
            }
        }
    }

    fn run_hook(
        &mut self,
        address: Address,
        stage: impl FnOnce(&mut dyn LiquidationHook) -> Result<(), String>,
    ) -> Result<(), EngineError> {
        let hook = self
            .hooks
            .get_mut(&address)
            .ok_or(LiquidationError::InvalidLiquidationHook(address))?;
        stage(&mut **hook).map_err(|reason| {
            LiquidationError::HookFailed {
                hook: address,
                reason,
            }
            .into()
        })
    }

    fn execute_liquidation_bid(
        &mut self,
        liquidatable_account_id: AccountId,
        quote_token: Address,
        keeper_account_id: Option<AccountId>,
        bid: &LiquidationBid,
    ) -> Result<LiquidationResult, EngineError> {
        let liquidator_account_id = bid.liquidator_account_id;

        let info = self.get_usd_margin_info(liquidatable_account_id)?;
        if info.maintenance_delta >= Decimal::ZERO {
            return Err(LiquidationError::AccountNotBelowMMR {
                account_id: liquidatable_account_id,
                maintenance_delta: info.maintenance_delta,
            }
            .into());
        }
        if info.liquidation_delta <= Decimal::ZERO {
            self.close_unfilled_orders_internal(liquidatable_account_id, quote_token)?;
        }

        let context = LiquidationHookContext {
            liquidatable_account_id,
            liquidator_account_id,
            quote_token,
            market_ids: bid.market_ids.clone(),
        };
        if let Some(hook) = bid.hook_address {
            self.run_hook(hook, |h| h.pre_liquidation(&context))?;
        }

        let before = self.raw_lmr(liquidatable_account_id, quote_token)?;
        for (market_id, inputs) in bid.orders() {
            self.manager_for_mut(market_id)?.execute_liquidation_order(
                liquidatable_account_id,
                liquidator_account_id,
                market_id,
                inputs,
            )?;
            self.activate_market(liquidator_account_id, market_id)?;
        }
        let after = self.raw_lmr(liquidatable_account_id, quote_token)?;
        self.ensure_lmr_not_increased(liquidatable_account_id, before, after)?;

        let lmr_reduction = before - after;
        let penalty = liquidation_penalty(bid.liquidator_reward_parameter, lmr_reduction);
        let keeper_fee = self
            .account_pool(liquidatable_account_id)?
            .config
            .liquidation
            .bid_keeper_fee;
        let payees = self.penalty_payees(
            liquidatable_account_id,
            keeper_account_id.map(|keeper| (keeper, keeper_fee)),
            true,
        )?;
        let distribution = distribute_penalty(penalty, &payees.shares);
        self.pay_penalty(
            liquidatable_account_id,
            liquidator_account_id,
            quote_token,
            &payees,
            &distribution,
        )?;

        if let Some(hook) = bid.hook_address {
            self.run_hook(hook, |h| h.post_liquidation(&context))?;
        }

        self.ensure_im_satisfied(liquidator_account_id)?;

        self.emit_event(EventPayload::LiquidationBidExecuted(LiquidationBidExecutedEvent {
            account_id: liquidatable_account_id,
            quote_token,
            liquidator_account_id,
            keeper_account_id,
            lmr_reduction,
            distribution,
        }));
        info!(
            "{} liquidated {} in {}: lmr -{} penalty {}",
            liquidator_account_id, liquidatable_account_id, quote_token, lmr_reduction, penalty
        );

        Ok(LiquidationResult {
            liquidator_account_id,
            lmr_reduction,
            distribution,
        })
    }

    /// Retires every bid of an expired round. Returns how many were dropped.
    pub fn drain_expired_liquidation_bids(
        &mut self,
        liquidatable_account_id: AccountId,
        quote_token: Address,
    ) -> Result<usize, EngineError> {
        self.atomically(|engine| {
            let now = engine.time();
            let state = engine
                .account_mut(liquidatable_account_id)?
                .bid_queue_mut(quote_token);
            if state.latest_round_id.0 == 0 {
                return Err(LiquidationError::NoActiveBidRound {
                    account_id: liquidatable_account_id,
                    quote_token,
                }
                .into());
            }
            if !state.has_expired_round(now) {
                return Err(LiquidationError::BidRoundStillActive {
                    account_id: liquidatable_account_id,
                    quote_token,
                    ends_at: state.latest_round_end,
                }
                .into());
            }

            let round = state.latest_round_id;
            let drained = state
                .retire_round(round)
                .map(|mut queue| queue.drain(Decimal::MAX).len())
                .unwrap_or(0);

            engine.emit_event(EventPayload::LiquidationBidsDrained(LiquidationBidsDrainedEvent {
                account_id: liquidatable_account_id,
                quote_token,
                round,
                drained,
            }));
            Ok(drained)
        })
    }
}
