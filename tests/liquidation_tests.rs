//! Liquidation tier scenarios.
//!
//! The trader holds a 100k long at 1% risk: LMR 1000 against 2000 of USDC, so with the
//! default multipliers MMR is 1200, dutch 800 and ADL 500. Marking the position moves the
//! account through the tiers.

mod common;

use common::*;
use margin_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::cell::RefCell;
use std::rc::Rc;

fn tier(engine: &TestEngine, account_id: AccountId) -> LiquidationTier {
    LiquidationTier::classify(&engine.get_usd_margin_info(account_id).unwrap())
}

/// Tests for the bid queue between MMR and LM.
mod bid_tier {
    use super::*;

    #[test]
    fn marks_walk_down_the_tiers() {
        let mut f = fixture();
        let cases = [
            (dec!(0), LiquidationTier::Solvent),
            (dec!(-850), LiquidationTier::BetweenMmrAndLm),
            (dec!(-1100), LiquidationTier::BelowLm),
            (dec!(-1300), LiquidationTier::BelowDutch),
            (dec!(-1600), LiquidationTier::BelowAdl),
        ];
        for (upnl, expected) in cases {
            mark(&mut f.engine, f.market, TRADER, upnl);
            assert_eq!(tier(&f.engine, TRADER), expected, "upnl {}", upnl);
        }
    }

    #[test]
    fn submission_requires_between_mmr_and_lm() {
        let mut f = fixture();

        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::AccountNotBetweenMmrAndLm { .. })
        ));

        mark(&mut f.engine, f.market, TRADER, dec!(-1100));
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::AccountNotBetweenMmrAndLm { .. })
        ));
    }

    #[test]
    fn best_ranked_bid_executes_and_pays_the_waterfall() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-850));

        let greedy = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.05), f.market, dec!(40_000)))
            .unwrap();
        let generous = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.2), f.market, dec!(50_000)))
            .unwrap();
        assert_eq!(greedy.round, generous.round);
        // 0.5 * (1 - 0.2) + 0.5 * 0
        assert_eq!(generous.rank.score, dec!(0.4));
        assert!(generous.rank < greedy.rank);

        let execution = f
            .engine
            .execute_top_ranked_liquidation_bid(TRADER, USDC, Some(KEEPER))
            .unwrap();
        let BidExecution::Executed(result) = execution else {
            panic!("expected execution, got {:?}", execution);
        };

        // 50k of 100k moved: LMR 1000 -> 500, penalty 0.2 * 500
        assert_eq!(result.lmr_reduction, dec!(500));
        let d = result.distribution;
        assert_eq!(d.penalty, dec!(100));
        assert_eq!(d.insurance_fund_reward, dec!(10));
        assert_eq!(d.backstop_lp_reward, dec!(10));
        assert_eq!(d.keeper_reward, dec!(5));
        assert_eq!(d.liquidator_reward, dec!(75));

        assert_eq!(net_deposits(&f.engine, TRADER, USDC), dec!(1900));
        assert_eq!(net_deposits(&f.engine, LIQUIDATOR, USDC), dec!(50_075));
        assert_eq!(net_deposits(&f.engine, INSURANCE_FUND, USDC), dec!(5_010));
        assert_eq!(net_deposits(&f.engine, BACKSTOP_LP, USDC), dec!(100_010));
        assert_eq!(net_deposits(&f.engine, KEEPER, USDC), dec!(5));

        let liquidator = f.engine.account(LIQUIDATOR).unwrap();
        assert!(liquidator.is_market_active(USDC, f.market));
        let position = f
            .engine
            .market_manager(MARKET_MANAGER)
            .unwrap()
            .position(f.market, LIQUIDATOR)
            .unwrap();
        assert_eq!(position.annualized_notional, dec!(50_000));
    }

    #[test]
    fn failing_bid_is_dropped_and_recorded() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-850));
        for reward in [dec!(0.2), dec!(0.05)] {
            f.engine
                .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(reward, f.market, dec!(50_000)))
                .unwrap();
        }

        let first = f
            .engine
            .execute_top_ranked_liquidation_bid(TRADER, USDC, None)
            .unwrap();
        assert!(matches!(first, BidExecution::Executed(_)));
        assert_eq!(tier(&f.engine, TRADER), LiquidationTier::Solvent);

        // the account recovered, so the second bid fails and is gone
        let second = f
            .engine
            .execute_top_ranked_liquidation_bid(TRADER, USDC, None)
            .unwrap();
        match second {
            BidExecution::Failed { liquidator_account_id, reason } => {
                assert_eq!(liquidator_account_id, LIQUIDATOR);
                assert!(reason.contains("not below MMR"), "{}", reason);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(
            f.engine.recent_events(1)[0].payload,
            EventPayload::LiquidationBidFailed(_)
        ));

        let third = f.engine.execute_top_ranked_liquidation_bid(TRADER, USDC, None);
        assert_eq!(third, Err(EngineError::Queue(QueueError::EmptyHeap)));
    }

    #[test]
    fn no_round_no_execution() {
        let mut f = fixture();
        let err = f
            .engine
            .execute_top_ranked_liquidation_bid(TRADER, USDC, None)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::NoActiveBidRound { .. })
        ));
    }

    #[test]
    fn expired_round_can_only_be_drained() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-850));
        let submission = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap();

        let err = f
            .engine
            .drain_expired_liquidation_bids(TRADER, USDC)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::BidRoundStillActive { .. })
        ));

        f.engine.advance_time(61_000);
        let err = f
            .engine
            .execute_top_ranked_liquidation_bid(TRADER, USDC, None)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidationBidPriorityQueueExpired { round, .. })
                if round == submission.round
        ));

        assert_eq!(f.engine.drain_expired_liquidation_bids(TRADER, USDC).unwrap(), 1);
        let rounds = f.engine.account(TRADER).unwrap().bid_queue(USDC).unwrap();
        assert!(rounds.queue(submission.round).is_none());
        assert_eq!(f.engine.drain_expired_liquidation_bids(TRADER, USDC).unwrap(), 0);

        // a fresh bid opens the next round
        let next = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap();
        assert_eq!(next.round, RoundId(submission.round.0 + 1));
    }

    #[test]
    fn queue_and_bid_limits_enforced() {
        let mut config = pool_config();
        config.liquidation.max_bids_in_queue = 1;
        config.liquidation.max_orders_in_bid = 1;
        let mut f = fixture_with(SimulatedMarketManager::new(), config);
        open(&mut f.engine, TRADER, f.market, dec!(100_000));
        mark(&mut f.engine, f.market, TRADER, dec!(-850));

        f.engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap();
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidationBidPriorityQueueOverflow { max: 1, .. })
        ));

        let mut two_orders = bid(dec!(0.1), f.market, dec!(10_000));
        two_orders.market_ids.push(f.market);
        two_orders.inputs.push(order(dec!(10_000)));
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, two_orders)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidationBidOrdersOverflow { orders: 2, max: 1 })
        );
    }

    #[test]
    fn malformed_bids_rejected() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-850));

        let mut mismatched = bid(dec!(0.1), f.market, dec!(10_000));
        mismatched.inputs.clear();
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, mismatched)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidationBidOrderMismatch {
                market_ids: 1,
                inputs: 0
            })
        );

        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(1.5), f.market, dec!(10_000)))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidatorRewardParameterTooHigh(dec!(1.5)))
        );

        let mut wrong_quote = bid(dec!(0.1), f.market, dec!(10_000));
        wrong_quote.quote_collateral = ETH;
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, wrong_quote)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidationBidQuoteTokenMismatch { .. })
        ));

        // a second market the trader never traded
        let other_market = f
            .engine
            .register_market(
                POOL_OWNER,
                MarketConfig {
                    quote_token: USDC,
                    market_manager: MARKET_MANAGER,
                    collateral_pool_id: f.pool,
                    risk_parameter: dec!(0.02),
                    risk_block_id: 1,
                    fees: MarketFeeConfig::default(),
                },
            )
            .unwrap();
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), other_market, dec!(10_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::MarketNotActive { .. })
        ));

        // liquidation orders must reduce the position
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(-10_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MarketManager(MarketManagerError::OrderRejected { .. })
        ));
    }

    #[test]
    fn liquidator_needs_permission_and_same_pool() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-850));

        let err = f
            .engine
            .submit_liquidation_bid(Address(77), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Account(AccountError::PermissionDenied {
                permission: Permission::Liquidate,
                ..
            })
        ));

        f.engine
            .grant_permission(owner(LIQUIDATOR), LIQUIDATOR, Address(77), Permission::Liquidate)
            .unwrap();
        f.engine
            .submit_liquidation_bid(Address(77), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap();

        let (other_pool, _) = add_pool(&mut f.engine, CollateralPoolConfig::default());
        let outsider = AccountId(42);
        f.engine.create_account(owner(outsider), outsider, other_pool).unwrap();
        let mut outside_bid = bid(dec!(0.1), f.market, dec!(50_000));
        outside_bid.liquidator_account_id = outsider;
        let err = f
            .engine
            .submit_liquidation_bid(owner(outsider), TRADER, outside_bid)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidatorAndLiquidatableAccountsPoolMismatch {
                liquidator: outsider,
                liquidatable: TRADER,
            })
        );
    }
}

/// Tests for liquidator hooks around bid execution.
mod hooks {
    use super::*;

    const HOOK: Address = Address(3_000);

    struct RecordingHook {
        supported: bool,
        fail_post: bool,
        calls: Rc<RefCell<Vec<&'static str>>>,
    }

    impl LiquidationHook for RecordingHook {
        fn supports_liquidation_hook(&self) -> bool {
            self.supported
        }

        fn pre_liquidation(&mut self, _context: &LiquidationHookContext) -> Result<(), String> {
            self.calls.borrow_mut().push("pre");
            Ok(())
        }

        fn post_liquidation(&mut self, _context: &LiquidationHookContext) -> Result<(), String> {
            self.calls.borrow_mut().push("post");
            if self.fail_post {
                return Err("hedge failed".to_string());
            }
            Ok(())
        }
    }

    fn hooked_bid(market: MarketId) -> LiquidationBid {
        LiquidationBid {
            hook_address: Some(HOOK),
            ..bid(dec!(0.1), market, dec!(50_000))
        }
    }

    fn setup(supported: bool, fail_post: bool) -> (Fixture, Rc<RefCell<Vec<&'static str>>>) {
        let mut f = fixture();
        let calls = Rc::new(RefCell::new(Vec::new()));
        f.engine.register_liquidation_hook(
            HOOK,
            Box::new(RecordingHook {
                supported,
                fail_post,
                calls: Rc::clone(&calls),
            }),
        );
        mark(&mut f.engine, f.market, TRADER, dec!(-850));
        (f, calls)
    }

    #[test]
    fn hooks_run_around_execution() {
        let (mut f, calls) = setup(true, false);
        f.engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, hooked_bid(f.market))
            .unwrap();
        let execution = f
            .engine
            .execute_top_ranked_liquidation_bid(TRADER, USDC, None)
            .unwrap();
        assert!(matches!(execution, BidExecution::Executed(_)));
        assert_eq!(*calls.borrow(), vec!["pre", "post"]);
    }

    #[test]
    fn unsupported_or_unknown_hook_rejected() {
        let (mut f, _) = setup(false, false);
        let err = f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, hooked_bid(f.market))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(LiquidationError::InvalidLiquidationHook(HOOK))
        );

        let mut unknown = hooked_bid(f.market);
        unknown.hook_address = Some(Address(3_001));
        assert!(f
            .engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, unknown)
            .is_err());
    }

    #[test]
    fn failing_hook_rolls_the_bid_back() {
        let (mut f, calls) = setup(true, true);
        f.engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, hooked_bid(f.market))
            .unwrap();
        let execution = f
            .engine
            .execute_top_ranked_liquidation_bid(TRADER, USDC, None)
            .unwrap();
        assert!(matches!(execution, BidExecution::Failed { .. }));

        // nothing moved
        assert_eq!(net_deposits(&f.engine, TRADER, USDC), dec!(2_000));
        let position = f
            .engine
            .market_manager(MARKET_MANAGER)
            .unwrap()
            .position(f.market, TRADER)
            .unwrap();
        assert_eq!(position.annualized_notional, dec!(100_000));

        // the hook's own record is not part of the rollback
        assert_eq!(*calls.borrow(), vec!["pre", "post"]);
    }
}

/// Tests for forced closing of unfilled orders below LM.
mod unfilled_orders {
    use super::*;

    /// Closing resting orders is supposed to shrink exposure. This one grows it.
    #[derive(Clone, Default)]
    struct FaultyManager {
        inner: SimulatedMarketManager,
    }

    impl MarketManager for FaultyManager {
        fn get_account_taker_and_maker_exposures(
            &self,
            market_id: MarketId,
            account_id: AccountId,
        ) -> Result<AccountExposures, MarketManagerError> {
            self.inner.get_account_taker_and_maker_exposures(market_id, account_id)
        }

        fn has_unfilled_orders(&self, market_id: MarketId, account_id: AccountId) -> bool {
            self.inner.has_unfilled_orders(market_id, account_id)
        }

        fn close_all_unfilled_orders(
            &mut self,
            market_id: MarketId,
            account_id: AccountId,
        ) -> Result<(), MarketManagerError> {
            self.inner.close_all_unfilled_orders(market_id, account_id)?;
            self.inner.execute_order(market_id, account_id, &order(dec!(100_000)))
        }

        fn execute_order(
            &mut self,
            market_id: MarketId,
            account_id: AccountId,
            inputs: &OrderInputs,
        ) -> Result<(), MarketManagerError> {
            self.inner.execute_order(market_id, account_id, inputs)
        }

        fn validate_liquidation_order(
            &self,
            liquidatable_account_id: AccountId,
            market_id: MarketId,
            inputs: &OrderInputs,
        ) -> Result<(), MarketManagerError> {
            self.inner
                .validate_liquidation_order(liquidatable_account_id, market_id, inputs)
        }

        fn execute_liquidation_order(
            &mut self,
            liquidatable_account_id: AccountId,
            liquidator_account_id: AccountId,
            market_id: MarketId,
            inputs: &OrderInputs,
        ) -> Result<(), MarketManagerError> {
            self.inner.execute_liquidation_order(
                liquidatable_account_id,
                liquidator_account_id,
                market_id,
                inputs,
            )
        }

        fn execute_adl_order(
            &mut self,
            liquidatable_account_id: AccountId,
            market_id: MarketId,
            params: AdlOrderParams,
        ) -> Result<(), MarketManagerError> {
            self.inner
                .execute_adl_order(liquidatable_account_id, market_id, params)
        }

        fn get_annualized_exposure_and_slippage(
            &self,
            market_id: MarketId,
            inputs: &OrderInputs,
        ) -> Result<(Decimal, Decimal), MarketManagerError> {
            self.inner.get_annualized_exposure_and_slippage(market_id, inputs)
        }
    }

    fn resting(long_notional: Decimal) -> UnfilledOrders {
        UnfilledOrders {
            long_notional,
            ..UnfilledOrders::default()
        }
    }

    #[test]
    fn closing_requires_below_lm_and_pays_the_liquidator() {
        let mut f = fixture();
        f.engine
            .market_manager_mut(MARKET_MANAGER)
            .unwrap()
            .place_unfilled_orders(f.market, TRADER, resting(dec!(20_000)));
        // worst case is the upper bound: 120k, LMR 1200

        mark(&mut f.engine, f.market, TRADER, dec!(-700));
        let err = f
            .engine
            .close_all_unfilled_orders(owner(LIQUIDATOR), TRADER, LIQUIDATOR, USDC)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::AccountNotBelowLM { .. })
        ));

        mark(&mut f.engine, f.market, TRADER, dec!(-900));
        let result = f
            .engine
            .close_all_unfilled_orders(owner(LIQUIDATOR), TRADER, LIQUIDATOR, USDC)
            .unwrap();
        assert_eq!(result.market_ids, vec![f.market]);
        assert_eq!(result.raw_lmr_before, dec!(1200));
        assert_eq!(result.raw_lmr_after, dec!(1000));
        // 0.01 * 200
        assert_eq!(result.penalty, dec!(2));
        assert_eq!(net_deposits(&f.engine, LIQUIDATOR, USDC), dec!(50_002));
        assert_eq!(net_deposits(&f.engine, TRADER, USDC), dec!(1_998));
        assert!(f
            .engine
            .markets_with_unfilled_orders(TRADER, USDC)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn close_that_raises_lmr_is_rejected_and_rolled_back() {
        let mut f = fixture_with(FaultyManager::default(), pool_config());
        open(&mut f.engine, TRADER, f.market, dec!(100_000));
        let manager = f.engine.market_manager_mut(MARKET_MANAGER).unwrap();
        manager
            .inner
            .place_unfilled_orders(f.market, TRADER, resting(dec!(20_000)));
        manager
            .inner
            .set_unrealized_pnl(f.market, TRADER, dec!(-900));

        let err = f
            .engine
            .close_all_unfilled_orders(owner(LIQUIDATOR), TRADER, LIQUIDATOR, USDC)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(LiquidationError::LiquidationCausedNegativeLMDeltaChange {
                account_id: TRADER,
                before: dec!(1200),
                after: dec!(2000),
            })
        );

        // manager state restored with the rest of the engine
        let manager = f.engine.market_manager(MARKET_MANAGER).unwrap();
        assert!(manager.has_unfilled_orders(f.market, TRADER));
        assert_eq!(
            manager.inner.position(f.market, TRADER).unwrap().annualized_notional,
            dec!(100_000)
        );
    }
}

/// Tests for the dutch tier below LM.
mod dutch_tier {
    use super::*;

    #[test]
    fn requires_below_lm_and_above_adl() {
        let mut f = fixture();

        mark(&mut f.engine, f.market, TRADER, dec!(-850));
        let err = f
            .engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(10_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::AccountNotBelowLM { .. })
        ));

        mark(&mut f.engine, f.market, TRADER, dec!(-1600));
        let err = f
            .engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(10_000)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::AccountBelowADL { .. })
        ));
    }

    #[test]
    fn pending_bids_block_dutch_until_below_dutch() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-850));
        f.engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap();

        // below LM, still above dutch
        mark(&mut f.engine, f.market, TRADER, dec!(-1100));
        let err = f
            .engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(10_000)))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(
                LiquidationError::AccountIsAboveDutchAndLiquidationBidQueueIsNotEmpty {
                    account_id: TRADER,
                    quote_token: USDC,
                }
            )
        );

        mark(&mut f.engine, f.market, TRADER, dec!(-1300));
        f.engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(10_000)))
            .unwrap();
    }

    #[test]
    fn exactly_on_dutch_requirement_counts_as_below() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-850));
        f.engine
            .submit_liquidation_bid(owner(LIQUIDATOR), TRADER, bid(dec!(0.1), f.market, dec!(50_000)))
            .unwrap();

        // margin balance 800 against a dutch requirement of 800
        mark(&mut f.engine, f.market, TRADER, dec!(-1200));
        let info = f.engine.get_usd_margin_info(TRADER).unwrap();
        assert_eq!(info.dutch_delta, dec!(0));
        assert_eq!(tier(&f.engine, TRADER), LiquidationTier::BelowDutch);

        f.engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(10_000)))
            .unwrap();
    }

    #[test]
    fn penalty_follows_health() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-1300));

        let result = f
            .engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(60_000)))
            .unwrap();

        // health 700 / 1000: 0.1 + 0.3 * 0.5
        assert_eq!(result.penalty_parameter, dec!(0.25));
        assert_eq!(result.liquidation.lmr_reduction, dec!(600));
        let d = result.liquidation.distribution;
        assert_eq!(d.penalty, dec!(150));
        assert_eq!(d.insurance_fund_reward, dec!(15));
        assert_eq!(d.backstop_lp_reward, dec!(15));
        assert_eq!(d.keeper_reward, dec!(0));
        assert_eq!(d.liquidator_reward, dec!(120));
        assert_eq!(net_deposits(&f.engine, TRADER, USDC), dec!(1_850));
    }

    #[test]
    fn unfilled_orders_must_be_closed_first() {
        let mut f = fixture();
        f.engine
            .market_manager_mut(MARKET_MANAGER)
            .unwrap()
            .place_unfilled_orders(
                f.market,
                TRADER,
                UnfilledOrders {
                    long_notional: dec!(20_000),
                    ..UnfilledOrders::default()
                },
            );
        mark(&mut f.engine, f.market, TRADER, dec!(-1300));

        let err = f
            .engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(10_000)))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Liquidation(LiquidationError::AccountHasUnfilledOrders {
                account_id: TRADER,
                market_id: f.market,
            })
        );
    }

    #[test]
    fn backstop_lp_below_threshold_gets_no_share() {
        let mut config = pool_config();
        if let Some(backstop) = config.backstop_lp.as_mut() {
            backstop.min_free_collateral_threshold_in_usd = dec!(1_000_000);
        }
        let mut f = fixture_with(SimulatedMarketManager::new(), config);
        open(&mut f.engine, TRADER, f.market, dec!(100_000));
        mark(&mut f.engine, f.market, TRADER, dec!(-1300));

        let result = f
            .engine
            .execute_dutch_liquidation(owner(LIQUIDATOR), TRADER, LIQUIDATOR, f.market, &order(dec!(60_000)))
            .unwrap();
        let d = result.liquidation.distribution;
        assert_eq!(d.backstop_lp_reward, dec!(0));
        assert_eq!(d.liquidator_reward, dec!(135));
    }
}

/// Tests for the backstop LP and auto-deleveraging below ADL.
mod backstop_tier {
    use super::*;

    #[test]
    fn requires_below_adl() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-1300));
        let err = f
            .engine
            .execute_backstop_liquidation(TRADER, KEEPER, USDC, &[(f.market, order(dec!(100_000)))])
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liquidation(LiquidationError::AccountNotBelowADL { .. })
        ));
    }

    #[test]
    fn backstop_lp_absorbs_a_solvent_account() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-1600));

        let outcome = f
            .engine
            .execute_backstop_liquidation(TRADER, KEEPER, USDC, &[(f.market, order(dec!(100_000)))])
            .unwrap();
        let BackstopOutcome::Backstop(result) = outcome else {
            panic!("expected backstop, got {:?}", outcome);
        };

        assert_eq!(result.liquidator_account_id, BACKSTOP_LP);
        assert_eq!(result.lmr_reduction, dec!(1000));
        let d = result.distribution;
        // 0.5 * 1000, backstop keeper fee 5%
        assert_eq!(d.penalty, dec!(500));
        assert_eq!(d.insurance_fund_reward, dec!(50));
        assert_eq!(d.backstop_lp_reward, dec!(0));
        assert_eq!(d.keeper_reward, dec!(25));
        assert_eq!(d.liquidator_reward, dec!(425));

        assert_eq!(net_deposits(&f.engine, BACKSTOP_LP, USDC), dec!(100_425));
        let manager = f.engine.market_manager(MARKET_MANAGER).unwrap();
        assert_eq!(
            manager.position(f.market, BACKSTOP_LP).unwrap().annualized_notional,
            dec!(100_000)
        );
        assert_eq!(
            manager.position(f.market, TRADER).unwrap().annualized_notional,
            dec!(0)
        );
    }

    #[test]
    fn ineligible_backstop_falls_through_to_adl() {
        let mut config = pool_config();
        if let Some(backstop) = config.backstop_lp.as_mut() {
            backstop.min_free_collateral_threshold_in_usd = dec!(1_000_000);
        }
        let mut f = fixture_with(SimulatedMarketManager::new(), config);
        open(&mut f.engine, TRADER, f.market, dec!(100_000));
        mark(&mut f.engine, f.market, TRADER, dec!(-1600));

        let outcome = f
            .engine
            .execute_backstop_liquidation(TRADER, KEEPER, USDC, &[(f.market, order(dec!(100_000)))])
            .unwrap();
        let BackstopOutcome::AutoDeleveraged(adl) = outcome else {
            panic!("expected adl, got {:?}", outcome);
        };
        assert_eq!(adl.total_unrealized_loss, dec!(1600));
        assert_eq!(adl.real_balance_and_if, dec!(7000));
        assert!(!adl.bankrupt);
        assert_eq!(adl.insurance_fund_cover, dec!(0));

        let info = f
            .engine
            .get_margin_info_by_collateral_type(TRADER, USDC)
            .unwrap();
        assert_eq!(info.real_balance, dec!(400));
        assert_eq!(info.raw_info.raw_liquidation_margin_requirement, dec!(0));
    }

    #[test]
    fn insolvent_account_settles_at_bankruptcy_price() {
        let mut f = fixture();
        mark(&mut f.engine, f.market, TRADER, dec!(-9000));

        let outcome = f
            .engine
            .execute_backstop_liquidation(TRADER, KEEPER, USDC, &[(f.market, order(dec!(100_000)))])
            .unwrap();
        let BackstopOutcome::AutoDeleveraged(adl) = outcome else {
            panic!("expected adl, got {:?}", outcome);
        };

        // 2000 real + 5000 fund against a 9000 loss
        assert!(adl.bankrupt);
        assert_eq!(adl.real_balance_and_if, dec!(7000));
        assert_eq!(adl.insurance_fund_cover, dec!(5000));

        let trader = f
            .engine
            .get_margin_info_by_collateral_type(TRADER, USDC)
            .unwrap();
        assert_eq!(trader.real_balance, dec!(0));
        assert_eq!(net_deposits(&f.engine, INSURANCE_FUND, USDC), dec!(0));
        assert!(matches!(
            f.engine.recent_events(1)[0].payload,
            EventPayload::AutoDeleverage(AutoDeleverageEvent { bankrupt: true, .. })
        ));
    }
}
