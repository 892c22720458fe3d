//! Margin engine simulation.
//!
//! Walks one trader down every liquidation tier: bids between MMR and LM, dutch below LM,
//! backstop below ADL, and auto-deleveraging once the account is insolvent.

use margin_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;

type SimEngine = Engine<SimulatedMarketManager, StaticPriceOracle>;
type SimResult = Result<(), Box<dyn Error>>;

const POOL_OWNER: Address = Address(1_000);
const MARKET_MANAGER: Address = Address(2_000);
const USDC: Address = Address(1);
const ETH: Address = Address(2);

const TRADER: AccountId = AccountId(1);
const LIQUIDATOR: AccountId = AccountId(2);
const KEEPER: AccountId = AccountId(3);
const INSURANCE_FUND: AccountId = AccountId(4);
const BACKSTOP_LP: AccountId = AccountId(5);

fn owner_of(account_id: AccountId) -> Address {
    Address(10_000 + account_id.0)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Margin Engine Simulation");
    println!("One Pool, USDC + ETH Collateral, Tiered Liquidations\n");

    let scenarios: [(&str, fn() -> SimResult); 5] = [
        ("Scenario 1: Margin Checks", scenario_1_margin_checks),
        ("Scenario 2: Bid Queue", scenario_2_bid_queue),
        ("Scenario 3: Dutch Liquidation", scenario_3_dutch),
        ("Scenario 4: Backstop LP", scenario_4_backstop),
        ("Scenario 5: Auto-Deleveraging", scenario_5_adl),
    ];

    for (name, scenario) in scenarios {
        println!("{}\n", name);
        if let Err(e) = scenario() {
            eprintln!("  {} failed: {}", name, e);
            std::process::exit(1);
        }
        println!();
    }

    println!("All simulations completed successfully.");
}

/// Pool with USDC under USD and ETH under USDC, one USDC market at 1% risk, and the
/// supporting accounts funded.
fn setup() -> Result<(SimEngine, MarketId), Box<dyn Error>> {
    let oracle = StaticPriceOracle::new()
        .with_price(OracleNodeId(1), dec!(1))
        .with_price(OracleNodeId(2), dec!(2000));
    let config = EngineConfig {
        oracle_max_staleness_ms: 86_400_000,
        ..EngineConfig::default()
    };
    let mut engine = SimEngine::new(config, oracle);

    let pool_config = CollateralPoolConfig {
        insurance_fund: Some(InsuranceFundConfig {
            account_id: INSURANCE_FUND,
            liquidation_fee: dec!(0.1),
        }),
        backstop_lp: Some(BackstopLpConfig {
            account_id: BACKSTOP_LP,
            liquidation_fee: dec!(0.1),
            min_free_collateral_threshold_in_usd: dec!(10_000),
        }),
        ..CollateralPoolConfig::default()
    };
    let pool = engine.create_collateral_pool(POOL_OWNER, pool_config)?;
    engine.configure_collateral(
        POOL_OWNER,
        pool,
        USDC,
        CollateralConfig::child_of(Address::USD, OracleNodeId(1), dec!(0), dec!(0), dec!(100_000_000)),
    )?;
    engine.configure_collateral(
        POOL_OWNER,
        pool,
        ETH,
        CollateralConfig::child_of(USDC, OracleNodeId(2), dec!(0.1), dec!(0.02), dec!(100_000)),
    )?;

    engine.register_market_manager(MARKET_MANAGER, SimulatedMarketManager::new());
    let market = engine.register_market(
        POOL_OWNER,
        MarketConfig {
            quote_token: USDC,
            market_manager: MARKET_MANAGER,
            collateral_pool_id: pool,
            risk_parameter: dec!(0.01),
            risk_block_id: 0,
            fees: MarketFeeConfig::default(),
        },
    )?;

    let funding = [
        (TRADER, dec!(2_000)),
        (LIQUIDATOR, dec!(50_000)),
        (KEEPER, dec!(0)),
        (INSURANCE_FUND, dec!(5_000)),
        (BACKSTOP_LP, dec!(100_000)),
    ];
    for (account_id, amount) in funding {
        engine.create_account(owner_of(account_id), account_id, pool)?;
        if amount > Decimal::ZERO {
            engine.deposit(account_id, USDC, amount)?;
        }
    }
    Ok((engine, market))
}

fn order(notional: Decimal) -> Result<OrderInputs, MarketManagerError> {
    SimulatedOrder::new(notional).encode()
}

/// Opens a 100k long for the trader: LMR 1000, IMR 1500.
fn open_trader_position(engine: &mut SimEngine, market: MarketId) -> SimResult {
    engine.execute_order(owner_of(TRADER), TRADER, market, &order(dec!(100_000))?)?;
    Ok(())
}

fn mark(engine: &mut SimEngine, market: MarketId, upnl: Decimal) -> SimResult {
    engine
        .market_manager_mut(MARKET_MANAGER)?
        .set_unrealized_pnl(market, TRADER, upnl);
    Ok(())
}

fn print_tiers(engine: &SimEngine, account_id: AccountId) -> SimResult {
    let info = engine.get_usd_margin_info(account_id)?;
    println!(
        "  {}: balance {} | im {} mmr {} lm {} dutch {} adl {} -> {:?}",
        account_id,
        info.margin_balance,
        info.initial_delta,
        info.maintenance_delta,
        info.liquidation_delta,
        info.dutch_delta,
        info.adl_delta,
        LiquidationTier::classify(&info)
    );
    Ok(())
}

fn scenario_1_margin_checks() -> SimResult {
    let (mut engine, market) = setup()?;

    println!("  Trader deposits 2,000 USDC and opens 100k notional");
    open_trader_position(&mut engine, market)?;
    print_tiers(&engine, TRADER)?;

    let withdrawable = engine.get_withdrawable_balance(TRADER, USDC)?;
    println!("  Withdrawable USDC: {}", withdrawable);

    match engine.execute_order(owner_of(TRADER), TRADER, market, &order(dec!(50_000))?) {
        Ok(()) => println!("  Unexpected: oversized order accepted"),
        Err(e) => println!("  Oversized order rejected: {}", e),
    }

    println!("  Trader posts 1 ETH as extra collateral");
    engine.deposit(TRADER, ETH, dec!(1))?;
    print_tiers(&engine, TRADER)?;
    Ok(())
}

fn scenario_2_bid_queue() -> SimResult {
    let (mut engine, market) = setup()?;
    open_trader_position(&mut engine, market)?;

    println!("  Rates move against the trader: upnl -850");
    mark(&mut engine, market, dec!(-850))?;
    print_tiers(&engine, TRADER)?;

    let bids = [(dec!(0.2), dec!(50_000)), (dec!(0.05), dec!(40_000))];
    for (reward, notional) in bids {
        let submission = engine.submit_liquidation_bid(
            owner_of(LIQUIDATOR),
            TRADER,
            LiquidationBid {
                liquidator_account_id: LIQUIDATOR,
                liquidator_reward_parameter: reward,
                hook_address: None,
                quote_collateral: USDC,
                market_ids: vec![market],
                inputs: vec![order(notional)?],
            },
        )?;
        println!(
            "  Bid reward {} for {} notional -> rank {} in {}",
            reward, notional, submission.rank.score, submission.round
        );
    }

    match engine.execute_top_ranked_liquidation_bid(TRADER, USDC, Some(KEEPER))? {
        BidExecution::Executed(result) => println!(
            "  Executed: lmr -{} penalty {} (liquidator {}, keeper {}, fund {})",
            result.lmr_reduction,
            result.distribution.penalty,
            result.distribution.liquidator_reward,
            result.distribution.keeper_reward,
            result.distribution.insurance_fund_reward
        ),
        BidExecution::Failed { reason, .. } => println!("  Bid failed: {}", reason),
    }
    print_tiers(&engine, TRADER)?;
    Ok(())
}

fn scenario_3_dutch() -> SimResult {
    let (mut engine, market) = setup()?;
    open_trader_position(&mut engine, market)?;

    println!("  Upnl -1300: below the dutch requirement");
    mark(&mut engine, market, dec!(-1_300))?;
    print_tiers(&engine, TRADER)?;

    let result = engine.execute_dutch_liquidation(
        owner_of(LIQUIDATOR),
        TRADER,
        LIQUIDATOR,
        market,
        &order(dec!(60_000))?,
    )?;
    println!(
        "  Dutch at parameter {}: lmr -{} penalty {}",
        result.penalty_parameter, result.liquidation.lmr_reduction, result.liquidation.distribution.penalty
    );
    print_tiers(&engine, TRADER)?;
    Ok(())
}

fn scenario_4_backstop() -> SimResult {
    let (mut engine, market) = setup()?;
    open_trader_position(&mut engine, market)?;

    println!("  Upnl -1600: below ADL but still solvent");
    mark(&mut engine, market, dec!(-1_600))?;
    print_tiers(&engine, TRADER)?;

    let outcome =
        engine.execute_backstop_liquidation(TRADER, KEEPER, USDC, &[(market, order(dec!(100_000))?)])?;
    match outcome {
        BackstopOutcome::Backstop(result) => println!(
            "  Backstop LP absorbed lmr {}: penalty {} (lp {}, keeper {})",
            result.lmr_reduction,
            result.distribution.penalty,
            result.distribution.liquidator_reward,
            result.distribution.keeper_reward
        ),
        BackstopOutcome::AutoDeleveraged(adl) => println!("  Fell through to ADL: {:?}", adl),
    }
    print_tiers(&engine, TRADER)?;
    print_tiers(&engine, BACKSTOP_LP)?;
    Ok(())
}

fn scenario_5_adl() -> SimResult {
    let (mut engine, market) = setup()?;
    open_trader_position(&mut engine, market)?;

    println!("  Upnl -9000: insolvent, fund holds 5,000");
    mark(&mut engine, market, dec!(-9_000))?;
    print_tiers(&engine, TRADER)?;

    let outcome = engine.execute_backstop_liquidation(TRADER, KEEPER, USDC, &[])?;
    if let BackstopOutcome::AutoDeleveraged(adl) = outcome {
        println!(
            "  ADL: loss {} against {} available, fund paid {}, bankrupt {}",
            adl.total_unrealized_loss, adl.real_balance_and_if, adl.insurance_fund_cover, adl.bankrupt
        );
    }
    let fund = engine.get_margin_info_by_collateral_type(INSURANCE_FUND, USDC)?;
    println!("  Insurance fund left: {}", fund.real_balance);
    print_tiers(&engine, TRADER)?;
    Ok(())
}
