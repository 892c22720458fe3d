//! Shared fixture: one pool with USDC under USD and ETH under USDC, a 1% risk USDC market
//! and the usual cast of accounts.

#![allow(dead_code)]

use margin_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub type TestEngine<M = SimulatedMarketManager> = Engine<M, StaticPriceOracle>;

pub const POOL_OWNER: Address = Address(1_000);
pub const MARKET_MANAGER: Address = Address(2_000);
pub const USDC: Address = Address(1);
pub const ETH: Address = Address(2);

pub const TRADER: AccountId = AccountId(1);
pub const LIQUIDATOR: AccountId = AccountId(2);
pub const KEEPER: AccountId = AccountId(3);
pub const INSURANCE_FUND: AccountId = AccountId(4);
pub const BACKSTOP_LP: AccountId = AccountId(5);

pub fn owner(account_id: AccountId) -> Address {
    Address(10_000 + account_id.0)
}

pub struct Fixture<M = SimulatedMarketManager> {
    pub engine: TestEngine<M>,
    pub pool: CollateralPoolId,
    pub market: MarketId,
}

/// Insurance fund and backstop LP each take 10%; the LP needs 10k free collateral.
pub fn pool_config() -> CollateralPoolConfig {
    CollateralPoolConfig {
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
    }
}

pub fn oracle() -> StaticPriceOracle {
    StaticPriceOracle::new()
        .with_price(OracleNodeId(1), dec!(1))
        .with_price(OracleNodeId(2), dec!(2000))
}

pub fn engine_config() -> EngineConfig {
    // prices are set once at t=0 and bid rounds need the clock to move
    EngineConfig {
        oracle_max_staleness_ms: 1_000_000_000,
        ..EngineConfig::default()
    }
}

/// Creates a pool with USDC and ETH configured and a USDC market on `MARKET_MANAGER`.
pub fn add_pool<M: MarketManager + Clone>(
    engine: &mut TestEngine<M>,
    config: CollateralPoolConfig,
) -> (CollateralPoolId, MarketId) {
    let pool = engine.create_collateral_pool(POOL_OWNER, config).unwrap();
    engine
        .configure_collateral(
            POOL_OWNER,
            pool,
            USDC,
            CollateralConfig::child_of(Address::USD, OracleNodeId(1), dec!(0), dec!(0), dec!(100_000_000)),
        )
        .unwrap();
    engine
        .configure_collateral(
            POOL_OWNER,
            pool,
            ETH,
            CollateralConfig::child_of(USDC, OracleNodeId(2), dec!(0.1), dec!(0.02), dec!(1_000)),
        )
        .unwrap();
    let market = engine
        .register_market(
            POOL_OWNER,
            MarketConfig {
                quote_token: USDC,
                market_manager: MARKET_MANAGER,
                collateral_pool_id: pool,
                risk_parameter: dec!(0.01),
                risk_block_id: 0,
                fees: MarketFeeConfig::default(),
            },
        )
        .unwrap();
    (pool, market)
}

pub fn fixture_with<M: MarketManager + Clone>(manager: M, config: CollateralPoolConfig) -> Fixture<M> {
    let mut engine = TestEngine::new(engine_config(), oracle());
    engine.register_market_manager(MARKET_MANAGER, manager);
    let (pool, market) = add_pool(&mut engine, config);

    let funding = [
        (TRADER, dec!(2_000)),
        (LIQUIDATOR, dec!(50_000)),
        (KEEPER, dec!(0)),
        (INSURANCE_FUND, dec!(5_000)),
        (BACKSTOP_LP, dec!(100_000)),
    ];
    for (account_id, amount) in funding {
        engine.create_account(owner(account_id), account_id, pool).unwrap();
        if amount > Decimal::ZERO {
            engine.deposit(account_id, USDC, amount).unwrap();
        }
    }
    Fixture { engine, pool, market }
}

/// Default fixture with the trader holding a 100k long: LMR 1000, IMR 1500, MMR 1200,
/// dutch 800, ADL 500 against 2000 of USDC.
pub fn fixture() -> Fixture {
    let mut f = fixture_with(SimulatedMarketManager::new(), pool_config());
    open(&mut f.engine, TRADER, f.market, dec!(100_000));
    f
}

pub fn order(annualized_notional: Decimal) -> OrderInputs {
    SimulatedOrder::new(annualized_notional).encode().unwrap()
}

pub fn open<M: MarketManager + Clone>(
    engine: &mut TestEngine<M>,
    account_id: AccountId,
    market: MarketId,
    annualized_notional: Decimal,
) {
    engine
        .execute_order(owner(account_id), account_id, market, &order(annualized_notional))
        .unwrap();
}

pub fn mark(engine: &mut TestEngine, market: MarketId, account_id: AccountId, upnl: Decimal) {
    engine
        .market_manager_mut(MARKET_MANAGER)
        .unwrap()
        .set_unrealized_pnl(market, account_id, upnl);
}

pub fn bid(reward: Decimal, market: MarketId, annualized_notional: Decimal) -> LiquidationBid {
    LiquidationBid {
        liquidator_account_id: LIQUIDATOR,
        liquidator_reward_parameter: reward,
        hook_address: None,
        quote_collateral: USDC,
        market_ids: vec![market],
        inputs: vec![order(annualized_notional)],
    }
}

pub fn net_deposits<M: MarketManager + Clone>(
    engine: &TestEngine<M>,
    account_id: AccountId,
    token: Address,
) -> Decimal {
    engine.account(account_id).unwrap().net_deposits(token)
}
