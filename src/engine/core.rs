// 8.0 engine/core.rs: main engine. holds accounts, pools, markets and market managers.
// every state-changing entry point runs through `atomically`, so a failed call leaves no
// trace in state or in the event log.

use super::results::EngineError;
use crate::account::{Account, AccountError, Permission};
use crate::collateral::{CollateralConfig, PricingContext};
use crate::collateral_pool::{CollateralPool, CollateralPoolRegistry};
use crate::config::{CollateralPoolConfig, EngineConfig};
use crate::events::{
    AccountCreatedEvent, CollateralConfiguredEvent, CollateralPoolCreatedEvent,
    CollateralPoolMergedEvent, Event, EventCollector, EventPayload, MarketRegisteredEvent,
};
use crate::liquidation::{LiquidationError, LiquidationHook};
use crate::market::{Market, MarketConfig, MarketFeeConfig};
use crate::market_manager::MarketManager;
use crate::oracle::PriceOracle;
use crate::types::{AccountId, Address, CollateralPoolId, MarketId, Timestamp};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Everything a failed transaction must restore.
#[derive(Clone)]
pub(super) struct EngineState<M> {
    pub(super) accounts: HashMap<AccountId, Account>,
    pub(super) pools: CollateralPoolRegistry,
    pub(super) markets: HashMap<MarketId, Market>,
    pub(super) managers: HashMap<Address, M>,
    pub(super) next_market_id: u64,
}

/** 8.1: main engine struct. all state lives here */
pub struct Engine<M, O> {
    pub(super) config: EngineConfig,
    pub(super) state: EngineState<M>,
    pub(super) oracle: O,
    pub(super) hooks: HashMap<Address, Box<dyn LiquidationHook>>,
    pub(super) events: EventCollector,
    pub(super) current_time: Timestamp,
}

impl<M, O> Engine<M, O>
where
    M: MarketManager + Clone,
    O: PriceOracle,
{
    pub fn new(config: EngineConfig, oracle: O) -> Self {
        let events = EventCollector::new(config.max_events);
        Self {
            config,
            state: EngineState {
                accounts: HashMap::new(),
                pools: CollateralPoolRegistry::new(),
                markets: HashMap::new(),
                managers: HashMap::new(),
                next_market_id: 1,
            },
            oracle,
            hooks: HashMap::new(),
            events,
            current_time: Timestamp::from_millis(0),
        }
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    pub(super) fn pricing(&self) -> PricingContext<'_> {
        PricingContext::new(&self.oracle, self.current_time, self.config.oracle_max_staleness_ms)
    }

    /// Runs `f` as one transaction: on `Err` every state change and event is discarded.
    pub(super) fn atomically<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let snapshot = self.state.clone();
        let checkpoint = self.events.checkpoint();
        let result = f(self);
        if result.is_err() {
            self.state = snapshot;
            self.events.rollback(checkpoint);
        }
        result
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        self.events.record(self.current_time, payload);
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        self.events.recent(count)
    }

    // 8.2: collateral pools

    pub fn create_collateral_pool(
        &mut self,
        owner: Address,
        config: CollateralPoolConfig,
    ) -> Result<CollateralPoolId, EngineError> {
        self.atomically(|engine| {
            let pool_id = engine.state.pools.create(owner, config)?;
            engine.emit_event(EventPayload::CollateralPoolCreated(CollateralPoolCreatedEvent {
                pool_id,
                owner,
            }));
            Ok(pool_id)
        })
    }

    pub fn collateral_pool(&self, pool_id: CollateralPoolId) -> Result<&CollateralPool, EngineError> {
        Ok(self.state.pools.get(pool_id)?)
    }

    pub fn set_collateral_pool_config(
        &mut self,
        caller: Address,
        pool_id: CollateralPoolId,
        config: CollateralPoolConfig,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.state.pools.get_mut(pool_id)?.set_config(caller, config)?;
            Ok(())
        })
    }

    pub fn configure_collateral(
        &mut self,
        caller: Address,
        pool_id: CollateralPoolId,
        token: Address,
        config: CollateralConfig,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine
                .state
                .pools
                .get_mut(pool_id)?
                .configure_collateral(caller, token, config)?;
            engine.emit_event(EventPayload::CollateralConfigured(CollateralConfiguredEvent {
                pool_id,
                token,
            }));
            Ok(())
        })
    }

    pub fn merge_collateral_pools(
        &mut self,
        caller: Address,
        parent_id: CollateralPoolId,
        child_id: CollateralPoolId,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.state.pools.merge(caller, parent_id, child_id)?;
            engine.emit_event(EventPayload::CollateralPoolMerged(CollateralPoolMergedEvent {
                parent_id,
                child_id,
            }));
            Ok(())
        })
    }

    /// Root pool an account is bound to. Once the account has a first market, that market's
    /// pool decides. Before that the pool named at creation stands in.
    pub fn account_collateral_pool_id(&self, account_id: AccountId) -> Result<CollateralPoolId, EngineError> {
        let account = self.account(account_id)?;
        let pool_id = match account.first_market_id {
            Some(market_id) => self.market(market_id)?.collateral_pool_id,
            None => account.collateral_pool_id,
        };
        Ok(self.state.pools.root_of(pool_id)?)
    }

    pub(super) fn account_pool(&self, account_id: AccountId) -> Result<&CollateralPool, EngineError> {
        let pool_id = self.account_collateral_pool_id(account_id)?;
        Ok(self.state.pools.get(pool_id)?)
    }

    pub(super) fn ensure_market_in_account_pool(
        &self,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<(), EngineError> {
        let market_pool = self
            .state
            .pools
            .root_of(self.market(market_id)?.collateral_pool_id)?;
        let account_pool = self.account_collateral_pool_id(account_id)?;
        if market_pool != account_pool {
            return Err(AccountError::CollateralPoolMismatch {
                account_id,
                expected: account_pool,
                actual: market_pool,
            }
            .into());
        }
        Ok(())
    }

    /// Records a market on the account. The market must resolve to the account's pool.
    pub(super) fn activate_market(&mut self, account_id: AccountId, market_id: MarketId) -> Result<(), EngineError> {
        self.ensure_market_in_account_pool(account_id, market_id)?;
        let quote_token = self.market(market_id)?.quote_token;
        self.account_mut(account_id)?
            .activate_market(quote_token, market_id);
        Ok(())
    }

    pub(super) fn ensure_same_pool(
        &self,
        liquidator_id: AccountId,
        liquidatable_id: AccountId,
    ) -> Result<(), EngineError> {
        if self.account_pool(liquidator_id)?.id != self.account_pool(liquidatable_id)?.id {
            return Err(LiquidationError::LiquidatorAndLiquidatableAccountsPoolMismatch {
                liquidator: liquidator_id,
                liquidatable: liquidatable_id,
            }
            .into());
        }
        Ok(())
    }

    // 8.3: markets and their managers

    pub fn register_market_manager(&mut self, address: Address, manager: M) {
        self.state.managers.insert(address, manager);
    }

    pub fn market_manager(&self, address: Address) -> Result<&M, EngineError> {
        self.state
            .managers
            .get(&address)
            .ok_or(EngineError::MarketManagerNotFound(address))
    }

    pub fn market_manager_mut(&mut self, address: Address) -> Result<&mut M, EngineError> {
        self.state
            .managers
            .get_mut(&address)
            .ok_or(EngineError::MarketManagerNotFound(address))
    }

    pub(super) fn manager_for(&self, market_id: MarketId) -> Result<&M, EngineError> {
        let market = self.market(market_id)?;
        self.market_manager(market.market_manager)
    }

    pub(super) fn manager_for_mut(&mut self, market_id: MarketId) -> Result<&mut M, EngineError> {
        let address = self.market(market_id)?.market_manager;
        self.market_manager_mut(address)
    }

    pub fn register_market(&mut self, owner: Address, config: MarketConfig) -> Result<MarketId, EngineError> {
        self.atomically(|engine| {
            engine.market_manager(config.market_manager)?;
            let pool = engine.state.pools.root(config.collateral_pool_id)?;
            pool.bubbles.config(config.quote_token)?;

            let market_id = MarketId(engine.state.next_market_id);
            engine.state.next_market_id += 1;
            let collateral_pool_id = config.collateral_pool_id;
            let quote_token = config.quote_token;
            let market = Market::new(market_id, owner, config)?;
            engine.state.markets.insert(market_id, market);

            engine.emit_event(EventPayload::MarketRegistered(MarketRegisteredEvent {
                market_id,
                quote_token,
                collateral_pool_id,
            }));
            Ok(market_id)
        })
    }

    pub fn market(&self, market_id: MarketId) -> Result<&Market, EngineError> {
        self.state
            .markets
            .get(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub fn set_market_fees(
        &mut self,
        caller: Address,
        market_id: MarketId,
        fees: MarketFeeConfig,
    ) -> Result<(), EngineError> {
        let market = self
            .state
            .markets
            .get_mut(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))?;
        market.set_fees(caller, fees)?;
        Ok(())
    }

    pub fn set_market_risk_parameter(
        &mut self,
        caller: Address,
        market_id: MarketId,
        risk_parameter: Decimal,
        risk_block_id: u32,
    ) -> Result<(), EngineError> {
        let market = self
            .state
            .markets
            .get_mut(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))?;
        market.set_risk_parameter(caller, risk_parameter, risk_block_id)?;
        Ok(())
    }

    // 8.4: accounts

    pub fn create_account(
        &mut self,
        owner: Address,
        account_id: AccountId,
        pool_id: CollateralPoolId,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            if engine.state.accounts.contains_key(&account_id) {
                return Err(AccountError::AccountAlreadyExists(account_id).into());
            }
            engine.state.pools.get(pool_id)?;
            let account = Account::new(account_id, owner, pool_id, engine.current_time)?;
            engine.state.accounts.insert(account_id, account);
            engine.emit_event(EventPayload::AccountCreated(AccountCreatedEvent {
                account_id,
                owner,
            }));
            Ok(())
        })
    }

    pub fn account(&self, account_id: AccountId) -> Result<&Account, EngineError> {
        self.state
            .accounts
            .get(&account_id)
            .ok_or(EngineError::AccountNotFound(account_id))
    }

    pub(super) fn account_mut(&mut self, account_id: AccountId) -> Result<&mut Account, EngineError> {
        self.state
            .accounts
            .get_mut(&account_id)
            .ok_or(EngineError::AccountNotFound(account_id))
    }

    pub fn accounts_iter(&self) -> impl Iterator<Item = (&AccountId, &Account)> {
        self.state.accounts.iter()
    }

    pub fn grant_permission(
        &mut self,
        caller: Address,
        account_id: AccountId,
        target: Address,
        permission: Permission,
    ) -> Result<(), EngineError> {
        self.account_mut(account_id)?
            .grant_permission(caller, target, permission)?;
        Ok(())
    }

    pub fn revoke_permission(
        &mut self,
        caller: Address,
        account_id: AccountId,
        target: Address,
        permission: Permission,
    ) -> Result<(), EngineError> {
        self.account_mut(account_id)?
            .revoke_permission(caller, target, permission)?;
        Ok(())
    }

    pub(super) fn ensure_permission(
        &self,
        account_id: AccountId,
        caller: Address,
        permission: Permission,
    ) -> Result<(), EngineError> {
        self.account(account_id)?.ensure_permission(caller, permission)?;
        Ok(())
    }

    // 8.5: liquidation hooks

    pub fn register_liquidation_hook(&mut self, address: Address, hook: Box<dyn LiquidationHook>) {
        self.hooks.insert(address, hook);
    }
}
