//! Collateral pools.
//!
//! A pool groups markets that share collateral, risk multipliers and liquidation settings.
//! Pools merge one way: the child's root pointer moves to the parent and never comes back.
//! Only root pools are mutated directly; a merged pool is just an alias of its root.

use crate::collateral::{CollateralBubbleGraph, CollateralConfig, CollateralError, PricingContext};
use crate::config::{CollateralPoolConfig, ConfigError};
use crate::types::{Address, CollateralPoolId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("Collateral pool {0} not found")]
    PoolNotFound(CollateralPoolId),

    #[error("Collateral pool {pool} is merged into {root} and cannot be mutated")]
    NotRootPool {
        pool: CollateralPoolId,
        root: CollateralPoolId,
    },

    #[error("Cannot merge collateral pool {0} with itself")]
    MergeWithSelf(CollateralPoolId),

    #[error("{caller} is not the owner of collateral pool {pool}")]
    Unauthorized {
        pool: CollateralPoolId,
        caller: Address,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Collateral error: {0}")]
    Collateral(#[from] CollateralError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralPool {
    pub id: CollateralPoolId,
    pub owner: Address,
    pub root_id: CollateralPoolId,
    pub bubbles: CollateralBubbleGraph,
    /// Sum of member accounts' net deposits per token.
    pub balances: HashMap<Address, Decimal>,
    pub config: CollateralPoolConfig,
}

impl CollateralPool {
    pub fn new(id: CollateralPoolId, owner: Address, config: CollateralPoolConfig) -> Self {
        Self {
            id,
            owner,
            root_id: id,
            bubbles: CollateralBubbleGraph::new(),
            balances: HashMap::new(),
            config,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == self.root_id
    }

    pub fn balance(&self, token: Address) -> Decimal {
        self.balances.get(&token).copied().unwrap_or_default()
    }

    pub fn update_balance(&mut self, token: Address, delta: Decimal) {
        *self.balances.entry(token).or_default() += delta;
    }

    /// Deposit gate: token enabled and the pool cap respected.
    pub fn check_deposit(&self, token: Address, amount: Decimal) -> Result<(), CollateralError> {
        let config = self.bubbles.config(token)?;
        if !config.deposits_enabled {
            return Err(CollateralError::DepositsDisabled(token));
        }
        let resulting = self.balance(token) + amount;
        if resulting > config.cap {
            return Err(CollateralError::CollateralCapExceeded {
                token,
                cap: config.cap,
                resulting,
            });
        }
        Ok(())
    }

    /// Pool balances valued in `base`, surplus haircut.
    pub fn weighted_balance_in(
        &self,
        base: Address,
        pricing: &PricingContext<'_>,
    ) -> Result<Decimal, CollateralError> {
        self.bubbles.weighted_balance(&self.balances, base, pricing)
    }

    fn authorize(&self, caller: Address) -> Result<(), PoolError> {
        if !self.is_root() {
            return Err(PoolError::NotRootPool {
                pool: self.id,
                root: self.root_id,
            });
        }
        if caller != self.owner {
            return Err(PoolError::Unauthorized {
                pool: self.id,
                caller,
            });
        }
        Ok(())
    }

    pub fn set_config(
        &mut self,
        caller: Address,
        config: CollateralPoolConfig,
    ) -> Result<(), PoolError> {
        self.authorize(caller)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn configure_collateral(
        &mut self,
        caller: Address,
        token: Address,
        config: CollateralConfig,
    ) -> Result<(), PoolError> {
        self.authorize(caller)?;
        self.bubbles.configure(token, config)?;
        Ok(())
    }
}

/// Arena of pools keyed by id, with union-find root resolution.
#[derive(Debug, Clone, Default)]
pub struct CollateralPoolRegistry {
    pools: HashMap<CollateralPoolId, CollateralPool>,
    next_id: u64,
}

impl CollateralPoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn create(
        &mut self,
        owner: Address,
        config: CollateralPoolConfig,
    ) -> Result<CollateralPoolId, PoolError> {
        config.validate()?;
        let id = CollateralPoolId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        self.pools.insert(id, CollateralPool::new(id, owner, config));
        Ok(id)
    }

    pub fn get(&self, id: CollateralPoolId) -> Result<&CollateralPool, PoolError> {
        self.pools.get(&id).ok_or(PoolError::PoolNotFound(id))
    }

    pub fn get_mut(&mut self, id: CollateralPoolId) -> Result<&mut CollateralPool, PoolError> {
        self.pools.get_mut(&id).ok_or(PoolError::PoolNotFound(id))
    }

    /// Follows root pointers without compressing them.
    pub fn root_of(&self, id: CollateralPoolId) -> Result<CollateralPoolId, PoolError> {
        let mut current = self.get(id)?;
        while !current.is_root() {
            current = self.get(current.root_id)?;
        }
        Ok(current.id)
    }

    /// Resolves the root and points every pool on the way straight at it.
    pub fn find_root(&mut self, id: CollateralPoolId) -> Result<CollateralPoolId, PoolError> {
        let root = self.root_of(id)?;
        let mut current = id;
        while current != root {
            let pool = self.get_mut(current)?;
            let next = pool.root_id;
            pool.root_id = root;
            current = next;
        }
        Ok(root)
    }

    pub fn root(&self, id: CollateralPoolId) -> Result<&CollateralPool, PoolError> {
        self.get(self.root_of(id)?)
    }

    pub fn root_mut(&mut self, id: CollateralPoolId) -> Result<&mut CollateralPool, PoolError> {
        let root = self.find_root(id)?;
        self.get_mut(root)
    }

    /// Folds `child` into `parent`. Both must be roots owned by `caller`.
    pub fn merge(
        &mut self,
        caller: Address,
        parent_id: CollateralPoolId,
        child_id: CollateralPoolId,
    ) -> Result<(), PoolError> {
        if parent_id == child_id {
            return Err(PoolError::MergeWithSelf(parent_id));
        }
        self.get(parent_id)?.authorize(caller)?;
        self.get(child_id)?.authorize(caller)?;

        let child = self.get_mut(child_id)?;
        child.root_id = parent_id;
        let balances: Vec<(Address, Decimal)> = child.balances.drain().collect();

        let parent = self.get_mut(parent_id)?;
        for (token, amount) in balances {
            parent.update_balance(token, amount);
        }
        Ok(())
    }
}
