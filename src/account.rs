//! Margin accounts.
//!
//! An account holds signed net deposits per collateral token, the set of markets it is
//! active in per quote token, address permissions, and the liquidation bid rounds opened
//! against it. Net deposits can go negative: penalties and settled losses are booked
//! before any auto-exchange makes the token whole again.

use crate::liquidation_queue::LiquidationBidPriorityQueue;
use crate::types::{AccountId, Address, CollateralPoolId, MarketId, RoundId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Admin,
    Withdraw,
    MatchOrder,
    Liquidate,
}

impl Permission {
    fn bit(self) -> u8 {
        match self {
            Permission::Admin => 1 << 0,
            Permission::Withdraw => 1 << 1,
            Permission::MatchOrder => 1 << 2,
            Permission::Liquidate => 1 << 3,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Admin => "ADMIN",
            Permission::Withdraw => "WITHDRAW",
            Permission::MatchOrder => "MATCH_ORDER",
            Permission::Liquidate => "LIQUIDATE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(u8);

impl PermissionSet {
    pub fn with(self, permission: Permission) -> Self {
        Self(self.0 | permission.bit())
    }

    pub fn without(self, permission: Permission) -> Self {
        Self(self.0 & !permission.bit())
    }

    /// Admin implies every other permission.
    pub fn allows(&self, permission: Permission) -> bool {
        self.0 & (permission.bit() | Permission::Admin.bit()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Bid rounds opened against one account in one quote token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidQueueState {
    pub latest_round_id: RoundId,
    pub latest_round_end: Timestamp,
    rounds: HashMap<RoundId, LiquidationBidPriorityQueue>,
}

impl BidQueueState {
    /// The latest round, if one exists and has not expired at `now`.
    pub fn current_round(&self, now: Timestamp) -> Option<RoundId> {
        if self.latest_round_id.0 > 0 && now < self.latest_round_end {
            Some(self.latest_round_id)
        } else {
            None
        }
    }

    pub fn has_expired_round(&self, now: Timestamp) -> bool {
        self.latest_round_id.0 > 0 && now >= self.latest_round_end
    }

    /// Returns the open round, starting a new one when the previous has expired.
    pub fn open_round(&mut self, now: Timestamp, duration_secs: u64) -> RoundId {
        if let Some(round) = self.current_round(now) {
            return round;
        }
        let round = RoundId(self.latest_round_id.0 + 1);
        self.latest_round_id = round;
        self.latest_round_end = now.plus_secs(duration_secs);
        self.rounds.insert(round, LiquidationBidPriorityQueue::new());
        round
    }

    /// Drops a round's queue from the map and hands it back.
    pub fn retire_round(&mut self, round: RoundId) -> Option<LiquidationBidPriorityQueue> {
        self.rounds.remove(&round)
    }

    pub fn queue(&self, round: RoundId) -> Option<&LiquidationBidPriorityQueue> {
        self.rounds.get(&round)
    }

    pub fn queue_mut(&mut self, round: RoundId) -> Option<&mut LiquidationBidPriorityQueue> {
        self.rounds.get_mut(&round)
    }

    pub fn latest_queue(&self) -> Option<&LiquidationBidPriorityQueue> {
        self.rounds.get(&self.latest_round_id)
    }

    pub fn latest_queue_mut(&mut self) -> Option<&mut LiquidationBidPriorityQueue> {
        self.rounds.get_mut(&self.latest_round_id)
    }

    /// True while the open round still holds bids.
    pub fn has_pending_bids(&self, now: Timestamp) -> bool {
        self.current_round(now)
            .and_then(|round| self.queue(round))
            .map(|queue| !queue.is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub owner: Address,
    permissions: HashMap<Address, PermissionSet>,
    net_deposits: HashMap<Address, Decimal>,
    active_collaterals: BTreeSet<Address>,
    active_markets: HashMap<Address, BTreeSet<MarketId>>,
    /// First market the account traded. Every later market must share its pool.
    pub first_market_id: Option<MarketId>,
    /// Pool the account joined at creation. Merges may move its root, never the id.
    pub collateral_pool_id: CollateralPoolId,
    bid_queues: HashMap<Address, BidQueueState>,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(
        id: AccountId,
        owner: Address,
        collateral_pool_id: CollateralPoolId,
        created_at: Timestamp,
    ) -> Result<Self, AccountError> {
        if id.0 == 0 {
            return Err(AccountError::ZeroAccountId);
        }
        Ok(Self {
            id,
            owner,
            permissions: HashMap::new(),
            net_deposits: HashMap::new(),
            active_collaterals: BTreeSet::new(),
            active_markets: HashMap::new(),
            first_market_id: None,
            collateral_pool_id,
            bid_queues: HashMap::new(),
            created_at,
        })
    }

    // 2.1: permissions. the owner holds everything implicitly

    pub fn has_permission(&self, address: Address, permission: Permission) -> bool {
        address == self.owner
            || self
                .permissions
                .get(&address)
                .map(|set| set.allows(permission))
                .unwrap_or(false)
    }

    pub fn ensure_permission(&self, address: Address, permission: Permission) -> Result<(), AccountError> {
        if !self.has_permission(address, permission) {
            return Err(AccountError::PermissionDenied {
                account_id: self.id,
                address,
                permission,
            });
        }
        Ok(())
    }

    pub fn grant_permission(
        &mut self,
        caller: Address,
        target: Address,
        permission: Permission,
    ) -> Result<(), AccountError> {
        self.ensure_permission(caller, Permission::Admin)?;
        let set = self.permissions.entry(target).or_default();
        *set = set.with(permission);
        Ok(())
    }

    pub fn revoke_permission(
        &mut self,
        caller: Address,
        target: Address,
        permission: Permission,
    ) -> Result<(), AccountError> {
        self.ensure_permission(caller, Permission::Admin)?;
        if let Some(set) = self.permissions.get_mut(&target) {
            *set = set.without(permission);
            if set.is_empty() {
                self.permissions.remove(&target);
            }
        }
        Ok(())
    }

    // 2.2: collateral

    pub fn net_deposits(&self, token: Address) -> Decimal {
        self.net_deposits.get(&token).copied().unwrap_or_default()
    }

    /// Books a signed change in net deposits. Any token ever touched becomes active.
    pub fn update_net_collateral_deposits(&mut self, token: Address, delta: Decimal) {
        *self.net_deposits.entry(token).or_default() += delta;
        self.active_collaterals.insert(token);
    }

    pub fn active_collaterals(&self) -> impl Iterator<Item = Address> + '_ {
        self.active_collaterals.iter().copied()
    }

    // 2.3: markets

    pub fn activate_market(&mut self, quote_token: Address, market_id: MarketId) {
        if self.first_market_id.is_none() {
            self.first_market_id = Some(market_id);
        }
        self.active_collaterals.insert(quote_token);
        self.active_markets
            .entry(quote_token)
            .or_default()
            .insert(market_id);
    }

    pub fn active_markets(&self, quote_token: Address) -> Vec<MarketId> {
        self.active_markets
            .get(&quote_token)
            .map(|markets| markets.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_market_active(&self, quote_token: Address, market_id: MarketId) -> bool {
        self.active_markets
            .get(&quote_token)
            .map(|markets| markets.contains(&market_id))
            .unwrap_or(false)
    }

    pub fn quote_tokens(&self) -> impl Iterator<Item = Address> + '_ {
        self.active_markets.keys().copied()
    }

    pub fn all_active_markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self
            .active_markets
            .values()
            .flat_map(|m| m.iter().copied())
            .collect();
        markets.sort();
        markets
    }

    // 2.4: liquidation bid rounds

    pub fn bid_queue(&self, quote_token: Address) -> Option<&BidQueueState> {
        self.bid_queues.get(&quote_token)
    }

    pub fn bid_queue_mut(&mut self, quote_token: Address) -> &mut BidQueueState {
        self.bid_queues.entry(quote_token).or_default()
    }

    pub fn has_pending_bids(&self, quote_token: Address, now: Timestamp) -> bool {
        self.bid_queue(quote_token)
            .map(|state| state.has_pending_bids(now))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccountError {
    #[error("Account id 0 is reserved")]
    ZeroAccountId,

    #[error("Account {0} already exists")]
    AccountAlreadyExists(AccountId),

    #[error("{address} lacks {permission} on {account_id}")]
    PermissionDenied {
        account_id: AccountId,
        address: Address,
        permission: Permission,
    },

    #[error("{account_id} is bound to {expected}, market belongs to {actual}")]
    CollateralPoolMismatch {
        account_id: AccountId,
        expected: CollateralPoolId,
        actual: CollateralPoolId,
    },

    #[error("Insufficient {token} on {account_id}: requested {requested}, available {available}")]
    InsufficientCollateral {
        account_id: AccountId,
        token: Address,
        requested: Decimal,
        available: Decimal,
    },
}
