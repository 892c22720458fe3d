//! Collateral bubbles.
//!
//! Every collateral pool arranges its accepted tokens in a tree rooted at the USD unit
//! (the zero address). Each non-root token names exactly one parent together with the
//! oracle node that prices it in parent units, a haircut applied when its value counts as
//! surplus, and a discount offered to auto-exchangers. Converting along a path multiplies
//! the per-hop prices and composes haircuts and discounts multiplicatively on `1 - x`.
//!
//! Surplus and deficit are treated differently: a positive amount travelling through a hop
//! is haircut, a negative amount is converted at raw price. Deficits never benefit from the
//! haircut.

use crate::oracle::{OracleError, OracleNodeId, PriceOracle};
use crate::types::{div_wad, mul_wad, Address, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Link from a token to the token it exchanges into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentConfig {
    pub token: Address,
    pub oracle_node_id: OracleNodeId,
    pub price_haircut: Decimal,
    pub auto_exchange_discount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralConfig {
    pub deposits_enabled: bool,
    /// Maximum pool balance of this token.
    pub cap: Decimal,
    pub parent: Option<ParentConfig>,
}

impl CollateralConfig {
    pub fn child_of(
        parent: Address,
        oracle_node_id: OracleNodeId,
        price_haircut: Decimal,
        auto_exchange_discount: Decimal,
        cap: Decimal,
    ) -> Self {
        Self {
            deposits_enabled: true,
            cap,
            parent: Some(ParentConfig {
                token: parent,
                oracle_node_id,
                price_haircut,
                auto_exchange_discount,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollateralError {
    #[error("Cannot exchange {from} into {to}: not an ancestor")]
    CannotExchangeTokens { from: Address, to: Address },

    #[error("Collateral {0} is not configured in this pool")]
    CollateralNotConfigured(Address),

    #[error("Collateral {0} must name a parent token")]
    MissingParent(Address),

    #[error("The USD root cannot be reconfigured")]
    RootIsNotConfigurable,

    #[error("Making {parent} the parent of {token} would create a cycle")]
    CyclicCollateralConfiguration { token: Address, parent: Address },

    #[error("Invalid haircut or discount {value} for {token}: must be in [0, 1)")]
    InvalidHaircut { token: Address, value: Decimal },

    #[error("Deposits of {0} are disabled")]
    DepositsDisabled(Address),

    #[error("Collateral cap exceeded for {token}: cap {cap}, resulting balance {resulting}")]
    CollateralCapExceeded {
        token: Address,
        cap: Decimal,
        resulting: Decimal,
    },

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// Everything needed to read a price: the oracle, the current time and the staleness bound.
#[derive(Clone, Copy)]
pub struct PricingContext<'a> {
    pub oracle: &'a dyn PriceOracle,
    pub now: Timestamp,
    pub max_staleness_ms: i64,
}

impl<'a> PricingContext<'a> {
    pub fn new(oracle: &'a dyn PriceOracle, now: Timestamp, max_staleness_ms: i64) -> Self {
        Self {
            oracle,
            now,
            max_staleness_ms,
        }
    }

    fn price(&self, node: OracleNodeId) -> Result<Decimal, OracleError> {
        self.oracle.price(node, self.now, self.max_staleness_ms)
    }
}

/// Cumulative exchange terms from one token into one of its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub price: Decimal,
    pub price_haircut: Decimal,
    pub auto_exchange_discount: Decimal,
}

impl ExchangeInfo {
    pub fn identity() -> Self {
        Self {
            price: Decimal::ONE,
            price_haircut: Decimal::ZERO,
            auto_exchange_discount: Decimal::ZERO,
        }
    }

    /// Appends one more hop (`self` then `hop`).
    pub fn compose(&self, hop: &ExchangeInfo) -> Self {
        Self {
            price: mul_wad(self.price, hop.price),
            price_haircut: Decimal::ONE
                - mul_wad(
                    Decimal::ONE - self.price_haircut,
                    Decimal::ONE - hop.price_haircut,
                ),
            auto_exchange_discount: Decimal::ONE
                - mul_wad(
                    Decimal::ONE - self.auto_exchange_discount,
                    Decimal::ONE - hop.auto_exchange_discount,
                ),
        }
    }

    pub fn convert_raw(&self, amount: Decimal) -> Decimal {
        mul_wad(amount, self.price)
    }

    /// Child units into ancestor units. Surplus is haircut, deficit is not.
    pub fn convert_with_haircut(&self, amount: Decimal) -> Decimal {
        let raw = self.convert_raw(amount);
        if amount < Decimal::ZERO {
            raw
        } else {
            mul_wad(raw, Decimal::ONE - self.price_haircut)
        }
    }

    pub fn convert_down_raw(&self, amount: Decimal) -> Decimal {
        div_wad(amount, self.price)
    }

    /// Ancestor units into child units, with the same asymmetry as `convert_with_haircut`.
    pub fn convert_down_with_haircut(&self, amount: Decimal) -> Decimal {
        let raw = self.convert_down_raw(amount);
        if amount < Decimal::ZERO {
            raw
        } else {
            mul_wad(raw, Decimal::ONE - self.price_haircut)
        }
    }

    /// Price at which an auto-exchanger buys this token in ancestor units.
    pub fn discounted_price(&self) -> Decimal {
        mul_wad(self.price, Decimal::ONE - self.auto_exchange_discount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CollateralNode {
    config: CollateralConfig,
    children: BTreeSet<Address>,
}

/// The token tree of one collateral pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralBubbleGraph {
    nodes: HashMap<Address, CollateralNode>,
}

impl Default for CollateralBubbleGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CollateralBubbleGraph {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            Address::USD,
            CollateralNode {
                config: CollateralConfig {
                    deposits_enabled: false,
                    cap: Decimal::ZERO,
                    parent: None,
                },
                children: BTreeSet::new(),
            },
        );
        Self { nodes }
    }

    pub fn contains(&self, token: Address) -> bool {
        self.nodes.contains_key(&token)
    }

    pub fn config(&self, token: Address) -> Result<&CollateralConfig, CollateralError> {
        self.nodes
            .get(&token)
            .map(|n| &n.config)
            .ok_or(CollateralError::CollateralNotConfigured(token))
    }

    pub fn children(&self, token: Address) -> Vec<Address> {
        self.nodes
            .get(&token)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Address> {
        self.nodes.keys()
    }

    /// Adds or reconfigures a token. Re-parenting moves the whole subtree.
    pub fn configure(
        &mut self,
        token: Address,
        config: CollateralConfig,
    ) -> Result<(), CollateralError> {
        if token.is_usd() {
            return Err(CollateralError::RootIsNotConfigurable);
        }
        let parent = config
            .parent
            .as_ref()
            .ok_or(CollateralError::MissingParent(token))?;

        for value in [parent.price_haircut, parent.auto_exchange_discount] {
            if value < Decimal::ZERO || value >= Decimal::ONE {
                return Err(CollateralError::InvalidHaircut { token, value });
            }
        }
        if !self.contains(parent.token) {
            return Err(CollateralError::CollateralNotConfigured(parent.token));
        }
        if parent.token == token || self.root_path(parent.token)?.contains(&token) {
            return Err(CollateralError::CyclicCollateralConfiguration {
                token,
                parent: parent.token,
            });
        }

        let new_parent = parent.token;
        let old_parent = self
            .nodes
            .get(&token)
            .and_then(|n| n.config.parent.as_ref())
            .map(|p| p.token);

        if let Some(old) = old_parent {
            if let Some(node) = self.nodes.get_mut(&old) {
                node.children.remove(&token);
            }
        }

        let children = self
            .nodes
            .remove(&token)
            .map(|n| n.children)
            .unwrap_or_default();
        self.nodes.insert(token, CollateralNode { config, children });

        if let Some(node) = self.nodes.get_mut(&new_parent) {
            node.children.insert(token);
        }
        Ok(())
    }

    pub fn set_deposits_enabled(
        &mut self,
        token: Address,
        enabled: bool,
    ) -> Result<(), CollateralError> {
        if token.is_usd() {
            return Err(CollateralError::RootIsNotConfigurable);
        }
        let node = self
            .nodes
            .get_mut(&token)
            .ok_or(CollateralError::CollateralNotConfigured(token))?;
        node.config.deposits_enabled = enabled;
        Ok(())
    }

    /// One hop: token into its parent.
    pub fn parent_exchange_info(
        &self,
        token: Address,
        pricing: &PricingContext<'_>,
    ) -> Result<(Address, ExchangeInfo), CollateralError> {
        let config = self.config(token)?;
        let parent = config
            .parent
            .as_ref()
            .ok_or(CollateralError::MissingParent(token))?;
        let price = pricing.price(parent.oracle_node_id)?;
        Ok((
            parent.token,
            ExchangeInfo {
                price,
                price_haircut: parent.price_haircut,
                auto_exchange_discount: parent.auto_exchange_discount,
            },
        ))
    }

    /// Walks token → parent → ... until `base`, composing every hop.
    pub fn get_exchange_info(
        &self,
        token: Address,
        base: Address,
        pricing: &PricingContext<'_>,
    ) -> Result<ExchangeInfo, CollateralError> {
        let mut info = ExchangeInfo::identity();
        let mut current = token;
        while current != base {
            let config = self.config(current)?;
            if config.parent.is_none() {
                return Err(CollateralError::CannotExchangeTokens {
                    from: token,
                    to: base,
                });
            }
            let (parent, hop) = self.parent_exchange_info(current, pricing)?;
            info = info.compose(&hop);
            current = parent;
        }
        Ok(info)
    }

    /// Path from `token` up to the USD root, both ends included.
    pub fn root_path(&self, token: Address) -> Result<Vec<Address>, CollateralError> {
        let mut path = vec![token];
        let mut current = token;
        while let Some(parent) = self.config(current)?.parent.as_ref() {
            current = parent.token;
            path.push(current);
        }
        Ok(path)
    }

    /// Deepest token that is an ancestor of (or equal to) both `a` and `b`.
    pub fn get_common_token(&self, a: Address, b: Address) -> Result<Address, CollateralError> {
        let path_a = self.root_path(a)?;
        let path_b = self.root_path(b)?;

        let mut common = Address::USD;
        for (x, y) in path_a.iter().rev().zip(path_b.iter().rev()) {
            if x != y {
                break;
            }
            common = *x;
        }
        Ok(common)
    }

    /// Every descendant of `base` with its cumulative exchange terms into `base`.
    pub fn get_sub_tokens(
        &self,
        base: Address,
        pricing: &PricingContext<'_>,
    ) -> Result<Vec<(Address, ExchangeInfo)>, CollateralError> {
        let mut out = Vec::new();
        self.collect_sub_tokens(base, ExchangeInfo::identity(), pricing, &mut out)?;
        Ok(out)
    }

    fn collect_sub_tokens(
        &self,
        token: Address,
        acc: ExchangeInfo,
        pricing: &PricingContext<'_>,
        out: &mut Vec<(Address, ExchangeInfo)>,
    ) -> Result<(), CollateralError> {
        for child in self.children(token) {
            let (_, hop) = self.parent_exchange_info(child, pricing)?;
            // child → token, then token → base
            let info = hop.compose(&acc);
            out.push((child, info));
            self.collect_sub_tokens(child, info, pricing, out)?;
        }
        Ok(())
    }

    /// Value of a set of balances in `base` units, haircutting surplus.
    pub fn weighted_balance(
        &self,
        balances: &HashMap<Address, Decimal>,
        base: Address,
        pricing: &PricingContext<'_>,
    ) -> Result<Decimal, CollateralError> {
        let mut total = balances.get(&base).copied().unwrap_or_default();
        for (token, info) in self.get_sub_tokens(base, pricing)? {
            if let Some(balance) = balances.get(&token) {
                total += info.convert_with_haircut(*balance);
            }
        }
        Ok(total)
    }
}
