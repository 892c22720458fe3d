// 9.0: oracle integration.
//
// collateral prices are consumed through the PriceOracle trait. the engine does not care
// whether a node is backed by Pyth, Chainlink or a fixed test price; it only needs the latest
// update for a node id and checks staleness itself.

use crate::types::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of an oracle node (one price feed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OracleNodeId(pub u64);

/// A single price reading from an oracle node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub price: Decimal,
    pub timestamp: Timestamp,
}

impl PriceUpdate {
    pub fn new(price: Decimal, timestamp: Timestamp) -> Self {
        Self { price, timestamp }
    }

    pub fn is_stale(&self, now: Timestamp, max_staleness_ms: i64) -> bool {
        now.as_millis() - self.timestamp.as_millis() > max_staleness_ms
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle node {0:?} has no price")]
    NoPriceAvailable(OracleNodeId),

    #[error("Oracle node {node:?} price is stale: updated at {updated_at}, now {now}")]
    StalePrice {
        node: OracleNodeId,
        updated_at: Timestamp,
        now: Timestamp,
    },

    #[error("Oracle node {node:?} returned non-positive price {price}")]
    InvalidPrice { node: OracleNodeId, price: Decimal },
}

/// Price source consumed by the collateral bubble graph.
pub trait PriceOracle {
    fn latest(&self, node: OracleNodeId) -> Result<PriceUpdate, OracleError>;

    /// Latest price, rejected if stale or non-positive.
    fn price(
        &self,
        node: OracleNodeId,
        now: Timestamp,
        max_staleness_ms: i64,
    ) -> Result<Decimal, OracleError> {
        let update = self.latest(node)?;
        if update.is_stale(now, max_staleness_ms) {
            return Err(OracleError::StalePrice {
                node,
                updated_at: update.timestamp,
                now,
            });
        }
        if update.price <= Decimal::ZERO {
            return Err(OracleError::InvalidPrice {
                node,
                price: update.price,
            });
        }
        Ok(update.price)
    }
}

/// In-memory oracle for simulations and tests. Prices are pushed by the caller.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    prices: HashMap<OracleNodeId, PriceUpdate>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, node: OracleNodeId, price: Decimal) -> Self {
        self.set_price(node, price, Timestamp::from_millis(0));
        self
    }

    pub fn set_price(&mut self, node: OracleNodeId, price: Decimal, timestamp: Timestamp) {
        self.prices.insert(node, PriceUpdate::new(price, timestamp));
    }
}

impl PriceOracle for StaticPriceOracle {
    fn latest(&self, node: OracleNodeId) -> Result<PriceUpdate, OracleError> {
        self.prices
            .get(&node)
            .copied()
            .ok_or(OracleError::NoPriceAvailable(node))
    }
}
