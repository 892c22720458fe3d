// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, addresses, timestamps and the wad fixed-point helpers. each id is a newtype so the
// compiler catches account/market/pool mixups.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollateralPoolId(pub u64);

/// Liquidation bid round. Zero means no round has been opened yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account#{}", self.0)
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "market#{}", self.0)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round#{}", self.0)
    }
}

impl fmt::Display for CollateralPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

// 1.1: token and owner addresses. the zero address doubles as the USD unit at the
// root of every collateral bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    pub const USD: Address = Address(0);

    pub fn is_usd(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_usd() {
            write!(f, "USD")
        } else {
            write!(f, "0x{:016x}", self.0)
        }
    }
}

// 1.2: millisecond timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Saturates at the far end of the clock instead of wrapping.
    pub fn plus_secs(&self, secs: u64) -> Self {
        let millis = i64::try_from(secs)
            .ok()
            .and_then(|secs| secs.checked_mul(1_000))
            .unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// 1.3: wad math. risk math is done at 18 implied decimals and truncates toward zero,
// the same as integer division on a 1e18-scaled value would.
pub const WAD_DECIMALS: u32 = 18;

pub fn truncate_wad(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(WAD_DECIMALS, RoundingStrategy::ToZero)
}

pub fn mul_wad(a: Decimal, b: Decimal) -> Decimal {
    truncate_wad(a * b)
}

/// Divides and truncates toward zero. Callers guard `b != 0`.
pub fn div_wad(a: Decimal, b: Decimal) -> Decimal {
    debug_assert!(!b.is_zero());
    truncate_wad(a / b)
}

/// Clamps a fraction into `[0, 1]`.
pub fn clamp_unit(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE)
}
