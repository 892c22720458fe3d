// 8.0: margin engine. owns accounts, pools, markets and market managers, answers margin
// queries and drives the liquidation tiers.
// deterministic: time and prices only change when the caller says so.

mod bids;
mod collateral;
mod core;
mod liquidations;
mod margin;
mod orders;
mod results;

pub use core::Engine;
pub use results::{
    AdlResult, BackstopOutcome, BidExecution, BidSubmission, DutchLiquidationResult,
    EngineError, LiquidationResult, UnfilledOrdersResult,
};
