// margin-core: cross-margin risk engine with tiered liquidations.
// risk-first architecture: every state change is margin-checked and all-or-nothing.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: ids, addresses, timestamps, wad math
//   2.x  collateral.rs: collateral bubble graph, exchange info, haircuts
//   2.1  collateral_pool.rs: pools and their union-find registry
//   3.x  margin.rs: LMR, worst-case exposure, margin info per tier
//   4.x  market_manager.rs: market manager interface + in-memory simulation
//   5.x  oracle.rs: price oracle interface, staleness
//   6.x  liquidation.rs: tiers, dutch penalty, penalty waterfall, hooks
//   6.1  liquidation_queue.rs: bid ranks and the bid min-heap
//   7.x  config.rs: pool risk, dutch, liquidation, insurance and backstop settings
//   8.x  engine/: state, collateral flows, orders, bid tier, dutch, backstop, ADL
//   10.x account.rs: accounts, permissions, bid rounds
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market config

// core risk modules
pub mod account;
pub mod engine;
pub mod events;
pub mod liquidation;
pub mod liquidation_queue;
pub mod margin;
pub mod market;
pub mod types;

// collateral modules
pub mod collateral;
pub mod collateral_pool;

// integration modules
pub mod config;
pub mod market_manager;
pub mod oracle;

// re exports for convenience
pub use account::*;
pub use collateral::*;
pub use collateral_pool::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use liquidation::*;
pub use liquidation_queue::*;
pub use margin::*;
pub use market::*;
pub use market_manager::*;
pub use oracle::*;
pub use types::*;
