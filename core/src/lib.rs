// PeerMatch Core Engine
//
// Peer-to-peer matching and balance accounting on top of an external
// pooled lending protocol. Supplied and borrowed balances live in one
// of two views per market: on pool (earning/paying the pool's rates)
// or matched peer-to-peer (at the midpoint rate between them). The
// matching engine moves balances between the views, the index updater
// accrues interest on both, and the position ledger keeps every
// operation atomic.

pub mod errors;
pub mod indexes;
pub mod ledger;
pub mod liquidation;
pub mod matching;
pub mod pool;
pub mod risk;
pub mod sorted_index;
pub mod storage;
pub mod types;
pub mod units;

// Re-export commonly used types
pub use errors::{EngineError, Result};
pub use indexes::IndexUpdater;
pub use ledger::{LedgerConfig, LedgerState, Market, PositionLedger};
pub use liquidation::LiquidationReceipt;
pub use matching::{MatchOutcome, MatchingEngine, UnmatchOutcome};
pub use pool::{InMemoryPool, PoolAdapter, PoolMarket};
pub use risk::{RiskOracle, StaticOracle};
pub use sorted_index::SortedIndex;
pub use storage::{CheckpointMetadata, LedgerStorage};
pub use types::{
    MarketId, MarketState, OperationKind, PauseFlags, Position, PositionKind, Side, ENGINE_ACCOUNT,
};
pub use units::{
    p2p_units_to_underlying, pool_units_to_underlying, ray_div, ray_mul, underlying_to_p2p_units,
    underlying_to_pool_units, RAY,
};
