use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::units::RAY;

/// Market identifier (one per supported underlying asset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u32);

/// Reserved account the engine uses when it steps in as a counterparty
/// during a hard unmatch. It holds positions like any other user and its
/// on-pool obligations are matchable by later operations.
pub const ENGINE_ACCOUNT: Address = Address::repeat_byte(0xEE);

/// Position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Supply,
    Borrow,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Supply => Side::Borrow,
            Side::Borrow => Side::Supply,
        }
    }
}

/// User-facing ledger operations, used for per-operation pause flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Supply,
    Borrow,
    Withdraw,
    Repay,
    Liquidate,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Supply => "supply",
            OperationKind::Borrow => "borrow",
            OperationKind::Withdraw => "withdraw",
            OperationKind::Repay => "repay",
            OperationKind::Liquidate => "liquidate",
        };
        write!(f, "{}", name)
    }
}

/// Per-operation pause switches for a market
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PauseFlags {
    pub supply: bool,
    pub borrow: bool,
    pub withdraw: bool,
    pub repay: bool,
    pub liquidate: bool,
}

impl PauseFlags {
    pub fn is_paused(&self, op: OperationKind) -> bool {
        match op {
            OperationKind::Supply => self.supply,
            OperationKind::Borrow => self.borrow,
            OperationKind::Withdraw => self.withdraw,
            OperationKind::Repay => self.repay,
            OperationKind::Liquidate => self.liquidate,
        }
    }

    pub fn set(&mut self, op: OperationKind, paused: bool) {
        match op {
            OperationKind::Supply => self.supply = paused,
            OperationKind::Borrow => self.borrow = paused,
            OperationKind::Withdraw => self.withdraw = paused,
            OperationKind::Repay => self.repay = paused,
            OperationKind::Liquidate => self.liquidate = paused,
        }
    }
}

/// A user's balance in one market on one side, split between the portion
/// held directly in the pool (pool-share units) and the portion matched
/// peer-to-peer (p2p units). Both fields are non-negative by construction;
/// a position with both fields zero is logically absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Pool-share units
    pub on_pool: U256,
    /// Peer-to-peer units
    pub in_p2p: U256,
}

impl Position {
    pub fn is_zero(&self) -> bool {
        self.on_pool.is_zero() && self.in_p2p.is_zero()
    }

    /// Derived state view; not stored
    pub fn kind(&self) -> PositionKind {
        match (self.on_pool.is_zero(), self.in_p2p.is_zero()) {
            (true, true) => PositionKind::Empty,
            (false, true) => PositionKind::OnPoolOnly,
            (true, false) => PositionKind::P2pOnly,
            (false, false) => PositionKind::Mixed,
        }
    }
}

/// Derived classification of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    Empty,
    OnPoolOnly,
    P2pOnly,
    Mixed,
}

/// Per-market accounting state. Indexes are RAY-scaled conversion factors
/// and only ever move forward; markets are never destroyed, only unlisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub listed: bool,
    /// Pool exchange indexes, snapshotted from the pool adapter on refresh
    pub pool_supply_index: U256,
    pub pool_borrow_index: U256,
    /// Peer-to-peer exchange indexes, maintained internally
    pub p2p_supply_index: U256,
    pub p2p_borrow_index: U256,
    /// Midpoint of the pool rates, captured once per refresh
    pub p2p_rate_per_block: U256,
    pub last_update_block: u64,
    /// Minimum supply amount in underlying
    pub supply_threshold: U256,
    /// Maximum total borrow in underlying; zero disables the cap
    pub borrow_cap: U256,
    /// Running total borrow in underlying, maintained by the ledger
    pub total_borrow: U256,
    pub paused: PauseFlags,
}

impl MarketState {
    pub fn new(block: u64) -> Self {
        Self {
            listed: true,
            pool_supply_index: RAY,
            pool_borrow_index: RAY,
            p2p_supply_index: RAY,
            p2p_borrow_index: RAY,
            p2p_rate_per_block: U256::ZERO,
            last_update_block: block,
            supply_threshold: U256::from(1),
            borrow_cap: U256::ZERO,
            total_borrow: U256::ZERO,
            paused: PauseFlags::default(),
        }
    }
}
