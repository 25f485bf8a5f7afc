//! Index updater.
//!
//! Maintains the per-market snapshot of the pool's exchange indexes and
//! advances the internally-maintained peer-to-peer indexes. The p2p rate
//! is captured once per refresh as the midpoint of the pool's supply and
//! borrow rates, and both p2p indexes grow by the first-order
//! approximation `new = old * (1 + rate * elapsed_blocks)`.
//!
//! The approximation is intentional: it trades a small, upward-biased
//! rounding error against exact compounding for a deterministic, bounded
//! cost per refresh regardless of how many blocks elapsed. Keep it
//! first-order.

use crate::errors::{EngineError, Result};
use crate::pool::PoolAdapter;
use crate::types::{MarketId, MarketState};
use crate::units::{ray_mul, RAY};
use alloy_primitives::U256;

pub struct IndexUpdater;

impl IndexUpdater {
    /// Refresh a market's indexes up to `block`. Idempotent within a
    /// block: calling twice at the same height leaves the indexes
    /// unchanged after the first call. Returns the new p2p indexes.
    pub fn refresh(
        state: &mut MarketState,
        pool: &dyn PoolAdapter,
        market: MarketId,
        block: u64,
    ) -> Result<(U256, U256)> {
        if !state.listed {
            return Err(EngineError::MarketNotListed);
        }
        if block <= state.last_update_block {
            return Ok((state.p2p_supply_index, state.p2p_borrow_index));
        }

        let elapsed = U256::from(block - state.last_update_block);

        let supply_rate = pool.supply_rate_per_block(market)?;
        let borrow_rate = pool.borrow_rate_per_block(market)?;
        let p2p_rate = supply_rate
            .checked_add(borrow_rate)
            .ok_or(EngineError::MathOverflow)?
            / U256::from(2);

        let growth = RAY
            .checked_add(
                p2p_rate
                    .checked_mul(elapsed)
                    .ok_or(EngineError::MathOverflow)?,
            )
            .ok_or(EngineError::MathOverflow)?;

        state.p2p_supply_index = ray_mul(state.p2p_supply_index, growth)?;
        state.p2p_borrow_index = ray_mul(state.p2p_borrow_index, growth)?;

        // Pool indexes never move backwards
        state.pool_supply_index = state.pool_supply_index.max(pool.supply_index(market)?);
        state.pool_borrow_index = state.pool_borrow_index.max(pool.borrow_index(market)?);

        state.p2p_rate_per_block = p2p_rate;
        state.last_update_block = block;

        Ok((state.p2p_supply_index, state.p2p_borrow_index))
    }
}
