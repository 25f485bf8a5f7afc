//! Greedy, iteration-bounded peer-to-peer matching.
//!
//! `match_liquidity` walks the opposite side's on-pool index from the
//! largest balance down, moving counterparty balances from the pool view
//! into the p2p view. `unmatch_liquidity` walks the same side's p2p
//! index from the smallest balance up (most-recently-matched, least
//! committed counterparties are displaced first) and reverses the move.
//!
//! Both stop after at most `max_iterations` counterparties. A leftover
//! after the cap is not an error: the ledger sends the remainder to the
//! pool directly, or performs a hard unmatch.

use crate::errors::{EngineError, Result};
use crate::ledger::Market;
use crate::types::Side;
use crate::units::{
    p2p_units_to_underlying, pool_units_to_underlying, underlying_to_p2p_units,
    underlying_to_pool_units,
};
use alloy_primitives::U256;

/// Result of a `match_liquidity` call, amounts in underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: U256,
    pub remaining: U256,
    pub iterations: u64,
}

/// Result of an `unmatch_liquidity` call, amounts in underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmatchOutcome {
    pub freed: U256,
    pub still_owed: U256,
    pub iterations: u64,
}

pub struct MatchingEngine;

impl MatchingEngine {
    /// Move up to `amount` underlying of `against`-side on-pool balance
    /// into the p2p view, touching at most `max_iterations` counterparties,
    /// largest on-pool balance first.
    pub fn match_liquidity(
        market: &mut Market,
        against: Side,
        amount: U256,
        max_iterations: u64,
    ) -> Result<MatchOutcome> {
        let pool_index = market.pool_index(against);
        let p2p_index = market.p2p_index(against);

        let mut remaining = amount;
        let mut matched = U256::ZERO;
        let mut iterations = 0u64;

        while !remaining.is_zero() && iterations < max_iterations {
            let Some((user, _)) = market.on_pool_index_mut(against).extract_largest() else {
                break;
            };
            iterations += 1;

            let pos = market.positions_mut(against).entry(user).or_default();
            let available = pool_units_to_underlying(pos.on_pool, pool_index)?;
            if available.is_zero() {
                // Entry was pure rounding dust; leave it extracted
                continue;
            }

            let slice = remaining.min(available);
            pos.on_pool = pos
                .on_pool
                .checked_sub(underlying_to_pool_units(slice, pool_index)?)
                .ok_or(EngineError::MathOverflow)?;
            pos.in_p2p = pos
                .in_p2p
                .checked_add(underlying_to_p2p_units(slice, p2p_index)?)
                .ok_or(EngineError::MathOverflow)?;
            market.reindex_user(user, against);

            matched = matched
                .checked_add(slice)
                .ok_or(EngineError::MathOverflow)?;
            remaining -= slice;
        }

        Ok(MatchOutcome {
            matched,
            remaining,
            iterations,
        })
    }

    /// Move up to `amount` underlying of `side`-side p2p balance back to
    /// the pool view, touching at most `max_iterations` counterparties,
    /// smallest p2p balance first. `still_owed` reports the shortfall the
    /// caller must absorb through a hard unmatch.
    pub fn unmatch_liquidity(
        market: &mut Market,
        side: Side,
        amount: U256,
        max_iterations: u64,
    ) -> Result<UnmatchOutcome> {
        let pool_index = market.pool_index(side);
        let p2p_index = market.p2p_index(side);

        let mut remaining = amount;
        let mut freed = U256::ZERO;
        let mut iterations = 0u64;

        while !remaining.is_zero() && iterations < max_iterations {
            let Some((user, _)) = market.in_p2p_index_mut(side).extract_smallest() else {
                break;
            };
            iterations += 1;

            let pos = market.positions_mut(side).entry(user).or_default();
            let available = p2p_units_to_underlying(pos.in_p2p, p2p_index)?;
            if available.is_zero() {
                continue;
            }

            let slice = remaining.min(available);
            pos.in_p2p = pos
                .in_p2p
                .checked_sub(underlying_to_p2p_units(slice, p2p_index)?)
                .ok_or(EngineError::MathOverflow)?;
            pos.on_pool = pos
                .on_pool
                .checked_add(underlying_to_pool_units(slice, pool_index)?)
                .ok_or(EngineError::MathOverflow)?;
            market.reindex_user(user, side);

            freed = freed.checked_add(slice).ok_or(EngineError::MathOverflow)?;
            remaining -= slice;
        }

        Ok(UnmatchOutcome {
            freed,
            still_owed: remaining,
            iterations,
        })
    }
}
