//! Position ledger: the single owner of all market, position and
//! counterparty-index state.
//!
//! Every user-facing operation enters here, refreshes the market's
//! indexes, moves liquidity between the on-pool and p2p views through
//! the matching engine, sends any unmatched remainder to the pool
//! adapter, and updates positions. Each public operation is atomic: a
//! clone of the pre-state is held aside and restored wholesale on any
//! error, and a reentrancy flag rejects nested entry.

use crate::errors::{EngineError, Result};
use crate::indexes::IndexUpdater;
use crate::matching::MatchingEngine;
use crate::pool::PoolAdapter;
use crate::risk::RiskOracle;
use crate::sorted_index::SortedIndex;
use crate::types::{MarketId, MarketState, OperationKind, Position, Side, ENGINE_ACCOUNT};
use crate::units::{
    p2p_units_to_underlying, pool_units_to_underlying, ray_mul, underlying_to_p2p_units,
    underlying_to_pool_units,
};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Account allowed to call the admin surface
    pub owner: Address,
    /// Maximum counterparties touched per match/unmatch call (NMAX)
    pub matching_cap: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            owner: Address::ZERO,
            matching_cap: 16,
        }
    }
}

/// One market: accounting state, positions per side, and the four
/// balance-ordered counterparty indexes (on-pool and in-p2p, per side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub state: MarketState,
    pub(crate) supply_positions: HashMap<Address, Position>,
    pub(crate) borrow_positions: HashMap<Address, Position>,
    pub(crate) suppliers_on_pool: SortedIndex,
    pub(crate) suppliers_in_p2p: SortedIndex,
    pub(crate) borrowers_on_pool: SortedIndex,
    pub(crate) borrowers_in_p2p: SortedIndex,
}

impl Market {
    pub fn new(block: u64) -> Self {
        Self {
            state: MarketState::new(block),
            supply_positions: HashMap::new(),
            borrow_positions: HashMap::new(),
            suppliers_on_pool: SortedIndex::new(),
            suppliers_in_p2p: SortedIndex::new(),
            borrowers_on_pool: SortedIndex::new(),
            borrowers_in_p2p: SortedIndex::new(),
        }
    }

    pub fn position(&self, user: &Address, side: Side) -> Position {
        let positions = match side {
            Side::Supply => &self.supply_positions,
            Side::Borrow => &self.borrow_positions,
        };
        positions.get(user).copied().unwrap_or_default()
    }

    pub(crate) fn positions_mut(&mut self, side: Side) -> &mut HashMap<Address, Position> {
        match side {
            Side::Supply => &mut self.supply_positions,
            Side::Borrow => &mut self.borrow_positions,
        }
    }

    pub(crate) fn on_pool_index_mut(&mut self, side: Side) -> &mut SortedIndex {
        match side {
            Side::Supply => &mut self.suppliers_on_pool,
            Side::Borrow => &mut self.borrowers_on_pool,
        }
    }

    pub(crate) fn in_p2p_index_mut(&mut self, side: Side) -> &mut SortedIndex {
        match side {
            Side::Supply => &mut self.suppliers_in_p2p,
            Side::Borrow => &mut self.borrowers_in_p2p,
        }
    }

    pub(crate) fn pool_index(&self, side: Side) -> U256 {
        match side {
            Side::Supply => self.state.pool_supply_index,
            Side::Borrow => self.state.pool_borrow_index,
        }
    }

    pub(crate) fn p2p_index(&self, side: Side) -> U256 {
        match side {
            Side::Supply => self.state.p2p_supply_index,
            Side::Borrow => self.state.p2p_borrow_index,
        }
    }

    /// Underlying-equivalent total of a user's position on one side
    pub fn total_balance(&self, user: &Address, side: Side) -> Result<U256> {
        let pos = self.position(user, side);
        let on_pool = pool_units_to_underlying(pos.on_pool, self.pool_index(side))?;
        let in_p2p = p2p_units_to_underlying(pos.in_p2p, self.p2p_index(side))?;
        on_pool.checked_add(in_p2p).ok_or(EngineError::MathOverflow)
    }

    /// Recompute both index entries for a user from their raw unit
    /// balances and prune the position record once it is fully zero.
    /// All entries of one index scale by the same exchange index, so
    /// raw units order exactly like current underlying values and keys
    /// never go stale as the index grows.
    pub(crate) fn reindex_user(&mut self, user: Address, side: Side) {
        let pos = self.position(&user, side);
        self.on_pool_index_mut(side).upsert(user, pos.on_pool);
        self.in_p2p_index_mut(side).upsert(user, pos.in_p2p);
        if pos.is_zero() {
            self.positions_mut(side).remove(&user);
        }
    }

    /// Underlying-equivalent sums of all p2p supply and p2p borrow
    /// balances; these match within rounding tolerance (conservation)
    pub fn p2p_totals(&self) -> Result<(U256, U256)> {
        let mut supply = U256::ZERO;
        for pos in self.supply_positions.values() {
            supply = supply
                .checked_add(p2p_units_to_underlying(pos.in_p2p, self.state.p2p_supply_index)?)
                .ok_or(EngineError::MathOverflow)?;
        }
        let mut borrow = U256::ZERO;
        for pos in self.borrow_positions.values() {
            borrow = borrow
                .checked_add(p2p_units_to_underlying(pos.in_p2p, self.state.p2p_borrow_index)?)
                .ok_or(EngineError::MathOverflow)?;
        }
        Ok((supply, borrow))
    }
}

/// The full mutable ledger state, cloned for atomic rollback and
/// serialized for checkpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub markets: HashMap<MarketId, Market>,
}

/// The position ledger
pub struct PositionLedger {
    config: LedgerConfig,
    state: LedgerState,
    locked: bool,
}

impl PositionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            state: LedgerState::default(),
            locked: false,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // --- atomicity -------------------------------------------------------

    pub(crate) fn begin(&mut self) -> Result<LedgerState> {
        if self.locked {
            return Err(EngineError::Reentrant);
        }
        self.locked = true;
        Ok(self.state.clone())
    }

    pub(crate) fn commit(&mut self) {
        self.locked = false;
    }

    pub(crate) fn rollback(&mut self, saved: LedgerState) {
        self.state = saved;
        self.locked = false;
    }

    // --- admin surface ---------------------------------------------------

    fn authorize(&self, caller: Address) -> Result<()> {
        if caller != self.config.owner {
            return Err(EngineError::Unauthorized);
        }
        Ok(())
    }

    pub fn list_market(&mut self, caller: Address, market: MarketId, block: u64) -> Result<()> {
        self.authorize(caller)?;
        if self.state.markets.contains_key(&market) {
            return Err(EngineError::MarketAlreadyListed);
        }
        self.state.markets.insert(market, Market::new(block));
        info!(market = market.0, block, "market listed");
        Ok(())
    }

    pub fn set_threshold(&mut self, caller: Address, market: MarketId, value: U256) -> Result<()> {
        self.authorize(caller)?;
        self.market_mut(market)?.state.supply_threshold = value;
        Ok(())
    }

    pub fn set_borrow_cap(&mut self, caller: Address, market: MarketId, value: U256) -> Result<()> {
        self.authorize(caller)?;
        self.market_mut(market)?.state.borrow_cap = value;
        Ok(())
    }

    pub fn set_matching_cap(&mut self, caller: Address, cap: u64) -> Result<()> {
        self.authorize(caller)?;
        self.config.matching_cap = cap;
        Ok(())
    }

    pub fn set_pause(
        &mut self,
        caller: Address,
        market: MarketId,
        op: OperationKind,
        paused: bool,
    ) -> Result<()> {
        self.authorize(caller)?;
        self.market_mut(market)?.state.paused.set(op, paused);
        Ok(())
    }

    // --- views -----------------------------------------------------------

    pub fn market_state(&self, market: MarketId) -> Result<&MarketState> {
        self.market(market).map(|m| &m.state)
    }

    pub fn position_of(&self, user: &Address, market: MarketId, side: Side) -> Result<Position> {
        Ok(self.market(market)?.position(user, side))
    }

    pub fn total_balance(&self, user: &Address, market: MarketId, side: Side) -> Result<U256> {
        self.market(market)?.total_balance(user, side)
    }

    pub fn p2p_totals(&self, market: MarketId) -> Result<(U256, U256)> {
        self.market(market)?.p2p_totals()
    }

    fn market(&self, market: MarketId) -> Result<&Market> {
        self.state
            .markets
            .get(&market)
            .filter(|m| m.state.listed)
            .ok_or(EngineError::MarketNotListed)
    }

    pub(crate) fn market_mut(&mut self, market: MarketId) -> Result<&mut Market> {
        self.state
            .markets
            .get_mut(&market)
            .filter(|m| m.state.listed)
            .ok_or(EngineError::MarketNotListed)
    }

    // --- snapshots -------------------------------------------------------

    pub fn snapshot(&self) -> LedgerState {
        self.state.clone()
    }

    pub fn restore(&mut self, state: LedgerState) {
        self.state = state;
    }

    // --- public operations -----------------------------------------------

    /// Refresh a market's pool snapshot and p2p indexes up to `block`
    pub fn refresh_indices(
        &mut self,
        market: MarketId,
        pool: &mut dyn PoolAdapter,
        block: u64,
    ) -> Result<(U256, U256)> {
        let saved = self.begin()?;
        let result = match self.market_mut(market) {
            Ok(m) => IndexUpdater::refresh(&mut m.state, pool, market, block),
            Err(e) => Err(e),
        };
        match result {
            Ok(out) => {
                self.commit();
                Ok(out)
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    /// Supply `amount` underlying on behalf of `user`
    pub fn supply(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        block: u64,
    ) -> Result<()> {
        let saved = self.begin()?;
        match self.supply_inner(user, market, amount, pool, block) {
            Ok(()) => {
                self.commit();
                Ok(())
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    fn supply_inner(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        block: u64,
    ) -> Result<()> {
        let cap = self.config.matching_cap;
        let m = self.market_mut(market)?;
        if m.state.paused.is_paused(OperationKind::Supply) {
            return Err(EngineError::MarketPaused(OperationKind::Supply));
        }
        if amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        if amount < m.state.supply_threshold {
            return Err(EngineError::BelowThreshold);
        }

        IndexUpdater::refresh(&mut m.state, pool, market, block)?;

        // Matched borrowers leave the pool: their debt is repaid with the
        // supplier's funds. The remainder is deposited on pool.
        let out = MatchingEngine::match_liquidity(m, Side::Borrow, amount, cap)?;
        if !out.matched.is_zero() {
            pool.repay(market, out.matched)?;
        }
        if !out.remaining.is_zero() {
            pool.deposit(market, out.remaining)?;
        }

        let pool_units = underlying_to_pool_units(out.remaining, m.state.pool_supply_index)?;
        let p2p_units = underlying_to_p2p_units(out.matched, m.state.p2p_supply_index)?;
        let pos = m.supply_positions.entry(user).or_default();
        pos.on_pool = pos
            .on_pool
            .checked_add(pool_units)
            .ok_or(EngineError::MathOverflow)?;
        pos.in_p2p = pos
            .in_p2p
            .checked_add(p2p_units)
            .ok_or(EngineError::MathOverflow)?;
        m.reindex_user(user, Side::Supply);

        info!(
            user = %user,
            market = market.0,
            amount = %amount,
            matched = %out.matched,
            to_pool = %out.remaining,
            "supply"
        );
        Ok(())
    }

    /// Borrow `amount` underlying on behalf of `user`
    pub fn borrow(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        oracle: &dyn RiskOracle,
        block: u64,
    ) -> Result<()> {
        let saved = self.begin()?;
        match self.borrow_inner(user, market, amount, pool, oracle, block) {
            Ok(()) => {
                self.commit();
                Ok(())
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    fn borrow_inner(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        oracle: &dyn RiskOracle,
        block: u64,
    ) -> Result<()> {
        let cap = self.config.matching_cap;
        let m = self.market_mut(market)?;
        if m.state.paused.is_paused(OperationKind::Borrow) {
            return Err(EngineError::MarketPaused(OperationKind::Borrow));
        }
        if amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }

        IndexUpdater::refresh(&mut m.state, pool, market, block)?;

        if !m.state.borrow_cap.is_zero() {
            let new_total = m
                .state
                .total_borrow
                .checked_add(amount)
                .ok_or(EngineError::MathOverflow)?;
            if new_total > m.state.borrow_cap {
                return Err(EngineError::AboveCap);
            }
        }

        // Borrowing power is delegated to the risk collaborator
        let (power, debt) = oracle.account_liquidity(user)?;
        let borrow_value = ray_mul(amount, oracle.price(market)?)?;
        if debt
            .checked_add(borrow_value)
            .ok_or(EngineError::MathOverflow)?
            > power
        {
            return Err(EngineError::InsufficientCollateral);
        }

        // Matched suppliers leave the pool: their deposits are redeemed to
        // fund the borrower. The remainder is borrowed from the pool.
        let out = MatchingEngine::match_liquidity(m, Side::Supply, amount, cap)?;
        if !out.matched.is_zero() {
            pool.withdraw(market, out.matched)?;
        }
        if !out.remaining.is_zero() {
            pool.borrow(market, out.remaining)?;
        }

        let pool_units = underlying_to_pool_units(out.remaining, m.state.pool_borrow_index)?;
        let p2p_units = underlying_to_p2p_units(out.matched, m.state.p2p_borrow_index)?;
        let pos = m.borrow_positions.entry(user).or_default();
        pos.on_pool = pos
            .on_pool
            .checked_add(pool_units)
            .ok_or(EngineError::MathOverflow)?;
        pos.in_p2p = pos
            .in_p2p
            .checked_add(p2p_units)
            .ok_or(EngineError::MathOverflow)?;
        m.reindex_user(user, Side::Borrow);
        m.state.total_borrow = m
            .state
            .total_borrow
            .checked_add(amount)
            .ok_or(EngineError::MathOverflow)?;

        info!(
            user = %user,
            market = market.0,
            amount = %amount,
            matched = %out.matched,
            from_pool = %out.remaining,
            "borrow"
        );
        Ok(())
    }

    /// Withdraw `amount` underlying of `user`'s supply balance
    pub fn withdraw(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        block: u64,
    ) -> Result<()> {
        let saved = self.begin()?;
        match self.withdraw_inner(user, market, amount, pool, block) {
            Ok(()) => {
                self.commit();
                Ok(())
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    fn withdraw_inner(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        block: u64,
    ) -> Result<()> {
        let cap = self.config.matching_cap;
        let m = self.market_mut(market)?;
        if m.state.paused.is_paused(OperationKind::Withdraw) {
            return Err(EngineError::MarketPaused(OperationKind::Withdraw));
        }
        if amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }

        IndexUpdater::refresh(&mut m.state, pool, market, block)?;

        let pos = m.position(&user, Side::Supply);
        let on_pool_underlying = pool_units_to_underlying(pos.on_pool, m.state.pool_supply_index)?;
        let total = m.total_balance(&user, Side::Supply)?;
        if amount > total {
            return Err(EngineError::InsufficientBalance);
        }

        // On-pool first: direct redemption
        let from_pool = amount.min(on_pool_underlying);
        if !from_pool.is_zero() {
            pool.withdraw(market, from_pool)?;
            let pool_units = underlying_to_pool_units(from_pool, m.state.pool_supply_index)?;
            let pos = m.supply_positions.entry(user).or_default();
            pos.on_pool = pos
                .on_pool
                .checked_sub(pool_units)
                .ok_or(EngineError::MathOverflow)?;
        }

        let shortfall = amount - from_pool;
        if !shortfall.is_zero() {
            let p2p_units = underlying_to_p2p_units(shortfall, m.state.p2p_supply_index)?;
            let pos = m.supply_positions.entry(user).or_default();
            pos.in_p2p = pos
                .in_p2p
                .checked_sub(p2p_units)
                .ok_or(EngineError::MathOverflow)?;

            // Displace matched borrowers back to the pool; whatever the
            // iteration cap leaves over becomes the engine's obligation.
            let out = MatchingEngine::unmatch_liquidity(m, Side::Borrow, shortfall, cap)?;
            pool.borrow(market, shortfall)?;
            if !out.still_owed.is_zero() {
                Self::hard_unmatch_supply(m, out.still_owed)?;
            }
            debug!(
                market = market.0,
                freed = %out.freed,
                hard = %out.still_owed,
                "withdraw unmatch"
            );
        }
        m.reindex_user(user, Side::Supply);

        info!(user = %user, market = market.0, amount = %amount, "withdraw");
        Ok(())
    }

    /// Repay `amount` underlying of `user`'s borrow balance
    pub fn repay(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        block: u64,
    ) -> Result<()> {
        let saved = self.begin()?;
        match self.repay_inner(user, market, amount, pool, block) {
            Ok(()) => {
                self.commit();
                Ok(())
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    fn repay_inner(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
        block: u64,
    ) -> Result<()> {
        let m = self.market_mut(market)?;
        if m.state.paused.is_paused(OperationKind::Repay) {
            return Err(EngineError::MarketPaused(OperationKind::Repay));
        }
        if amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }

        IndexUpdater::refresh(&mut m.state, pool, market, block)?;

        let total = m.total_balance(&user, Side::Borrow)?;
        if amount > total {
            return Err(EngineError::InsufficientBalance);
        }

        self.apply_repay(user, market, amount, pool)?;

        let m = self.market_mut(market)?;
        m.state.total_borrow = m.state.total_borrow.saturating_sub(amount);

        info!(user = %user, market = market.0, amount = %amount, "repay");
        Ok(())
    }

    /// Repay mechanics shared by `repay` and `liquidate`: pool debt
    /// first, then the p2p debt via unmatch of the matched suppliers.
    /// The caller has already validated `amount` against the debt.
    pub(crate) fn apply_repay(
        &mut self,
        user: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
    ) -> Result<()> {
        let cap = self.config.matching_cap;
        let m = self.market_mut(market)?;

        let pos = m.position(&user, Side::Borrow);
        let on_pool_underlying = pool_units_to_underlying(pos.on_pool, m.state.pool_borrow_index)?;

        let to_pool = amount.min(on_pool_underlying);
        if !to_pool.is_zero() {
            pool.repay(market, to_pool)?;
            let pool_units = underlying_to_pool_units(to_pool, m.state.pool_borrow_index)?;
            let pos = m.borrow_positions.entry(user).or_default();
            pos.on_pool = pos
                .on_pool
                .checked_sub(pool_units)
                .ok_or(EngineError::MathOverflow)?;
        }

        let shortfall = amount - to_pool;
        if !shortfall.is_zero() {
            let p2p_units = underlying_to_p2p_units(shortfall, m.state.p2p_borrow_index)?;
            let pos = m.borrow_positions.entry(user).or_default();
            pos.in_p2p = pos
                .in_p2p
                .checked_sub(p2p_units)
                .ok_or(EngineError::MathOverflow)?;

            // Matched suppliers return to the pool; their funds (and the
            // hard-unmatch portion, deposited on their behalf) go back in.
            let out = MatchingEngine::unmatch_liquidity(m, Side::Supply, shortfall, cap)?;
            pool.deposit(market, shortfall)?;
            if !out.still_owed.is_zero() {
                Self::hard_unmatch_borrow(m, out.still_owed)?;
            }
            debug!(
                market = market.0,
                freed = %out.freed,
                hard = %out.still_owed,
                "repay unmatch"
            );
        }
        m.reindex_user(user, Side::Borrow);
        Ok(())
    }

    /// Hard unmatch on the supply side: the engine replaces the displaced
    /// supplier in the match, taking a p2p supply claim against the still
    /// matched borrowers and an equal on-pool borrow obligation. Both are
    /// regular positions and can be matched or unmatched later.
    pub(crate) fn hard_unmatch_supply(m: &mut Market, amount: U256) -> Result<()> {
        let p2p_units = underlying_to_p2p_units(amount, m.state.p2p_supply_index)?;
        let pos = m.supply_positions.entry(ENGINE_ACCOUNT).or_default();
        pos.in_p2p = pos
            .in_p2p
            .checked_add(p2p_units)
            .ok_or(EngineError::MathOverflow)?;
        m.reindex_user(ENGINE_ACCOUNT, Side::Supply);

        let pool_units = underlying_to_pool_units(amount, m.state.pool_borrow_index)?;
        let pos = m.borrow_positions.entry(ENGINE_ACCOUNT).or_default();
        pos.on_pool = pos
            .on_pool
            .checked_add(pool_units)
            .ok_or(EngineError::MathOverflow)?;
        m.reindex_user(ENGINE_ACCOUNT, Side::Borrow);
        Ok(())
    }

    /// Hard unmatch on the borrow side: the engine takes over the p2p
    /// debt and holds the deposited funds as an on-pool supply position.
    fn hard_unmatch_borrow(m: &mut Market, amount: U256) -> Result<()> {
        let p2p_units = underlying_to_p2p_units(amount, m.state.p2p_borrow_index)?;
        let pos = m.borrow_positions.entry(ENGINE_ACCOUNT).or_default();
        pos.in_p2p = pos
            .in_p2p
            .checked_add(p2p_units)
            .ok_or(EngineError::MathOverflow)?;
        m.reindex_user(ENGINE_ACCOUNT, Side::Borrow);

        let pool_units = underlying_to_pool_units(amount, m.state.pool_supply_index)?;
        let pos = m.supply_positions.entry(ENGINE_ACCOUNT).or_default();
        pos.on_pool = pos
            .on_pool
            .checked_add(pool_units)
            .ok_or(EngineError::MathOverflow)?;
        m.reindex_user(ENGINE_ACCOUNT, Side::Supply);
        Ok(())
    }

    pub(crate) fn matching_cap(&self) -> u64 {
        self.config.matching_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::InMemoryPool;
    use crate::risk::StaticOracle;
    use crate::units::RAY;

    const MKT: MarketId = MarketId(1);

    fn addr(n: u8) -> Address {
        Address::from([n; 20])
    }

    fn setup() -> (PositionLedger, InMemoryPool, StaticOracle) {
        let mut ledger = PositionLedger::new(LedgerConfig::default());
        ledger.list_market(Address::ZERO, MKT, 0).unwrap();

        let mut pool = InMemoryPool::new();
        pool.add_market(MKT);

        let mut oracle = StaticOracle::new();
        oracle.set_price(MKT, RAY);

        (ledger, pool, oracle)
    }

    fn with_collateral(oracle: &mut StaticOracle, user: Address) {
        oracle.set_account_liquidity(user, U256::from(1_000_000u64), U256::ZERO);
    }

    #[test]
    fn test_supply_no_borrowers_goes_on_pool() {
        // Scenario A: no borrowers, everything lands on pool
        let (mut ledger, mut pool, _) = setup();
        let user = addr(1);

        ledger.supply(user, MKT, U256::from(10), &mut pool, 1).unwrap();

        let pos = ledger.position_of(&user, MKT, Side::Supply).unwrap();
        assert_eq!(pos.on_pool, U256::from(10)); // index is RAY
        assert_eq!(pos.in_p2p, U256::ZERO);
        assert_eq!(pool.market(MKT).unwrap().liquidity, U256::from(10));
    }

    #[test]
    fn test_supply_rejects_zero_amount() {
        let (mut ledger, mut pool, _) = setup();
        assert_eq!(
            ledger.supply(addr(1), MKT, U256::ZERO, &mut pool, 1),
            Err(EngineError::ZeroAmount)
        );
    }

    #[test]
    fn test_supply_threshold_boundary() {
        let (mut ledger, mut pool, _) = setup();
        ledger.set_threshold(Address::ZERO, MKT, U256::from(10)).unwrap();

        assert_eq!(
            ledger.supply(addr(1), MKT, U256::from(9), &mut pool, 1),
            Err(EngineError::BelowThreshold)
        );
        assert!(ledger.supply(addr(1), MKT, U256::from(10), &mut pool, 1).is_ok());
    }

    #[test]
    fn test_supply_paused() {
        let (mut ledger, mut pool, _) = setup();
        ledger
            .set_pause(Address::ZERO, MKT, OperationKind::Supply, true)
            .unwrap();

        assert_eq!(
            ledger.supply(addr(1), MKT, U256::from(10), &mut pool, 1),
            Err(EngineError::MarketPaused(OperationKind::Supply))
        );
    }

    #[test]
    fn test_unknown_market() {
        let (mut ledger, mut pool, _) = setup();
        assert_eq!(
            ledger.supply(addr(1), MarketId(99), U256::from(10), &mut pool, 1),
            Err(EngineError::MarketNotListed)
        );
    }

    #[test]
    fn test_borrow_matches_supplier_fully() {
        // Scenario B: borrower is matched against the waiting supplier
        let (mut ledger, mut pool, mut oracle) = setup();
        let supplier = addr(1);
        let borrower = addr(2);
        with_collateral(&mut oracle, borrower);

        ledger.supply(supplier, MKT, U256::from(10), &mut pool, 1).unwrap();
        ledger
            .borrow(borrower, MKT, U256::from(10), &mut pool, &oracle, 1)
            .unwrap();

        let sup = ledger.position_of(&supplier, MKT, Side::Supply).unwrap();
        assert_eq!(sup.on_pool, U256::ZERO);
        assert_eq!(sup.in_p2p, U256::from(10));

        let bor = ledger.position_of(&borrower, MKT, Side::Borrow).unwrap();
        assert_eq!(bor.on_pool, U256::ZERO);
        assert_eq!(bor.in_p2p, U256::from(10));

        let (p2p_supply, p2p_borrow) = ledger.p2p_totals(MKT).unwrap();
        assert_eq!(p2p_supply, p2p_borrow);
    }

    #[test]
    fn test_borrow_insufficient_collateral() {
        let (mut ledger, mut pool, oracle) = setup();
        pool.set_liquidity(MKT, U256::from(100));

        assert_eq!(
            ledger.borrow(addr(1), MKT, U256::from(10), &mut pool, &oracle, 1),
            Err(EngineError::InsufficientCollateral)
        );
    }

    #[test]
    fn test_borrow_cap() {
        let (mut ledger, mut pool, mut oracle) = setup();
        pool.set_liquidity(MKT, U256::from(1000));
        with_collateral(&mut oracle, addr(1));
        ledger.set_borrow_cap(Address::ZERO, MKT, U256::from(50)).unwrap();

        assert!(ledger
            .borrow(addr(1), MKT, U256::from(30), &mut pool, &oracle, 1)
            .is_ok());
        assert_eq!(
            ledger.borrow(addr(1), MKT, U256::from(30), &mut pool, &oracle, 1),
            Err(EngineError::AboveCap)
        );
    }

    #[test]
    fn test_supply_matches_waiting_borrower() {
        let (mut ledger, mut pool, mut oracle) = setup();
        pool.set_liquidity(MKT, U256::from(100));
        let borrower = addr(2);
        with_collateral(&mut oracle, borrower);

        ledger
            .borrow(borrower, MKT, U256::from(40), &mut pool, &oracle, 1)
            .unwrap();
        assert_eq!(
            ledger.position_of(&borrower, MKT, Side::Borrow).unwrap().on_pool,
            U256::from(40)
        );

        ledger.supply(addr(1), MKT, U256::from(40), &mut pool, 2).unwrap();

        let bor = ledger.position_of(&borrower, MKT, Side::Borrow).unwrap();
        assert_eq!(bor.on_pool, U256::ZERO);
        assert_eq!(bor.in_p2p, U256::from(40));
        let sup = ledger.position_of(&addr(1), MKT, Side::Supply).unwrap();
        assert_eq!(sup.in_p2p, U256::from(40));
    }

    #[test]
    fn test_withdraw_on_pool_only() {
        let (mut ledger, mut pool, _) = setup();
        let user = addr(1);
        ledger.supply(user, MKT, U256::from(100), &mut pool, 1).unwrap();

        ledger.withdraw(user, MKT, U256::from(60), &mut pool, 2).unwrap();

        let pos = ledger.position_of(&user, MKT, Side::Supply).unwrap();
        assert_eq!(pos.on_pool, U256::from(40));
        assert_eq!(pool.market(MKT).unwrap().liquidity, U256::from(40));
    }

    #[test]
    fn test_withdraw_more_than_balance() {
        let (mut ledger, mut pool, _) = setup();
        ledger.supply(addr(1), MKT, U256::from(100), &mut pool, 1).unwrap();

        assert_eq!(
            ledger.withdraw(addr(1), MKT, U256::from(101), &mut pool, 2),
            Err(EngineError::InsufficientBalance)
        );
    }

    #[test]
    fn test_withdraw_unmatches_borrowers() {
        let (mut ledger, mut pool, mut oracle) = setup();
        let supplier = addr(1);
        let borrower = addr(2);
        with_collateral(&mut oracle, borrower);

        ledger.supply(supplier, MKT, U256::from(50), &mut pool, 1).unwrap();
        ledger
            .borrow(borrower, MKT, U256::from(50), &mut pool, &oracle, 1)
            .unwrap();
        // Seed pool liquidity so the unmatch borrow can be funded
        pool.set_liquidity(MKT, U256::from(100));

        ledger.withdraw(supplier, MKT, U256::from(50), &mut pool, 2).unwrap();

        let sup = ledger.position_of(&supplier, MKT, Side::Supply).unwrap();
        assert!(sup.is_zero());
        // Borrower is back on pool
        let bor = ledger.position_of(&borrower, MKT, Side::Borrow).unwrap();
        assert_eq!(bor.on_pool, U256::from(50));
        assert_eq!(bor.in_p2p, U256::ZERO);

        let (p2p_supply, p2p_borrow) = ledger.p2p_totals(MKT).unwrap();
        assert_eq!(p2p_supply, U256::ZERO);
        assert_eq!(p2p_borrow, U256::ZERO);
    }

    #[test]
    fn test_withdraw_hard_unmatch_engages_engine() {
        // Cap of 1 counterparty per call
        let mut ledger = PositionLedger::new(LedgerConfig {
            owner: Address::ZERO,
            matching_cap: 1,
        });
        ledger.list_market(Address::ZERO, MKT, 0).unwrap();
        let mut pool = InMemoryPool::new();
        pool.add_market(MKT);
        let mut oracle = StaticOracle::new();
        oracle.set_price(MKT, RAY);

        let supplier = addr(1);
        with_collateral(&mut oracle, addr(2));
        with_collateral(&mut oracle, addr(3));

        ledger.supply(supplier, MKT, U256::from(100), &mut pool, 1).unwrap();
        ledger
            .borrow(addr(2), MKT, U256::from(50), &mut pool, &oracle, 1)
            .unwrap();
        ledger
            .borrow(addr(3), MKT, U256::from(50), &mut pool, &oracle, 1)
            .unwrap();
        pool.set_liquidity(MKT, U256::from(200));

        // Unmatch can only displace one borrower; the engine absorbs the rest
        ledger.withdraw(supplier, MKT, U256::from(100), &mut pool, 2).unwrap();

        let eng_supply = ledger
            .position_of(&ENGINE_ACCOUNT, MKT, Side::Supply)
            .unwrap();
        let eng_borrow = ledger
            .position_of(&ENGINE_ACCOUNT, MKT, Side::Borrow)
            .unwrap();
        assert_eq!(eng_supply.in_p2p, U256::from(50));
        assert_eq!(eng_borrow.on_pool, U256::from(50));

        // Conservation still holds
        let (p2p_supply, p2p_borrow) = ledger.p2p_totals(MKT).unwrap();
        assert_eq!(p2p_supply, p2p_borrow);
    }

    #[test]
    fn test_repay_on_pool_first() {
        let (mut ledger, mut pool, mut oracle) = setup();
        pool.set_liquidity(MKT, U256::from(100));
        let borrower = addr(1);
        with_collateral(&mut oracle, borrower);

        ledger
            .borrow(borrower, MKT, U256::from(80), &mut pool, &oracle, 1)
            .unwrap();
        ledger.repay(borrower, MKT, U256::from(30), &mut pool, 2).unwrap();

        let pos = ledger.position_of(&borrower, MKT, Side::Borrow).unwrap();
        assert_eq!(pos.on_pool, U256::from(50));
        assert_eq!(
            ledger.market_state(MKT).unwrap().total_borrow,
            U256::from(50)
        );
    }

    #[test]
    fn test_repay_unmatches_suppliers() {
        let (mut ledger, mut pool, mut oracle) = setup();
        let supplier = addr(1);
        let borrower = addr(2);
        with_collateral(&mut oracle, borrower);

        ledger.supply(supplier, MKT, U256::from(60), &mut pool, 1).unwrap();
        ledger
            .borrow(borrower, MKT, U256::from(60), &mut pool, &oracle, 1)
            .unwrap();

        ledger.repay(borrower, MKT, U256::from(60), &mut pool, 2).unwrap();

        let bor = ledger.position_of(&borrower, MKT, Side::Borrow).unwrap();
        assert!(bor.is_zero());
        // Supplier is back on pool and the funds are in the pool again
        let sup = ledger.position_of(&supplier, MKT, Side::Supply).unwrap();
        assert_eq!(sup.on_pool, U256::from(60));
        assert_eq!(sup.in_p2p, U256::ZERO);
        assert_eq!(pool.market(MKT).unwrap().liquidity, U256::from(60));
    }

    #[test]
    fn test_repay_more_than_debt() {
        let (mut ledger, mut pool, mut oracle) = setup();
        pool.set_liquidity(MKT, U256::from(100));
        with_collateral(&mut oracle, addr(1));
        ledger
            .borrow(addr(1), MKT, U256::from(20), &mut pool, &oracle, 1)
            .unwrap();

        assert_eq!(
            ledger.repay(addr(1), MKT, U256::from(21), &mut pool, 2),
            Err(EngineError::InsufficientBalance)
        );
    }

    #[test]
    fn test_failed_operation_rolls_back() {
        let (mut ledger, mut pool, mut oracle) = setup();
        let supplier = addr(1);
        let borrower = addr(2);
        with_collateral(&mut oracle, borrower);

        ledger.supply(supplier, MKT, U256::from(50), &mut pool, 1).unwrap();
        ledger
            .borrow(borrower, MKT, U256::from(50), &mut pool, &oracle, 1)
            .unwrap();

        // Pool has no liquidity to fund the unmatch borrow, so the
        // withdraw fails after internal mutations; all must be undone.
        let before = ledger.position_of(&supplier, MKT, Side::Supply).unwrap();
        assert_eq!(
            ledger.withdraw(supplier, MKT, U256::from(50), &mut pool, 2),
            Err(EngineError::InsufficientLiquidity)
        );
        let after = ledger.position_of(&supplier, MKT, Side::Supply).unwrap();
        assert_eq!(before, after);
        let (p2p_supply, p2p_borrow) = ledger.p2p_totals(MKT).unwrap();
        assert_eq!(p2p_supply, p2p_borrow);
    }

    #[test]
    fn test_reentrancy_guard() {
        let (mut ledger, mut pool, _) = setup();
        ledger.locked = true;
        assert_eq!(
            ledger.supply(addr(1), MKT, U256::from(10), &mut pool, 1),
            Err(EngineError::Reentrant)
        );
        // The failed call must not clear a lock it does not own
        assert!(ledger.locked);
    }

    #[test]
    fn test_lock_released_after_operation() {
        let (mut ledger, mut pool, _) = setup();
        ledger.supply(addr(1), MKT, U256::from(10), &mut pool, 1).unwrap();
        assert!(!ledger.locked);

        let _ = ledger.supply(addr(1), MKT, U256::ZERO, &mut pool, 1);
        assert!(!ledger.locked);
    }

    #[test]
    fn test_admin_requires_owner() {
        let (mut ledger, _, _) = setup();
        assert_eq!(
            ledger.set_threshold(addr(9), MKT, U256::from(5)),
            Err(EngineError::Unauthorized)
        );
        assert_eq!(
            ledger.list_market(addr(9), MarketId(2), 0),
            Err(EngineError::Unauthorized)
        );
    }

    #[test]
    fn test_list_market_twice() {
        let (mut ledger, _, _) = setup();
        assert_eq!(
            ledger.list_market(Address::ZERO, MKT, 0),
            Err(EngineError::MarketAlreadyListed)
        );
    }

    #[test]
    fn test_set_matching_cap() {
        let (mut ledger, _, _) = setup();
        ledger.set_matching_cap(Address::ZERO, 2).unwrap();
        assert_eq!(ledger.config().matching_cap, 2);
    }

    #[test]
    fn test_refresh_indices_idempotent_via_ledger() {
        let (mut ledger, mut pool, _) = setup();
        pool.set_rates(MKT, RAY / U256::from(1000), RAY / U256::from(500));

        let first = ledger.refresh_indices(MKT, &mut pool, 5).unwrap();
        let second = ledger.refresh_indices(MKT, &mut pool, 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let (mut ledger, mut pool, _) = setup();
        ledger.supply(addr(1), MKT, U256::from(77), &mut pool, 1).unwrap();

        let snapshot = ledger.snapshot();
        ledger.withdraw(addr(1), MKT, U256::from(77), &mut pool, 2).unwrap();
        assert!(ledger
            .position_of(&addr(1), MKT, Side::Supply)
            .unwrap()
            .is_zero());

        ledger.restore(snapshot);
        assert_eq!(
            ledger.position_of(&addr(1), MKT, Side::Supply).unwrap().on_pool,
            U256::from(77)
        );
    }
}
