//! Pool adapter interface.
//!
//! The engine never talks to the external pooled lending protocol
//! directly; everything goes through this trait. Rates and indexes are
//! RAY-scaled, amounts are in underlying.

use crate::errors::{EngineError, Result};
use crate::types::MarketId;
use crate::units::RAY;
use alloy_primitives::U256;
use std::collections::HashMap;

/// External pooled lending protocol, one set of operations per market
pub trait PoolAdapter {
    fn supply_rate_per_block(&self, market: MarketId) -> Result<U256>;
    fn borrow_rate_per_block(&self, market: MarketId) -> Result<U256>;
    fn supply_index(&self, market: MarketId) -> Result<U256>;
    fn borrow_index(&self, market: MarketId) -> Result<U256>;

    /// Deposit underlying into the pool
    fn deposit(&mut self, market: MarketId, amount: U256) -> Result<()>;
    /// Redeem underlying from the pool
    fn withdraw(&mut self, market: MarketId, amount: U256) -> Result<()>;
    /// Take a variable-rate loan from the pool
    fn borrow(&mut self, market: MarketId, amount: U256) -> Result<()>;
    /// Repay pool debt
    fn repay(&mut self, market: MarketId, amount: U256) -> Result<()>;
}

/// Deterministic in-memory pool used in tests and simulations.
/// Rates and indexes are set explicitly; liquidity is finite so
/// `InsufficientLiquidity` paths can be exercised.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPool {
    markets: HashMap<MarketId, PoolMarket>,
}

#[derive(Debug, Clone)]
pub struct PoolMarket {
    pub supply_rate_per_block: U256,
    pub borrow_rate_per_block: U256,
    pub supply_index: U256,
    pub borrow_index: U256,
    /// Underlying available for withdraw/borrow
    pub liquidity: U256,
    pub total_deposits: U256,
    pub total_borrows: U256,
}

impl Default for PoolMarket {
    fn default() -> Self {
        Self {
            supply_rate_per_block: U256::ZERO,
            borrow_rate_per_block: U256::ZERO,
            supply_index: RAY,
            borrow_index: RAY,
            liquidity: U256::ZERO,
            total_deposits: U256::ZERO,
            total_borrows: U256::ZERO,
        }
    }
}

impl InMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_market(&mut self, market: MarketId) {
        self.markets.entry(market).or_default();
    }

    pub fn set_rates(&mut self, market: MarketId, supply: U256, borrow: U256) {
        let m = self.markets.entry(market).or_default();
        m.supply_rate_per_block = supply;
        m.borrow_rate_per_block = borrow;
    }

    pub fn set_indexes(&mut self, market: MarketId, supply: U256, borrow: U256) {
        let m = self.markets.entry(market).or_default();
        m.supply_index = supply;
        m.borrow_index = borrow;
    }

    /// Seed withdrawable/borrowable liquidity
    pub fn set_liquidity(&mut self, market: MarketId, amount: U256) {
        self.markets.entry(market).or_default().liquidity = amount;
    }

    pub fn market(&self, market: MarketId) -> Option<&PoolMarket> {
        self.markets.get(&market)
    }

    fn get(&self, market: MarketId) -> Result<&PoolMarket> {
        self.markets
            .get(&market)
            .ok_or_else(|| EngineError::PoolAdapter(format!("unknown market {}", market.0)))
    }

    fn get_mut(&mut self, market: MarketId) -> Result<&mut PoolMarket> {
        self.markets
            .get_mut(&market)
            .ok_or_else(|| EngineError::PoolAdapter(format!("unknown market {}", market.0)))
    }
}

impl PoolAdapter for InMemoryPool {
    fn supply_rate_per_block(&self, market: MarketId) -> Result<U256> {
        Ok(self.get(market)?.supply_rate_per_block)
    }

    fn borrow_rate_per_block(&self, market: MarketId) -> Result<U256> {
        Ok(self.get(market)?.borrow_rate_per_block)
    }

    fn supply_index(&self, market: MarketId) -> Result<U256> {
        Ok(self.get(market)?.supply_index)
    }

    fn borrow_index(&self, market: MarketId) -> Result<U256> {
        Ok(self.get(market)?.borrow_index)
    }

    fn deposit(&mut self, market: MarketId, amount: U256) -> Result<()> {
        let m = self.get_mut(market)?;
        m.liquidity = m
            .liquidity
            .checked_add(amount)
            .ok_or(EngineError::MathOverflow)?;
        m.total_deposits = m
            .total_deposits
            .checked_add(amount)
            .ok_or(EngineError::MathOverflow)?;
        Ok(())
    }

    fn withdraw(&mut self, market: MarketId, amount: U256) -> Result<()> {
        let m = self.get_mut(market)?;
        if m.liquidity < amount {
            return Err(EngineError::InsufficientLiquidity);
        }
        m.liquidity -= amount;
        m.total_deposits = m.total_deposits.saturating_sub(amount);
        Ok(())
    }

    fn borrow(&mut self, market: MarketId, amount: U256) -> Result<()> {
        let m = self.get_mut(market)?;
        if m.liquidity < amount {
            return Err(EngineError::InsufficientLiquidity);
        }
        m.liquidity -= amount;
        m.total_borrows = m
            .total_borrows
            .checked_add(amount)
            .ok_or(EngineError::MathOverflow)?;
        Ok(())
    }

    fn repay(&mut self, market: MarketId, amount: U256) -> Result<()> {
        let m = self.get_mut(market)?;
        m.liquidity = m
            .liquidity
            .checked_add(amount)
            .ok_or(EngineError::MathOverflow)?;
        m.total_borrows = m.total_borrows.saturating_sub(amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MKT: MarketId = MarketId(1);

    #[test]
    fn test_unknown_market() {
        let pool = InMemoryPool::new();
        assert!(matches!(
            pool.supply_index(MKT),
            Err(EngineError::PoolAdapter(_))
        ));
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let mut pool = InMemoryPool::new();
        pool.add_market(MKT);

        pool.deposit(MKT, U256::from(100)).unwrap();
        assert_eq!(pool.market(MKT).unwrap().liquidity, U256::from(100));

        pool.withdraw(MKT, U256::from(40)).unwrap();
        assert_eq!(pool.market(MKT).unwrap().liquidity, U256::from(60));
    }

    #[test]
    fn test_withdraw_beyond_liquidity() {
        let mut pool = InMemoryPool::new();
        pool.add_market(MKT);
        pool.deposit(MKT, U256::from(10)).unwrap();

        assert_eq!(
            pool.withdraw(MKT, U256::from(11)),
            Err(EngineError::InsufficientLiquidity)
        );
    }

    #[test]
    fn test_borrow_and_repay() {
        let mut pool = InMemoryPool::new();
        pool.add_market(MKT);
        pool.set_liquidity(MKT, U256::from(100));

        pool.borrow(MKT, U256::from(70)).unwrap();
        let m = pool.market(MKT).unwrap();
        assert_eq!(m.liquidity, U256::from(30));
        assert_eq!(m.total_borrows, U256::from(70));

        pool.repay(MKT, U256::from(70)).unwrap();
        let m = pool.market(MKT).unwrap();
        assert_eq!(m.liquidity, U256::from(100));
        assert_eq!(m.total_borrows, U256::ZERO);
    }

    #[test]
    fn test_default_indexes_are_ray() {
        let mut pool = InMemoryPool::new();
        pool.add_market(MKT);
        assert_eq!(pool.supply_index(MKT).unwrap(), RAY);
        assert_eq!(pool.borrow_index(MKT).unwrap(), RAY);
    }
}
