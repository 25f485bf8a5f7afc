//! Price/risk oracle interface.
//!
//! Collateral pricing is delegated entirely to this collaborator: the
//! ledger only compares the values it reports. Prices, factors and the
//! liquidation parameters are RAY-scaled.

use crate::errors::{EngineError, Result};
use crate::types::MarketId;
use crate::units::RAY;
use alloy_primitives::{Address, U256};
use std::collections::HashMap;

/// External price and risk parameter source
pub trait RiskOracle {
    /// Price of one unit of the market's underlying, RAY-scaled
    fn price(&self, market: MarketId) -> Result<U256>;
    /// Fraction of supplied value usable as collateral, RAY-scaled
    fn collateral_factor(&self, market: MarketId) -> Result<U256>;
    /// Bonus multiplier applied to seized collateral, RAY-scaled
    fn liquidation_incentive(&self) -> U256;
    /// Maximum fraction of debt repayable per liquidation, RAY-scaled
    fn close_factor(&self) -> U256;
    /// (borrowing power, debt value) for a user, both factor-adjusted
    fn account_liquidity(&self, user: Address) -> Result<(U256, U256)>;
}

/// In-memory oracle with explicitly set values, for tests and simulations
#[derive(Debug, Clone)]
pub struct StaticOracle {
    prices: HashMap<MarketId, U256>,
    collateral_factors: HashMap<MarketId, U256>,
    liquidation_incentive: U256,
    close_factor: U256,
    accounts: HashMap<Address, (U256, U256)>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            collateral_factors: HashMap::new(),
            // 8% seize bonus, 50% close factor
            liquidation_incentive: RAY + RAY / U256::from(100) * U256::from(8),
            close_factor: RAY / U256::from(2),
            accounts: HashMap::new(),
        }
    }

    pub fn set_price(&mut self, market: MarketId, price: U256) {
        self.prices.insert(market, price);
    }

    pub fn set_collateral_factor(&mut self, market: MarketId, factor: U256) {
        self.collateral_factors.insert(market, factor);
    }

    pub fn set_liquidation_incentive(&mut self, incentive: U256) {
        self.liquidation_incentive = incentive;
    }

    pub fn set_close_factor(&mut self, factor: U256) {
        self.close_factor = factor;
    }

    pub fn set_account_liquidity(&mut self, user: Address, collateral: U256, debt: U256) {
        self.accounts.insert(user, (collateral, debt));
    }
}

impl Default for StaticOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskOracle for StaticOracle {
    fn price(&self, market: MarketId) -> Result<U256> {
        self.prices
            .get(&market)
            .copied()
            .ok_or(EngineError::MarketNotListed)
    }

    fn collateral_factor(&self, market: MarketId) -> Result<U256> {
        self.collateral_factors
            .get(&market)
            .copied()
            .ok_or(EngineError::MarketNotListed)
    }

    fn liquidation_incentive(&self) -> U256 {
        self.liquidation_incentive
    }

    fn close_factor(&self) -> U256 {
        self.close_factor
    }

    fn account_liquidity(&self, user: Address) -> Result<(U256, U256)> {
        Ok(self
            .accounts
            .get(&user)
            .copied()
            .unwrap_or((U256::ZERO, U256::ZERO)))
    }
}
