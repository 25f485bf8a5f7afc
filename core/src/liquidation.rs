//! Liquidation of undercollateralized borrowers.
//!
//! A liquidator repays part of a borrower's debt in one market and
//! seizes a bonus-weighted amount of the borrower's supply balance in
//! another. Debt reduction reuses the repay mechanics; collateral is
//! seized as pool shares, transferred directly where the borrower holds
//! them on pool and reconstructed through the unmatch path where the
//! balance sits in p2p.

use crate::errors::{EngineError, Result};
use crate::indexes::IndexUpdater;
use crate::matching::MatchingEngine;
use crate::pool::PoolAdapter;
use crate::risk::RiskOracle;
use crate::types::{MarketId, OperationKind, Side};
use crate::units::{
    pool_units_to_underlying, ray_div, ray_mul, underlying_to_p2p_units, underlying_to_pool_units,
};
use alloy_primitives::{Address, U256};
use tracing::info;

use crate::ledger::PositionLedger;

/// Outcome of a successful liquidation, amounts in underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationReceipt {
    /// Debt repaid in the borrowed market
    pub repaid: U256,
    /// Collateral seized in the collateral market, bonus included
    pub seized: U256,
}

impl PositionLedger {
    /// Liquidate `borrower` by repaying `repay_amount` of their debt in
    /// `borrowed_market` and seizing collateral from their supply
    /// balance in `collateral_market`.
    #[allow(clippy::too_many_arguments)]
    pub fn liquidate(
        &mut self,
        liquidator: Address,
        borrower: Address,
        borrowed_market: MarketId,
        collateral_market: MarketId,
        repay_amount: U256,
        pool: &mut dyn PoolAdapter,
        oracle: &dyn RiskOracle,
        block: u64,
    ) -> Result<LiquidationReceipt> {
        let saved = self.begin()?;
        match self.liquidate_inner(
            liquidator,
            borrower,
            borrowed_market,
            collateral_market,
            repay_amount,
            pool,
            oracle,
            block,
        ) {
            Ok(receipt) => {
                self.commit();
                Ok(receipt)
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn liquidate_inner(
        &mut self,
        liquidator: Address,
        borrower: Address,
        borrowed_market: MarketId,
        collateral_market: MarketId,
        repay_amount: U256,
        pool: &mut dyn PoolAdapter,
        oracle: &dyn RiskOracle,
        block: u64,
    ) -> Result<LiquidationReceipt> {
        {
            let m = self.market_mut(borrowed_market)?;
            if m.state.paused.is_paused(OperationKind::Liquidate) {
                return Err(EngineError::MarketPaused(OperationKind::Liquidate));
            }
            if repay_amount.is_zero() {
                return Err(EngineError::ZeroAmount);
            }
            IndexUpdater::refresh(&mut m.state, pool, borrowed_market, block)?;
        }
        if collateral_market != borrowed_market {
            let m = self.market_mut(collateral_market)?;
            IndexUpdater::refresh(&mut m.state, pool, collateral_market, block)?;
        }

        let (power, debt) = oracle.account_liquidity(borrower)?;
        if debt <= power {
            return Err(EngineError::NotLiquidatable);
        }

        let total_debt = self.total_balance(&borrower, borrowed_market, Side::Borrow)?;
        let max_repay = ray_mul(total_debt, oracle.close_factor())?;
        if repay_amount > max_repay {
            return Err(EngineError::ExceedsCloseFactor);
        }

        // Seized value = repaid value plus the liquidation bonus,
        // expressed in the collateral market's underlying
        let repaid_value = ray_mul(repay_amount, oracle.price(borrowed_market)?)?;
        let seized = ray_mul(
            ray_div(repaid_value, oracle.price(collateral_market)?)?,
            oracle.liquidation_incentive(),
        )?;

        let collateral = self.total_balance(&borrower, collateral_market, Side::Supply)?;
        if seized > collateral {
            return Err(EngineError::ExceedsCollateral);
        }

        self.apply_repay(borrower, borrowed_market, repay_amount, pool)?;
        {
            let m = self.market_mut(borrowed_market)?;
            m.state.total_borrow = m.state.total_borrow.saturating_sub(repay_amount);
        }

        self.seize_collateral(borrower, liquidator, collateral_market, seized, pool)?;

        info!(
            liquidator = %liquidator,
            borrower = %borrower,
            borrowed = borrowed_market.0,
            collateral = collateral_market.0,
            repaid = %repay_amount,
            seized = %seized,
            "liquidate"
        );
        Ok(LiquidationReceipt {
            repaid: repay_amount,
            seized,
        })
    }

    /// Move `amount` underlying of the borrower's supply balance to the
    /// liquidator as on-pool shares. The on-pool part is a direct share
    /// transfer; the p2p part displaces matched borrowers back to the
    /// pool (hard unmatch past the iteration cap) and deposits the
    /// raised funds under the liquidator's name.
    fn seize_collateral(
        &mut self,
        borrower: Address,
        liquidator: Address,
        market: MarketId,
        amount: U256,
        pool: &mut dyn PoolAdapter,
    ) -> Result<()> {
        let cap = self.matching_cap();
        let m = self.market_mut(market)?;

        let pos = m.position(&borrower, Side::Supply);
        let on_pool_underlying = pool_units_to_underlying(pos.on_pool, m.state.pool_supply_index)?;

        let from_pool = amount.min(on_pool_underlying);
        if !from_pool.is_zero() {
            let units = underlying_to_pool_units(from_pool, m.state.pool_supply_index)?;
            let pos = m.positions_mut(Side::Supply).entry(borrower).or_default();
            pos.on_pool = pos
                .on_pool
                .checked_sub(units)
                .ok_or(EngineError::MathOverflow)?;
            let pos = m.positions_mut(Side::Supply).entry(liquidator).or_default();
            pos.on_pool = pos
                .on_pool
                .checked_add(units)
                .ok_or(EngineError::MathOverflow)?;
        }

        let shortfall = amount - from_pool;
        if !shortfall.is_zero() {
            let p2p_units = underlying_to_p2p_units(shortfall, m.state.p2p_supply_index)?;
            let pos = m.positions_mut(Side::Supply).entry(borrower).or_default();
            pos.in_p2p = pos
                .in_p2p
                .checked_sub(p2p_units)
                .ok_or(EngineError::MathOverflow)?;

            let out = MatchingEngine::unmatch_liquidity(m, Side::Borrow, shortfall, cap)?;
            pool.borrow(market, shortfall)?;
            pool.deposit(market, shortfall)?;
            if !out.still_owed.is_zero() {
                Self::hard_unmatch_supply(m, out.still_owed)?;
            }

            let units = underlying_to_pool_units(shortfall, m.state.pool_supply_index)?;
            let pos = m.positions_mut(Side::Supply).entry(liquidator).or_default();
            pos.on_pool = pos
                .on_pool
                .checked_add(units)
                .ok_or(EngineError::MathOverflow)?;
        }

        m.reindex_user(borrower, Side::Supply);
        m.reindex_user(liquidator, Side::Supply);
        Ok(())
    }
}
