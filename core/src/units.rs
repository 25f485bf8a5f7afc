//! Conversions between the three unit spaces: user-facing underlying
//! amounts, pool-share units and peer-to-peer units.
//!
//! All conversions round down toward the protocol's benefit, so a
//! convert-then-convert-back round trip may lose at most one unit of
//! underlying precision per conversion. That bounded dust is expected
//! and tested, not a bug.

use crate::errors::{EngineError, Result};
use alloy_primitives::U256;

/// Fixed-point scale for indexes and rates (10^27)
pub const RAY: U256 = U256::from_limbs([11515845246265065472, 54210108, 0, 0]);

/// `a * b / RAY`, floored
pub fn ray_mul(a: U256, b: U256) -> Result<U256> {
    a.checked_mul(b)
        .and_then(|p| p.checked_div(RAY))
        .ok_or(EngineError::MathOverflow)
}

/// `a * RAY / b`, floored; a zero divisor is an arithmetic error
pub fn ray_div(a: U256, b: U256) -> Result<U256> {
    if b.is_zero() {
        return Err(EngineError::MathOverflow);
    }
    a.checked_mul(RAY)
        .map(|p| p / b)
        .ok_or(EngineError::MathOverflow)
}

/// Underlying amount -> pool-share units at the given pool index
pub fn underlying_to_pool_units(amount: U256, pool_index: U256) -> Result<U256> {
    ray_div(amount, pool_index)
}

/// Pool-share units -> underlying amount at the given pool index
pub fn pool_units_to_underlying(units: U256, pool_index: U256) -> Result<U256> {
    ray_mul(units, pool_index)
}

/// Underlying amount -> peer-to-peer units at the given p2p index
pub fn underlying_to_p2p_units(amount: U256, p2p_index: U256) -> Result<U256> {
    ray_div(amount, p2p_index)
}

/// Peer-to-peer units -> underlying amount at the given p2p index
pub fn p2p_units_to_underlying(units: U256, p2p_index: U256) -> Result<U256> {
    ray_mul(units, p2p_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ray(n: u64) -> U256 {
        U256::from(n) * RAY
    }

    #[test]
    fn test_ray_constant() {
        assert_eq!(RAY, U256::from(10u8).pow(U256::from(27u8)));
    }

    #[test]
    fn test_ray_mul_div_identity() {
        let x = U256::from(1_000_000u64);
        assert_eq!(ray_mul(x, RAY).unwrap(), x);
        assert_eq!(ray_div(x, RAY).unwrap(), x);
    }

    #[test]
    fn test_conversion_at_unit_index() {
        let amount = U256::from(42u64);
        let units = underlying_to_pool_units(amount, RAY).unwrap();
        assert_eq!(units, amount);
        assert_eq!(pool_units_to_underlying(units, RAY).unwrap(), amount);
    }

    #[test]
    fn test_conversion_at_grown_index() {
        // Index of 2.0: 10 underlying buys 5 units
        let index = ray(2);
        assert_eq!(
            underlying_to_pool_units(U256::from(10), index).unwrap(),
            U256::from(5)
        );
        assert_eq!(
            pool_units_to_underlying(U256::from(5), index).unwrap(),
            U256::from(10)
        );
    }

    #[test]
    fn test_round_trip_loses_at_most_one_unit() {
        // Index 1.5: 10 underlying -> 6 units -> 9 underlying (1 unit of dust)
        let index = RAY + RAY / U256::from(2);
        let amount = U256::from(10u64);
        let units = underlying_to_pool_units(amount, index).unwrap();
        let back = pool_units_to_underlying(units, index).unwrap();
        assert!(back <= amount);
        assert!(amount - back <= U256::from(1));
    }

    #[test]
    fn test_zero_index_is_error() {
        assert_eq!(
            underlying_to_pool_units(U256::from(1), U256::ZERO),
            Err(EngineError::MathOverflow)
        );
    }

    #[test]
    fn test_mul_overflow_is_error() {
        assert_eq!(ray_mul(U256::MAX, U256::MAX), Err(EngineError::MathOverflow));
    }

    #[test]
    fn test_p2p_conversions_floor() {
        let index = ray(3);
        // 10 / 3 floors to 3 units
        assert_eq!(
            underlying_to_p2p_units(U256::from(10), index).unwrap(),
            U256::from(3)
        );
        assert_eq!(
            p2p_units_to_underlying(U256::from(3), index).unwrap(),
            U256::from(9)
        );
    }
}
