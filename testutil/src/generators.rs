/// Test data generators

use alloy_primitives::{Address, U256};
use proptest::prelude::*;
use rand::Rng;

/// Deterministic address from a single byte
pub fn addr(n: u8) -> Address {
    Address::from([n; 20])
}

/// Generate a random address
pub fn random_address() -> Address {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 20];
    rng.fill(&mut bytes[..]);
    Address::from(bytes)
}

/// Generate a random underlying amount in [1, max]
pub fn random_amount(max: u64) -> U256 {
    let mut rng = rand::thread_rng();
    U256::from(rng.gen_range(1..=max))
}

/// Tolerance for rounding dust per position round trip, in underlying
/// units. One unit per conversion pair.
pub fn dust_tolerance(round_trips: u64) -> U256 {
    U256::from(round_trips)
}

/// Proptest strategy for small nonzero underlying amounts
pub fn amount_strategy() -> impl Strategy<Value = U256> {
    (1u64..=1_000_000u64).prop_map(U256::from)
}

/// Proptest strategy for a handful of distinct test accounts
pub fn account_strategy() -> impl Strategy<Value = Address> {
    (1u8..=8u8).prop_map(addr)
}
