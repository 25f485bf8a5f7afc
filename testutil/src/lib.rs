/// Testing utilities for PeerMatch
///
/// Provides:
/// - Test data generators
/// - Proptest strategies for amounts and accounts

pub mod generators;

pub use generators::*;

/// Install a tracing subscriber honoring `RUST_LOG`, once per process.
/// Call at the top of a test to see engine logs.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
