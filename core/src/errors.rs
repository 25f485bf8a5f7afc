use crate::types::OperationKind;
use thiserror::Error;

/// Engine error taxonomy. Every precondition is checked before any
/// mutation; on failure the whole operation is discarded atomically and
/// one of these variants is surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("market is not listed")]
    MarketNotListed,

    #[error("market is already listed")]
    MarketAlreadyListed,

    #[error("market is paused for {0}")]
    MarketPaused(OperationKind),

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("amount is below the market supply threshold")]
    BelowThreshold,

    #[error("operation would exceed the market borrow cap")]
    AboveCap,

    #[error("amount exceeds the user's balance")]
    InsufficientBalance,

    #[error("insufficient collateral for borrow")]
    InsufficientCollateral,

    #[error("pool cannot satisfy the requested liquidity")]
    InsufficientLiquidity,

    #[error("account is not liquidatable")]
    NotLiquidatable,

    #[error("repay amount exceeds the close factor limit")]
    ExceedsCloseFactor,

    #[error("seize amount exceeds the borrower's collateral")]
    ExceedsCollateral,

    #[error("reentrant call into the ledger")]
    Reentrant,

    #[error("caller is not authorized")]
    Unauthorized,

    #[error("arithmetic overflow or division by zero")]
    MathOverflow,

    #[error("pool adapter error: {0}")]
    PoolAdapter(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            EngineError::MarketPaused(OperationKind::Supply).to_string(),
            "market is paused for supply"
        );
        assert_eq!(
            EngineError::Reentrant.to_string(),
            "reentrant call into the ledger"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(EngineError::ZeroAmount, EngineError::ZeroAmount);
        assert_ne!(EngineError::ZeroAmount, EngineError::BelowThreshold);
    }
}
