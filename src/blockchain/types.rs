//! Chain-specific types and error definitions.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use thiserror::Error;

// Re-export BlockchainConfig from config module to avoid duplication
pub use crate::config::schema::BlockchainConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, Clone, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// Blockchain client not initialized or disabled.
    #[error("Blockchain not available: {0}")]
    NotAvailable(String),

    /// The proof reference is not a transaction hash.
    #[error("Invalid proof reference '{0}'")]
    InvalidProof(String),
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// A value transfer read back from a mined, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedTransfer {
    pub payer: Address,
    pub recipient: Address,
    pub amount: U256,
    pub block_number: u64,
}

/// What the ledger currently says about a proof of payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerObservation {
    /// Unknown to the node (not broadcast yet, or still propagating).
    NotFound,
    /// Mined or in mempool, but not deep enough yet.
    Confirming { confirmations: u64, required: u64 },
    /// Mined and reverted, or not a plain value transfer.
    Failed { detail: String },
    /// Mined, successful and final.
    Confirmed(ObservedTransfer),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(1u64);
        assert_eq!(chain_id.0, 1);
        assert_eq!(u64::from(chain_id), 1);
    }

    #[test]
    fn test_default_config() {
        let config = BlockchainConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.rpc_timeout_secs, 10);
        assert_eq!(config.confirmation_blocks, 3);
    }

    #[test]
    fn test_error_display() {
        let err = BlockchainError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");

        let err = BlockchainError::ChainMismatch {
            expected: 1,
            actual: 5,
        };
        assert!(err.to_string().contains("expected 1"));
    }
}
