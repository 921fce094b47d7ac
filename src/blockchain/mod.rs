//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! proof_ref (tx hash)
//!     → ledger.rs (PaymentLedger: receipt, depth, transfer fields)
//!     → client.rs (RPC connection with timeouts and failover)
//! ```
//!
//! # Constraints
//! - Read-only: the engine verifies payments, it never sends transactions
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when blockchain unreachable

pub mod client;
pub mod ledger;
pub mod types;

pub use client::BlockchainClient;
pub use ledger::{EvmLedger, PaymentLedger, UnavailableLedger};
pub use types::{BlockchainConfig, BlockchainError, ChainId, LedgerObservation, ObservedTransfer};
