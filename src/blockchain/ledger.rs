//! Read-only view of the external payment ledger.

use alloy::consensus::Transaction as _;
use alloy::network::{ReceiptResponse as _, TransactionResponse as _};
use alloy::primitives::TxHash;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::blockchain::client::BlockchainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult, LedgerObservation, ObservedTransfer};

/// Source of truth for "was this paid".
///
/// Implementations only read; the engine never submits transactions.
pub trait PaymentLedger: Send + Sync {
    fn observe<'a>(&'a self, proof_ref: &'a str) -> BoxFuture<'a, BlockchainResult<LedgerObservation>>;

    /// The one spelling of a proof used for bindings and audit keys, so that
    /// two spellings of the same transaction can never settle two records.
    fn canonical_proof_ref(&self, proof_ref: &str) -> BlockchainResult<String> {
        let trimmed = proof_ref.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(BlockchainError::InvalidProof(proof_ref.to_string()));
        }
        Ok(format!("0x{}", digits.to_ascii_lowercase()))
    }

    /// Short name used in logs and health metrics.
    fn name(&self) -> &'static str;
}

/// EVM chain ledger backed by [`BlockchainClient`].
#[derive(Debug, Clone)]
pub struct EvmLedger {
    client: BlockchainClient,
    required_confirmations: u64,
}

impl EvmLedger {
    pub fn new(client: BlockchainClient) -> Self {
        let required_confirmations = u64::from(client.confirmation_blocks().max(1));
        Self {
            client,
            required_confirmations,
        }
    }

    async fn observe_hash(&self, tx_hash: TxHash) -> BlockchainResult<LedgerObservation> {
        let Some(receipt) = self.client.get_transaction_receipt(tx_hash).await? else {
            // Not mined. Known to the mempool counts as confirming.
            return Ok(match self.client.get_transaction_by_hash(tx_hash).await? {
                Some(_) => LedgerObservation::Confirming {
                    confirmations: 0,
                    required: self.required_confirmations,
                },
                None => LedgerObservation::NotFound,
            });
        };

        if !receipt.status() {
            return Ok(LedgerObservation::Failed {
                detail: "transaction reverted".to_string(),
            });
        }

        let Some(block_number) = receipt.block_number else {
            return Ok(LedgerObservation::Confirming {
                confirmations: 0,
                required: self.required_confirmations,
            });
        };
        let head = self.client.get_block_number().await?;
        let confirmations = head.saturating_sub(block_number) + 1;
        if confirmations < self.required_confirmations {
            return Ok(LedgerObservation::Confirming {
                confirmations,
                required: self.required_confirmations,
            });
        }

        let Some(tx) = self.client.get_transaction_by_hash(tx_hash).await? else {
            return Ok(LedgerObservation::NotFound);
        };
        let Some(recipient) = tx.to() else {
            return Ok(LedgerObservation::Failed {
                detail: "contract creation is not a payment".to_string(),
            });
        };

        Ok(LedgerObservation::Confirmed(ObservedTransfer {
            payer: tx.from(),
            recipient,
            amount: tx.value(),
            block_number,
        }))
    }
}

fn parse_tx_hash(proof_ref: &str) -> BlockchainResult<TxHash> {
    proof_ref
        .trim()
        .parse()
        .map_err(|_| BlockchainError::InvalidProof(proof_ref.to_string()))
}

impl PaymentLedger for EvmLedger {
    fn observe<'a>(&'a self, proof_ref: &'a str) -> BoxFuture<'a, BlockchainResult<LedgerObservation>> {
        async move { self.observe_hash(parse_tx_hash(proof_ref)?).await }.boxed()
    }

    /// Lowercase `0x`-prefixed hash, whatever case or prefix the client sent.
    fn canonical_proof_ref(&self, proof_ref: &str) -> BlockchainResult<String> {
        Ok(parse_tx_hash(proof_ref)?.to_string())
    }

    fn name(&self) -> &'static str {
        "evm"
    }
}

/// Stand-in used when blockchain integration is disabled. Every observation
/// is a transient error, so records stay PENDING until the sweeper fails them.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLedger;

impl PaymentLedger for UnavailableLedger {
    fn observe<'a>(&'a self, _proof_ref: &'a str) -> BoxFuture<'a, BlockchainResult<LedgerObservation>> {
        async {
            Err(BlockchainError::NotAvailable(
                "blockchain integration is disabled".to_string(),
            ))
        }
        .boxed()
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::types::BlockchainConfig;

    #[tokio::test]
    async fn test_unavailable_ledger_is_transient() {
        let err = UnavailableLedger.observe("0xabc").await.unwrap_err();
        assert!(matches!(err, BlockchainError::NotAvailable(_)));
    }

    #[tokio::test]
    async fn test_evm_ledger_rejects_malformed_proof() {
        let client = BlockchainClient::new(BlockchainConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            rpc_timeout_secs: 1,
            ..BlockchainConfig::default()
        })
        .await
        .unwrap();
        let ledger = EvmLedger::new(client);
        assert!(matches!(
            ledger.observe("not-a-hash").await,
            Err(BlockchainError::InvalidProof(_))
        ));
        assert!(matches!(
            ledger.canonical_proof_ref("0x1234"),
            Err(BlockchainError::InvalidProof(_))
        ));
    }

    #[tokio::test]
    async fn test_evm_proof_spellings_share_one_canonical_form() {
        let client = BlockchainClient::new(BlockchainConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            rpc_timeout_secs: 1,
            ..BlockchainConfig::default()
        })
        .await
        .unwrap();
        let ledger = EvmLedger::new(client);
        let lower = format!("0x{}", "ab".repeat(32));
        let upper = format!("0x{}", "AB".repeat(32));
        let bare = "Ab".repeat(32);

        assert_eq!(ledger.canonical_proof_ref(&lower).unwrap(), lower);
        assert_eq!(ledger.canonical_proof_ref(&upper).unwrap(), lower);
        assert_eq!(ledger.canonical_proof_ref(&format!("  {} ", bare)).unwrap(), lower);
    }

    #[test]
    fn test_default_canonical_form_folds_case_and_prefix() {
        let ledger = UnavailableLedger;
        assert_eq!(ledger.canonical_proof_ref(" 0XABcd ").unwrap(), "0xabcd");
        assert_eq!(ledger.canonical_proof_ref("abcd").unwrap(), "0xabcd");
        assert!(ledger.canonical_proof_ref("0x").is_err());
    }
}
