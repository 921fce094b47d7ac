//! Append-only log of verification outcomes, keyed by proof reference.

use alloy::primitives::U256;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::payments::distribution::FeeSplit;
use crate::payments::types::{SettlementTarget, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub proof_ref: String,
    pub target: SettlementTarget,
    /// `settled`, `pending` or `rejected`.
    pub outcome: String,
    pub detail: Option<String>,
    pub observed_amount: Option<U256>,
    pub fee_split: Option<FeeSplit>,
    pub recorded_at: u64,
}

/// The record and billing cycle a proof settled.
///
/// A renewed subscription keeps its id, so the cycle tells last month's
/// payment apart from this month's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBinding {
    pub target: SettlementTarget,
    #[serde(default)]
    pub cycle: u32,
}

/// Audit trail plus the proof → record bindings that stop one payment from
/// settling two records, or one record twice.
#[derive(Debug, Default)]
pub struct ProofAuditLog {
    entries: DashMap<String, Vec<AuditEntry>>,
    bindings: DashMap<String, ProofBinding>,
}

impl ProofAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `proof_ref` to `binding` and run `confirm` under the binding's
    /// lock, so a bind is never observed without its status write.
    ///
    /// Only a repeat for the same target and cycle passes an existing
    /// binding; anything else gets that binding back as the error and
    /// `confirm` is not called. A failed `confirm` on a fresh binding leaves
    /// the proof unbound.
    pub fn bind_and_confirm(
        &self,
        proof_ref: &str,
        binding: ProofBinding,
        confirm: impl FnOnce() -> EngineResult<Transition>,
    ) -> Result<EngineResult<Transition>, ProofBinding> {
        match self.bindings.entry(proof_ref.to_string()) {
            Entry::Occupied(existing) if *existing.get() == binding => Ok(confirm()),
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(vacant) => {
                let result = confirm();
                if result.is_ok() {
                    vacant.insert(binding);
                }
                Ok(result)
            }
        }
    }

    pub fn binding(&self, proof_ref: &str) -> Option<ProofBinding> {
        self.bindings.get(proof_ref).map(|b| b.value().clone())
    }

    pub fn append(&self, entry: AuditEntry) {
        self.entries
            .entry(entry.proof_ref.clone())
            .or_default()
            .push(entry);
    }

    pub fn entries_for(&self, proof_ref: &str) -> Vec<AuditEntry> {
        self.entries
            .get(proof_ref)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> (Vec<AuditEntry>, Vec<(String, ProofBinding)>) {
        let entries = self
            .entries
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        let bindings = self
            .bindings
            .iter()
            .map(|b| (b.key().clone(), b.value().clone()))
            .collect();
        (entries, bindings)
    }

    pub fn restore(&self, entries: Vec<AuditEntry>, bindings: Vec<(String, ProofBinding)>) {
        for entry in entries {
            self.append(entry);
        }
        for (proof_ref, binding) in bindings {
            self.bindings.insert(proof_ref, binding);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn bound(target: &SettlementTarget, cycle: u32) -> ProofBinding {
        ProofBinding {
            target: target.clone(),
            cycle,
        }
    }

    #[test]
    fn test_binding_is_exclusive() {
        let log = ProofAuditLog::new();
        let a = SettlementTarget::Purchase {
            purchase_id: Uuid::new_v4(),
        };
        let b = SettlementTarget::Purchase {
            purchase_id: Uuid::new_v4(),
        };
        let applied = || Ok(Transition::Applied);

        assert_eq!(log.bind_and_confirm("0x1", bound(&a, 0), applied), Ok(Ok(Transition::Applied)));
        // The same record and cycle may confirm again (racing verifications).
        assert!(log.bind_and_confirm("0x1", bound(&a, 0), applied).is_ok());
        assert_eq!(log.bind_and_confirm("0x1", bound(&b, 0), applied), Err(bound(&a, 0)));
        assert_eq!(log.binding("0x1"), Some(bound(&a, 0)));
    }

    #[test]
    fn test_binding_rejects_later_cycle_of_same_record() {
        let log = ProofAuditLog::new();
        let renewed = SettlementTarget::Subscription {
            subscription_id: Uuid::new_v4(),
        };
        let mut confirmed = 0;

        log.bind_and_confirm("0xold", bound(&renewed, 1), || {
            confirmed += 1;
            Ok(Transition::Applied)
        })
        .unwrap()
        .unwrap();
        let replay = log.bind_and_confirm("0xold", bound(&renewed, 2), || {
            confirmed += 1;
            Ok(Transition::Applied)
        });

        assert_eq!(replay, Err(bound(&renewed, 1)));
        assert_eq!(confirmed, 1);
    }

    #[test]
    fn test_failed_confirm_leaves_proof_unbound() {
        let log = ProofAuditLog::new();
        let target = SettlementTarget::Purchase {
            purchase_id: Uuid::nil(),
        };
        let result = log
            .bind_and_confirm("0x1", bound(&target, 0), || {
                Err(crate::error::EngineError::not_found("purchase", Uuid::nil()))
            })
            .unwrap();
        assert!(result.is_err());
        assert!(log.binding("0x1").is_none());
    }

    #[test]
    fn test_entries_accumulate_per_proof() {
        let log = ProofAuditLog::new();
        let target = SettlementTarget::Purchase {
            purchase_id: Uuid::nil(),
        };
        for outcome in ["pending", "settled"] {
            log.append(AuditEntry {
                proof_ref: "0x1".to_string(),
                target: target.clone(),
                outcome: outcome.to_string(),
                detail: None,
                observed_amount: None,
                fee_split: None,
                recorded_at: 1,
            });
        }
        let entries = log.entries_for("0x1");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].outcome, "settled");
        assert!(log.entries_for("0x2").is_empty());
        assert_eq!(log.len(), 2);
    }
}
