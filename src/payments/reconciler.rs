//! Proof-of-payment verification and settlement.
//!
//! The reconciler is the only writer of payment status. It never trusts a
//! client-supplied "paid" flag: a record becomes COMPLETED only after the
//! external ledger shows a final transfer that matches what was expected.
//! What is expected comes from the record and its creator's payee, never
//! from the request.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::blockchain::{BlockchainError, LedgerObservation, ObservedTransfer, PaymentLedger};
use crate::clock::SharedClock;
use crate::config::ReconcilerConfig;
use crate::error::{EngineError, EngineResult};
use crate::flash_sales::FlashSaleEngine;
use crate::observability::metrics;
use crate::payments::audit::{AuditEntry, ProofAuditLog, ProofBinding};
use crate::payments::distribution::{FeePolicy, FeeSplit};
use crate::payments::payees::PayeeRegistry;
use crate::payments::types::{
    FailureReason, PaymentExpectation, PaymentState, SettlementOutcome, SettlementRequest,
    SettlementTarget, Transition,
};
use crate::purchases::PurchaseBook;
use crate::resilience::backoff::calculate_backoff;
use crate::subscriptions::SubscriptionLedger;

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Retry budget, matching tolerance and collection wallet.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub deadline: Duration,
    /// Largest accepted shortfall between expected and observed amount.
    pub amount_tolerance: U256,
    pub pending_max_age_secs: u64,
    /// Recipient of every payment when set; otherwise the creator's wallet.
    pub platform_wallet: Option<Address>,
}

impl From<&ReconcilerConfig> for ReconcilerPolicy {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            deadline: Duration::from_secs(config.deadline_secs),
            amount_tolerance: U256::from(config.amount_tolerance_gwei) * U256::from(WEI_PER_GWEI),
            pending_max_age_secs: config.pending_max_age_secs,
            platform_wallet: config.platform_wallet,
        }
    }
}

impl Default for ReconcilerPolicy {
    fn default() -> Self {
        Self::from(&ReconcilerConfig::default())
    }
}

/// Terminal transition to apply to a target.
enum Verdict {
    Confirm {
        transfer: ObservedTransfer,
        fee_split: FeeSplit,
    },
    Fail(FailureReason),
}

/// The settlement-relevant facts of one record.
struct RecordTerms {
    state: PaymentState,
    creator_id: String,
    amount: U256,
    cycle: u32,
}

/// One verification of one proof against one record cycle.
struct Claim {
    proof_ref: String,
    target: SettlementTarget,
    cycle: u32,
}

pub struct PaymentReconciler {
    ledger: Arc<dyn PaymentLedger>,
    subscriptions: Arc<SubscriptionLedger>,
    sales: Arc<FlashSaleEngine>,
    purchases: Arc<PurchaseBook>,
    payees: Arc<PayeeRegistry>,
    audit: Arc<ProofAuditLog>,
    fees: FeePolicy,
    policy: ReconcilerPolicy,
    clock: SharedClock,
}

impl PaymentReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        subscriptions: Arc<SubscriptionLedger>,
        sales: Arc<FlashSaleEngine>,
        purchases: Arc<PurchaseBook>,
        payees: Arc<PayeeRegistry>,
        audit: Arc<ProofAuditLog>,
        fees: FeePolicy,
        policy: ReconcilerPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            ledger,
            subscriptions,
            sales,
            purchases,
            payees,
            audit,
            fees,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &ReconcilerPolicy {
        &self.policy
    }

    pub fn audit(&self) -> &ProofAuditLog {
        &self.audit
    }

    /// The ledger's single spelling of `proof_ref`; malformed proofs are a
    /// validation error.
    pub fn canonical_proof_ref(&self, proof_ref: &str) -> EngineResult<String> {
        if proof_ref.trim().is_empty() {
            return Err(EngineError::validation("proof reference is required"));
        }
        self.ledger
            .canonical_proof_ref(proof_ref)
            .map_err(|_| EngineError::validation(format!("invalid proof reference '{}'", proof_ref.trim())))
    }

    /// What the transfer behind `request` must look like. Recipient, amount
    /// and referrer come from the record and the payee registry.
    pub fn expectation(&self, request: &SettlementRequest) -> EngineResult<PaymentExpectation> {
        let target = self.resolve(&request.target)?;
        let terms = self.terms(&target)?;
        self.expect(request.payer, &terms)
    }

    /// User the record belongs to: subscriber, buyer or redeeming user.
    pub fn owner_of(&self, target: &SettlementTarget) -> EngineResult<String> {
        match target {
            SettlementTarget::Subscription { subscription_id } => self
                .subscriptions
                .get(*subscription_id)
                .map(|s| s.subscriber_id)
                .ok_or_else(|| EngineError::not_found("subscription", subscription_id)),
            SettlementTarget::Redemption { sale_id, user_id } => self
                .sales
                .get_redemption(*sale_id, user_id)
                .map(|r| r.user_id)
                .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id))),
            SettlementTarget::Purchase { purchase_id } => self
                .purchases
                .get(*purchase_id)
                .map(|p| p.buyer_id)
                .ok_or_else(|| EngineError::not_found("purchase", purchase_id)),
        }
    }

    /// One verification pass.
    ///
    /// A target that is already terminal returns its terminal outcome without
    /// touching the ledger. Ledger lag and transient ledger errors return
    /// `Pending` and leave the record untouched. A redemption that priced a
    /// subscription or purchase is settled through that record.
    pub async fn verify_and_settle(
        &self,
        request: &SettlementRequest,
    ) -> EngineResult<SettlementOutcome> {
        let proof_ref = self.canonical_proof_ref(&request.proof_ref)?;
        let target = self.resolve(&request.target)?;
        let terms = self.terms(&target)?;
        if let Some(outcome) = SettlementOutcome::from_terminal(&terms.state) {
            tracing::debug!(record = %target, proof_ref, "Record already terminal");
            return Ok(outcome);
        }
        let expected = self.expect(request.payer, &terms)?;
        let claim = Claim {
            proof_ref,
            target,
            cycle: terms.cycle,
        };

        let observation = match self.ledger.observe(&claim.proof_ref).await {
            Ok(observation) => observation,
            Err(BlockchainError::InvalidProof(p)) => {
                return Err(EngineError::validation(format!("invalid proof reference '{}'", p)));
            }
            Err(e) => {
                tracing::warn!(
                    record = %claim.target,
                    proof_ref = %claim.proof_ref,
                    ledger = self.ledger.name(),
                    error = %e,
                    "Ledger unavailable, payment stays pending"
                );
                return Ok(self.pending(&claim, e.to_string()));
            }
        };

        let verdict = match observation {
            LedgerObservation::NotFound => {
                return Ok(self.pending(&claim, "proof not yet visible on ledger".to_string()));
            }
            LedgerObservation::Confirming {
                confirmations,
                required,
            } => {
                return Ok(self.pending(
                    &claim,
                    format!("{}/{} confirmations", confirmations, required),
                ));
            }
            LedgerObservation::Failed { detail } => {
                Verdict::Fail(FailureReason::LedgerRejected { detail })
            }
            LedgerObservation::Confirmed(transfer) => self.match_transfer(&expected, transfer),
        };

        self.apply(&claim, verdict)
    }

    /// Verify repeatedly with exponential backoff until the record is terminal,
    /// the attempt budget is spent, or the deadline passes. The last two fail
    /// the record with `VerificationTimeout`.
    pub async fn settle_with_retry(
        &self,
        request: &SettlementRequest,
    ) -> EngineResult<SettlementOutcome> {
        let attempts = async {
            for attempt in 0..self.policy.max_attempts {
                if attempt > 0 {
                    sleep(calculate_backoff(
                        attempt,
                        self.policy.base_delay_ms,
                        self.policy.max_delay_ms,
                    ))
                    .await;
                }
                let outcome = self.verify_and_settle(request).await?;
                if !outcome.is_pending() {
                    return Ok(Some(outcome));
                }
                tracing::debug!(record = %request.target, attempt = attempt + 1, "Payment still pending");
            }
            Ok::<_, EngineError>(None)
        };

        match timeout(self.policy.deadline, attempts).await {
            Ok(Ok(Some(outcome))) => Ok(outcome),
            Ok(Err(e)) => Err(e),
            Ok(Ok(None)) | Err(_) => {
                tracing::warn!(
                    record = %request.target,
                    proof_ref = %request.proof_ref,
                    "Verification budget exhausted"
                );
                let target = self.resolve(&request.target)?;
                let claim = Claim {
                    proof_ref: self.canonical_proof_ref(&request.proof_ref)?,
                    cycle: self.terms(&target)?.cycle,
                    target,
                };
                self.apply(&claim, Verdict::Fail(FailureReason::VerificationTimeout))
            }
        }
    }

    /// Fail every PENDING record whose clock started before `now - max_age`.
    /// Returns how many records were failed.
    pub fn expire_stale_pending(&self, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.policy.pending_max_age_secs);
        let mut targets: Vec<SettlementTarget> = self
            .subscriptions
            .pending_since_before(cutoff)
            .into_iter()
            .map(|subscription_id| SettlementTarget::Subscription { subscription_id })
            .collect();
        targets.extend(
            self.sales
                .pending_redeemed_before(cutoff)
                .into_iter()
                .map(|(sale_id, user_id)| SettlementTarget::Redemption { sale_id, user_id }),
        );
        targets.extend(
            self.purchases
                .pending_since_before(cutoff)
                .into_iter()
                .map(|purchase_id| SettlementTarget::Purchase { purchase_id }),
        );

        let mut expired = 0;
        for target in targets {
            match self.fail_target(&target, FailureReason::ProofNotSubmitted) {
                Ok(Transition::Applied) => {
                    expired += 1;
                    metrics::record_settlement("expired");
                    tracing::info!(record = %target, "Stale pending payment expired");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(record = %target, error = %e, "Skipped stale record"),
            }
        }
        expired
    }

    pub fn payment_state(&self, target: &SettlementTarget) -> EngineResult<PaymentState> {
        let state = match target {
            SettlementTarget::Subscription { subscription_id } => self
                .subscriptions
                .payment_state(*subscription_id)
                .ok_or_else(|| EngineError::not_found("subscription", subscription_id)),
            SettlementTarget::Redemption { sale_id, user_id } => self
                .sales
                .get_redemption(*sale_id, user_id)
                .map(|r| r.payment)
                .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id))),
            SettlementTarget::Purchase { purchase_id } => self
                .purchases
                .get(*purchase_id)
                .map(|p| p.payment)
                .ok_or_else(|| EngineError::not_found("purchase", purchase_id)),
        }?;
        Ok(state)
    }

    /// Attached redemptions are settled through the record they priced.
    fn resolve(&self, target: &SettlementTarget) -> EngineResult<SettlementTarget> {
        if let SettlementTarget::Redemption { sale_id, user_id } = target {
            let redemption = self
                .sales
                .get_redemption(*sale_id, user_id)
                .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id)))?;
            if let Some(record) = redemption.applied_to {
                return Ok(record);
            }
        }
        Ok(target.clone())
    }

    fn terms(&self, target: &SettlementTarget) -> EngineResult<RecordTerms> {
        match target {
            SettlementTarget::Subscription { subscription_id } => {
                let row = self
                    .subscriptions
                    .get(*subscription_id)
                    .ok_or_else(|| EngineError::not_found("subscription", subscription_id))?;
                Ok(RecordTerms {
                    state: row.payment,
                    creator_id: row.creator_id,
                    amount: row.price_at_purchase,
                    cycle: row.billing_cycle,
                })
            }
            SettlementTarget::Purchase { purchase_id } => {
                let row = self
                    .purchases
                    .get(*purchase_id)
                    .ok_or_else(|| EngineError::not_found("purchase", purchase_id))?;
                Ok(RecordTerms {
                    state: row.payment,
                    creator_id: row.creator_id,
                    amount: row.price,
                    cycle: 0,
                })
            }
            SettlementTarget::Redemption { sale_id, user_id } => {
                let row = self
                    .sales
                    .get_redemption(*sale_id, user_id)
                    .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id)))?;
                let sale = self
                    .sales
                    .get_sale(*sale_id)
                    .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;
                Ok(RecordTerms {
                    state: row.payment,
                    creator_id: sale.creator_id,
                    amount: row.final_price,
                    cycle: 0,
                })
            }
        }
    }

    fn expect(&self, payer: Address, terms: &RecordTerms) -> EngineResult<PaymentExpectation> {
        let payee = self.payees.get(&terms.creator_id);
        let recipient = match (self.policy.platform_wallet, &payee) {
            (Some(platform), _) => platform,
            (None, Some(payee)) => payee.payout_wallet,
            (None, None) => self.payees.require(&terms.creator_id)?.payout_wallet,
        };
        Ok(PaymentExpectation {
            payer,
            recipient,
            amount: terms.amount,
            referrer: payee.and_then(|p| p.referrer_wallet),
        })
    }

    fn match_transfer(&self, expected: &PaymentExpectation, transfer: ObservedTransfer) -> Verdict {
        if transfer.payer != expected.payer {
            return Verdict::Fail(FailureReason::PayerMismatch {
                expected: expected.payer,
                actual: transfer.payer,
            });
        }
        if transfer.recipient != expected.recipient {
            return Verdict::Fail(FailureReason::RecipientMismatch {
                expected: expected.recipient,
                actual: transfer.recipient,
            });
        }
        if transfer.amount.saturating_add(self.policy.amount_tolerance) < expected.amount {
            return Verdict::Fail(FailureReason::AmountMismatch {
                expected: expected.amount,
                actual: transfer.amount,
            });
        }

        let fee_split = self.fees.split(transfer.amount, expected.referrer.is_some());
        Verdict::Confirm {
            transfer,
            fee_split,
        }
    }

    fn apply(&self, claim: &Claim, verdict: Verdict) -> EngineResult<SettlementOutcome> {
        let target = &claim.target;
        let proof_ref = claim.proof_ref.as_str();

        let (transition, outcome, observed_amount, fee_split) = match verdict {
            Verdict::Confirm {
                transfer,
                fee_split,
            } => {
                let binding = ProofBinding {
                    target: target.clone(),
                    cycle: claim.cycle,
                };
                let transition = match self.audit.bind_and_confirm(proof_ref, binding, || {
                    self.confirm_target(target, proof_ref)
                }) {
                    Ok(transition) => transition,
                    Err(existing) => {
                        tracing::warn!(
                            record = %target,
                            proof_ref,
                            bound_to = %existing.target,
                            bound_cycle = existing.cycle,
                            cycle = claim.cycle,
                            "Proof already settled a record"
                        );
                        return self.apply(
                            claim,
                            Verdict::Fail(FailureReason::ProofAlreadyUsed {
                                proof_ref: proof_ref.to_string(),
                            }),
                        );
                    }
                };
                (
                    transition,
                    SettlementOutcome::Settled {
                        proof_ref: Some(proof_ref.to_string()),
                    },
                    Some(transfer.amount),
                    Some(fee_split),
                )
            }
            Verdict::Fail(reason) => (
                self.fail_target(target, reason.clone()),
                SettlementOutcome::Rejected { reason },
                None,
                None,
            ),
        };

        let outcome = match transition {
            Ok(_) => outcome,
            Err(EngineError::InvalidStateTransition { from, to }) => {
                // Settled concurrently; report whatever the record holds now.
                tracing::warn!(record = %target, %from, %to, "Ignoring transition on terminal record");
                let state = self.payment_state(target)?;
                SettlementOutcome::from_terminal(&state).unwrap_or(outcome)
            }
            Err(e) => return Err(e),
        };

        self.record(claim, &outcome, observed_amount, fee_split);
        Ok(outcome)
    }

    fn pending(&self, claim: &Claim, detail: String) -> SettlementOutcome {
        let outcome = SettlementOutcome::Pending { detail };
        self.record(claim, &outcome, None, None);
        outcome
    }

    fn record(
        &self,
        claim: &Claim,
        outcome: &SettlementOutcome,
        observed_amount: Option<U256>,
        fee_split: Option<FeeSplit>,
    ) {
        let detail = match outcome {
            SettlementOutcome::Settled { .. } => None,
            SettlementOutcome::Pending { detail } => Some(detail.clone()),
            SettlementOutcome::Rejected { reason } => Some(reason.to_string()),
        };
        metrics::record_settlement(outcome.label());
        match outcome {
            SettlementOutcome::Settled { .. } => tracing::info!(
                record = %claim.target,
                proof_ref = %claim.proof_ref,
                amount = ?observed_amount,
                "Payment settled"
            ),
            SettlementOutcome::Rejected { .. } => tracing::warn!(
                record = %claim.target,
                proof_ref = %claim.proof_ref,
                reason = detail.as_deref().unwrap_or_default(),
                "Payment rejected"
            ),
            SettlementOutcome::Pending { .. } => {}
        }

        self.audit.append(AuditEntry {
            proof_ref: claim.proof_ref.clone(),
            target: claim.target.clone(),
            outcome: outcome.label().to_string(),
            detail,
            observed_amount,
            fee_split,
            recorded_at: self.clock.now(),
        });
    }

    /// Redemption that priced a subscription or purchase, as (sale, user).
    fn linked_redemption(&self, target: &SettlementTarget) -> Option<(Uuid, String)> {
        match target {
            SettlementTarget::Subscription { subscription_id } => self
                .subscriptions
                .get(*subscription_id)
                .and_then(|s| s.flash_sale_id.map(|sale_id| (sale_id, s.subscriber_id))),
            SettlementTarget::Purchase { purchase_id } => self
                .purchases
                .get(*purchase_id)
                .and_then(|p| p.flash_sale_id.map(|sale_id| (sale_id, p.buyer_id))),
            SettlementTarget::Redemption { .. } => None,
        }
    }

    /// Confirm `target`, then the redemption that priced it with the same
    /// proof.
    fn confirm_target(
        &self,
        target: &SettlementTarget,
        proof_ref: &str,
    ) -> EngineResult<Transition> {
        let transition = match target {
            SettlementTarget::Subscription { subscription_id } => {
                self.subscriptions.confirm_payment(*subscription_id, proof_ref)
            }
            SettlementTarget::Redemption { sale_id, user_id } => {
                self.sales.confirm_redemption(*sale_id, user_id, proof_ref)
            }
            SettlementTarget::Purchase { purchase_id } => {
                self.purchases.confirm_payment(*purchase_id, proof_ref)
            }
        }?;
        if let Some((sale_id, user_id)) = self.linked_redemption(target) {
            if let Err(e) = self.sales.confirm_redemption(sale_id, &user_id, proof_ref) {
                tracing::warn!(record = %target, sale_id = %sale_id, error = %e, "Linked redemption not confirmed");
            }
        }
        Ok(transition)
    }

    /// Fail `target`, then release the redemption that priced it.
    fn fail_target(
        &self,
        target: &SettlementTarget,
        reason: FailureReason,
    ) -> EngineResult<Transition> {
        let transition = match target {
            SettlementTarget::Subscription { subscription_id } => {
                self.subscriptions.fail_payment(*subscription_id, reason.clone())
            }
            SettlementTarget::Redemption { sale_id, user_id } => {
                self.sales.fail_redemption(*sale_id, user_id, reason.clone())
            }
            SettlementTarget::Purchase { purchase_id } => {
                self.purchases.fail_payment(*purchase_id, reason.clone())
            }
        }?;
        if let Some((sale_id, user_id)) = self.linked_redemption(target) {
            if let Err(e) = self.sales.fail_redemption(sale_id, &user_id, reason) {
                tracing::warn!(record = %target, sale_id = %sale_id, error = %e, "Linked redemption not released");
            }
        }
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::flash_sales::{SaleConfig, SaleRules, SaleScope};
    use crate::payments::payees::CreatorPayee;
    use crate::payments::types::PaymentStatus;
    use crate::tiers::Tier;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const START: u64 = 1_700_000_000;
    const DAY: u64 = 24 * 3600;

    #[derive(Default)]
    struct MapLedger {
        proofs: Mutex<HashMap<String, LedgerObservation>>,
    }

    impl MapLedger {
        fn set(&self, proof: &str, observation: LedgerObservation) {
            self.proofs
                .lock()
                .unwrap()
                .insert(proof.to_string(), observation);
        }
    }

    impl PaymentLedger for MapLedger {
        fn observe<'a>(
            &'a self,
            proof_ref: &'a str,
        ) -> BoxFuture<'a, Result<LedgerObservation, BlockchainError>> {
            async move {
                if proof_ref == "0xdown" {
                    return Err(BlockchainError::Rpc("connection refused".to_string()));
                }
                Ok(self
                    .proofs
                    .lock()
                    .unwrap()
                    .get(proof_ref)
                    .cloned()
                    .unwrap_or(LedgerObservation::NotFound))
            }
            .boxed()
        }

        fn name(&self) -> &'static str {
            "map"
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        ledger: Arc<MapLedger>,
        subscriptions: Arc<SubscriptionLedger>,
        sales: Arc<FlashSaleEngine>,
        reconciler: PaymentReconciler,
    }

    fn fixture() -> Fixture {
        fixture_with(ReconcilerPolicy::default())
    }

    fn fixture_with(policy: ReconcilerPolicy) -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let ledger = Arc::new(MapLedger::default());
        let subscriptions = Arc::new(SubscriptionLedger::new(clock.clone(), 30 * DAY));
        let sales = Arc::new(FlashSaleEngine::new(clock.clone(), SaleRules::default()));
        let purchases = Arc::new(PurchaseBook::new(clock.clone()));
        let payees = Arc::new(PayeeRegistry::new());
        payees
            .register(CreatorPayee {
                creator_id: "creator".to_string(),
                payout_wallet: creator_wallet(),
                referrer_wallet: None,
            })
            .unwrap();
        let policy = ReconcilerPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            deadline: Duration::from_secs(5),
            ..policy
        };
        let reconciler = PaymentReconciler::new(
            ledger.clone(),
            subscriptions.clone(),
            sales.clone(),
            purchases,
            payees,
            Arc::new(ProofAuditLog::new()),
            FeePolicy::default(),
            policy,
            clock.clone(),
        );
        Fixture {
            clock,
            ledger,
            subscriptions,
            sales,
            reconciler,
        }
    }

    fn payer() -> Address {
        Address::repeat_byte(0x11)
    }

    fn creator_wallet() -> Address {
        Address::repeat_byte(0x22)
    }

    fn price() -> U256 {
        U256::from(150_000_000_000_000_000u64)
    }

    fn transfer_to(recipient: Address, amount: U256) -> LedgerObservation {
        LedgerObservation::Confirmed(ObservedTransfer {
            payer: payer(),
            recipient,
            amount,
            block_number: 100,
        })
    }

    fn transfer(amount: U256) -> LedgerObservation {
        transfer_to(creator_wallet(), amount)
    }

    fn settle(proof: &str, target: SettlementTarget) -> SettlementRequest {
        SettlementRequest {
            proof_ref: proof.to_string(),
            payer: payer(),
            target,
        }
    }

    fn request(f: &Fixture, proof: &str) -> SettlementRequest {
        let sub = f
            .subscriptions
            .subscribe("fan", "creator", Tier::Premium, price(), "ETH")
            .unwrap();
        settle(
            proof,
            SettlementTarget::Subscription {
                subscription_id: sub.id,
            },
        )
    }

    fn half_price_sale(f: &Fixture) -> Uuid {
        f.sales
            .create_sale(SaleConfig {
                creator_id: "creator".to_string(),
                scope: SaleScope::Subscription { tier: None },
                discount_percent: 50,
                start_at: START,
                end_at: START + DAY,
                max_redemptions: Some(1),
                title: None,
            })
            .unwrap()
            .id
    }

    fn rejection(outcome: SettlementOutcome) -> FailureReason {
        match outcome {
            SettlementOutcome::Rejected { reason } => reason,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_matching_proof_settles() {
        let f = fixture();
        let req = request(&f, "0xok");
        f.ledger.set("0xok", transfer(price()));

        let outcome = f.reconciler.verify_and_settle(&req).await.unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::Settled {
                proof_ref: Some("0xok".to_string())
            }
        );
        assert!(f.subscriptions.is_entitled("fan", "creator"));

        let audit = f.reconciler.audit().entries_for("0xok");
        assert_eq!(audit.len(), 1);
        let split = audit[0].fee_split.unwrap();
        assert_eq!(split.creator + split.platform, price());
    }

    #[tokio::test]
    async fn test_reverify_terminal_record_is_noop() {
        let f = fixture();
        let req = request(&f, "0xok");
        f.ledger.set("0xok", transfer(price()));
        f.reconciler.verify_and_settle(&req).await.unwrap();
        let settled = f.subscriptions.find("fan", "creator").unwrap();

        f.clock.advance(60);
        f.ledger.set("0xok", LedgerObservation::Failed { detail: "reorg".into() });
        let again = f.reconciler.verify_and_settle(&req).await.unwrap();
        assert!(matches!(again, SettlementOutcome::Settled { .. }));
        assert_eq!(f.subscriptions.find("fan", "creator").unwrap(), settled);
    }

    #[tokio::test]
    async fn test_lag_and_outage_stay_pending() {
        let f = fixture();
        let req = request(&f, "0xlag");
        assert!(f.reconciler.verify_and_settle(&req).await.unwrap().is_pending());

        f.ledger.set(
            "0xlag",
            LedgerObservation::Confirming {
                confirmations: 1,
                required: 3,
            },
        );
        assert!(f.reconciler.verify_and_settle(&req).await.unwrap().is_pending());

        let down = SettlementRequest {
            proof_ref: "0xdown".to_string(),
            ..req.clone()
        };
        assert!(f.reconciler.verify_and_settle(&down).await.unwrap().is_pending());
        assert_eq!(
            f.subscriptions.find("fan", "creator").unwrap().payment_status(),
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_mismatches_fail_the_record() {
        let cases = [
            (
                LedgerObservation::Confirmed(ObservedTransfer {
                    payer: Address::repeat_byte(0x99),
                    recipient: creator_wallet(),
                    amount: price(),
                    block_number: 1,
                }),
                "payer",
            ),
            (transfer_to(Address::repeat_byte(0x99), price()), "recipient"),
            (transfer(U256::from(1u64)), "amount"),
            (
                LedgerObservation::Failed {
                    detail: "transaction reverted".into(),
                },
                "ledger rejected",
            ),
        ];

        for (observation, expected) in cases {
            let f = fixture();
            let req = request(&f, "0xbad");
            f.ledger.set("0xbad", observation);
            let reason = rejection(f.reconciler.verify_and_settle(&req).await.unwrap());
            assert!(reason.to_string().contains(expected), "{}", reason);
            assert!(!f.subscriptions.is_entitled("fan", "creator"));
        }
    }

    #[tokio::test]
    async fn test_amount_within_tolerance_settles() {
        let f = fixture();
        let req = request(&f, "0xshort");
        let shortfall = f.reconciler.policy().amount_tolerance;
        f.ledger.set("0xshort", transfer(price() - shortfall));
        assert!(matches!(
            f.reconciler.verify_and_settle(&req).await.unwrap(),
            SettlementOutcome::Settled { .. }
        ));
    }

    #[tokio::test]
    async fn test_recipient_and_amount_come_from_the_record() {
        let f = fixture();
        let req = request(&f, "0xself");
        let expected = f.reconciler.expectation(&req).unwrap();
        assert_eq!(expected.recipient, creator_wallet());
        assert_eq!(expected.amount, price());
        assert_eq!(expected.payer, payer());

        // Paying oneself proves nothing.
        f.ledger.set("0xself", transfer_to(payer(), price()));
        assert!(matches!(
            rejection(f.reconciler.verify_and_settle(&req).await.unwrap()),
            FailureReason::RecipientMismatch { actual, .. } if actual == payer()
        ));
    }

    #[tokio::test]
    async fn test_platform_wallet_collects_every_payment() {
        let platform = Address::repeat_byte(0x77);
        let f = fixture_with(ReconcilerPolicy {
            platform_wallet: Some(platform),
            ..ReconcilerPolicy::default()
        });
        let req = request(&f, "0xdirect");
        assert_eq!(f.reconciler.expectation(&req).unwrap().recipient, platform);

        f.ledger.set("0xdirect", transfer(price()));
        assert!(matches!(
            rejection(f.reconciler.verify_and_settle(&req).await.unwrap()),
            FailureReason::RecipientMismatch { expected, .. } if expected == platform
        ));

        let again = request_for(&f, "fan2", "0xplatform");
        f.ledger.set("0xplatform", transfer_to(platform, price()));
        assert!(matches!(
            f.reconciler.verify_and_settle(&again).await.unwrap(),
            SettlementOutcome::Settled { .. }
        ));
    }

    fn request_for(f: &Fixture, fan: &str, proof: &str) -> SettlementRequest {
        let sub = f
            .subscriptions
            .subscribe(fan, "creator", Tier::Premium, price(), "ETH")
            .unwrap();
        settle(
            proof,
            SettlementTarget::Subscription {
                subscription_id: sub.id,
            },
        )
    }

    #[tokio::test]
    async fn test_creator_without_payee_cannot_settle() {
        let f = fixture();
        let sub = f
            .subscriptions
            .subscribe("fan", "unknown-creator", Tier::Basic, price(), "ETH")
            .unwrap();
        let req = settle(
            "0xok",
            SettlementTarget::Subscription {
                subscription_id: sub.id,
            },
        );
        f.ledger.set("0xok", transfer(price()));
        assert!(matches!(
            f.reconciler.verify_and_settle(&req).await,
            Err(EngineError::Validation(_))
        ));
        assert_eq!(
            f.subscriptions.get(sub.id).unwrap().payment_status(),
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_renewal_cannot_reuse_last_cycles_proof() {
        let f = fixture();
        let first = request(&f, "0xold");
        f.ledger.set("0xold", transfer(price()));
        assert!(matches!(
            f.reconciler.verify_and_settle(&first).await.unwrap(),
            SettlementOutcome::Settled { .. }
        ));

        f.clock.advance(31 * DAY);
        let renewed = request(&f, "0xold");
        assert_eq!(renewed.target, first.target);
        assert_eq!(
            rejection(f.reconciler.verify_and_settle(&renewed).await.unwrap()),
            FailureReason::ProofAlreadyUsed {
                proof_ref: "0xold".to_string()
            }
        );
        assert!(!f.subscriptions.is_entitled("fan", "creator"));

        let paid = request(&f, "0xnew");
        f.ledger.set("0xnew", transfer(price()));
        assert!(matches!(
            f.reconciler.verify_and_settle(&paid).await.unwrap(),
            SettlementOutcome::Settled { .. }
        ));
        assert!(f.subscriptions.is_entitled("fan", "creator"));
    }

    #[tokio::test]
    async fn test_proof_spelling_cannot_settle_twice() {
        let f = fixture();
        f.ledger.set("0xabab", transfer(price()));
        let first = request_for(&f, "fan", "0xabab");
        assert_eq!(
            f.reconciler.verify_and_settle(&first).await.unwrap(),
            SettlementOutcome::Settled {
                proof_ref: Some("0xabab".to_string())
            }
        );

        for spelling in ["0xABAB", "ABAB", " 0XabAB "] {
            let fan = format!("fan-{}", spelling.trim());
            let other = request_for(&f, &fan, spelling);
            assert_eq!(
                rejection(f.reconciler.verify_and_settle(&other).await.unwrap()),
                FailureReason::ProofAlreadyUsed {
                    proof_ref: "0xabab".to_string()
                }
            );
        }
        assert_eq!(f.reconciler.audit().entries_for("0xabab").len(), 4);
        assert!(f.reconciler.audit().entries_for("0xABAB").is_empty());
    }

    #[tokio::test]
    async fn test_redemption_must_pay_its_final_price() {
        let f = fixture();
        let sale_id = half_price_sale(&f);
        let redemption = f.sales.redeem(sale_id, "fan", price()).unwrap();
        let half = price() / U256::from(2u64);
        assert_eq!(redemption.final_price, half);

        let target = SettlementTarget::Redemption {
            sale_id,
            user_id: "fan".to_string(),
        };
        assert_eq!(
            f.reconciler.expectation(&settle("0xdust", target.clone())).unwrap().amount,
            half
        );
        f.ledger.set("0xdust", transfer(U256::from(1u64)));
        assert!(matches!(
            rejection(f.reconciler.verify_and_settle(&settle("0xdust", target.clone())).await.unwrap()),
            FailureReason::AmountMismatch { expected, .. } if expected == half
        ));
        assert_eq!(f.sales.completed_count(sale_id), 0);

        f.sales.redeem(sale_id, "fan", price()).unwrap();
        f.ledger.set("0xhalf", transfer(half));
        assert!(matches!(
            f.reconciler.verify_and_settle(&settle("0xhalf", target)).await.unwrap(),
            SettlementOutcome::Settled { .. }
        ));
        assert_eq!(f.sales.completed_count(sale_id), 1);
    }

    #[tokio::test]
    async fn test_linked_redemption_settles_with_its_subscription() {
        let f = fixture();
        let sale_id = half_price_sale(&f);
        let redemption = f.sales.redeem(sale_id, "fan", price()).unwrap();
        let sub = f
            .subscriptions
            .subscribe_discounted("fan", "creator", Tier::Premium, redemption.final_price, "ETH", Some(sale_id))
            .unwrap();
        let record = SettlementTarget::Subscription {
            subscription_id: sub.id,
        };
        f.sales.attach(sale_id, "fan", record.clone()).unwrap();

        // Settling through the redemption lands on the subscription.
        let via_redemption = settle(
            "0xhalf",
            SettlementTarget::Redemption {
                sale_id,
                user_id: "fan".to_string(),
            },
        );
        f.ledger.set("0xhalf", transfer(redemption.final_price));
        assert!(matches!(
            f.reconciler.verify_and_settle(&via_redemption).await.unwrap(),
            SettlementOutcome::Settled { .. }
        ));
        assert!(f.subscriptions.is_entitled("fan", "creator"));
        let row = f.sales.get_redemption(sale_id, "fan").unwrap();
        assert_eq!(row.payment_status(), PaymentStatus::Completed);
        assert_eq!(row.payment.proof_ref.as_deref(), Some("0xhalf"));
        assert_eq!(
            f.reconciler.audit().binding("0xhalf").unwrap().target,
            record
        );
    }

    #[tokio::test]
    async fn test_failed_subscription_releases_its_sale_slot() {
        let f = fixture();
        let sale_id = half_price_sale(&f);
        let redemption = f.sales.redeem(sale_id, "fan", price()).unwrap();
        let sub = f
            .subscriptions
            .subscribe_discounted("fan", "creator", Tier::Premium, redemption.final_price, "ETH", Some(sale_id))
            .unwrap();
        let record = SettlementTarget::Subscription {
            subscription_id: sub.id,
        };
        f.sales.attach(sale_id, "fan", record.clone()).unwrap();

        f.ledger.set("0xshort", transfer(U256::from(1u64)));
        rejection(f.reconciler.verify_and_settle(&settle("0xshort", record)).await.unwrap());
        assert_eq!(
            f.sales.get_redemption(sale_id, "fan").unwrap().payment_status(),
            PaymentStatus::Failed
        );
        assert!(f.sales.redeem(sale_id, "fan2", price()).is_ok());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails_with_timeout() {
        let f = fixture();
        let req = request(&f, "0xnever");
        let outcome = f.reconciler.settle_with_retry(&req).await.unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::Rejected {
                reason: FailureReason::VerificationTimeout
            }
        );
        assert_eq!(
            f.subscriptions.find("fan", "creator").unwrap().payment_status(),
            PaymentStatus::Failed
        );
        // Three pending passes plus the final rejection.
        assert_eq!(f.reconciler.audit().entries_for("0xnever").len(), 4);
    }

    #[tokio::test]
    async fn test_stale_pending_records_expire() {
        let f = fixture();
        let req = request(&f, "0xslow");
        assert_eq!(f.reconciler.expire_stale_pending(f.clock.now()), 0);

        f.clock.advance(3601);
        assert_eq!(f.reconciler.expire_stale_pending(f.clock.now()), 1);
        assert_eq!(
            rejection(f.reconciler.verify_and_settle(&req).await.unwrap()),
            FailureReason::ProofNotSubmitted
        );
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_found() {
        let f = fixture();
        let req = settle(
            "0x1",
            SettlementTarget::Purchase {
                purchase_id: Uuid::new_v4(),
            },
        );
        assert!(matches!(
            f.reconciler.verify_and_settle(&req).await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            f.reconciler.verify_and_settle(&settle("  ", req.target.clone())).await,
            Err(EngineError::Validation(_))
        ));
    }
}
