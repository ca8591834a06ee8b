use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use fin_queue::{ActiveJob, JobError, JobRecord, Processor};

use crate::payloads::{
    job_names, JobResult, Keyed, ReconcileBalancesData, ReconcileLedgerData,
    ReconcileTransactionsData,
};
use crate::processors::dead_letter_on_exhaustion;
use crate::queues::QueueName;
use crate::service::QueueService;

/// One side of a transaction match, amounts in minor units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub reference: String,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub account_id: String,
    /// Balance as stored on the account
    pub stored_minor: i64,
    /// Balance recomputed from ledger entries
    pub computed_minor: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub debits_minor: i64,
    pub credits_minor: i64,
}

/// Where reconciliation reads its figures from
#[async_trait]
pub trait ReconciliationSource: Send + Sync + 'static {
    /// Transactions recorded internally for the window
    async fn internal_transactions(&self, data: &ReconcileTransactionsData) -> Result<Vec<LedgerEntry>, JobError>;

    /// Transactions reported by the payment provider for the window
    async fn external_transactions(&self, data: &ReconcileTransactionsData) -> Result<Vec<LedgerEntry>, JobError>;

    async fn balance(&self, account_id: &str, as_of_date: &str) -> Result<BalanceSnapshot, JobError>;

    async fn ledger_totals(&self, ledger_id: &str, period: &str) -> Result<LedgerTotals, JobError>;
}

/// Source backed by in-process maps. Missing data reads as empty and balanced.
#[derive(Debug, Default, Clone)]
pub struct InMemoryReconciliationSource {
    internal: Arc<RwLock<Vec<LedgerEntry>>>,
    external: Arc<RwLock<Vec<LedgerEntry>>>,
    balances: Arc<RwLock<HashMap<String, (i64, i64)>>>,
    ledgers: Arc<RwLock<HashMap<String, LedgerTotals>>>,
}

impl InMemoryReconciliationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_internal(&self, entry: LedgerEntry) {
        self.internal.write().push(entry);
    }

    pub fn record_external(&self, entry: LedgerEntry) {
        self.external.write().push(entry);
    }

    pub fn set_balance(&self, account_id: &str, stored_minor: i64, computed_minor: i64) {
        self.balances
            .write()
            .insert(account_id.to_string(), (stored_minor, computed_minor));
    }

    pub fn set_ledger_totals(&self, ledger_id: &str, totals: LedgerTotals) {
        self.ledgers.write().insert(ledger_id.to_string(), totals);
    }
}

#[async_trait]
impl ReconciliationSource for InMemoryReconciliationSource {
    async fn internal_transactions(&self, _data: &ReconcileTransactionsData) -> Result<Vec<LedgerEntry>, JobError> {
        Ok(self.internal.read().clone())
    }

    async fn external_transactions(&self, _data: &ReconcileTransactionsData) -> Result<Vec<LedgerEntry>, JobError> {
        Ok(self.external.read().clone())
    }

    async fn balance(&self, account_id: &str, _as_of_date: &str) -> Result<BalanceSnapshot, JobError> {
        let (stored_minor, computed_minor) = self
            .balances
            .read()
            .get(account_id)
            .copied()
            .unwrap_or_default();
        Ok(BalanceSnapshot {
            account_id: account_id.to_string(),
            stored_minor,
            computed_minor,
        })
    }

    async fn ledger_totals(&self, ledger_id: &str, _period: &str) -> Result<LedgerTotals, JobError> {
        Ok(self.ledgers.read().get(ledger_id).copied().unwrap_or_default())
    }
}

/// References missing on one side, or present on both with different amounts
fn transaction_discrepancies(internal: &[LedgerEntry], external: &[LedgerEntry]) -> Vec<String> {
    let internal: BTreeMap<&str, i64> = internal.iter().map(|e| (e.reference.as_str(), e.amount_minor)).collect();
    let external: BTreeMap<&str, i64> = external.iter().map(|e| (e.reference.as_str(), e.amount_minor)).collect();

    let mut mismatched: Vec<String> = internal
        .iter()
        .filter(|(reference, amount)| external.get(*reference) != Some(*amount))
        .map(|(reference, _)| reference.to_string())
        .collect();
    mismatched.extend(
        external
            .keys()
            .filter(|reference| !internal.contains_key(*reference))
            .map(|reference| reference.to_string()),
    );
    mismatched
}

/// Transaction, balance and ledger reconciliation
pub struct ReconciliationProcessor {
    source: Arc<dyn ReconciliationSource>,
    service: QueueService,
}

impl ReconciliationProcessor {
    pub fn new(source: Arc<dyn ReconciliationSource>, service: QueueService) -> Self {
        Self { source, service }
    }

    async fn reconcile_transactions(&self, job: &ActiveJob, data: &ReconcileTransactionsData) -> Result<Value, JobError> {
        let internal = self.source.internal_transactions(data).await?;
        let external = self.source.external_transactions(data).await?;
        job.update_progress(33).await?;

        let discrepancies = transaction_discrepancies(&internal, &external);
        job.update_progress(66).await?;

        for reference in &discrepancies {
            warn!(job_id = %job.id(), reference = %reference, "Transaction discrepancy");
        }
        job.update_progress(100).await?;

        Ok(json!({
            "reconciled": true,
            "discrepancies": discrepancies.len(),
            "checked": internal.len().max(external.len()),
        }))
    }

    async fn reconcile_balances(&self, job: &ActiveJob, data: &ReconcileBalancesData) -> Result<Value, JobError> {
        let mut snapshots = Vec::with_capacity(data.account_ids.len());
        for account_id in &data.account_ids {
            snapshots.push(self.source.balance(account_id, &data.as_of_date).await?);
        }
        job.update_progress(50).await?;

        let mismatched: Vec<&BalanceSnapshot> = snapshots
            .iter()
            .filter(|s| s.stored_minor != s.computed_minor)
            .collect();
        for snapshot in &mismatched {
            warn!(
                job_id = %job.id(),
                account_id = %snapshot.account_id,
                stored = snapshot.stored_minor,
                computed = snapshot.computed_minor,
                "Balance mismatch"
            );
        }
        job.update_progress(100).await?;

        Ok(json!({
            "reconciled": true,
            "mismatchCount": mismatched.len(),
            "accounts": data.account_ids.len(),
        }))
    }

    async fn reconcile_ledger(&self, job: &ActiveJob, data: &ReconcileLedgerData) -> Result<Value, JobError> {
        let totals = self.source.ledger_totals(&data.ledger_id, &data.period).await?;
        job.update_progress(50).await?;

        let discrepancies = usize::from(totals.debits_minor != totals.credits_minor);
        if discrepancies > 0 {
            warn!(
                job_id = %job.id(),
                ledger_id = %data.ledger_id,
                debits = totals.debits_minor,
                credits = totals.credits_minor,
                "Ledger out of balance"
            );
        }
        job.update_progress(100).await?;

        Ok(json!({
            "reconciled": true,
            "discrepancies": discrepancies,
            "ledgerId": data.ledger_id,
            "period": data.period,
        }))
    }
}

#[async_trait]
impl Processor for ReconciliationProcessor {
    async fn process(&self, job: &ActiveJob) -> Result<Value, JobError> {
        let started = Instant::now();
        debug!(job_id = %job.id(), job_name = %job.name(), "Reconciling");

        match job.name() {
            job_names::RECONCILE_TRANSACTIONS => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<ReconcileTransactionsData>>()?;
                let outcome = self.reconcile_transactions(job, &data).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            job_names::RECONCILE_BALANCES => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<ReconcileBalancesData>>()?;
                let outcome = self.reconcile_balances(job, &data).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            job_names::RECONCILE_LEDGER => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<ReconcileLedgerData>>()?;
                let outcome = self.reconcile_ledger(job, &data).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            _ => Err(JobError::new("Unknown reconciliation job")),
        }
    }

    async fn on_failed(&self, job: &JobRecord, error: &JobError) {
        dead_letter_on_exhaustion(&self.service, QueueName::Reconciliation, job, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reference: &str, amount_minor: i64) -> LedgerEntry {
        LedgerEntry {
            reference: reference.to_string(),
            amount_minor,
        }
    }

    #[test]
    fn discrepancies_cover_both_sides_and_amounts() {
        let internal = vec![entry("a", 100), entry("b", 200), entry("c", 300)];
        let external = vec![entry("a", 100), entry("b", 250), entry("d", 400)];

        let mut found = transaction_discrepancies(&internal, &external);
        found.sort();
        assert_eq!(found, vec!["b", "c", "d"]);
    }

    #[test]
    fn matching_sides_have_no_discrepancies() {
        let entries = vec![entry("a", 100), entry("b", 200)];
        assert!(transaction_discrepancies(&entries, &entries).is_empty());
    }
}
