// Credit ledger service
// Append-only transaction log. Balance is a fold over a user's rows; the
// idempotency check and the append happen under one write guard, which is
// the uniqueness constraint that closes the race window (not a
// read-then-write check).

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{CreditTransaction, TransactionType};
use crate::services::pricing;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// The idempotency key already exists. Carries the existing row so the
    /// caller can decide whether the replay matches (success-equivalent)
    /// or conflicts (fatal).
    #[error("duplicate transaction: {}", .existing.trans_no)]
    Duplicate { existing: CreditTransaction },
}

#[derive(Default)]
struct LedgerInner {
    entries: Vec<CreditTransaction>,
    by_trans_no: HashMap<String, usize>,
}

pub struct CreditLedger {
    inner: RwLock<LedgerInner>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    /// Append one transaction. Deductions are posted as negative amounts,
    /// grants and charges as positive. Rows are never updated or deleted;
    /// corrections are new transactions.
    pub async fn post(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        amount_units: i64,
        trans_no: &str,
        reason: Option<String>,
    ) -> Result<CreditTransaction, LedgerError> {
        let mut inner = self.inner.write().await;
        if let Some(&index) = inner.by_trans_no.get(trans_no) {
            return Err(LedgerError::Duplicate {
                existing: inner.entries[index].clone(),
            });
        }

        let tx = CreditTransaction::new(trans_no, user_id, tx_type, amount_units, reason);
        let index = inner.entries.len();
        inner.by_trans_no.insert(trans_no.to_string(), index);
        inner.entries.push(tx.clone());

        tracing::debug!(
            "💳 Posted {} of {} units for {} ({})",
            tx_type.as_str(),
            amount_units,
            user_id,
            trans_no
        );
        Ok(tx)
    }

    /// Raw balance in micro-units: the sum of the user's transactions.
    pub async fn balance_units(&self, user_id: &str) -> i64 {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .map(|tx| tx.amount_units)
            .sum()
    }

    /// Display balance in credits, floored at zero. The raw sum is the
    /// accounting truth; the clamp is presentation only.
    pub async fn balance_display(&self, user_id: &str) -> f64 {
        pricing::units_to_credits(self.balance_units(user_id).await.max(0))
    }

    pub async fn transactions_for(&self, user_id: &str) -> Vec<CreditTransaction> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Count of ledger rows referencing a job-scoped idempotency key.
    pub async fn find(&self, trans_no: &str) -> Option<CreditTransaction> {
        let inner = self.inner.read().await;
        inner
            .by_trans_no
            .get(trans_no)
            .map(|&index| inner.entries[index].clone())
    }
}

impl Default for CreditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_balance_is_a_fold_over_transactions() {
        let ledger = CreditLedger::new();
        ledger
            .post("u1", TransactionType::Grant, 500, "grant-1", None)
            .await
            .unwrap();
        ledger
            .post("u1", TransactionType::Deduct, -120, "job-a", None)
            .await
            .unwrap();
        ledger
            .post("u2", TransactionType::Grant, 90, "grant-2", None)
            .await
            .unwrap();

        assert_eq!(ledger.balance_units("u1").await, 380);
        assert_eq!(ledger.balance_units("u2").await, 90);
        assert_eq!(ledger.balance_units("nobody").await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_trans_no_yields_one_row_and_unchanged_balance() {
        let ledger = CreditLedger::new();
        ledger
            .post("u1", TransactionType::Grant, 100, "grant-1", None)
            .await
            .unwrap();
        ledger
            .post("u1", TransactionType::Deduct, -40, "job-a", None)
            .await
            .unwrap();

        let err = ledger
            .post("u1", TransactionType::Deduct, -40, "job-a", None)
            .await
            .unwrap_err();
        match err {
            LedgerError::Duplicate { existing } => {
                assert_eq!(existing.amount_units, -40);
            }
        }

        assert_eq!(ledger.balance_units("u1").await, 60);
        assert_eq!(ledger.transactions_for("u1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_display_balance_clamps_at_zero() {
        let ledger = CreditLedger::new();
        ledger
            .post("u1", TransactionType::Deduct, -30, "job-a", None)
            .await
            .unwrap();

        assert_eq!(ledger.balance_units("u1").await, -30);
        assert_eq!(ledger.balance_display("u1").await, 0.0);
    }
}
