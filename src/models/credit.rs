// src/models/credit.rs
//! Append-only credit ledger rows.
//!
//! Amounts are signed integer micro-units (1 credit = 10 units) so the
//! ledger never accumulates floating-point drift. A user's balance is the
//! sum of their transaction amounts; corrections are new transactions,
//! never updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Charge,
    Deduct,
    Refund,
    Grant,
    Bonus,
    Expire,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Charge => "charge",
            TransactionType::Deduct => "deduct",
            TransactionType::Refund => "refund",
            TransactionType::Grant => "grant",
            TransactionType::Bonus => "bonus",
            TransactionType::Expire => "expire",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    /// Idempotency key. Unique across the ledger; deductions for a job use
    /// `job-{job_id}` so a crash-and-retry of completion cannot double-charge.
    pub trans_no: String,
    pub user_id: String,
    pub tx_type: TransactionType,
    /// Signed micro-units: deductions negative, grants/charges positive.
    pub amount_units: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        trans_no: &str,
        user_id: &str,
        tx_type: TransactionType,
        amount_units: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trans_no: trans_no.to_string(),
            user_id: user_id.to_string(),
            tx_type,
            amount_units,
            reason,
            expires_at: None,
            created_at: Utc::now(),
        }
    }
}
