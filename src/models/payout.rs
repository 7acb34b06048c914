//! Payout record written when a period locks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied details of the payout run for a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDetails {
    /// Payment method used for the run (e.g. "ach").
    pub payment_method: String,
    /// External reference of the payout batch.
    #[serde(default)]
    pub external_reference: Option<String>,
}

/// Immutable record of a completed period settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    /// Unique identifier for the record.
    pub id: Uuid,
    /// The period that was locked.
    pub period_id: Uuid,
    /// Payment method used for the run.
    pub payment_method: String,
    /// External reference of the payout batch.
    pub external_reference: Option<String>,
    /// Sum of net payments of the period's settlements.
    pub total_amount: Decimal,
    /// Number of settlements covered.
    pub driver_count: usize,
    /// When the period was locked.
    pub locked_at: DateTime<Utc>,
    /// Who locked the period.
    pub locked_by: String,
}
