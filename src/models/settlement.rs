//! Driver settlement model.
//!
//! A [`DriverSettlement`] is the one row per (period, driver) holding the
//! computed earnings, deductions and net pay for that driver.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment sub-state of a settlement within an open period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Inputs exist but no calculation has run yet.
    Uncalculated,
    /// Net pay has been computed and may be paid.
    Calculated,
    /// The driver was paid; the row is immutable.
    Paid,
}

/// How and by whom a settlement was paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Payment method used (e.g. "ach", "check").
    pub method: String,
    /// External payment reference, if any.
    pub reference: Option<String>,
    /// When the payment was recorded.
    pub paid_at: DateTime<Utc>,
    /// Who recorded the payment.
    pub paid_by: String,
}

/// The computed settlement for one driver within one period.
///
/// `net_payment` always equals
/// `gross_earnings + other_income - fuel_expenses - total_deductions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettlement {
    /// Unique identifier for the settlement row.
    pub id: Uuid,
    /// The period this settlement belongs to.
    pub period_id: Uuid,
    /// The driver being settled.
    pub driver_id: String,
    /// Sum of revenue units assigned to the pair.
    pub gross_earnings: Decimal,
    /// Verified fuel spend in the period.
    pub fuel_expenses: Decimal,
    /// Verified supplemental income in the period.
    pub other_income: Decimal,
    /// Applied deductions after any waivers.
    pub total_deductions: Decimal,
    /// Deductions waived in this period and deferred to a later one.
    pub deferred_deductions: Decimal,
    /// Net amount owed to the driver.
    pub net_payment: Decimal,
    /// True when critical deductions alone exceed income.
    pub has_negative_balance: bool,
    /// Human-readable explanation of a remaining shortfall.
    pub balance_alert: Option<String>,
    /// Payment sub-state.
    pub payment_status: PaymentStatus,
    /// Input revision of the pair when the settlement was last calculated.
    pub calculated_revision: u64,
    /// Payment details once paid.
    pub payment: Option<PaymentDetails>,
}

impl DriverSettlement {
    /// Creates an empty, uncalculated settlement row.
    pub fn uncalculated(period_id: Uuid, driver_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            period_id,
            driver_id: driver_id.into(),
            gross_earnings: Decimal::ZERO,
            fuel_expenses: Decimal::ZERO,
            other_income: Decimal::ZERO,
            total_deductions: Decimal::ZERO,
            deferred_deductions: Decimal::ZERO,
            net_payment: Decimal::ZERO,
            has_negative_balance: false,
            balance_alert: None,
            payment_status: PaymentStatus::Uncalculated,
            calculated_revision: 0,
            payment: None,
        }
    }

    /// Returns true once the driver has been paid.
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Total income before expenses and deductions.
    pub fn total_income(&self) -> Decimal {
        self.gross_earnings + self.other_income
    }
}
