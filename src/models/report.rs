//! Period report read model.
//!
//! A [`PeriodReport`] is the view a reporting or UI layer gets of one
//! period: aggregate totals, every driver's settlement row, and the
//! deferrals that are still waiting for a later period.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{DeferredDeduction, DriverSettlement, PaymentPeriod, PayoutRecord};

/// Totals across every settlement row in a period.
///
/// # Example
///
/// ```
/// use settlement_engine::models::PeriodTotals;
/// use rust_decimal::Decimal;
///
/// let totals = PeriodTotals::default();
/// assert_eq!(totals.net_payment, Decimal::ZERO);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotals {
    /// Sum of gross earnings.
    pub gross_earnings: Decimal,
    /// Sum of verified supplemental income.
    pub other_income: Decimal,
    /// Sum of verified fuel spend.
    pub fuel_expenses: Decimal,
    /// Sum of applied deductions.
    pub total_deductions: Decimal,
    /// Sum of deductions waived and deferred out of this period.
    pub deferred_deductions: Decimal,
    /// Sum of net payments.
    pub net_payment: Decimal,
    /// Number of settlement rows.
    pub driver_count: usize,
    /// Number of paid settlement rows.
    pub paid_count: usize,
    /// Number of rows flagged with a negative balance.
    pub drivers_with_negative_balance: usize,
}

impl PeriodTotals {
    /// Adds one settlement row to the totals.
    pub fn add(&mut self, settlement: &DriverSettlement) {
        self.gross_earnings += settlement.gross_earnings;
        self.other_income += settlement.other_income;
        self.fuel_expenses += settlement.fuel_expenses;
        self.total_deductions += settlement.total_deductions;
        self.deferred_deductions += settlement.deferred_deductions;
        self.net_payment += settlement.net_payment;
        self.driver_count += 1;
        if settlement.is_paid() {
            self.paid_count += 1;
        }
        if settlement.has_negative_balance {
            self.drivers_with_negative_balance += 1;
        }
    }
}

/// Read model of one payment period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodReport {
    /// The period reported on.
    pub period: PaymentPeriod,
    /// Aggregate totals.
    pub totals: PeriodTotals,
    /// Settlement rows, ordered by driver.
    pub settlements: Vec<DriverSettlement>,
    /// Deferrals waived in this period that no later period has absorbed.
    pub outstanding_deferrals: Vec<DeferredDeduction>,
    /// The payout record, once the period is locked.
    pub payout: Option<PayoutRecord>,
}
