//! Calculation inputs produced by collaborators.
//!
//! Revenue units (loads) come from dispatch; supplemental income and fuel
//! spend come from their own workflows and are only read once verified.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LoadRateKind;

/// A driver-assigned unit of revenue.
///
/// Rates are percentages: `10` means 10% of `total_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueUnit {
    /// Identifier assigned by the dispatch collaborator.
    pub id: String,
    /// The company the unit was hauled for.
    pub company_id: String,
    /// The driver the unit is assigned to.
    pub driver_id: String,
    /// The period the unit counts towards; `None` while unassigned.
    #[serde(default)]
    pub period_id: Option<Uuid>,
    /// Revenue amount of the unit.
    pub total_amount: Decimal,
    /// Dispatch fee percentage.
    #[serde(default)]
    pub dispatch_rate: Decimal,
    /// Factoring fee percentage.
    #[serde(default)]
    pub factoring_rate: Decimal,
    /// Leasing fee percentage.
    #[serde(default)]
    pub leasing_rate: Decimal,
}

impl RevenueUnit {
    /// Returns the percentage for one rate kind.
    pub fn rate(&self, kind: LoadRateKind) -> Decimal {
        match kind {
            LoadRateKind::Dispatch => self.dispatch_rate,
            LoadRateKind::Factoring => self.factoring_rate,
            LoadRateKind::Leasing => self.leasing_rate,
        }
    }
}

/// Verification state of supplemental income and fuel records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Submitted, not yet reviewed.
    Pending,
    /// Reviewed and accepted; counted by settlement.
    Verified,
    /// Reviewed and rejected.
    Rejected,
}

/// Supplemental income credited to a driver (bonuses, reimbursements).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherIncome {
    /// Identifier assigned by the income collaborator.
    pub id: String,
    /// The driver credited.
    pub driver_id: String,
    /// The period the income counts towards.
    pub period_id: Uuid,
    /// Amount credited.
    pub amount: Decimal,
    /// Review state.
    pub status: VerificationStatus,
}

/// Fuel spend charged to a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelExpense {
    /// Identifier assigned by the fuel collaborator.
    pub id: String,
    /// The driver charged.
    pub driver_id: String,
    /// The period the spend counts towards.
    pub period_id: Uuid,
    /// Amount spent.
    pub total_amount: Decimal,
    /// Review state.
    pub status: VerificationStatus,
}
