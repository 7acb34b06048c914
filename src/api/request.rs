//! Request bodies and query strings accepted by the settlement API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PayoutDetails, PeriodFrequency};
use crate::service::ManualDeduction;

/// Body of `POST /companies/:company_id/periods`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePeriodsRequest {
    /// First day of the range to cover.
    pub range_start: NaiveDate,
    /// Exclusive end of the range.
    pub range_end: NaiveDate,
    /// Overrides the company's configured frequency.
    #[serde(default)]
    pub frequency: Option<PeriodFrequency>,
}

/// Query of `GET /companies/:company_id/periods/current`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentPeriodQuery {
    /// The date the period must contain.
    pub date: NaiveDate,
}

/// Body of `POST /periods/:period_id/drivers/:driver_id/deductions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualDeductionRequest {
    /// Amount to deduct.
    pub amount: Decimal,
    /// Waiver priority; lower numbers are waived last.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Critical deductions are never waived.
    #[serde(default)]
    pub critical: bool,
    /// Free-text description.
    pub description: String,
}

fn default_priority() -> u32 {
    5
}

impl From<ManualDeductionRequest> for ManualDeduction {
    fn from(req: ManualDeductionRequest) -> Self {
        ManualDeduction {
            amount: req.amount,
            priority: req.priority,
            critical: req.critical,
            description: req.description,
        }
    }
}

/// Body of `POST /periods/:period_id/close`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRequest {
    /// How the period's payout is sent.
    pub payment_method: String,
    /// Reference from the payment system, if any.
    #[serde(default)]
    pub external_reference: Option<String>,
    /// Who is closing the period.
    pub actor: String,
}

impl CloseRequest {
    /// The payout details carried by the request.
    pub fn payout_details(&self) -> PayoutDetails {
        PayoutDetails {
            payment_method: self.payment_method.clone(),
            external_reference: self.external_reference.clone(),
        }
    }
}

/// Body of `POST /settlements/:settlement_id/pay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayRequest {
    /// Payment method (e.g. "ach").
    pub method: String,
    /// External payment reference.
    #[serde(default)]
    pub reference: Option<String>,
    /// Who recorded the payment.
    pub actor: String,
}

/// Body of `POST /settlements/pay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayRequest {
    /// Settlements to mark paid.
    pub settlement_ids: Vec<Uuid>,
    /// Payment method shared by every item.
    pub method: String,
    /// External payment reference shared by every item.
    #[serde(default)]
    pub reference: Option<String>,
    /// Who recorded the payments.
    pub actor: String,
}

/// Body of `POST /units/:unit_id/reassign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassignRequest {
    /// Destination period; `null` unassigns the unit.
    pub target_period_id: Option<Uuid>,
}
