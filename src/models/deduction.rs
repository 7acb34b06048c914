//! Deduction models.
//!
//! Templates are recurring rules owned by configuration; instances are the
//! concrete, period-scoped charges materialized from them (and from revenue
//! unit percentage rates); deferrals carry waived amounts to later periods.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PeriodFrequency;

/// Where a deduction instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionProvenance {
    /// Replayed from a recurring [`DeductionTemplate`].
    FromTemplate,
    /// A dispatch/factoring/leasing percentage of a revenue unit.
    FromLoadPercentage,
    /// Entered by hand; never touched by regeneration.
    Manual,
    /// A deferral from an earlier period resolved into this one.
    CarriedOver,
}

impl DeductionProvenance {
    /// Auto-generated instances may be deleted and regenerated.
    pub fn is_generated(self) -> bool {
        !matches!(self, DeductionProvenance::Manual)
    }
}

/// Lifecycle of a deduction instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionStatus {
    /// Materialized but not yet applied by a calculation.
    Pending,
    /// Counted in the settlement's total deductions.
    Applied,
    /// Not charged in this period; a deferral carries the amount.
    Waived,
}

/// The three percentage rates a revenue unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadRateKind {
    /// Dispatch service fee.
    Dispatch,
    /// Factoring fee.
    Factoring,
    /// Equipment leasing fee.
    Leasing,
}

impl LoadRateKind {
    /// All rate kinds in materialization order.
    pub const ALL: [LoadRateKind; 3] = [
        LoadRateKind::Dispatch,
        LoadRateKind::Factoring,
        LoadRateKind::Leasing,
    ];

    /// Short name used in source keys and descriptions.
    pub fn as_str(self) -> &'static str {
        match self {
            LoadRateKind::Dispatch => "dispatch",
            LoadRateKind::Factoring => "factoring",
            LoadRateKind::Leasing => "leasing",
        }
    }
}

/// A recurring deduction rule, independent of any period.
///
/// # Example
///
/// ```
/// use settlement_engine::models::{DeductionTemplate, PeriodFrequency};
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
///
/// let template = DeductionTemplate {
///     id: "insurance".to_string(),
///     driver_id: "drv_001".to_string(),
///     description: "Occupational accident insurance".to_string(),
///     amount: Decimal::new(5000, 2),
///     frequency: PeriodFrequency::Weekly,
///     effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///     effective_until: None,
///     month_day: None,
///     priority: 5,
///     critical: false,
///     active: true,
/// };
/// assert!(template.is_effective_on(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionTemplate {
    /// Unique identifier for the template.
    pub id: String,
    /// The driver the template charges.
    pub driver_id: String,
    /// Human-readable description copied onto instances.
    pub description: String,
    /// Amount charged per occurrence.
    pub amount: Decimal,
    /// How often the charge recurs (weekly, biweekly or monthly).
    pub frequency: PeriodFrequency,
    /// First day the template may charge; also anchors weekly cadences.
    pub effective_from: NaiveDate,
    /// Last day the template may charge, if bounded.
    #[serde(default)]
    pub effective_until: Option<NaiveDate>,
    /// Day of month for monthly templates (defaults to 1).
    #[serde(default)]
    pub month_day: Option<u32>,
    /// Lower numbers are charged first when income is short.
    #[serde(default)]
    pub priority: u32,
    /// Critical deductions are never waived.
    #[serde(default)]
    pub critical: bool,
    /// Inactive templates are ignored.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl DeductionTemplate {
    /// Checks whether `date` lies inside the template's effective window.
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        date >= self.effective_from && self.effective_until.is_none_or(|until| date <= until)
    }
}

/// A materialized deduction tied to one (period, driver) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionInstance {
    /// Unique identifier for the instance.
    pub id: Uuid,
    /// The period the charge belongs to.
    pub period_id: Uuid,
    /// The driver being charged.
    pub driver_id: String,
    /// Amount charged, at currency precision.
    pub amount: Decimal,
    /// Lower numbers are charged first when income is short.
    pub priority: u32,
    /// Critical deductions are never waived.
    pub critical: bool,
    /// Where the instance came from.
    pub provenance: DeductionProvenance,
    /// Current lifecycle state.
    pub status: DeductionStatus,
    /// Stable key of the originating rule (template, unit rate, deferral).
    pub source_key: String,
    /// Human-readable description.
    pub description: String,
    /// Regeneration generation that produced the instance (0 for manual).
    pub generation: u64,
}

/// Resolution state of a deferred deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralStatus {
    /// Waiting for a later period to absorb it.
    Pending,
    /// Carried into exactly one target period.
    Resolved,
}

/// A waived deduction amount awaiting a later period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredDeduction {
    /// Unique identifier for the deferral.
    pub id: Uuid,
    /// The company whose periods may absorb the deferral.
    pub company_id: String,
    /// The driver owing the amount.
    pub driver_id: String,
    /// The period the amount was waived in.
    pub origin_period_id: Uuid,
    /// Start date of the originating period, used for ordering.
    pub origin_start_date: NaiveDate,
    /// The waived instance the deferral was created from.
    pub origin_instance_id: Uuid,
    /// Amount carried forward.
    pub amount: Decimal,
    /// Priority copied from the waived instance.
    pub priority: u32,
    /// Description copied from the waived instance.
    pub description: String,
    /// The period the amount was carried into, once resolved.
    pub target_period_id: Option<Uuid>,
    /// Resolution state.
    pub status: DeferralStatus,
}
