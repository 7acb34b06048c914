//! Payment period model.
//!
//! This module contains the [`PaymentPeriod`] type: a half-open date interval
//! `[start_date, end_date)` for one company, tagged with its generation
//! frequency and lock state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a company's operating calendar is partitioned into periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodFrequency {
    /// Fixed 7-day periods anchored to a weekday.
    Weekly,
    /// Fixed 14-day periods anchored to a weekday.
    Biweekly,
    /// Calendar-month periods anchored to a day of month.
    Monthly,
    /// Fixed N-day periods configured per company.
    Custom,
}

impl std::fmt::Display for PeriodFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PeriodFrequency::Weekly => "weekly",
            PeriodFrequency::Biweekly => "biweekly",
            PeriodFrequency::Monthly => "monthly",
            PeriodFrequency::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Lock state of a payment period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    /// Settlements may still be calculated and paid.
    Open,
    /// Settlement is complete; the period is immutable.
    Locked,
}

/// A payment period for one company.
///
/// # Example
///
/// ```
/// use settlement_engine::models::{PaymentPeriod, PeriodFrequency};
/// use chrono::NaiveDate;
///
/// let period = PaymentPeriod::new(
///     "acme",
///     PeriodFrequency::Weekly,
///     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
///     NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
/// );
///
/// assert!(period.contains_date(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()));
/// assert!(!period.contains_date(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPeriod {
    /// Unique identifier for the period.
    pub id: Uuid,
    /// The company whose calendar this period belongs to.
    pub company_id: String,
    /// The frequency the period was generated with.
    pub frequency: PeriodFrequency,
    /// First day of the period (inclusive).
    pub start_date: NaiveDate,
    /// Day after the last day of the period (exclusive).
    pub end_date: NaiveDate,
    /// Scheduled payout date for the period.
    pub payout_date: NaiveDate,
    /// Current lock state.
    pub status: PeriodStatus,
    /// When the period was locked.
    pub locked_at: Option<DateTime<Utc>>,
    /// Who locked the period.
    pub locked_by: Option<String>,
}

impl PaymentPeriod {
    /// Creates a new open period with a fresh identifier.
    pub fn new(
        company_id: impl Into<String>,
        frequency: PeriodFrequency,
        start_date: NaiveDate,
        end_date: NaiveDate,
        payout_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id: company_id.into(),
            frequency,
            start_date,
            end_date,
            payout_date,
            status: PeriodStatus::Open,
            locked_at: None,
            locked_by: None,
        }
    }

    /// Checks whether `date` falls in `[start_date, end_date)`.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date < self.end_date
    }

    /// Checks whether two half-open intervals share at least one day.
    pub fn overlaps(&self, start_date: NaiveDate, end_date: NaiveDate) -> bool {
        self.start_date < end_date && start_date < self.end_date
    }

    /// The last day covered by the period.
    pub fn last_day(&self) -> NaiveDate {
        self.end_date.pred_opt().unwrap_or(self.end_date)
    }

    /// Number of days in the period.
    pub fn length_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    /// Returns true once the period has been locked.
    pub fn is_locked(&self) -> bool {
        self.status == PeriodStatus::Locked
    }
}
