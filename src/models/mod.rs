//! Core data models for the settlement engine.
//!
//! This module contains all the domain records stored in the settlement
//! ledger and exchanged with collaborators.

mod audit;
mod deduction;
mod payout;
mod period;
mod report;
mod revenue;
mod settlement;

pub use audit::{AuditStep, AuditTrace};
pub use deduction::{
    DeductionInstance, DeductionProvenance, DeductionStatus, DeductionTemplate, DeferralStatus,
    DeferredDeduction, LoadRateKind,
};
pub use payout::{PayoutDetails, PayoutRecord};
pub use period::{PaymentPeriod, PeriodFrequency, PeriodStatus};
pub use report::{PeriodReport, PeriodTotals};
pub use revenue::{FuelExpense, OtherIncome, RevenueUnit, VerificationStatus};
pub use settlement::{DriverSettlement, PaymentDetails, PaymentStatus};
