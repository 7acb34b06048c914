//! Read access shared by transactions and snapshots.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    DeductionInstance, DeferralStatus, DeferredDeduction, DriverSettlement, PaymentPeriod,
    PayoutRecord, PeriodFrequency, RevenueUnit, VerificationStatus,
};

use super::state::{DriverBook, PeriodBook};

/// Queries over the records a transaction or snapshot can see.
///
/// A driver transaction only sees its own driver's book; ledger-wide
/// transactions and [`Ledger::read`](super::Ledger::read) see every book.
pub trait LedgerRead {
    /// The period book.
    fn periods(&self) -> &PeriodBook;

    /// The book of one driver, if visible.
    fn book(&self, driver_id: &str) -> Option<&DriverBook>;

    /// Every visible driver book.
    fn books(&self) -> Vec<&DriverBook>;

    /// Looks up a period.
    fn period(&self, period_id: Uuid) -> EngineResult<&PaymentPeriod> {
        self.periods()
            .periods
            .get(&period_id)
            .ok_or_else(|| EngineError::not_found("Payment period", period_id))
    }

    /// Looks up a period and rejects it if locked.
    fn open_period(&self, period_id: Uuid) -> EngineResult<&PaymentPeriod> {
        let period = self.period(period_id)?;
        if period.is_locked() {
            return Err(EngineError::PeriodLocked { period_id });
        }
        Ok(period)
    }

    /// A company's periods, optionally filtered by frequency, ordered by start.
    fn periods_for_company(
        &self,
        company_id: &str,
        frequency: Option<PeriodFrequency>,
    ) -> Vec<&PaymentPeriod> {
        let mut periods: Vec<&PaymentPeriod> = self
            .periods()
            .periods
            .values()
            .filter(|p| p.company_id == company_id)
            .filter(|p| frequency.is_none_or(|f| p.frequency == f))
            .collect();
        periods.sort_by_key(|p| (p.start_date, p.end_date));
        periods
    }

    /// The payout record of a locked period.
    fn payout(&self, period_id: Uuid) -> Option<&PayoutRecord> {
        self.periods().payouts.get(&period_id)
    }

    /// Number of payout records in the ledger.
    fn payout_count(&self) -> usize {
        self.periods().payouts.len()
    }

    /// Looks up a settlement row.
    fn settlement(&self, settlement_id: Uuid) -> EngineResult<&DriverSettlement> {
        self.books()
            .into_iter()
            .find_map(|book| book.settlement_by_id(settlement_id))
            .ok_or_else(|| EngineError::not_found("Driver settlement", settlement_id))
    }

    /// The settlement row of a (period, driver) pair, if one exists.
    fn settlement_for(&self, period_id: Uuid, driver_id: &str) -> Option<&DriverSettlement> {
        self.book(driver_id)?.settlements.get(&period_id)
    }

    /// All settlement rows in a period, ordered by driver.
    fn settlements_in_period(&self, period_id: Uuid) -> Vec<&DriverSettlement> {
        let mut rows: Vec<&DriverSettlement> = self
            .books()
            .into_iter()
            .filter_map(|book| book.settlements.get(&period_id))
            .collect();
        rows.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        rows
    }

    /// Looks up a revenue unit.
    fn unit(&self, unit_id: &str) -> EngineResult<&RevenueUnit> {
        self.books()
            .into_iter()
            .find_map(|book| book.units.get(unit_id))
            .ok_or_else(|| EngineError::not_found("Revenue unit", unit_id))
    }

    /// Revenue units assigned to a (period, driver) pair, ordered by id.
    fn units_for(&self, period_id: Uuid, driver_id: &str) -> Vec<&RevenueUnit> {
        self.book(driver_id)
            .map(|book| book.units.in_period(period_id).collect())
            .unwrap_or_default()
    }

    /// Looks up a deduction instance.
    fn instance(&self, instance_id: Uuid) -> EngineResult<&DeductionInstance> {
        self.books()
            .into_iter()
            .find_map(|book| book.instances.get(&instance_id))
            .ok_or_else(|| EngineError::not_found("Deduction instance", instance_id))
    }

    /// Deduction instances of a (period, driver) pair, ordered by source key.
    fn instances_for(&self, period_id: Uuid, driver_id: &str) -> Vec<&DeductionInstance> {
        let mut instances: Vec<&DeductionInstance> = self
            .book(driver_id)
            .map(|book| book.instances.in_period(period_id).collect())
            .unwrap_or_default();
        instances.sort_by(|a, b| a.source_key.cmp(&b.source_key).then(a.id.cmp(&b.id)));
        instances
    }

    /// Looks up a deferral.
    fn deferral(&self, deferral_id: Uuid) -> EngineResult<&DeferredDeduction> {
        self.books()
            .into_iter()
            .find_map(|book| book.deferrals.get(&deferral_id))
            .ok_or_else(|| EngineError::not_found("Deferred deduction", deferral_id))
    }

    /// Every visible deferral.
    fn deferrals(&self) -> Vec<&DeferredDeduction> {
        self.books()
            .into_iter()
            .flat_map(|book| book.deferrals.values())
            .collect()
    }

    /// Deferrals of one driver, from any period.
    fn deferrals_for_driver(&self, driver_id: &str) -> Vec<&DeferredDeduction> {
        self.book(driver_id)
            .map(|book| book.deferrals.values().collect())
            .unwrap_or_default()
    }

    /// Deferrals waived in `period_id`.
    fn deferrals_originating(&self, period_id: Uuid) -> Vec<&DeferredDeduction> {
        self.books()
            .into_iter()
            .flat_map(|book| book.deferrals.in_period(period_id))
            .collect()
    }

    /// Pending deferrals waived in `period_id`.
    fn outstanding_deferrals(&self, period_id: Uuid) -> Vec<&DeferredDeduction> {
        self.deferrals_originating(period_id)
            .into_iter()
            .filter(|d| d.status == DeferralStatus::Pending)
            .collect()
    }

    /// The deferral created from a waived instance, if any.
    fn deferral_for_instance(&self, instance_id: Uuid) -> Option<&DeferredDeduction> {
        self.books().into_iter().find_map(|book| {
            book.deferrals
                .values()
                .find(|d| d.origin_instance_id == instance_id)
        })
    }

    /// Verified supplemental income of a (period, driver) pair.
    fn verified_other_income(&self, period_id: Uuid, driver_id: &str) -> Decimal {
        self.book(driver_id)
            .map(|book| {
                book.other_income
                    .in_period(period_id)
                    .filter(|i| i.status == VerificationStatus::Verified)
                    .map(|i| i.amount)
                    .sum()
            })
            .unwrap_or_default()
    }

    /// Verified fuel spend of a (period, driver) pair.
    fn verified_fuel_expenses(&self, period_id: Uuid, driver_id: &str) -> Decimal {
        self.book(driver_id)
            .map(|book| {
                book.fuel_expenses
                    .in_period(period_id)
                    .filter(|f| f.status == VerificationStatus::Verified)
                    .map(|f| f.total_amount)
                    .sum()
            })
            .unwrap_or_default()
    }

    /// Whether a template is excluded for a (period, driver) pair.
    fn is_excluded(&self, period_id: Uuid, driver_id: &str, template_id: &str) -> bool {
        self.book(driver_id).is_some_and(|book| {
            book.exclusions
                .contains(&(period_id, template_id.to_string()))
        })
    }

    /// Current regeneration generation of a pair.
    fn generation(&self, period_id: Uuid, driver_id: &str) -> u64 {
        self.book(driver_id)
            .and_then(|book| book.generations.get(&period_id).copied())
            .unwrap_or(0)
    }

    /// Current input revision of a pair.
    fn input_revision(&self, period_id: Uuid, driver_id: &str) -> u64 {
        self.book(driver_id)
            .and_then(|book| book.input_revisions.get(&period_id).copied())
            .unwrap_or(0)
    }
}
