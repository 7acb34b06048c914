//! Calculation inputs handed over by collaborators.
//!
//! Revenue units, supplemental income, fuel spend and template exclusions
//! all feed a (period, driver) calculation. Changing any of them is only
//! allowed while the period is open and the pair is unpaid, and it bumps
//! the pair's input revision so an earlier calculation can no longer be
//! paid out.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerRead, LedgerTx};
use crate::models::{DriverSettlement, FuelExpense, OtherIncome, RevenueUnit};

/// Outcome of moving a revenue unit between periods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReassignment {
    /// The unit after the move.
    pub unit: RevenueUnit,
    /// The period the unit was assigned to before, if any.
    pub previous_period_id: Option<Uuid>,
}

/// Records a new or updated revenue unit from dispatch.
///
/// # Errors
///
/// - [`EngineError::InvalidInput`] for a negative amount or a rate outside
///   0-100.
/// - [`EngineError::PeriodLocked`] if the unit enters or leaves a locked
///   period.
pub fn record_revenue_unit(tx: &mut LedgerTx<'_>, unit: RevenueUnit) -> EngineResult<RevenueUnit> {
    if unit.total_amount < Decimal::ZERO {
        return Err(EngineError::invalid_input(format!(
            "revenue unit {} has negative amount {}",
            unit.id, unit.total_amount
        )));
    }
    for rate in [unit.dispatch_rate, unit.factoring_rate, unit.leasing_rate] {
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(EngineError::invalid_input(format!(
                "revenue unit {} has rate {} outside 0-100",
                unit.id, rate
            )));
        }
    }

    if let Some(previous) = tx.unit(&unit.id).ok().cloned() {
        if previous.driver_id != unit.driver_id {
            return Err(EngineError::invalid_input(format!(
                "revenue unit {} belongs to driver {}",
                unit.id, previous.driver_id
            )));
        }
        if let Some(period_id) = previous.period_id {
            release_pair(tx, period_id, &previous.driver_id)?;
        }
    }
    if let Some(period_id) = unit.period_id {
        check_company(tx, period_id, &unit.company_id)?;
        touch_pair(tx, period_id, &unit.driver_id)?;
    }

    tx.upsert_unit(unit.clone())?;
    Ok(unit)
}

/// Moves a revenue unit to `target_period_id`, or unassigns it with `None`.
///
/// Both the source and the target period must be open. The affected
/// settlements must be recalculated before they can be paid.
pub fn reassign_unit(
    tx: &mut LedgerTx<'_>,
    unit_id: &str,
    target_period_id: Option<Uuid>,
) -> EngineResult<UnitReassignment> {
    let mut unit = tx.unit(unit_id)?.clone();
    let previous_period_id = unit.period_id;

    if previous_period_id == target_period_id {
        if let Some(period_id) = target_period_id {
            tx.open_period(period_id)?;
        }
        return Ok(UnitReassignment {
            unit,
            previous_period_id,
        });
    }

    if let Some(period_id) = previous_period_id {
        release_pair(tx, period_id, &unit.driver_id)?;
    }
    if let Some(period_id) = target_period_id {
        check_company(tx, period_id, &unit.company_id)?;
        touch_pair(tx, period_id, &unit.driver_id)?;
    }

    unit.period_id = target_period_id;
    tx.upsert_unit(unit.clone())?;
    Ok(UnitReassignment {
        unit,
        previous_period_id,
    })
}

/// Records a supplemental income entry.
pub fn record_other_income(tx: &mut LedgerTx<'_>, income: OtherIncome) -> EngineResult<OtherIncome> {
    if income.amount < Decimal::ZERO {
        return Err(EngineError::invalid_input(format!(
            "income {} has negative amount {}",
            income.id, income.amount
        )));
    }
    touch_pair(tx, income.period_id, &income.driver_id)?;
    tx.upsert_other_income(income.clone())?;
    Ok(income)
}

/// Records a fuel expense entry.
pub fn record_fuel_expense(tx: &mut LedgerTx<'_>, expense: FuelExpense) -> EngineResult<FuelExpense> {
    if expense.total_amount < Decimal::ZERO {
        return Err(EngineError::invalid_input(format!(
            "fuel expense {} has negative amount {}",
            expense.id, expense.total_amount
        )));
    }
    touch_pair(tx, expense.period_id, &expense.driver_id)?;
    tx.upsert_fuel_expense(expense.clone())?;
    Ok(expense)
}

/// Stops a template from charging a driver in one period.
///
/// Returns `false` if it was already excluded.
pub fn exclude_template(
    tx: &mut LedgerTx<'_>,
    period_id: Uuid,
    driver_id: &str,
    template_id: &str,
) -> EngineResult<bool> {
    touch_pair(tx, period_id, driver_id)?;
    tx.add_exclusion(period_id, driver_id, template_id)
}

/// Lifts a template exclusion. Returns `false` if none existed.
pub fn restore_template(
    tx: &mut LedgerTx<'_>,
    period_id: Uuid,
    driver_id: &str,
    template_id: &str,
) -> EngineResult<bool> {
    touch_pair(tx, period_id, driver_id)?;
    tx.remove_exclusion(period_id, driver_id, template_id)
}

fn check_company(tx: &LedgerTx<'_>, period_id: Uuid, company_id: &str) -> EngineResult<()> {
    let period = tx.period(period_id)?;
    if period.company_id != company_id {
        return Err(EngineError::invalid_input(format!(
            "period {} belongs to {}, not {}",
            period_id, period.company_id, company_id
        )));
    }
    Ok(())
}

/// Marks a pair's inputs as changed, creating its settlement row if needed.
fn touch_pair(tx: &mut LedgerTx<'_>, period_id: Uuid, driver_id: &str) -> EngineResult<()> {
    tx.open_period(period_id)?;
    let settlement = tx.ensure_settlement(period_id, driver_id)?;
    reject_paid(&settlement)?;
    tx.bump_input_revision(period_id, driver_id)?;
    Ok(())
}

/// Marks a pair's inputs as changed because something left it.
fn release_pair(tx: &mut LedgerTx<'_>, period_id: Uuid, driver_id: &str) -> EngineResult<()> {
    tx.open_period(period_id)?;
    if let Some(settlement) = tx.settlement_for(period_id, driver_id) {
        reject_paid(settlement)?;
    }
    tx.bump_input_revision(period_id, driver_id)?;
    Ok(())
}

fn reject_paid(settlement: &DriverSettlement) -> EngineResult<()> {
    if settlement.is_paid() {
        return Err(EngineError::StaleRecalculation {
            settlement_id: settlement.id,
            reason: "inputs of a paid settlement cannot change".to_string(),
        });
    }
    Ok(())
}
