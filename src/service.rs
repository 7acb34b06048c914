//! Settlement service.
//!
//! [`SettlementService`] is the typed entry point collaborators call. Each
//! method owns exactly one ledger transaction (or one per item for batch
//! payment), so every operation either commits fully or leaves the ledger
//! untouched. Operations on a single driver run in that driver's
//! transaction and never wait on work for other drivers.
//!
//! # Example
//!
//! ```no_run
//! use settlement_engine::config::ConfigLoader;
//! use settlement_engine::service::SettlementService;
//! use chrono::NaiveDate;
//!
//! let config = ConfigLoader::load("./config/demo").unwrap().into_config();
//! let service = SettlementService::new(config);
//! let generated = service
//!     .generate_periods(
//!         "acme_freight",
//!         None,
//!         NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
//!     )
//!     .unwrap();
//! println!("Created {} periods", generated.periods.len());
//! ```

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calculation::{
    self, ClosureCheck, DeductionMaterialization, PeriodGenerationResult, SettlementCalculation,
    UnitReassignment,
};
use crate::config::SettlementConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{Ledger, LedgerRead};
use crate::models::{
    DeductionInstance, DriverSettlement, FuelExpense, OtherIncome, PaymentPeriod, PayoutDetails,
    PayoutRecord, PeriodFrequency, PeriodReport, PeriodTotals, RevenueUnit,
};

/// A manual deduction to record against a (period, driver) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualDeduction {
    /// Amount to deduct; must be positive.
    pub amount: Decimal,
    /// Waiver priority; lower numbers are waived last.
    pub priority: u32,
    /// Critical deductions are never waived.
    pub critical: bool,
    /// Free-text description.
    pub description: String,
}

/// Per-item result of a batch payment.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkPaidOutcome {
    /// The settlement the item referred to.
    pub settlement_id: Uuid,
    /// The paid settlement, or why it could not be paid.
    pub result: EngineResult<DriverSettlement>,
}

/// Typed service over the settlement ledger.
#[derive(Debug)]
pub struct SettlementService {
    ledger: Ledger,
    config: SettlementConfig,
}

impl SettlementService {
    /// Creates a service with an empty ledger.
    pub fn new(config: SettlementConfig) -> Self {
        Self {
            ledger: Ledger::new(),
            config,
        }
    }

    /// The configuration the service was created with.
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// The underlying ledger, for read-only queries.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Generates the periods of `company_id` covering `[range_start, range_end)`.
    ///
    /// `frequency` defaults to the company's configured frequency.
    pub fn generate_periods(
        &self,
        company_id: &str,
        frequency: Option<PeriodFrequency>,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> EngineResult<PeriodGenerationResult> {
        let cadence = self.config.cadence(company_id)?;
        let frequency = frequency.unwrap_or(cadence.frequency);

        let result = self.ledger.transaction(|tx| {
            calculation::generate_periods(
                tx,
                cadence,
                company_id,
                frequency,
                range_start,
                range_end,
                1,
            )
        });
        match &result {
            Ok(generated) => info!(
                company_id,
                %frequency,
                created = generated.periods.len(),
                skipped = generated.skipped,
                "Generated payment periods"
            ),
            Err(e) => warn!(company_id, %frequency, error = %e, "Period generation failed"),
        }
        result
    }

    /// The period of `company_id` containing `date`.
    ///
    /// Periods of the company's configured frequency are preferred.
    pub fn period_for_date(&self, company_id: &str, date: NaiveDate) -> EngineResult<PaymentPeriod> {
        let preferred = self.config.cadence(company_id).ok().map(|c| c.frequency);
        self.ledger.read(|state| {
            let periods = state.periods_for_company(company_id, None);
            periods
                .iter()
                .find(|p| p.contains_date(date) && Some(p.frequency) == preferred)
                .or_else(|| periods.iter().find(|p| p.contains_date(date)))
                .map(|p| (*p).clone())
                .ok_or_else(|| {
                    EngineError::not_found("Payment period", format!("{} on {}", company_id, date))
                })
        })
    }

    /// Regenerates the generated deductions of a pair.
    pub fn materialize_deductions(
        &self,
        period_id: Uuid,
        driver_id: &str,
    ) -> EngineResult<DeductionMaterialization> {
        let result = self.ledger.driver_transaction(driver_id, |tx| {
            calculation::materialize_deductions(tx, &self.config, period_id, driver_id, 1)
        })?;
        debug!(
            %period_id,
            driver_id,
            generation = result.generation,
            instances = result.instances.len(),
            "Materialized deductions"
        );
        Ok(result)
    }

    /// Calculates and stores a driver's settlement.
    pub fn calculate(&self, period_id: Uuid, driver_id: &str) -> EngineResult<SettlementCalculation> {
        let result = self.ledger.driver_transaction(driver_id, |tx| {
            calculation::calculate_settlement(tx, &self.config, period_id, driver_id)
        });
        match &result {
            Ok(calc) => {
                info!(
                    %period_id,
                    driver_id,
                    net_payment = %calc.settlement.net_payment,
                    deferrals = calc.deferrals.len(),
                    "Calculated settlement"
                );
                if calc.settlement.has_negative_balance {
                    warn!(%period_id, driver_id, "Settlement has a negative balance");
                }
            }
            Err(e) => warn!(%period_id, driver_id, error = %e, "Settlement calculation failed"),
        }
        result
    }

    /// Checks whether a period can be closed.
    pub fn can_close(&self, period_id: Uuid) -> EngineResult<ClosureCheck> {
        self.ledger
            .read(|state| calculation::can_close(state, period_id))
    }

    /// Locks a period and records its payout.
    pub fn close(
        &self,
        period_id: Uuid,
        details: &PayoutDetails,
        actor: &str,
    ) -> EngineResult<PayoutRecord> {
        let now = Utc::now();
        let result = self
            .ledger
            .transaction(|tx| calculation::close_period(tx, period_id, details, actor, now));
        match &result {
            Ok(payout) => info!(
                %period_id,
                actor,
                total = %payout.total_amount,
                drivers = payout.driver_count,
                "Locked payment period"
            ),
            Err(EngineError::AlreadyLocked { .. }) => {
                info!(%period_id, actor, "Period already locked")
            }
            Err(e) => warn!(%period_id, actor, error = %e, "Period close rejected"),
        }
        result
    }

    /// Marks one settlement as paid.
    pub fn mark_paid(
        &self,
        settlement_id: Uuid,
        method: &str,
        reference: Option<&str>,
        actor: &str,
    ) -> EngineResult<DriverSettlement> {
        let now = Utc::now();
        let result = match self.ledger.settlement_owner(settlement_id) {
            Some(driver_id) => self.ledger.driver_transaction(&driver_id, |tx| {
                calculation::mark_paid(tx, settlement_id, method, reference, actor, now)
            }),
            None => Err(EngineError::not_found("Driver settlement", settlement_id)),
        };
        match &result {
            Ok(settlement) => info!(
                %settlement_id,
                driver_id = %settlement.driver_id,
                actor,
                "Marked settlement paid"
            ),
            Err(e) => warn!(%settlement_id, error = %e, "Mark paid rejected"),
        }
        result
    }

    /// Marks several settlements as paid, each in its own transaction.
    ///
    /// One failing item does not affect the others.
    pub fn mark_many_paid(
        &self,
        settlement_ids: &[Uuid],
        method: &str,
        reference: Option<&str>,
        actor: &str,
    ) -> Vec<MarkPaidOutcome> {
        let outcomes: Vec<MarkPaidOutcome> = settlement_ids
            .iter()
            .map(|&settlement_id| MarkPaidOutcome {
                settlement_id,
                result: self.mark_paid(settlement_id, method, reference, actor),
            })
            .collect();
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            requested = settlement_ids.len(),
            paid = outcomes.len() - failed,
            failed,
            "Processed batch payment"
        );
        outcomes
    }

    /// Moves a revenue unit to another period, or unassigns it.
    pub fn reassign_unit(
        &self,
        unit_id: &str,
        target_period_id: Option<Uuid>,
    ) -> EngineResult<UnitReassignment> {
        let driver_id = self
            .ledger
            .unit_owner(unit_id)
            .ok_or_else(|| EngineError::not_found("Revenue unit", unit_id))?;
        let result = self.ledger.driver_transaction(&driver_id, |tx| {
            calculation::reassign_unit(tx, unit_id, target_period_id)
        })?;
        info!(
            unit_id,
            from = ?result.previous_period_id,
            to = ?target_period_id,
            "Reassigned revenue unit"
        );
        Ok(result)
    }

    /// Records a revenue unit from dispatch.
    ///
    /// A unit keeps the driver it was first recorded for.
    pub fn record_revenue_unit(&self, unit: RevenueUnit) -> EngineResult<RevenueUnit> {
        if let Some(owner) = self.ledger.unit_owner(&unit.id) {
            if owner != unit.driver_id {
                return Err(EngineError::invalid_input(format!(
                    "revenue unit {} belongs to driver {}",
                    unit.id, owner
                )));
            }
        }
        let driver_id = unit.driver_id.clone();
        self.ledger
            .driver_transaction(&driver_id, |tx| calculation::record_revenue_unit(tx, unit))
    }

    /// Records a supplemental income entry.
    pub fn record_other_income(&self, income: OtherIncome) -> EngineResult<OtherIncome> {
        let driver_id = income.driver_id.clone();
        self.ledger
            .driver_transaction(&driver_id, |tx| calculation::record_other_income(tx, income))
    }

    /// Records a fuel expense entry.
    pub fn record_fuel_expense(&self, expense: FuelExpense) -> EngineResult<FuelExpense> {
        let driver_id = expense.driver_id.clone();
        self.ledger
            .driver_transaction(&driver_id, |tx| calculation::record_fuel_expense(tx, expense))
    }

    /// Records a manual deduction.
    pub fn add_manual_deduction(
        &self,
        period_id: Uuid,
        driver_id: &str,
        deduction: &ManualDeduction,
    ) -> EngineResult<DeductionInstance> {
        let instance = self.ledger.driver_transaction(driver_id, |tx| {
            calculation::add_manual_deduction(
                tx,
                period_id,
                driver_id,
                deduction.amount,
                deduction.priority,
                deduction.critical,
                &deduction.description,
            )
        })?;
        info!(%period_id, driver_id, amount = %instance.amount, "Added manual deduction");
        Ok(instance)
    }

    /// Stops a configured template from charging a driver in one period.
    pub fn exclude_template(
        &self,
        period_id: Uuid,
        driver_id: &str,
        template_id: &str,
    ) -> EngineResult<bool> {
        self.known_template(template_id)?;
        self.ledger.driver_transaction(driver_id, |tx| {
            calculation::exclude_template(tx, period_id, driver_id, template_id)
        })
    }

    /// Lifts a template exclusion.
    pub fn restore_template(
        &self,
        period_id: Uuid,
        driver_id: &str,
        template_id: &str,
    ) -> EngineResult<bool> {
        self.known_template(template_id)?;
        self.ledger.driver_transaction(driver_id, |tx| {
            calculation::restore_template(tx, period_id, driver_id, template_id)
        })
    }

    /// Builds the read model of a period.
    pub fn period_report(&self, period_id: Uuid) -> EngineResult<PeriodReport> {
        self.ledger.read(|state| {
            let period = state.period(period_id)?.clone();
            let settlements: Vec<DriverSettlement> = state
                .settlements_in_period(period_id)
                .into_iter()
                .cloned()
                .collect();
            let mut totals = PeriodTotals::default();
            for settlement in &settlements {
                totals.add(settlement);
            }
            Ok(PeriodReport {
                period,
                totals,
                settlements,
                outstanding_deferrals: state
                    .outstanding_deferrals(period_id)
                    .into_iter()
                    .cloned()
                    .collect(),
                payout: state.payout(period_id).cloned(),
            })
        })
    }

    fn known_template(&self, template_id: &str) -> EngineResult<()> {
        if self.config.templates().iter().any(|t| t.id == template_id) {
            Ok(())
        } else {
            Err(EngineError::not_found("Deduction template", template_id))
        }
    }
}
