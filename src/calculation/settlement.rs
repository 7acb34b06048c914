//! Settlement calculation functionality.
//!
//! Combines earnings, deductions, verified supplemental income and fuel
//! spend into the single [`DriverSettlement`] row of a (period, driver) pair.
//!
//! # Shortfall handling
//!
//! When the applied deductions would push net pay below zero, instances are
//! ranked by criticality (critical first), then priority (lower number
//! first), then source key. Starting from the lowest-ranked non-critical
//! instance, deductions are waived until net pay reaches zero. If only part
//! of an instance is needed, the instance is split: the original keeps the
//! applied remainder and a waived sibling carries the shortfall. Every
//! waived amount becomes a [`DeferredDeduction`] that a later period of the
//! same company absorbs.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::SettlementConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerRead, LedgerTx};
use crate::models::{
    AuditStep, AuditTrace, DeductionInstance, DeductionProvenance, DeductionStatus,
    DeferralStatus, DeferredDeduction, DriverSettlement, PaymentPeriod, PaymentStatus,
};

use super::aggregate_earnings;
use super::deductions::{carryover_key, regenerate_deductions};

/// The result of calculating one driver's settlement.
#[derive(Debug, Clone)]
pub struct SettlementCalculation {
    /// The settlement row as written to the ledger.
    pub settlement: DriverSettlement,
    /// Every deduction instance of the pair, ordered by source key.
    pub deductions: Vec<DeductionInstance>,
    /// Deferrals created by this calculation's shortfall waivers.
    pub deferrals: Vec<DeferredDeduction>,
    /// The audit trace recording each step of the calculation.
    pub audit_trace: AuditTrace,
}

/// Orders instances from most to least protected.
///
/// Critical instances rank first, then lower priority numbers, then source
/// key so the ordering is total and deterministic.
pub fn waiver_rank(a: &DeductionInstance, b: &DeductionInstance) -> Ordering {
    b.critical
        .cmp(&a.critical)
        .then(a.priority.cmp(&b.priority))
        .then_with(|| a.source_key.cmp(&b.source_key))
        .then_with(|| a.id.cmp(&b.id))
}

/// Calculates the settlement of `(period_id, driver_id)` and writes it.
///
/// Regenerates deductions, absorbs pending deferrals from earlier periods of
/// the same company, applies every open instance and waives non-critical
/// ones if net pay would go negative. The result depends only on ledger
/// state, so repeating the call without intervening changes yields the same
/// settlement values.
///
/// # Errors
///
/// - [`EngineError::PeriodLocked`] if the period is locked.
/// - [`EngineError::StaleRecalculation`] if the settlement is already paid.
pub fn calculate_settlement(
    tx: &mut LedgerTx<'_>,
    config: &SettlementConfig,
    period_id: Uuid,
    driver_id: &str,
) -> EngineResult<SettlementCalculation> {
    let period = tx.open_period(period_id)?.clone();
    let mut settlement = tx.ensure_settlement(period_id, driver_id)?;
    if settlement.is_paid() {
        return Err(EngineError::StaleRecalculation {
            settlement_id: settlement.id,
            reason: "settlement is already paid".to_string(),
        });
    }

    let mut trace = AuditTrace::default();

    let materialization =
        regenerate_deductions(tx, config, period_id, driver_id, trace.next_step_number())?;
    trace.push(materialization.audit_step);

    let earnings = aggregate_earnings(&*tx, period_id, driver_id, trace.next_step_number());
    trace.push(earnings.audit_step);

    let resolution = resolve_deferrals(tx, &period, driver_id, trace.next_step_number())?;
    trace.push(resolution);

    let open: Vec<DeductionInstance> = tx
        .instances_for(period_id, driver_id)
        .into_iter()
        .filter(|i| i.status != DeductionStatus::Waived)
        .cloned()
        .collect();
    for instance in open {
        if instance.status != DeductionStatus::Applied {
            tx.update_instance(DeductionInstance {
                status: DeductionStatus::Applied,
                ..instance
            })?;
        }
    }

    let other_income = tx.verified_other_income(period_id, driver_id);
    let fuel_expenses = tx.verified_fuel_expenses(period_id, driver_id);
    let applied = applied_total(tx, period_id, driver_id);
    let mut net_payment = earnings.gross_earnings + other_income - fuel_expenses - applied;

    trace.push(AuditStep {
        step_number: trace.next_step_number(),
        rule_id: "net_payment".to_string(),
        rule_name: "Net Payment".to_string(),
        input: serde_json::json!({
            "gross_earnings": earnings.gross_earnings.normalize().to_string(),
            "other_income": other_income.normalize().to_string(),
            "fuel_expenses": fuel_expenses.normalize().to_string(),
            "applied_deductions": applied.normalize().to_string(),
        }),
        output: serde_json::json!({
            "net_payment": net_payment.normalize().to_string(),
        }),
        reasoning: format!(
            "${} + ${} - ${} - ${} = ${}",
            earnings.gross_earnings.normalize(),
            other_income.normalize(),
            fuel_expenses.normalize(),
            applied.normalize(),
            net_payment.normalize()
        ),
    });

    let mut deferrals = Vec::new();
    if net_payment < Decimal::ZERO {
        let shortfall = -net_payment;
        deferrals = waive_shortfall(tx, &period, driver_id, shortfall)?;
        let waived: Decimal = deferrals.iter().map(|d| d.amount).sum();
        net_payment += waived;

        let waived_descriptions: Vec<String> = deferrals.iter().map(|d| d.description.clone()).collect();
        trace.push(AuditStep {
            step_number: trace.next_step_number(),
            rule_id: "shortfall_waiver".to_string(),
            rule_name: "Shortfall Waiver".to_string(),
            input: serde_json::json!({
                "shortfall": shortfall.normalize().to_string(),
            }),
            output: serde_json::json!({
                "waived_total": waived.normalize().to_string(),
                "waived": waived_descriptions,
                "deferral_count": deferrals.len(),
                "net_payment": net_payment.normalize().to_string(),
            }),
            reasoning: format!(
                "Shortfall of ${}: waived ${} of non-critical deductions into {} deferral(s)",
                shortfall.normalize(),
                waived.normalize(),
                deferrals.len()
            ),
        });
    }

    let total_deductions = applied_total(tx, period_id, driver_id);
    let deferred_deductions: Decimal = tx
        .instances_for(period_id, driver_id)
        .into_iter()
        .filter(|i| i.status == DeductionStatus::Waived)
        .map(|i| i.amount)
        .sum();

    let has_negative_balance = net_payment < Decimal::ZERO;
    let balance_alert = has_negative_balance.then(|| {
        format!(
            "Critical deductions of ${} exceed income of ${} after fuel of ${}; driver owes ${}",
            total_deductions.normalize(),
            (earnings.gross_earnings + other_income).normalize(),
            fuel_expenses.normalize(),
            (-net_payment).normalize()
        )
    });
    if let Some(alert) = &balance_alert {
        trace.push(AuditStep {
            step_number: trace.next_step_number(),
            rule_id: "negative_balance".to_string(),
            rule_name: "Negative Balance".to_string(),
            input: serde_json::json!({
                "net_payment": net_payment.normalize().to_string(),
            }),
            output: serde_json::json!({
                "has_negative_balance": true,
            }),
            reasoning: alert.clone(),
        });
    }

    settlement.gross_earnings = earnings.gross_earnings;
    settlement.fuel_expenses = fuel_expenses;
    settlement.other_income = other_income;
    settlement.total_deductions = total_deductions;
    settlement.deferred_deductions = deferred_deductions;
    settlement.net_payment = net_payment;
    settlement.has_negative_balance = has_negative_balance;
    settlement.balance_alert = balance_alert;
    settlement.payment_status = PaymentStatus::Calculated;
    settlement.calculated_revision = tx.input_revision(period_id, driver_id);
    settlement.payment = None;
    tx.update_settlement(settlement.clone())?;

    let deductions = tx
        .instances_for(period_id, driver_id)
        .into_iter()
        .cloned()
        .collect();

    Ok(SettlementCalculation {
        settlement,
        deductions,
        deferrals,
        audit_trace: trace,
    })
}

fn applied_total(tx: &LedgerTx<'_>, period_id: Uuid, driver_id: &str) -> Decimal {
    tx.instances_for(period_id, driver_id)
        .into_iter()
        .filter(|i| i.status == DeductionStatus::Applied)
        .map(|i| i.amount)
        .sum()
}

/// Carries pending deferrals of earlier periods into `period`, oldest first.
fn resolve_deferrals(
    tx: &mut LedgerTx<'_>,
    period: &PaymentPeriod,
    driver_id: &str,
    step_number: u32,
) -> EngineResult<AuditStep> {
    let mut pending: Vec<DeferredDeduction> = tx
        .deferrals_for_driver(driver_id)
        .into_iter()
        .filter(|d| {
            d.status == DeferralStatus::Pending
                && d.company_id == period.company_id
                && d.origin_start_date < period.start_date
        })
        .cloned()
        .collect();
    pending.sort_by(|a, b| {
        a.origin_start_date
            .cmp(&b.origin_start_date)
            .then(a.priority.cmp(&b.priority))
            .then(a.id.cmp(&b.id))
    });

    let generation = tx.generation(period.id, driver_id);
    let mut carried = Decimal::ZERO;
    let mut ids = Vec::new();
    for deferral in pending {
        tx.insert_instance(DeductionInstance {
            id: Uuid::new_v4(),
            period_id: period.id,
            driver_id: driver_id.to_string(),
            amount: deferral.amount,
            priority: deferral.priority,
            critical: false,
            provenance: DeductionProvenance::CarriedOver,
            status: DeductionStatus::Pending,
            source_key: carryover_key(deferral.id),
            description: deferral.description.clone(),
            generation,
        })?;
        carried += deferral.amount;
        ids.push(deferral.id.to_string());
        tx.update_deferral(DeferredDeduction {
            status: DeferralStatus::Resolved,
            target_period_id: Some(period.id),
            ..deferral
        })?;
    }

    Ok(AuditStep {
        step_number,
        rule_id: "deferral_resolution".to_string(),
        rule_name: "Deferral Resolution".to_string(),
        input: serde_json::json!({
            "company_id": period.company_id,
            "driver_id": driver_id,
            "period_start": period.start_date.to_string(),
        }),
        output: serde_json::json!({
            "resolved": ids,
            "carried_total": carried.normalize().to_string(),
        }),
        reasoning: format!(
            "Carried {} deferral(s) totalling ${} from earlier periods",
            ids.len(),
            carried.normalize()
        ),
    })
}

/// Waives non-critical applied instances, lowest rank first, until
/// `shortfall` is covered or nothing waivable remains.
fn waive_shortfall(
    tx: &mut LedgerTx<'_>,
    period: &PaymentPeriod,
    driver_id: &str,
    shortfall: Decimal,
) -> EngineResult<Vec<DeferredDeduction>> {
    let mut candidates: Vec<DeductionInstance> = tx
        .instances_for(period.id, driver_id)
        .into_iter()
        .filter(|i| i.status == DeductionStatus::Applied && !i.critical)
        .cloned()
        .collect();
    candidates.sort_by(waiver_rank);

    let mut remaining = shortfall;
    let mut deferrals = Vec::new();
    while remaining > Decimal::ZERO {
        let Some(instance) = candidates.pop() else {
            break;
        };

        let waived = if instance.amount <= remaining {
            let waived = DeductionInstance {
                status: DeductionStatus::Waived,
                ..instance
            };
            tx.update_instance(waived.clone())?;
            waived
        } else {
            tx.update_instance(DeductionInstance {
                amount: instance.amount - remaining,
                ..instance.clone()
            })?;
            let sibling = DeductionInstance {
                id: Uuid::new_v4(),
                amount: remaining,
                status: DeductionStatus::Waived,
                ..instance
            };
            tx.insert_instance(sibling.clone())?;
            sibling
        };
        remaining -= waived.amount;

        let deferral = DeferredDeduction {
            id: Uuid::new_v4(),
            company_id: period.company_id.clone(),
            driver_id: driver_id.to_string(),
            origin_period_id: period.id,
            origin_start_date: period.start_date,
            origin_instance_id: waived.id,
            amount: waived.amount,
            priority: waived.priority,
            description: waived.description.clone(),
            target_period_id: None,
            status: DeferralStatus::Pending,
        };
        tx.insert_deferral(deferral.clone())?;
        deferrals.push(deferral);
    }

    Ok(deferrals)
}
