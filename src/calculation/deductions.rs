//! Deduction materialization functionality.
//!
//! Turns revenue unit percentage rates and recurring deduction templates into
//! concrete [`DeductionInstance`]s for one (period, driver) pair.
//!
//! Regeneration is versioned: every run removes the generated instances that
//! are still open (`pending`/`applied`), rebuilds them from their sources and
//! advances the pair's generation counter. Manual instances survive, and so
//! does any amount already carried to another period, which is subtracted
//! from the regenerated source so it is never charged twice.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::config::SettlementConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerRead, LedgerTx};
use crate::models::{
    AuditStep, DeductionInstance, DeductionProvenance, DeductionStatus, DeductionTemplate,
    DeferralStatus, DeferredDeduction, LoadRateKind, PeriodFrequency,
};

/// Number of decimal places money is rounded to.
pub const CURRENCY_DECIMAL_PLACES: u32 = 2;

/// The result of materializing deductions for a (period, driver) pair.
#[derive(Debug, Clone)]
pub struct DeductionMaterialization {
    /// Every instance of the pair after regeneration, ordered by source key.
    pub instances: Vec<DeductionInstance>,
    /// The generation the regenerated instances carry.
    pub generation: u64,
    /// The audit step recording this materialization.
    pub audit_step: AuditStep,
}

/// Rounds a money amount to cents, halves away from zero.
///
/// # Examples
///
/// ```
/// use settlement_engine::calculation::round_currency;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// assert_eq!(round_currency(Decimal::from_str("10.125").unwrap()), Decimal::from_str("10.13").unwrap());
/// assert_eq!(round_currency(Decimal::from_str("10.124").unwrap()), Decimal::from_str("10.12").unwrap());
/// ```
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(
        CURRENCY_DECIMAL_PLACES,
        RoundingStrategy::MidpointAwayFromZero,
    )
}

/// The deduction a percentage `rate` takes from a unit worth `total`.
pub fn load_percentage_amount(total: Decimal, rate: Decimal) -> Decimal {
    round_currency(total * rate / Decimal::ONE_HUNDRED)
}

/// Counts how many times `template` falls due within `[start, end)`.
///
/// Weekly and biweekly templates fall due every 7 or 14 days counted from
/// `effective_from`; monthly templates fall due on `month_day` (default the
/// 1st) of each calendar month. Only due dates inside the template's
/// effective window count. A monthly template therefore charges exactly one
/// weekly period per month, while a weekly template charges a monthly period
/// once per week it covers.
pub fn template_occurrences(template: &DeductionTemplate, start: NaiveDate, end: NaiveDate) -> u32 {
    if start >= end {
        return 0;
    }

    let mut count = 0;
    match template.frequency {
        PeriodFrequency::Weekly | PeriodFrequency::Biweekly => {
            let step = if template.frequency == PeriodFrequency::Weekly {
                7
            } else {
                14
            };
            let mut due = template.effective_from;
            if due < start {
                let behind = (start - due).num_days();
                let steps = (behind + step - 1) / step;
                match due.checked_add_days(Days::new((steps * step) as u64)) {
                    Some(first) => due = first,
                    None => return 0,
                }
            }
            while due < end {
                if template.is_effective_on(due) {
                    count += 1;
                }
                match due.checked_add_days(Days::new(step as u64)) {
                    Some(next) => due = next,
                    None => break,
                }
            }
        }
        PeriodFrequency::Monthly => {
            let day = template.month_day.unwrap_or(1);
            let (mut year, mut month) = (start.year(), start.month());
            loop {
                let Some(due) = NaiveDate::from_ymd_opt(year, month, day) else {
                    break;
                };
                if due >= end {
                    break;
                }
                if due >= start && template.is_effective_on(due) {
                    count += 1;
                }
                if month == 12 {
                    year += 1;
                    month = 1;
                } else {
                    month += 1;
                }
            }
        }
        PeriodFrequency::Custom => {}
    }
    count
}

/// A regenerable charge before retained amounts are subtracted.
struct Source {
    amount: Decimal,
    priority: u32,
    critical: bool,
    provenance: DeductionProvenance,
    description: String,
}

/// Regenerates the generated deductions of `(period_id, driver_id)`.
///
/// Runs inside the caller's transaction so the delete and the inserts it is
/// paired with commit together or not at all. The pair's input revision is
/// bumped, so a settlement calculated before the call must be recalculated
/// before it can be paid.
///
/// # Errors
///
/// - [`EngineError::PeriodLocked`] if the period is locked.
/// - [`EngineError::StaleRecalculation`] if the pair's settlement is paid.
pub fn materialize_deductions(
    tx: &mut LedgerTx<'_>,
    config: &SettlementConfig,
    period_id: Uuid,
    driver_id: &str,
    step_number: u32,
) -> EngineResult<DeductionMaterialization> {
    let materialized = regenerate_deductions(tx, config, period_id, driver_id, step_number)?;
    tx.bump_input_revision(period_id, driver_id)?;
    Ok(materialized)
}

/// Regeneration without the revision bump, for callers that recalculate
/// the settlement in the same transaction.
pub(crate) fn regenerate_deductions(
    tx: &mut LedgerTx<'_>,
    config: &SettlementConfig,
    period_id: Uuid,
    driver_id: &str,
    step_number: u32,
) -> EngineResult<DeductionMaterialization> {
    let period = tx.open_period(period_id)?.clone();
    if let Some(settlement) = tx.settlement_for(period_id, driver_id) {
        if settlement.is_paid() {
            return Err(EngineError::StaleRecalculation {
                settlement_id: settlement.id,
                reason: "settlement is already paid".to_string(),
            });
        }
    }
    let policy = config.cadence(&period.company_id)?.load_deductions.clone();

    // Waivers that were never carried anywhere go back into the pool.
    let unresolved: Vec<_> = tx
        .deferrals_originating(period_id)
        .into_iter()
        .filter(|d| d.driver_id == driver_id && d.status == DeferralStatus::Pending)
        .cloned()
        .collect();
    for deferral in unresolved {
        tx.delete_deferral(deferral.id)?;
        let origin = tx.instance(deferral.origin_instance_id)?.clone();
        if origin.provenance.is_generated() {
            tx.delete_instance(origin.id)?;
            continue;
        }

        // A waived piece split off a manual deduction is folded back into it.
        let parent = tx
            .instances_for(period_id, driver_id)
            .into_iter()
            .find(|i| {
                i.id != origin.id
                    && i.source_key == origin.source_key
                    && i.status != DeductionStatus::Waived
            })
            .cloned();
        match parent {
            Some(parent) => {
                tx.delete_instance(origin.id)?;
                tx.update_instance(DeductionInstance {
                    amount: parent.amount + origin.amount,
                    ..parent
                })?;
            }
            None => tx.update_instance(DeductionInstance {
                status: DeductionStatus::Pending,
                ..origin
            })?,
        }
    }

    let replaced: Vec<Uuid> = tx
        .instances_for(period_id, driver_id)
        .into_iter()
        .filter(|i| i.provenance.is_generated() && i.status != DeductionStatus::Waived)
        .map(|i| i.id)
        .collect();
    for id in replaced {
        tx.delete_instance(id)?;
    }

    // Amounts already waived and carried elsewhere, per source.
    let mut retained: BTreeMap<String, Decimal> = BTreeMap::new();
    for instance in tx.instances_for(period_id, driver_id) {
        if instance.provenance.is_generated() && instance.status == DeductionStatus::Waived {
            *retained.entry(instance.source_key.clone()).or_default() += instance.amount;
        }
    }

    let mut sources: BTreeMap<String, Source> = BTreeMap::new();

    for unit in tx.units_for(period_id, driver_id) {
        for kind in LoadRateKind::ALL {
            let rate = unit.rate(kind);
            if rate.is_zero() {
                continue;
            }
            sources.insert(
                format!("load:{}:{}", unit.id, kind.as_str()),
                Source {
                    amount: load_percentage_amount(unit.total_amount, rate),
                    priority: policy.priority,
                    critical: policy.critical,
                    provenance: DeductionProvenance::FromLoadPercentage,
                    description: format!(
                        "{} {}% on {}",
                        kind.as_str(),
                        rate.normalize(),
                        unit.id
                    ),
                },
            );
        }
    }

    for template in config.templates_for_driver(driver_id) {
        if tx.is_excluded(period_id, driver_id, &template.id) {
            continue;
        }
        let occurrences = template_occurrences(template, period.start_date, period.end_date);
        if occurrences == 0 {
            continue;
        }
        sources.insert(
            format!("template:{}", template.id),
            Source {
                amount: template.amount * Decimal::from(occurrences),
                priority: template.priority,
                critical: template.critical,
                provenance: DeductionProvenance::FromTemplate,
                description: template.description.clone(),
            },
        );
    }

    // Carryovers stay here only if part of them has already moved on;
    // otherwise they are released for the calculator to resolve again.
    let carried: Vec<_> = tx
        .deferrals_for_driver(driver_id)
        .into_iter()
        .filter(|d| {
            d.status == DeferralStatus::Resolved
                && d.target_period_id == Some(period_id)
        })
        .cloned()
        .collect();
    for deferral in carried {
        let key = carryover_key(deferral.id);
        if retained.get(&key).is_some_and(|r| !r.is_zero()) {
            sources.insert(
                key,
                Source {
                    amount: deferral.amount,
                    priority: deferral.priority,
                    critical: false,
                    provenance: DeductionProvenance::CarriedOver,
                    description: deferral.description.clone(),
                },
            );
        } else {
            tx.update_deferral(DeferredDeduction {
                status: DeferralStatus::Pending,
                target_period_id: None,
                ..deferral
            })?;
        }
    }

    let generation = tx.next_generation(period_id, driver_id)?;
    let mut created = 0;
    for (source_key, source) in sources {
        let amount = source.amount - retained.get(&source_key).copied().unwrap_or_default();
        if amount <= Decimal::ZERO {
            continue;
        }
        tx.insert_instance(DeductionInstance {
            id: Uuid::new_v4(),
            period_id,
            driver_id: driver_id.to_string(),
            amount,
            priority: source.priority,
            critical: source.critical,
            provenance: source.provenance,
            status: DeductionStatus::Pending,
            source_key,
            description: source.description,
            generation,
        })?;
        created += 1;
    }

    let instances: Vec<DeductionInstance> = tx
        .instances_for(period_id, driver_id)
        .into_iter()
        .cloned()
        .collect();
    let open_total: Decimal = instances
        .iter()
        .filter(|i| i.status != DeductionStatus::Waived)
        .map(|i| i.amount)
        .sum();

    let audit_step = AuditStep {
        step_number,
        rule_id: "deduction_materialization".to_string(),
        rule_name: "Deduction Materialization".to_string(),
        input: serde_json::json!({
            "period_id": period_id.to_string(),
            "driver_id": driver_id,
            "period_start": period.start_date.to_string(),
            "period_end": period.end_date.to_string(),
        }),
        output: serde_json::json!({
            "generated": created,
            "instance_count": instances.len(),
            "open_total": open_total.normalize().to_string(),
        }),
        reasoning: format!(
            "Regenerated {} instance(s); {} on the pair with ${} open",
            created,
            instances.len(),
            open_total.normalize()
        ),
    };

    Ok(DeductionMaterialization {
        instances,
        generation,
        audit_step,
    })
}

/// Records a manual deduction for a (period, driver) pair.
///
/// Manual instances are never touched by regeneration.
pub fn add_manual_deduction(
    tx: &mut LedgerTx<'_>,
    period_id: Uuid,
    driver_id: &str,
    amount: Decimal,
    priority: u32,
    critical: bool,
    description: &str,
) -> EngineResult<DeductionInstance> {
    tx.open_period(period_id)?;
    if amount <= Decimal::ZERO {
        return Err(EngineError::invalid_input(format!(
            "deduction amount {} must be positive",
            amount
        )));
    }
    let settlement = tx.ensure_settlement(period_id, driver_id)?;
    if settlement.is_paid() {
        return Err(EngineError::StaleRecalculation {
            settlement_id: settlement.id,
            reason: "settlement is already paid".to_string(),
        });
    }

    let id = Uuid::new_v4();
    let instance = DeductionInstance {
        id,
        period_id,
        driver_id: driver_id.to_string(),
        amount: round_currency(amount),
        priority,
        critical,
        provenance: DeductionProvenance::Manual,
        status: DeductionStatus::Pending,
        source_key: format!("manual:{}", id),
        description: description.to_string(),
        generation: tx.generation(period_id, driver_id),
    };
    tx.insert_instance(instance.clone())?;
    tx.bump_input_revision(period_id, driver_id)?;
    Ok(instance)
}

/// Source key of the instance a deferral is carried into.
pub(crate) fn carryover_key(deferral_id: Uuid) -> String {
    format!("carryover:{}", deferral_id)
}
