//! Period generation functionality.
//!
//! This module partitions a company's calendar into gapless, half-open
//! payment periods according to its configured cadence.

use chrono::{Datelike, Days, Months, NaiveDate};

use crate::config::CompanyCadence;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerRead, LedgerTx};
use crate::models::{AuditStep, PaymentPeriod, PeriodFrequency};

/// The result of a period generation run.
#[derive(Debug, Clone)]
pub struct PeriodGenerationResult {
    /// Periods created by this run, ordered by start date.
    pub periods: Vec<PaymentPeriod>,
    /// Number of candidate periods that already existed and were left alone.
    pub skipped: usize,
    /// The audit step recording this run.
    pub audit_step: AuditStep,
}

/// Computes the `[start, end)` bounds of every period whose start falls in
/// `[range_start, range_end)`.
///
/// The last period may extend past `range_end`; periods are never truncated.
/// `existing_anchor` is the start of any period already generated for the
/// same company and frequency, used to keep fixed-step grids aligned when
/// the cadence has no explicit anchor.
///
/// # Examples
///
/// ```
/// use settlement_engine::calculation::plan_period_bounds;
/// use settlement_engine::config::{CompanyCadence, LoadDeductionPolicy, PayoutRule};
/// use settlement_engine::models::PeriodFrequency;
/// use chrono::NaiveDate;
///
/// let cadence = CompanyCadence {
///     frequency: PeriodFrequency::Weekly,
///     cycle_start_day: 1,
///     anchor_date: None,
///     custom_period_days: None,
///     payout_rule: PayoutRule::default(),
///     load_deductions: LoadDeductionPolicy::default(),
/// };
/// let bounds = plan_period_bounds(
///     &cadence,
///     PeriodFrequency::Weekly,
///     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
///     None,
/// )
/// .unwrap();
/// assert_eq!(bounds.len(), 5);
/// ```
pub fn plan_period_bounds(
    cadence: &CompanyCadence,
    frequency: PeriodFrequency,
    range_start: NaiveDate,
    range_end: NaiveDate,
    existing_anchor: Option<NaiveDate>,
) -> EngineResult<Vec<(NaiveDate, NaiveDate)>> {
    if range_start >= range_end {
        return Err(EngineError::invalid_input(format!(
            "range start {} must be before range end {}",
            range_start, range_end
        )));
    }
    cadence.validate_for(frequency)?;

    let mut bounds = Vec::new();
    match frequency {
        PeriodFrequency::Monthly => {
            let mut start = first_monthly_start(range_start, cadence.cycle_start_day)?;
            while start < range_end {
                let end = add_months(start, 1)?;
                bounds.push((start, end));
                start = end;
            }
        }
        PeriodFrequency::Weekly | PeriodFrequency::Biweekly | PeriodFrequency::Custom => {
            let step = fixed_step_days(cadence, frequency)?;
            let anchor = match frequency {
                PeriodFrequency::Weekly => next_weekday_on_or_after(cadence, range_start)?,
                PeriodFrequency::Custom => cadence
                    .anchor_date
                    .or(existing_anchor)
                    .unwrap_or(range_start),
                _ => match cadence.anchor_date.or(existing_anchor) {
                    Some(anchor) => anchor,
                    None => next_weekday_on_or_after(cadence, range_start)?,
                },
            };

            let mut start = first_grid_point(anchor, range_start, step)?;
            while start < range_end {
                let end = add_days(start, step)?;
                bounds.push((start, end));
                start = end;
            }
        }
    }

    Ok(bounds)
}

/// Generates and persists the periods covering `[range_start, range_end)`.
///
/// Candidates identical to an existing period of the same company and
/// frequency are skipped. A candidate that partially overlaps an existing
/// period fails the whole call with [`EngineError::PeriodOverlap`]; nothing
/// is written in that case.
pub fn generate_periods(
    tx: &mut LedgerTx<'_>,
    cadence: &CompanyCadence,
    company_id: &str,
    frequency: PeriodFrequency,
    range_start: NaiveDate,
    range_end: NaiveDate,
    step_number: u32,
) -> EngineResult<PeriodGenerationResult> {
    let existing: Vec<PaymentPeriod> = tx
        .periods_for_company(company_id, Some(frequency))
        .into_iter()
        .cloned()
        .collect();
    let existing_anchor = existing.first().map(|p| p.start_date);

    let bounds = plan_period_bounds(cadence, frequency, range_start, range_end, existing_anchor)?;

    let mut periods = Vec::new();
    let mut skipped = 0;
    for (start, end) in bounds {
        if existing
            .iter()
            .any(|p| p.start_date == start && p.end_date == end)
        {
            skipped += 1;
            continue;
        }
        if let Some(clash) = existing.iter().find(|p| p.overlaps(start, end)) {
            return Err(EngineError::PeriodOverlap {
                start,
                end,
                existing_id: clash.id,
            });
        }

        let last_day = end.pred_opt().unwrap_or(end);
        let payout_date = cadence.payout_rule.payout_date(last_day)?;
        let period = PaymentPeriod::new(company_id, frequency, start, end, payout_date);
        tx.insert_period(period.clone())?;
        periods.push(period);
    }

    let audit_step = AuditStep {
        step_number,
        rule_id: "period_generation".to_string(),
        rule_name: "Period Generation".to_string(),
        input: serde_json::json!({
            "company_id": company_id,
            "frequency": frequency.to_string(),
            "range_start": range_start.to_string(),
            "range_end": range_end.to_string(),
            "cycle_start_day": cadence.cycle_start_day,
        }),
        output: serde_json::json!({
            "created": periods.len(),
            "skipped": skipped,
            "first_start": periods.first().map(|p| p.start_date.to_string()),
            "last_end": periods.last().map(|p| p.end_date.to_string()),
        }),
        reasoning: format!(
            "Generated {} {} period(s) for {} between {} and {}, {} already present",
            periods.len(),
            frequency,
            company_id,
            range_start,
            range_end,
            skipped
        ),
    };

    Ok(PeriodGenerationResult {
        periods,
        skipped,
        audit_step,
    })
}

fn fixed_step_days(cadence: &CompanyCadence, frequency: PeriodFrequency) -> EngineResult<u64> {
    match frequency {
        PeriodFrequency::Weekly => Ok(7),
        PeriodFrequency::Biweekly => Ok(14),
        PeriodFrequency::Custom => cadence
            .custom_period_days
            .map(u64::from)
            .ok_or_else(|| EngineError::configuration("custom frequency requires custom_period_days")),
        PeriodFrequency::Monthly => Err(EngineError::configuration(
            "monthly periods do not have a fixed step",
        )),
    }
}

fn next_weekday_on_or_after(cadence: &CompanyCadence, date: NaiveDate) -> EngineResult<NaiveDate> {
    let weekday = cadence.start_weekday()?;
    let ahead = (7 + weekday.num_days_from_monday() - date.weekday().num_days_from_monday()) % 7;
    add_days(date, u64::from(ahead))
}

/// First date on the grid `anchor + k * step` that is on or after `from`.
fn first_grid_point(anchor: NaiveDate, from: NaiveDate, step: u64) -> EngineResult<NaiveDate> {
    let step = step as i64;
    let offset = (from - anchor).num_days();
    let mut k = offset.div_euclid(step);
    if offset.rem_euclid(step) != 0 {
        k += 1;
    }
    anchor
        .checked_add_signed(chrono::Duration::days(k * step))
        .ok_or_else(|| EngineError::invalid_input("period grid falls outside the calendar"))
}

fn first_monthly_start(range_start: NaiveDate, day: u32) -> EngineResult<NaiveDate> {
    let candidate = NaiveDate::from_ymd_opt(range_start.year(), range_start.month(), day)
        .ok_or_else(|| {
            EngineError::configuration(format!("cycle_start_day {} is not a valid day", day))
        })?;
    if candidate >= range_start {
        Ok(candidate)
    } else {
        add_months(candidate, 1)
    }
}

fn add_days(date: NaiveDate, days: u64) -> EngineResult<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| EngineError::invalid_input("period boundary falls outside the calendar"))
}

fn add_months(date: NaiveDate, months: u32) -> EngineResult<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| EngineError::invalid_input("period boundary falls outside the calendar"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadDeductionPolicy, PayoutRule};
    use crate::ledger::Ledger;
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cadence(frequency: PeriodFrequency, cycle_start_day: u32) -> CompanyCadence {
        CompanyCadence {
            frequency,
            cycle_start_day,
            anchor_date: None,
            custom_period_days: None,
            payout_rule: PayoutRule::DaysAfterEnd { days: 3 },
            load_deductions: LoadDeductionPolicy::default(),
        }
    }

    fn assert_gapless(bounds: &[(NaiveDate, NaiveDate)]) {
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "gap or overlap between {:?}", pair);
        }
    }

    // ==========================================================================
    // Weekly cadence
    // ==========================================================================

    /// Five Mondays start in January 2024.
    #[test]
    fn test_weekly_january_produces_five_periods() {
        let bounds = plan_period_bounds(
            &cadence(PeriodFrequency::Weekly, 1),
            PeriodFrequency::Weekly,
            date(2024, 1, 1),
            date(2024, 2, 1),
            None,
        )
        .unwrap();

        assert_eq!(bounds.len(), 5);
        assert_eq!(bounds[0].0, date(2024, 1, 1));
        assert_eq!(bounds[4].0, date(2024, 1, 29));
        assert!(bounds.iter().all(|(s, e)| (*e - *s).num_days() == 7));
        assert!(bounds.iter().all(|(s, _)| s.weekday() == Weekday::Mon));
        assert_gapless(&bounds);
    }

    #[test]
    fn test_weekly_starts_on_first_cycle_weekday_on_or_after_range_start() {
        // 2024-01-03 is a Wednesday; Friday cycles start 2024-01-05.
        let bounds = plan_period_bounds(
            &cadence(PeriodFrequency::Weekly, 5),
            PeriodFrequency::Weekly,
            date(2024, 1, 3),
            date(2024, 1, 20),
            None,
        )
        .unwrap();

        assert_eq!(bounds[0], (date(2024, 1, 5), date(2024, 1, 12)));
        assert_eq!(bounds.len(), 3);
    }

    #[test]
    fn test_invalid_weekday_is_configuration_error() {
        let result = plan_period_bounds(
            &cadence(PeriodFrequency::Weekly, 9),
            PeriodFrequency::Weekly,
            date(2024, 1, 1),
            date(2024, 2, 1),
            None,
        );
        assert!(matches!(result, Err(EngineError::Configuration { .. })));
    }

    #[test]
    fn test_empty_range_is_invalid_input() {
        let result = plan_period_bounds(
            &cadence(PeriodFrequency::Weekly, 1),
            PeriodFrequency::Weekly,
            date(2024, 2, 1),
            date(2024, 2, 1),
            None,
        );
        assert!(matches!(result, Err(EngineError::InvalidInput { .. })));
    }

    // ==========================================================================
    // Biweekly and custom cadence
    // ==========================================================================

    #[test]
    fn test_biweekly_aligns_to_anchor() {
        let mut biweekly = cadence(PeriodFrequency::Biweekly, 1);
        biweekly.anchor_date = Some(date(2024, 1, 1));

        let bounds = plan_period_bounds(
            &biweekly,
            PeriodFrequency::Biweekly,
            date(2024, 1, 10),
            date(2024, 3, 1),
            None,
        )
        .unwrap();

        assert_eq!(bounds[0].0, date(2024, 1, 15));
        assert!(bounds.iter().all(|(s, e)| (*e - *s).num_days() == 14));
        assert_gapless(&bounds);
    }

    #[test]
    fn test_biweekly_follows_existing_grid_without_anchor() {
        let bounds = plan_period_bounds(
            &cadence(PeriodFrequency::Biweekly, 1),
            PeriodFrequency::Biweekly,
            date(2024, 2, 5),
            date(2024, 3, 1),
            Some(date(2024, 1, 1)),
        )
        .unwrap();

        // 2024-02-05 is five weeks after the existing grid; next point is 02-12.
        assert_eq!(bounds[0].0, date(2024, 2, 12));
    }

    #[test]
    fn test_custom_step() {
        let mut custom = cadence(PeriodFrequency::Custom, 1);
        custom.custom_period_days = Some(10);

        let bounds = plan_period_bounds(
            &custom,
            PeriodFrequency::Custom,
            date(2024, 1, 1),
            date(2024, 1, 31),
            None,
        )
        .unwrap();

        assert_eq!(
            bounds,
            vec![
                (date(2024, 1, 1), date(2024, 1, 11)),
                (date(2024, 1, 11), date(2024, 1, 21)),
                (date(2024, 1, 21), date(2024, 1, 31)),
            ]
        );
    }

    #[test]
    fn test_custom_without_length_is_configuration_error() {
        let result = plan_period_bounds(
            &cadence(PeriodFrequency::Custom, 1),
            PeriodFrequency::Custom,
            date(2024, 1, 1),
            date(2024, 1, 31),
            None,
        );
        assert!(matches!(result, Err(EngineError::Configuration { .. })));
    }

    // ==========================================================================
    // Monthly cadence
    // ==========================================================================

    #[test]
    fn test_monthly_uses_cycle_day() {
        let bounds = plan_period_bounds(
            &cadence(PeriodFrequency::Monthly, 15),
            PeriodFrequency::Monthly,
            date(2024, 1, 20),
            date(2024, 4, 1),
            None,
        )
        .unwrap();

        assert_eq!(
            bounds,
            vec![
                (date(2024, 2, 15), date(2024, 3, 15)),
                (date(2024, 3, 15), date(2024, 4, 15)),
            ]
        );
    }

    #[test]
    fn test_monthly_cycle_day_out_of_range() {
        let result = plan_period_bounds(
            &cadence(PeriodFrequency::Monthly, 31),
            PeriodFrequency::Monthly,
            date(2024, 1, 1),
            date(2024, 4, 1),
            None,
        );
        assert!(matches!(result, Err(EngineError::Configuration { .. })));
    }

    // ==========================================================================
    // Persistence
    // ==========================================================================

    #[test]
    fn test_generate_persists_periods_with_payout_dates() {
        let ledger = Ledger::new();
        let weekly = cadence(PeriodFrequency::Weekly, 1);

        let result = ledger
            .transaction(|tx| {
                generate_periods(
                    tx,
                    &weekly,
                    "acme",
                    PeriodFrequency::Weekly,
                    date(2024, 1, 1),
                    date(2024, 1, 15),
                    1,
                )
            })
            .unwrap();

        assert_eq!(result.periods.len(), 2);
        // Last day is Sunday 2024-01-07, paid three days later.
        assert_eq!(result.periods[0].payout_date, date(2024, 1, 10));
        assert_eq!(result.audit_step.rule_id, "period_generation");
        assert_eq!(
            ledger.read(|s| s.periods_for_company("acme", None).len()),
            2
        );
    }

    #[test]
    fn test_regenerating_overlapping_range_is_a_no_op_for_existing() {
        let ledger = Ledger::new();
        let weekly = cadence(PeriodFrequency::Weekly, 1);
        let run = |start, end| {
            ledger.transaction(|tx| {
                generate_periods(tx, &weekly, "acme", PeriodFrequency::Weekly, start, end, 1)
            })
        };

        run(date(2024, 1, 1), date(2024, 1, 15)).unwrap();
        let second = run(date(2024, 1, 1), date(2024, 1, 29)).unwrap();

        assert_eq!(second.skipped, 2);
        assert_eq!(second.periods.len(), 2);
        assert_eq!(
            ledger.read(|s| s.periods_for_company("acme", None).len()),
            4
        );
    }

    #[test]
    fn test_misaligned_regeneration_fails_without_writing() {
        let ledger = Ledger::new();
        let mut custom = cadence(PeriodFrequency::Custom, 1);
        custom.custom_period_days = Some(10);
        ledger
            .transaction(|tx| {
                generate_periods(
                    tx,
                    &custom,
                    "acme",
                    PeriodFrequency::Custom,
                    date(2024, 1, 1),
                    date(2024, 1, 21),
                    1,
                )
            })
            .unwrap();

        let mut shifted = custom.clone();
        shifted.anchor_date = Some(date(2024, 1, 5));
        let result = ledger.transaction(|tx| {
            generate_periods(
                tx,
                &shifted,
                "acme",
                PeriodFrequency::Custom,
                date(2024, 1, 1),
                date(2024, 2, 1),
                1,
            )
        });

        assert!(matches!(result, Err(EngineError::PeriodOverlap { .. })));
        assert_eq!(
            ledger.read(|s| s.periods_for_company("acme", None).len()),
            2
        );
    }
}
