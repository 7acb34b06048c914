//! Configuration types for period cadence and recurring deductions.
//!
//! This module contains the strongly-typed configuration structures that
//! are deserialized from YAML configuration files.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::models::{DeductionTemplate, PeriodFrequency};

/// Longest custom period accepted.
pub const MAX_CUSTOM_PERIOD_DAYS: u32 = 366;

/// Longest wait between a period's last day and its payout.
pub const MAX_PAYOUT_DELAY_DAYS: u32 = 366;

/// Latest day of month a monthly cycle may start on.
///
/// Every month has this day, so monthly boundaries never need clamping.
pub const MAX_MONTHLY_CYCLE_DAY: u32 = 28;

/// Converts an ISO weekday number (1 = Monday .. 7 = Sunday).
pub fn iso_weekday(day: u32) -> Option<Weekday> {
    match day {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Rule for deriving a period's scheduled payout date from its last day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayoutRule {
    /// Pay a fixed number of days after the last day of the period.
    DaysAfterEnd {
        /// Days to wait after the last day.
        days: u32,
    },
    /// Pay on the first given ISO weekday strictly after the last day.
    NextWeekday {
        /// ISO weekday number (1 = Monday .. 7 = Sunday).
        weekday: u32,
    },
}

impl Default for PayoutRule {
    fn default() -> Self {
        PayoutRule::DaysAfterEnd { days: 0 }
    }
}

impl PayoutRule {
    /// Computes the payout date for a period ending on `last_day`.
    pub fn payout_date(&self, last_day: NaiveDate) -> EngineResult<NaiveDate> {
        match self {
            PayoutRule::DaysAfterEnd { days } => last_day
                .checked_add_days(Days::new(u64::from(*days)))
                .ok_or_else(|| past_calendar_end(last_day)),
            PayoutRule::NextWeekday { weekday } => {
                let target = iso_weekday(*weekday).ok_or_else(|| {
                    EngineError::configuration(format!(
                        "payout weekday {} is not an ISO weekday (1-7)",
                        weekday
                    ))
                })?;
                let mut date = last_day;
                loop {
                    date = date.succ_opt().ok_or_else(|| past_calendar_end(last_day))?;
                    if date.weekday() == target {
                        return Ok(date);
                    }
                }
            }
        }
    }
}

fn past_calendar_end(last_day: NaiveDate) -> EngineError {
    EngineError::configuration(format!(
        "payout date for a period ending {} is past the end of the calendar",
        last_day
    ))
}

/// How generated load-percentage deductions rank against other deductions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadDeductionPolicy {
    /// Priority assigned to load-percentage instances.
    #[serde(default = "default_load_priority")]
    pub priority: u32,
    /// Whether load-percentage instances are critical (never waived).
    #[serde(default = "default_load_critical")]
    pub critical: bool,
}

fn default_load_priority() -> u32 {
    1
}

fn default_load_critical() -> bool {
    true
}

impl Default for LoadDeductionPolicy {
    fn default() -> Self {
        Self {
            priority: default_load_priority(),
            critical: default_load_critical(),
        }
    }
}

/// A company's payment cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompanyCadence {
    /// The company's default period frequency.
    pub frequency: PeriodFrequency,
    /// ISO weekday for weekly/biweekly cycles, day of month for monthly.
    pub cycle_start_day: u32,
    /// Grid anchor for biweekly and custom cycles.
    #[serde(default)]
    pub anchor_date: Option<NaiveDate>,
    /// Period length for custom cycles.
    #[serde(default)]
    pub custom_period_days: Option<u32>,
    /// Scheduled payout date rule.
    #[serde(default)]
    pub payout_rule: PayoutRule,
    /// Ranking of generated load-percentage deductions.
    #[serde(default)]
    pub load_deductions: LoadDeductionPolicy,
}

impl CompanyCadence {
    /// Checks that the cadence resolves to a deterministic step function
    /// for `frequency`.
    pub fn validate_for(&self, frequency: PeriodFrequency) -> EngineResult<()> {
        match frequency {
            PeriodFrequency::Weekly | PeriodFrequency::Biweekly => {
                let weekday = self.start_weekday()?;
                if let Some(anchor) = self.anchor_date {
                    if frequency == PeriodFrequency::Biweekly && anchor.weekday() != weekday {
                        return Err(EngineError::configuration(format!(
                            "anchor_date {} is a {:?}, cycle starts on {:?}",
                            anchor,
                            anchor.weekday(),
                            weekday
                        )));
                    }
                }
            }
            PeriodFrequency::Monthly => {
                if !(1..=MAX_MONTHLY_CYCLE_DAY).contains(&self.cycle_start_day) {
                    return Err(EngineError::configuration(format!(
                        "cycle_start_day {} is outside 1-{} for monthly periods",
                        self.cycle_start_day, MAX_MONTHLY_CYCLE_DAY
                    )));
                }
            }
            PeriodFrequency::Custom => match self.custom_period_days {
                Some(days) if (1..=MAX_CUSTOM_PERIOD_DAYS).contains(&days) => {}
                Some(days) => {
                    return Err(EngineError::configuration(format!(
                        "custom_period_days {} is outside 1-{}",
                        days, MAX_CUSTOM_PERIOD_DAYS
                    )));
                }
                None => {
                    return Err(EngineError::configuration(
                        "custom frequency requires custom_period_days",
                    ));
                }
            },
        }

        match self.payout_rule {
            PayoutRule::DaysAfterEnd { days } if days > MAX_PAYOUT_DELAY_DAYS => {
                return Err(EngineError::configuration(format!(
                    "payout delay of {} days exceeds {}",
                    days, MAX_PAYOUT_DELAY_DAYS
                )));
            }
            PayoutRule::NextWeekday { weekday } if iso_weekday(weekday).is_none() => {
                return Err(EngineError::configuration(format!(
                    "payout weekday {} is not an ISO weekday (1-7)",
                    weekday
                )));
            }
            _ => {}
        }

        Ok(())
    }

    /// The weekday weekly and biweekly cycles start on.
    pub fn start_weekday(&self) -> EngineResult<Weekday> {
        iso_weekday(self.cycle_start_day).ok_or_else(|| {
            EngineError::configuration(format!(
                "cycle_start_day {} is not an ISO weekday (1-7)",
                self.cycle_start_day
            ))
        })
    }
}

/// Companies configuration file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct CompaniesConfig {
    /// Map of company id to cadence.
    pub companies: HashMap<String, CompanyCadence>,
}

/// Deduction templates configuration file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    /// Recurring deduction templates.
    #[serde(default)]
    pub templates: Vec<DeductionTemplate>,
}

/// The complete settlement configuration.
#[derive(Debug, Clone, Default)]
pub struct SettlementConfig {
    companies: HashMap<String, CompanyCadence>,
    templates: Vec<DeductionTemplate>,
}

impl SettlementConfig {
    /// Creates a configuration, rejecting invalid cadences and templates.
    ///
    /// Each cadence is checked against its own frequency here. Other
    /// frequencies are checked when periods are generated with them.
    pub fn new(
        companies: HashMap<String, CompanyCadence>,
        templates: Vec<DeductionTemplate>,
    ) -> EngineResult<Self> {
        for (company_id, cadence) in &companies {
            cadence
                .validate_for(cadence.frequency)
                .map_err(|e| match e {
                    EngineError::Configuration { message } => EngineError::configuration(
                        format!("company '{}': {}", company_id, message),
                    ),
                    other => other,
                })?;
        }
        for template in &templates {
            validate_template(template)?;
        }
        let mut templates = templates;
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Self {
            companies,
            templates,
        })
    }

    /// Returns the cadence for a company.
    pub fn cadence(&self, company_id: &str) -> EngineResult<&CompanyCadence> {
        self.companies.get(company_id).ok_or_else(|| {
            EngineError::configuration(format!(
                "no cadence configured for company '{}'",
                company_id
            ))
        })
    }

    /// Returns all company cadences.
    pub fn companies(&self) -> &HashMap<String, CompanyCadence> {
        &self.companies
    }

    /// Returns all templates, ordered by id.
    pub fn templates(&self) -> &[DeductionTemplate] {
        &self.templates
    }

    /// Active templates charging `driver_id`, ordered by id.
    pub fn templates_for_driver<'a>(
        &'a self,
        driver_id: &'a str,
    ) -> impl Iterator<Item = &'a DeductionTemplate> + 'a {
        self.templates
            .iter()
            .filter(move |t| t.active && t.driver_id == driver_id)
    }
}

fn validate_template(template: &DeductionTemplate) -> EngineResult<()> {
    let invalid = |message: String| {
        Err(EngineError::configuration(format!(
            "template '{}': {}",
            template.id, message
        )))
    };

    if template.amount <= rust_decimal::Decimal::ZERO {
        return invalid(format!("amount {} must be positive", template.amount));
    }
    if template.frequency == PeriodFrequency::Custom {
        return invalid("custom frequency is not supported for templates".to_string());
    }
    if let Some(until) = template.effective_until {
        if until < template.effective_from {
            return invalid(format!(
                "effective_until {} is before effective_from {}",
                until, template.effective_from
            ));
        }
    }
    if let Some(day) = template.month_day {
        if !(1..=MAX_MONTHLY_CYCLE_DAY).contains(&day) {
            return invalid(format!(
                "month_day {} is outside 1-{}",
                day, MAX_MONTHLY_CYCLE_DAY
            ));
        }
    }
    Ok(())
}
