//! Ledger record books.
//!
//! Periods and payouts live in one [`PeriodBook`]. Every other record is
//! owned by exactly one driver and lives in that driver's [`DriverBook`],
//! indexed by period so a pair's records are found without scanning
//! anything else.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::models::{
    DeductionInstance, DeferredDeduction, DriverSettlement, FuelExpense, OtherIncome,
    PaymentPeriod, PayoutRecord, RevenueUnit,
};

/// Records that belong to at most one period.
pub(super) trait PeriodScoped {
    fn scope(&self) -> Option<Uuid>;
}

impl PeriodScoped for RevenueUnit {
    fn scope(&self) -> Option<Uuid> {
        self.period_id
    }
}

impl PeriodScoped for DeductionInstance {
    fn scope(&self) -> Option<Uuid> {
        Some(self.period_id)
    }
}

impl PeriodScoped for DeferredDeduction {
    fn scope(&self) -> Option<Uuid> {
        Some(self.origin_period_id)
    }
}

impl PeriodScoped for OtherIncome {
    fn scope(&self) -> Option<Uuid> {
        Some(self.period_id)
    }
}

impl PeriodScoped for FuelExpense {
    fn scope(&self) -> Option<Uuid> {
        Some(self.period_id)
    }
}

/// Rows keyed by id with a secondary index by period.
#[derive(Debug)]
pub(super) struct Table<K, V> {
    rows: BTreeMap<K, V>,
    by_period: BTreeMap<Uuid, BTreeSet<K>>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            by_period: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: PeriodScoped> Table<K, V> {
    pub(super) fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.rows.get(key)
    }

    pub(super) fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.rows.values()
    }

    /// Rows of one period, ordered by key.
    pub(super) fn in_period(&self, period_id: Uuid) -> impl Iterator<Item = &V> + '_ {
        self.by_period
            .get(&period_id)
            .into_iter()
            .flatten()
            .filter_map(move |key| self.rows.get(key))
    }

    /// Replaces the row at `key` (removing it on `None`) and returns what
    /// was there before.
    pub(super) fn set(&mut self, key: K, value: Option<V>) -> Option<V> {
        let previous = self.rows.remove(&key);
        if let Some(period_id) = previous.as_ref().and_then(|row| row.scope()) {
            if let Some(keys) = self.by_period.get_mut(&period_id) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.by_period.remove(&period_id);
                }
            }
        }
        if let Some(value) = value {
            if let Some(period_id) = value.scope() {
                self.by_period
                    .entry(period_id)
                    .or_default()
                    .insert(key.clone());
            }
            self.rows.insert(key, value);
        }
        previous
    }
}

/// Payment periods and the payout records of locked ones.
#[derive(Debug, Default)]
pub struct PeriodBook {
    pub(super) periods: BTreeMap<Uuid, PaymentPeriod>,
    pub(super) payouts: BTreeMap<Uuid, PayoutRecord>,
}

/// Everything the ledger holds for one driver.
///
/// Maps are ordered so that iteration, and therefore every calculation
/// built on it, is deterministic.
#[derive(Debug, Default)]
pub struct DriverBook {
    /// Settlement rows keyed by period.
    pub(super) settlements: BTreeMap<Uuid, DriverSettlement>,
    /// Settlement id to period.
    pub(super) settlement_periods: BTreeMap<Uuid, Uuid>,
    pub(super) units: Table<String, RevenueUnit>,
    pub(super) instances: Table<Uuid, DeductionInstance>,
    /// Deferrals indexed by origin period.
    pub(super) deferrals: Table<Uuid, DeferredDeduction>,
    pub(super) other_income: Table<String, OtherIncome>,
    pub(super) fuel_expenses: Table<String, FuelExpense>,
    /// (period, template) pairs.
    pub(super) exclusions: BTreeSet<(Uuid, String)>,
    pub(super) generations: BTreeMap<Uuid, u64>,
    pub(super) input_revisions: BTreeMap<Uuid, u64>,
}

/// The prior value of one record a transaction overwrote.
#[derive(Debug)]
pub(super) enum BookChange {
    Settlement {
        period_id: Uuid,
        previous: Option<DriverSettlement>,
    },
    Unit {
        id: String,
        previous: Option<RevenueUnit>,
    },
    Instance {
        id: Uuid,
        previous: Option<DeductionInstance>,
    },
    Deferral {
        id: Uuid,
        previous: Option<DeferredDeduction>,
    },
    OtherIncome {
        id: String,
        previous: Option<OtherIncome>,
    },
    FuelExpense {
        id: String,
        previous: Option<FuelExpense>,
    },
    Exclusion {
        period_id: Uuid,
        template_id: String,
        present: bool,
    },
    Generation {
        period_id: Uuid,
        previous: Option<u64>,
    },
    Revision {
        period_id: Uuid,
        previous: Option<u64>,
    },
}

impl DriverBook {
    pub(super) fn settlement_by_id(&self, settlement_id: Uuid) -> Option<&DriverSettlement> {
        self.settlement_periods
            .get(&settlement_id)
            .and_then(|period_id| self.settlements.get(period_id))
    }

    pub(super) fn set_settlement(
        &mut self,
        period_id: Uuid,
        value: Option<DriverSettlement>,
    ) -> Option<DriverSettlement> {
        let previous = self.settlements.remove(&period_id);
        if let Some(old) = &previous {
            self.settlement_periods.remove(&old.id);
        }
        if let Some(settlement) = value {
            self.settlement_periods.insert(settlement.id, period_id);
            self.settlements.insert(period_id, settlement);
        }
        previous
    }

    /// Sets whether a template is excluded and returns whether it was.
    pub(super) fn set_exclusion(&mut self, period_id: Uuid, template_id: &str, present: bool) -> bool {
        let key = (period_id, template_id.to_string());
        if present {
            !self.exclusions.insert(key)
        } else {
            self.exclusions.remove(&key)
        }
    }

    /// Puts back a record as it was before a change.
    pub(super) fn restore(&mut self, change: BookChange) {
        match change {
            BookChange::Settlement {
                period_id,
                previous,
            } => {
                self.set_settlement(period_id, previous);
            }
            BookChange::Unit { id, previous } => {
                self.units.set(id, previous);
            }
            BookChange::Instance { id, previous } => {
                self.instances.set(id, previous);
            }
            BookChange::Deferral { id, previous } => {
                self.deferrals.set(id, previous);
            }
            BookChange::OtherIncome { id, previous } => {
                self.other_income.set(id, previous);
            }
            BookChange::FuelExpense { id, previous } => {
                self.fuel_expenses.set(id, previous);
            }
            BookChange::Exclusion {
                period_id,
                template_id,
                present,
            } => {
                self.set_exclusion(period_id, &template_id, present);
            }
            BookChange::Generation {
                period_id,
                previous,
            } => set_counter(&mut self.generations, period_id, previous),
            BookChange::Revision {
                period_id,
                previous,
            } => set_counter(&mut self.input_revisions, period_id, previous),
        }
    }
}

fn set_counter(counters: &mut BTreeMap<Uuid, u64>, period_id: Uuid, value: Option<u64>) {
    match value {
        Some(value) => {
            counters.insert(period_id, value);
        }
        None => {
            counters.remove(&period_id);
        }
    }
}
