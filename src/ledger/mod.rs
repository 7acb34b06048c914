//! The settlement ledger.
//!
//! All durable state of the engine lives here: periods, settlement rows,
//! deduction instances, deferrals, payouts and the calculation inputs handed
//! over by collaborators.
//!
//! Periods and payouts sit in one shared [`PeriodBook`]. Every other record
//! belongs to a single driver and sits in that driver's [`DriverBook`] behind
//! its own lock. [`Ledger::driver_transaction`] shares the period book and
//! locks one driver book, so work for different drivers runs side by side.
//! [`Ledger::transaction`] takes the period book exclusively along with every
//! driver book; period generation and closing go through it.
//!
//! Writes apply in place and are recorded in an undo log. A transaction that
//! fails, or panics, puts back exactly the records it touched.
//!
//! Locks are always taken in the same order: period book, driver books in id
//! order, route directory.
//!
//! # Example
//!
//! ```
//! use settlement_engine::ledger::{Ledger, LedgerRead};
//! use settlement_engine::models::{PaymentPeriod, PeriodFrequency};
//! use chrono::NaiveDate;
//!
//! let ledger = Ledger::new();
//! let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
//! let period = PaymentPeriod::new("acme", PeriodFrequency::Weekly, start, end, end);
//! let id = period.id;
//!
//! ledger.transaction(|tx| tx.insert_period(period)).unwrap();
//! ledger
//!     .driver_transaction("drv_001", |tx| tx.bump_input_revision(id, "drv_001"))
//!     .unwrap();
//! assert_eq!(ledger.read(|state| state.input_revision(id, "drv_001")), 1);
//! ```

mod read;
mod state;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    DeductionInstance, DeferredDeduction, DriverSettlement, FuelExpense, OtherIncome,
    PaymentPeriod, PayoutRecord, PeriodStatus, RevenueUnit,
};

pub use read::LedgerRead;
pub use state::{DriverBook, PeriodBook};
use state::BookChange;

type Shards = BTreeMap<String, Arc<Mutex<DriverBook>>>;

/// Transactional in-memory store for every settlement record.
#[derive(Debug, Default)]
pub struct Ledger {
    periods: RwLock<PeriodBook>,
    drivers: RwLock<Shards>,
    directory: Mutex<Directory>,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` as one unit of work over the whole ledger.
    ///
    /// Holds the period book and every driver book for the duration, so
    /// nothing else runs concurrently. Changes become visible only if `f`
    /// returns `Ok`; on error the ledger is left exactly as it was.
    pub fn transaction<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut LedgerTx<'_>) -> EngineResult<T>,
    {
        let mut periods = self.periods.write();
        let shards = self.shards();
        let mut guards: Vec<_> = shards.iter().map(|(_, shard)| shard.lock()).collect();
        let books = shards
            .iter()
            .zip(guards.iter_mut())
            .map(|((driver_id, _), guard)| (driver_id.clone(), &mut **guard))
            .collect();

        let mut tx = LedgerTx::new(PeriodAccess::Exclusive(&mut *periods), books, Scope::Ledger);
        let value = f(&mut tx)?;
        tx.commit(&self.directory, &self.drivers)?;
        Ok(value)
    }

    /// Runs `f` as one unit of work over a single driver's records.
    ///
    /// Periods are readable but not writable, and other drivers' records
    /// are not visible. Transactions for different drivers do not wait on
    /// each other; only ledger-wide transactions exclude them.
    pub fn driver_transaction<T, F>(&self, driver_id: &str, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut LedgerTx<'_>) -> EngineResult<T>,
    {
        let shard = self.shard(driver_id);
        let periods = self.periods.read();
        let mut book = shard.lock();
        let books = BTreeMap::from([(driver_id.to_string(), &mut *book)]);

        let mut tx = LedgerTx::new(PeriodAccess::Shared(&*periods), books, Scope::Driver);
        let value = f(&mut tx)?;
        tx.commit(&self.directory, &self.drivers)?;
        Ok(value)
    }

    /// Runs a read-only query against a consistent snapshot of every book.
    pub fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&LedgerView<'_>) -> T,
    {
        let periods = self.periods.read();
        let shards = self.shards();
        let guards: Vec<_> = shards.iter().map(|(_, shard)| shard.lock()).collect();
        let view = LedgerView {
            periods: &*periods,
            books: shards
                .iter()
                .zip(guards.iter())
                .map(|((driver_id, _), guard)| (driver_id.as_str(), &**guard))
                .collect(),
        };
        f(&view)
    }

    /// The driver a settlement row belongs to.
    pub fn settlement_owner(&self, settlement_id: Uuid) -> Option<String> {
        self.directory.lock().settlements.get(&settlement_id).cloned()
    }

    /// The driver a revenue unit belongs to.
    pub fn unit_owner(&self, unit_id: &str) -> Option<String> {
        self.directory.lock().units.get(unit_id).cloned()
    }

    fn shard(&self, driver_id: &str) -> Arc<Mutex<DriverBook>> {
        if let Some(shard) = self.drivers.read().get(driver_id) {
            return Arc::clone(shard);
        }
        Arc::clone(self.drivers.write().entry(driver_id.to_string()).or_default())
    }

    fn shards(&self) -> Vec<(String, Arc<Mutex<DriverBook>>)> {
        self.drivers
            .read()
            .iter()
            .map(|(driver_id, shard)| (driver_id.clone(), Arc::clone(shard)))
            .collect()
    }
}

/// Which driver owns each settlement row and revenue unit, so lookups by id
/// can lock the right book.
#[derive(Debug, Default)]
struct Directory {
    settlements: HashMap<Uuid, String>,
    units: HashMap<String, String>,
}

#[derive(Debug)]
enum Route {
    Settlement { id: Uuid, driver_id: String },
    Unit { id: String, driver_id: String },
}

impl Directory {
    /// Records new owners. Fails without changes if a unit would move to a
    /// different driver.
    fn publish(&mut self, routes: &[Route]) -> EngineResult<()> {
        for route in routes {
            if let Route::Unit { id, driver_id } = route {
                match self.units.get(id) {
                    Some(owner) if owner != driver_id => {
                        return Err(EngineError::LedgerConstraint {
                            message: format!("revenue unit {} belongs to driver {}", id, owner),
                        });
                    }
                    _ => {}
                }
            }
        }
        for route in routes {
            match route {
                Route::Settlement { id, driver_id } => {
                    self.settlements.insert(*id, driver_id.clone());
                }
                Route::Unit { id, driver_id } => {
                    self.units.insert(id.clone(), driver_id.clone());
                }
            }
        }
        Ok(())
    }
}

/// Read-only snapshot handed to [`Ledger::read`].
#[derive(Debug)]
pub struct LedgerView<'a> {
    periods: &'a PeriodBook,
    books: BTreeMap<&'a str, &'a DriverBook>,
}

impl LedgerRead for LedgerView<'_> {
    fn periods(&self) -> &PeriodBook {
        self.periods
    }

    fn book(&self, driver_id: &str) -> Option<&DriverBook> {
        self.books.get(driver_id).copied()
    }

    fn books(&self) -> Vec<&DriverBook> {
        self.books.values().copied().collect()
    }
}

#[derive(Debug)]
enum PeriodAccess<'a> {
    Shared(&'a PeriodBook),
    Exclusive(&'a mut PeriodBook),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Driver,
    Ledger,
}

#[derive(Debug)]
enum Undo {
    Period {
        id: Uuid,
        previous: Option<PaymentPeriod>,
    },
    Payout {
        period_id: Uuid,
        previous: Option<PayoutRecord>,
    },
    Book {
        driver_id: String,
        change: BookChange,
    },
}

/// Write handle for a single ledger transaction.
///
/// Reads go through [`LedgerRead`].
#[derive(Debug)]
pub struct LedgerTx<'a> {
    periods: PeriodAccess<'a>,
    books: BTreeMap<String, &'a mut DriverBook>,
    /// Books of drivers first seen in a ledger-wide transaction.
    fresh: BTreeMap<String, DriverBook>,
    scope: Scope,
    undo: Vec<Undo>,
    routes: Vec<Route>,
}

impl LedgerRead for LedgerTx<'_> {
    fn periods(&self) -> &PeriodBook {
        match &self.periods {
            PeriodAccess::Shared(book) => *book,
            PeriodAccess::Exclusive(book) => &**book,
        }
    }

    fn book(&self, driver_id: &str) -> Option<&DriverBook> {
        match self.books.get(driver_id) {
            Some(book) => Some(&**book),
            None => self.fresh.get(driver_id),
        }
    }

    fn books(&self) -> Vec<&DriverBook> {
        self.books
            .values()
            .map(|book| &**book)
            .chain(self.fresh.values())
            .collect()
    }
}

impl<'a> LedgerTx<'a> {
    fn new(
        periods: PeriodAccess<'a>,
        books: BTreeMap<String, &'a mut DriverBook>,
        scope: Scope,
    ) -> Self {
        Self {
            periods,
            books,
            fresh: BTreeMap::new(),
            scope,
            undo: Vec::new(),
            routes: Vec::new(),
        }
    }

    fn commit(
        &mut self,
        directory: &Mutex<Directory>,
        drivers: &RwLock<Shards>,
    ) -> EngineResult<()> {
        directory.lock().publish(&self.routes)?;
        if !self.fresh.is_empty() {
            let mut shards = drivers.write();
            for (driver_id, book) in std::mem::take(&mut self.fresh) {
                *shards.entry(driver_id).or_default().lock() = book;
            }
        }
        self.undo.clear();
        Ok(())
    }

    fn periods_mut(&mut self) -> EngineResult<&mut PeriodBook> {
        match &mut self.periods {
            PeriodAccess::Exclusive(book) => Ok(&mut **book),
            PeriodAccess::Shared(_) => Err(EngineError::LedgerConstraint {
                message: "periods can only change in a ledger-wide transaction".to_string(),
            }),
        }
    }

    fn book_mut(&mut self, driver_id: &str) -> EngineResult<&mut DriverBook> {
        if self.books.contains_key(driver_id) {
            return self
                .books
                .get_mut(driver_id)
                .map(|book| &mut **book)
                .ok_or_else(|| outside_transaction(driver_id));
        }
        match self.scope {
            Scope::Ledger => Ok(self.fresh.entry(driver_id.to_string()).or_default()),
            Scope::Driver => Err(outside_transaction(driver_id)),
        }
    }

    fn record(&mut self, driver_id: &str, change: BookChange) {
        self.undo.push(Undo::Book {
            driver_id: driver_id.to_string(),
            change,
        });
    }

    /// Inserts a new period.
    pub fn insert_period(&mut self, period: PaymentPeriod) -> EngineResult<()> {
        let book = self.periods_mut()?;
        if book.periods.contains_key(&period.id) {
            return Err(EngineError::LedgerConstraint {
                message: format!("payment period {} already exists", period.id),
            });
        }
        let id = period.id;
        book.periods.insert(id, period);
        self.undo.push(Undo::Period { id, previous: None });
        Ok(())
    }

    /// Moves a period from `expected` to `next` status in one conditional
    /// write, stamping lock metadata when locking.
    ///
    /// Fails with [`EngineError::AlreadyLocked`] if the period is no longer
    /// in the `expected` status.
    pub fn compare_and_set_period_status(
        &mut self,
        period_id: Uuid,
        expected: PeriodStatus,
        next: PeriodStatus,
        locked_at: DateTime<Utc>,
        locked_by: &str,
    ) -> EngineResult<PaymentPeriod> {
        let book = self.periods_mut()?;
        let period = book
            .periods
            .get_mut(&period_id)
            .ok_or_else(|| EngineError::not_found("Payment period", period_id))?;

        if period.status != expected {
            return Err(EngineError::AlreadyLocked { period_id });
        }

        let previous = period.clone();
        period.status = next;
        if next == PeriodStatus::Locked {
            period.locked_at = Some(locked_at);
            period.locked_by = Some(locked_by.to_string());
        }
        let updated = period.clone();
        self.undo.push(Undo::Period {
            id: period_id,
            previous: Some(previous),
        });
        Ok(updated)
    }

    /// Records the payout of a locked period; one per period.
    pub fn insert_payout(&mut self, payout: PayoutRecord) -> EngineResult<()> {
        let book = self.periods_mut()?;
        if book.payouts.contains_key(&payout.period_id) {
            return Err(EngineError::LedgerConstraint {
                message: format!("period {} already has a payout record", payout.period_id),
            });
        }
        let period_id = payout.period_id;
        book.payouts.insert(period_id, payout);
        self.undo.push(Undo::Payout {
            period_id,
            previous: None,
        });
        Ok(())
    }

    /// Inserts a settlement row; at most one row may exist per pair.
    pub fn insert_settlement(&mut self, settlement: DriverSettlement) -> EngineResult<()> {
        if self
            .settlement_for(settlement.period_id, &settlement.driver_id)
            .is_some()
        {
            return Err(EngineError::LedgerConstraint {
                message: format!(
                    "settlement for driver {} in period {} already exists",
                    settlement.driver_id, settlement.period_id
                ),
            });
        }
        let driver_id = settlement.driver_id.clone();
        let id = settlement.id;
        let period_id = settlement.period_id;
        let previous = self
            .book_mut(&driver_id)?
            .set_settlement(period_id, Some(settlement));
        self.record(&driver_id, BookChange::Settlement { period_id, previous });
        self.routes.push(Route::Settlement { id, driver_id });
        Ok(())
    }

    /// Returns the settlement row of a pair, creating an uncalculated one
    /// when none exists.
    pub fn ensure_settlement(
        &mut self,
        period_id: Uuid,
        driver_id: &str,
    ) -> EngineResult<DriverSettlement> {
        if let Some(existing) = self.settlement_for(period_id, driver_id) {
            return Ok(existing.clone());
        }
        let settlement = DriverSettlement::uncalculated(period_id, driver_id);
        self.insert_settlement(settlement.clone())?;
        Ok(settlement)
    }

    /// Replaces an existing settlement row.
    pub fn update_settlement(&mut self, settlement: DriverSettlement) -> EngineResult<()> {
        let row = self.settlement(settlement.id)?;
        if row.period_id != settlement.period_id || row.driver_id != settlement.driver_id {
            return Err(EngineError::LedgerConstraint {
                message: format!("settlement {} cannot change its pair", settlement.id),
            });
        }
        let driver_id = settlement.driver_id.clone();
        let period_id = settlement.period_id;
        let previous = self
            .book_mut(&driver_id)?
            .set_settlement(period_id, Some(settlement));
        self.record(&driver_id, BookChange::Settlement { period_id, previous });
        Ok(())
    }

    /// Inserts or replaces a revenue unit. A unit never changes driver.
    pub fn upsert_unit(&mut self, unit: RevenueUnit) -> EngineResult<()> {
        let driver_id = unit.driver_id.clone();
        let id = unit.id.clone();
        let previous = self.book_mut(&driver_id)?.units.set(id.clone(), Some(unit));
        self.record(
            &driver_id,
            BookChange::Unit {
                id: id.clone(),
                previous,
            },
        );
        self.routes.push(Route::Unit { id, driver_id });
        Ok(())
    }

    /// Inserts or replaces a supplemental income record.
    pub fn upsert_other_income(&mut self, income: OtherIncome) -> EngineResult<()> {
        let driver_id = income.driver_id.clone();
        let id = income.id.clone();
        let previous = self
            .book_mut(&driver_id)?
            .other_income
            .set(id.clone(), Some(income));
        self.record(&driver_id, BookChange::OtherIncome { id, previous });
        Ok(())
    }

    /// Inserts or replaces a fuel expense record.
    pub fn upsert_fuel_expense(&mut self, expense: FuelExpense) -> EngineResult<()> {
        let driver_id = expense.driver_id.clone();
        let id = expense.id.clone();
        let previous = self
            .book_mut(&driver_id)?
            .fuel_expenses
            .set(id.clone(), Some(expense));
        self.record(&driver_id, BookChange::FuelExpense { id, previous });
        Ok(())
    }

    /// Inserts a deduction instance.
    pub fn insert_instance(&mut self, instance: DeductionInstance) -> EngineResult<()> {
        if self.instance(instance.id).is_ok() {
            return Err(EngineError::LedgerConstraint {
                message: format!("deduction instance {} already exists", instance.id),
            });
        }
        let driver_id = instance.driver_id.clone();
        let id = instance.id;
        let previous = self.book_mut(&driver_id)?.instances.set(id, Some(instance));
        self.record(&driver_id, BookChange::Instance { id, previous });
        Ok(())
    }

    /// Replaces an existing deduction instance.
    pub fn update_instance(&mut self, instance: DeductionInstance) -> EngineResult<()> {
        let driver_id = instance.driver_id.clone();
        let id = instance.id;
        let book = self.book_mut(&driver_id)?;
        if book.instances.get(&id).is_none() {
            return Err(EngineError::not_found("Deduction instance", id));
        }
        let previous = book.instances.set(id, Some(instance));
        self.record(&driver_id, BookChange::Instance { id, previous });
        Ok(())
    }

    /// Deletes a deduction instance.
    pub fn delete_instance(&mut self, instance_id: Uuid) -> EngineResult<DeductionInstance> {
        let driver_id = self.instance(instance_id)?.driver_id.clone();
        let removed = self
            .book_mut(&driver_id)?
            .instances
            .set(instance_id, None)
            .ok_or_else(|| EngineError::not_found("Deduction instance", instance_id))?;
        self.record(
            &driver_id,
            BookChange::Instance {
                id: instance_id,
                previous: Some(removed.clone()),
            },
        );
        Ok(removed)
    }

    /// Inserts a deferral. Each waived instance yields at most one deferral.
    pub fn insert_deferral(&mut self, deferral: DeferredDeduction) -> EngineResult<()> {
        if self
            .deferral_for_instance(deferral.origin_instance_id)
            .is_some()
        {
            return Err(EngineError::LedgerConstraint {
                message: format!(
                    "deduction instance {} is already deferred",
                    deferral.origin_instance_id
                ),
            });
        }
        let driver_id = deferral.driver_id.clone();
        let id = deferral.id;
        let previous = self.book_mut(&driver_id)?.deferrals.set(id, Some(deferral));
        self.record(&driver_id, BookChange::Deferral { id, previous });
        Ok(())
    }

    /// Replaces an existing deferral.
    pub fn update_deferral(&mut self, deferral: DeferredDeduction) -> EngineResult<()> {
        let driver_id = deferral.driver_id.clone();
        let id = deferral.id;
        let book = self.book_mut(&driver_id)?;
        if book.deferrals.get(&id).is_none() {
            return Err(EngineError::not_found("Deferred deduction", id));
        }
        let previous = book.deferrals.set(id, Some(deferral));
        self.record(&driver_id, BookChange::Deferral { id, previous });
        Ok(())
    }

    /// Deletes a deferral.
    pub fn delete_deferral(&mut self, deferral_id: Uuid) -> EngineResult<DeferredDeduction> {
        let driver_id = self.deferral(deferral_id)?.driver_id.clone();
        let removed = self
            .book_mut(&driver_id)?
            .deferrals
            .set(deferral_id, None)
            .ok_or_else(|| EngineError::not_found("Deferred deduction", deferral_id))?;
        self.record(
            &driver_id,
            BookChange::Deferral {
                id: deferral_id,
                previous: Some(removed.clone()),
            },
        );
        Ok(removed)
    }

    /// Excludes a template for a pair. Returns `false` if already excluded.
    pub fn add_exclusion(
        &mut self,
        period_id: Uuid,
        driver_id: &str,
        template_id: &str,
    ) -> EngineResult<bool> {
        let present = self
            .book_mut(driver_id)?
            .set_exclusion(period_id, template_id, true);
        self.record(
            driver_id,
            BookChange::Exclusion {
                period_id,
                template_id: template_id.to_string(),
                present,
            },
        );
        Ok(!present)
    }

    /// Lifts an exclusion. Returns `false` if none existed.
    pub fn remove_exclusion(
        &mut self,
        period_id: Uuid,
        driver_id: &str,
        template_id: &str,
    ) -> EngineResult<bool> {
        let present = self
            .book_mut(driver_id)?
            .set_exclusion(period_id, template_id, false);
        self.record(
            driver_id,
            BookChange::Exclusion {
                period_id,
                template_id: template_id.to_string(),
                present,
            },
        );
        Ok(present)
    }

    /// Advances and returns the regeneration generation of a pair.
    pub fn next_generation(&mut self, period_id: Uuid, driver_id: &str) -> EngineResult<u64> {
        let book = self.book_mut(driver_id)?;
        let previous = book.generations.get(&period_id).copied();
        let next = previous.unwrap_or(0) + 1;
        book.generations.insert(period_id, next);
        self.record(driver_id, BookChange::Generation { period_id, previous });
        Ok(next)
    }

    /// Records that an input of a pair changed, invalidating any earlier
    /// calculation of it.
    pub fn bump_input_revision(&mut self, period_id: Uuid, driver_id: &str) -> EngineResult<u64> {
        let book = self.book_mut(driver_id)?;
        let previous = book.input_revisions.get(&period_id).copied();
        let next = previous.unwrap_or(0) + 1;
        book.input_revisions.insert(period_id, next);
        self.record(driver_id, BookChange::Revision { period_id, previous });
        Ok(next)
    }
}

impl Drop for LedgerTx<'_> {
    /// Reverts every change still in the undo log. A committed transaction
    /// has an empty log.
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Period { id, previous } => {
                    if let PeriodAccess::Exclusive(book) = &mut self.periods {
                        match previous {
                            Some(period) => {
                                book.periods.insert(id, period);
                            }
                            None => {
                                book.periods.remove(&id);
                            }
                        }
                    }
                }
                Undo::Payout {
                    period_id,
                    previous,
                } => {
                    if let PeriodAccess::Exclusive(book) = &mut self.periods {
                        match previous {
                            Some(payout) => {
                                book.payouts.insert(period_id, payout);
                            }
                            None => {
                                book.payouts.remove(&period_id);
                            }
                        }
                    }
                }
                // Fresh books are discarded whole, so only locked books
                // need restoring.
                Undo::Book { driver_id, change } => {
                    if let Some(book) = self.books.get_mut(&driver_id) {
                        book.restore(change);
                    }
                }
            }
        }
    }
}

fn outside_transaction(driver_id: &str) -> EngineError {
    EngineError::LedgerConstraint {
        message: format!("driver {} is outside this transaction", driver_id),
    }
}
