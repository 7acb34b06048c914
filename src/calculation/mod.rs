//! Calculation logic for the settlement engine.
//!
//! This module contains the components a settlement run is built from:
//! period generation, earnings aggregation, deduction materialization,
//! the settlement calculator with its shortfall waiver, period lock
//! coordination and the input operations collaborators call into.
//!
//! Every function that writes takes an explicit [`LedgerTx`](crate::ledger::LedgerTx),
//! so the caller decides what commits together.

mod deductions;
mod earnings;
mod inputs;
mod period_generator;
mod period_lock;
mod settlement;

pub use deductions::{
    CURRENCY_DECIMAL_PLACES, DeductionMaterialization, add_manual_deduction,
    load_percentage_amount, materialize_deductions, round_currency, template_occurrences,
};
pub use earnings::{EarningsAggregation, aggregate_earnings};
pub use inputs::{
    UnitReassignment, exclude_template, reassign_unit, record_fuel_expense, record_other_income,
    record_revenue_unit, restore_template,
};
pub use period_generator::{PeriodGenerationResult, generate_periods, plan_period_bounds};
pub use period_lock::{ClosureCheck, can_close, close_period, mark_paid};
pub use settlement::{SettlementCalculation, calculate_settlement, waiver_rank};
