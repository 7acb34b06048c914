//! Period lock coordination.
//!
//! A period closes only once every driver with a settlement row in it has
//! been paid. The lock itself is a compare-and-set on the period status made
//! in the same transaction as the precondition check, so two concurrent
//! closes produce exactly one payout record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerRead, LedgerTx};
use crate::models::{
    DriverSettlement, PaymentDetails, PaymentStatus, PayoutDetails, PayoutRecord, PeriodStatus,
};

/// Whether a period may be closed, and what blocks it if not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosureCheck {
    /// The period checked.
    pub period_id: Uuid,
    /// True when every settlement row in the period is paid.
    pub can_close: bool,
    /// Drivers whose settlement is not yet paid, ordered by id.
    pub blocking_drivers: Vec<String>,
    /// One human-readable reason per blocking driver.
    pub reasons: Vec<String>,
    /// Number of settlement rows in the period.
    pub total_drivers: usize,
    /// Number of paid settlement rows in the period.
    pub paid_drivers: usize,
}

/// Checks whether `period_id` can be closed.
///
/// A period without any settlement rows can be closed.
pub fn can_close(state: &impl LedgerRead, period_id: Uuid) -> EngineResult<ClosureCheck> {
    state.period(period_id)?;

    let settlements = state.settlements_in_period(period_id);
    let mut blocking_drivers = Vec::new();
    let mut reasons = Vec::new();
    for settlement in &settlements {
        let status = match settlement.payment_status {
            PaymentStatus::Paid => continue,
            PaymentStatus::Calculated => "calculated but not paid",
            PaymentStatus::Uncalculated => "not calculated",
        };
        blocking_drivers.push(settlement.driver_id.clone());
        reasons.push(format!("driver {} is {}", settlement.driver_id, status));
    }

    Ok(ClosureCheck {
        period_id,
        can_close: blocking_drivers.is_empty(),
        paid_drivers: settlements.len() - blocking_drivers.len(),
        total_drivers: settlements.len(),
        blocking_drivers,
        reasons,
    })
}

/// Locks `period_id` and records its payout.
///
/// # Errors
///
/// - [`EngineError::AlreadyLocked`] if the period is (or concurrently became)
///   locked.
/// - [`EngineError::BlockedByIncompleteDrivers`] if any settlement in the
///   period is unpaid. Nothing is written in that case.
pub fn close_period(
    tx: &mut LedgerTx<'_>,
    period_id: Uuid,
    details: &PayoutDetails,
    actor: &str,
    now: DateTime<Utc>,
) -> EngineResult<PayoutRecord> {
    if details.payment_method.trim().is_empty() {
        return Err(EngineError::invalid_input("payment method is required"));
    }
    if actor.trim().is_empty() {
        return Err(EngineError::invalid_input("actor is required"));
    }
    if tx.period(period_id)?.is_locked() {
        return Err(EngineError::AlreadyLocked { period_id });
    }

    let check = can_close(&*tx, period_id)?;
    if !check.can_close {
        return Err(EngineError::BlockedByIncompleteDrivers {
            period_id,
            drivers: check.blocking_drivers,
        });
    }

    let total_amount: Decimal = tx
        .settlements_in_period(period_id)
        .iter()
        .map(|s| s.net_payment)
        .sum();

    let period = tx.compare_and_set_period_status(
        period_id,
        PeriodStatus::Open,
        PeriodStatus::Locked,
        now,
        actor,
    )?;

    let payout = PayoutRecord {
        id: Uuid::new_v4(),
        period_id: period.id,
        payment_method: details.payment_method.clone(),
        external_reference: details.external_reference.clone(),
        total_amount,
        driver_count: check.total_drivers,
        locked_at: now,
        locked_by: actor.to_string(),
    };
    tx.insert_payout(payout.clone())?;
    Ok(payout)
}

/// Marks a calculated settlement as paid.
///
/// The period must still be open at write time and the settlement must
/// reflect the current calculation inputs.
///
/// # Errors
///
/// - [`EngineError::PeriodLocked`] if the period is locked.
/// - [`EngineError::InvalidState`] if the settlement is not `calculated`.
/// - [`EngineError::StaleRecalculation`] if inputs changed since the last
///   calculation.
pub fn mark_paid(
    tx: &mut LedgerTx<'_>,
    settlement_id: Uuid,
    method: &str,
    reference: Option<&str>,
    actor: &str,
    now: DateTime<Utc>,
) -> EngineResult<DriverSettlement> {
    if method.trim().is_empty() {
        return Err(EngineError::invalid_input("payment method is required"));
    }
    let mut settlement = tx.settlement(settlement_id)?.clone();
    tx.open_period(settlement.period_id)?;

    match settlement.payment_status {
        PaymentStatus::Calculated => {}
        PaymentStatus::Paid => {
            return Err(EngineError::invalid_state(format!(
                "settlement {} is already paid",
                settlement_id
            )));
        }
        PaymentStatus::Uncalculated => {
            return Err(EngineError::invalid_state(format!(
                "settlement {} has not been calculated",
                settlement_id
            )));
        }
    }

    let revision = tx.input_revision(settlement.period_id, &settlement.driver_id);
    if revision > settlement.calculated_revision {
        return Err(EngineError::StaleRecalculation {
            settlement_id,
            reason: "calculation inputs changed after the last calculation".to_string(),
        });
    }

    settlement.payment_status = PaymentStatus::Paid;
    settlement.payment = Some(PaymentDetails {
        method: method.to_string(),
        reference: reference.map(str::to_string),
        paid_at: now,
        paid_by: actor.to_string(),
    });
    tx.update_settlement(settlement.clone())?;
    Ok(settlement)
}
