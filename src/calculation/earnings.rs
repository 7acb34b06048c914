//! Earnings aggregation functionality.
//!
//! Gross earnings for a driver are the sum of the revenue units assigned to
//! the (period, driver) pair. Units without a period are invisible here.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ledger::LedgerRead;
use crate::models::{AuditStep, RevenueUnit};

/// The result of aggregating a driver's earnings for one period.
#[derive(Debug, Clone)]
pub struct EarningsAggregation {
    /// Sum of `total_amount` across the aggregated units.
    pub gross_earnings: Decimal,
    /// The units that contributed, ordered by id.
    pub revenue_units: Vec<RevenueUnit>,
    /// The audit step recording this aggregation.
    pub audit_step: AuditStep,
}

/// Sums the revenue units currently assigned to `(period_id, driver_id)`.
///
/// This is a pure read of the ledger.
pub fn aggregate_earnings(
    state: &impl LedgerRead,
    period_id: Uuid,
    driver_id: &str,
    step_number: u32,
) -> EarningsAggregation {
    let revenue_units: Vec<RevenueUnit> = state
        .units_for(period_id, driver_id)
        .into_iter()
        .cloned()
        .collect();
    let gross_earnings: Decimal = revenue_units.iter().map(|u| u.total_amount).sum();

    let unit_ids: Vec<&str> = revenue_units.iter().map(|u| u.id.as_str()).collect();
    let audit_step = AuditStep {
        step_number,
        rule_id: "earnings_aggregation".to_string(),
        rule_name: "Earnings Aggregation".to_string(),
        input: serde_json::json!({
            "period_id": period_id.to_string(),
            "driver_id": driver_id,
        }),
        output: serde_json::json!({
            "unit_ids": unit_ids,
            "unit_count": revenue_units.len(),
            "gross_earnings": gross_earnings.normalize().to_string(),
        }),
        reasoning: format!(
            "{} revenue unit(s) assigned, gross earnings ${}",
            revenue_units.len(),
            gross_earnings.normalize()
        ),
    };

    EarningsAggregation {
        gross_earnings,
        revenue_units,
        audit_step,
    }
}
