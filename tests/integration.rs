//! End-to-end settlement scenarios.
//!
//! Covers period generation, the net-payment calculation with and without
//! shortfall waivers, deferral carry-over between periods, staleness after
//! unit reassignment, period closure (including racing closers) and the
//! HTTP surface over the same service.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use settlement_engine::api::{AppState, create_router};
use settlement_engine::config::{
    CompanyCadence, LoadDeductionPolicy, PayoutRule, SettlementConfig,
};
use settlement_engine::error::EngineError;
use settlement_engine::ledger::LedgerRead;
use settlement_engine::models::{
    DeductionProvenance, DeductionStatus, DeductionTemplate, DeferralStatus, FuelExpense,
    PaymentPeriod, PaymentStatus, PayoutDetails, PeriodFrequency, PeriodStatus, RevenueUnit,
    VerificationStatus,
};
use settlement_engine::service::SettlementService;

// =============================================================================
// Test Helpers
// =============================================================================

const COMPANY: &str = "acme";
const DRIVER: &str = "drv_100";

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn weekly_cadence() -> CompanyCadence {
    CompanyCadence {
        frequency: PeriodFrequency::Weekly,
        cycle_start_day: 1,
        anchor_date: None,
        custom_period_days: None,
        payout_rule: PayoutRule::DaysAfterEnd { days: 3 },
        load_deductions: LoadDeductionPolicy {
            priority: 1,
            critical: true,
        },
    }
}

fn template(id: &str, amount: &str, frequency: PeriodFrequency, priority: u32) -> DeductionTemplate {
    DeductionTemplate {
        id: id.to_string(),
        driver_id: DRIVER.to_string(),
        description: id.replace('_', " "),
        amount: dec(amount),
        frequency,
        effective_from: date(2024, 1, 1),
        effective_until: None,
        month_day: None,
        priority,
        critical: false,
        active: true,
    }
}

fn insurance() -> DeductionTemplate {
    template("insurance", "50.00", PeriodFrequency::Weekly, 5)
}

/// A monthly charge large enough to push the first week 20 below zero.
fn equipment_note() -> DeductionTemplate {
    template("equipment_note", "1560.00", PeriodFrequency::Monthly, 2)
}

fn service_with(templates: Vec<DeductionTemplate>) -> SettlementService {
    let companies = HashMap::from([(COMPANY.to_string(), weekly_cadence())]);
    SettlementService::new(SettlementConfig::new(companies, templates).unwrap())
}

/// Generates January 2024 and returns the weekly periods in order.
fn january(service: &SettlementService) -> Vec<PaymentPeriod> {
    service
        .generate_periods(COMPANY, None, date(2024, 1, 1), date(2024, 2, 1))
        .unwrap()
        .periods
}

fn unit(id: &str, period_id: Uuid, amount: &str) -> RevenueUnit {
    RevenueUnit {
        id: id.to_string(),
        company_id: COMPANY.to_string(),
        driver_id: DRIVER.to_string(),
        period_id: Some(period_id),
        total_amount: dec(amount),
        dispatch_rate: dec("10"),
        factoring_rate: dec("3"),
        leasing_rate: Decimal::ZERO,
    }
}

fn fuel(id: &str, period_id: Uuid, amount: &str, status: VerificationStatus) -> FuelExpense {
    FuelExpense {
        id: id.to_string(),
        driver_id: DRIVER.to_string(),
        period_id,
        total_amount: dec(amount),
        status,
    }
}

/// Two units totalling 2000 plus 150 of verified fuel.
fn record_standard_week(service: &SettlementService, period_id: Uuid) {
    service
        .record_revenue_unit(unit("load_001", period_id, "1200.00"))
        .unwrap();
    service
        .record_revenue_unit(unit("load_002", period_id, "800.00"))
        .unwrap();
    service
        .record_fuel_expense(fuel("fuel_001", period_id, "150.00", VerificationStatus::Verified))
        .unwrap();
}

fn ach() -> PayoutDetails {
    PayoutDetails {
        payment_method: "ach".to_string(),
        external_reference: Some("BATCH-2024-01".to_string()),
    }
}

fn pay(service: &SettlementService, period_id: Uuid, driver_id: &str) {
    let settlement = service.calculate(period_id, driver_id).unwrap().settlement;
    service
        .mark_paid(settlement.id, "ach", None, "payroll")
        .unwrap();
}

// =============================================================================
// Period Generation
// =============================================================================

/// Weekly cadence starting Monday covers January 2024 with five gapless weeks.
#[test]
fn test_weekly_generation_for_january() {
    let service = service_with(vec![]);
    let periods = january(&service);

    assert_eq!(periods.len(), 5);
    assert_eq!(periods[0].start_date, date(2024, 1, 1));
    for period in &periods {
        assert_eq!(period.length_days(), 7);
        assert_eq!(period.status, PeriodStatus::Open);
    }
    for pair in periods.windows(2) {
        assert_eq!(pair[0].end_date, pair[1].start_date);
    }
}

/// Regenerating an overlapping range only adds the missing periods.
#[test]
fn test_overlapping_generation_is_idempotent() {
    let service = service_with(vec![]);
    let first = january(&service);

    let again = service
        .generate_periods(COMPANY, None, date(2024, 1, 15), date(2024, 2, 15))
        .unwrap();

    assert_eq!(again.skipped, 3);
    assert_eq!(again.periods.len(), 2);
    assert_eq!(again.periods[0].start_date, first[4].end_date);

    let stored = service
        .ledger()
        .read(|s| s.periods_for_company(COMPANY, Some(PeriodFrequency::Weekly)).len());
    assert_eq!(stored, 7);
}

/// An unknown company is a configuration error and writes nothing.
#[test]
fn test_missing_cadence_generates_nothing() {
    let service = service_with(vec![]);
    let result = service.generate_periods("ghost", None, date(2024, 1, 1), date(2024, 2, 1));

    assert!(matches!(result, Err(EngineError::Configuration { .. })));
    assert!(service.ledger().read(|s| s.periods_for_company("ghost", None).is_empty()));
}

// =============================================================================
// Settlement Calculation
// =============================================================================

/// 2000 gross, 260 of load deductions, one 50 template and 150 fuel nets 1540.
#[test]
fn test_standard_settlement() {
    let service = service_with(vec![insurance()]);
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);

    let calc = service.calculate(week.id, DRIVER).unwrap();
    let settlement = calc.settlement;

    assert_eq!(settlement.gross_earnings, dec("2000.00"));
    assert_eq!(settlement.fuel_expenses, dec("150.00"));
    assert_eq!(settlement.total_deductions, dec("310.00"));
    assert_eq!(settlement.net_payment, dec("1540.00"));
    assert!(!settlement.has_negative_balance);
    assert_eq!(settlement.payment_status, PaymentStatus::Calculated);

    let loads: Decimal = calc
        .deductions
        .iter()
        .filter(|d| d.provenance == DeductionProvenance::FromLoadPercentage)
        .map(|d| d.amount)
        .sum();
    assert_eq!(loads, dec("260.00"));
}

/// Unverified fuel is ignored.
#[test]
fn test_pending_fuel_is_not_deducted() {
    let service = service_with(vec![insurance()]);
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);
    service
        .record_fuel_expense(fuel("fuel_002", week.id, "300.00", VerificationStatus::Pending))
        .unwrap();

    let settlement = service.calculate(week.id, DRIVER).unwrap().settlement;
    assert_eq!(settlement.fuel_expenses, dec("150.00"));
}

/// A 20 shortfall waives 20 of the lowest-ranked deduction and defers it.
#[test]
fn test_shortfall_is_waived_and_deferred() {
    let service = service_with(vec![insurance(), equipment_note()]);
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);

    let calc = service.calculate(week.id, DRIVER).unwrap();
    let settlement = &calc.settlement;

    assert_eq!(settlement.net_payment, Decimal::ZERO);
    assert!(!settlement.has_negative_balance);
    assert_eq!(settlement.total_deductions, dec("1850.00"));
    assert_eq!(settlement.deferred_deductions, dec("20.00"));

    assert_eq!(calc.deferrals.len(), 1);
    assert_eq!(calc.deferrals[0].amount, dec("20.00"));
    assert_eq!(calc.deferrals[0].status, DeferralStatus::Pending);

    let waived: Vec<_> = calc
        .deductions
        .iter()
        .filter(|d| d.status == DeductionStatus::Waived)
        .collect();
    assert_eq!(waived.len(), 1);
    assert_eq!(waived[0].source_key, "template:insurance");

    let report = service.period_report(week.id).unwrap();
    assert_eq!(report.outstanding_deferrals.len(), 1);
    assert_eq!(report.totals.deferred_deductions, dec("20.00"));
}

/// Calculating twice without changes yields identical rows and traces.
#[test]
fn test_recalculation_is_idempotent() {
    let service = service_with(vec![insurance(), equipment_note()]);
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);

    let first = service.calculate(week.id, DRIVER).unwrap();
    let second = service.calculate(week.id, DRIVER).unwrap();

    assert_eq!(first.settlement, second.settlement);
    assert_eq!(first.audit_trace, second.audit_trace);
    assert_eq!(
        first.deductions.iter().map(|d| (&d.source_key, d.amount, d.status)).collect::<Vec<_>>(),
        second.deductions.iter().map(|d| (&d.source_key, d.amount, d.status)).collect::<Vec<_>>()
    );
    let pending = service
        .ledger()
        .read(|s| s.outstanding_deferrals(week.id).len());
    assert_eq!(pending, 1);
}

/// Every waived amount reappears exactly once in the next period.
#[test]
fn test_deferred_amounts_are_conserved() {
    let service = service_with(vec![insurance(), equipment_note()]);
    let weeks = january(&service);
    record_standard_week(&service, weeks[0].id);
    service
        .record_revenue_unit(unit("load_003", weeks[1].id, "1000.00"))
        .unwrap();

    let origin = service.calculate(weeks[0].id, DRIVER).unwrap();
    let target = service.calculate(weeks[1].id, DRIVER).unwrap();

    // 1000 - 130 loads - 50 insurance - 20 carried
    assert_eq!(target.settlement.net_payment, dec("800.00"));

    let carried: Decimal = target
        .deductions
        .iter()
        .filter(|d| d.provenance == DeductionProvenance::CarriedOver)
        .map(|d| d.amount)
        .sum();
    assert_eq!(carried, origin.settlement.deferred_deductions);

    service.ledger().read(|s| {
        let deferrals = s.deferrals();
        assert_eq!(deferrals.len(), 1);
        assert_eq!(deferrals[0].status, DeferralStatus::Resolved);
        assert_eq!(deferrals[0].target_period_id, Some(weeks[1].id));
    });

    // Recalculating the target must not carry the amount twice.
    let again = service.calculate(weeks[1].id, DRIVER).unwrap();
    assert_eq!(again.settlement, target.settlement);
}

/// Reassigning a unit into a calculated period forces recalculation.
#[test]
fn test_reassignment_makes_settlement_stale() {
    let service = service_with(vec![insurance()]);
    let weeks = january(&service);
    record_standard_week(&service, weeks[0].id);
    service
        .record_revenue_unit(unit("load_009", weeks[1].id, "500.00"))
        .unwrap();
    let settlement = service.calculate(weeks[0].id, DRIVER).unwrap().settlement;

    service
        .reassign_unit("load_009", Some(weeks[0].id))
        .unwrap();

    let result = service.mark_paid(settlement.id, "ach", None, "payroll");
    assert!(matches!(result, Err(EngineError::StaleRecalculation { .. })));

    let recalculated = service.calculate(weeks[0].id, DRIVER).unwrap().settlement;
    assert_eq!(recalculated.gross_earnings, dec("2500.00"));
    let paid = service
        .mark_paid(recalculated.id, "ach", None, "payroll")
        .unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
}

/// A paid settlement cannot be recalculated.
#[test]
fn test_paid_settlement_rejects_recalculation() {
    let service = service_with(vec![insurance()]);
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);
    pay(&service, week.id, DRIVER);

    let result = service.calculate(week.id, DRIVER);
    assert!(matches!(result, Err(EngineError::StaleRecalculation { .. })));
}

// =============================================================================
// Period Closure
// =============================================================================

/// A driver still in `calculated` blocks closure and nothing changes.
#[test]
fn test_close_blocked_by_calculated_driver() {
    let service = service_with(vec![insurance()]);
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);
    service.calculate(week.id, DRIVER).unwrap();

    let result = service.close(week.id, &ach(), "payroll");

    match result {
        Err(EngineError::BlockedByIncompleteDrivers { drivers, .. }) => {
            assert_eq!(drivers, vec![DRIVER.to_string()]);
        }
        other => panic!("expected blocked close, got {:?}", other),
    }
    service.ledger().read(|s| {
        assert_eq!(s.period(week.id).unwrap().status, PeriodStatus::Open);
        assert!(s.payout(week.id).is_none());
    });
}

/// Racing closers produce exactly one payout.
#[test]
fn test_concurrent_close_has_one_winner() {
    let service = Arc::new(service_with(vec![insurance()]));
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);
    pay(&service, week.id, DRIVER);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                let period_id = week.id;
                scope.spawn(move || service.close(period_id, &ach(), &format!("closer_{}", i)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::AlreadyLocked { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, 7);

    service.ledger().read(|s| {
        assert!(s.period(week.id).unwrap().is_locked());
        assert_eq!(s.payout_count(), 1);
        assert_eq!(s.payout(week.id).unwrap().total_amount, dec("1540.00"));
    });
}

/// Once locked, a period rejects every input change.
#[test]
fn test_locked_period_is_immutable() {
    let service = service_with(vec![insurance()]);
    let weeks = january(&service);
    record_standard_week(&service, weeks[0].id);
    service
        .record_revenue_unit(unit("load_010", weeks[1].id, "400.00"))
        .unwrap();
    pay(&service, weeks[0].id, DRIVER);
    service.close(weeks[0].id, &ach(), "payroll").unwrap();

    assert!(matches!(
        service.materialize_deductions(weeks[0].id, DRIVER),
        Err(EngineError::PeriodLocked { .. })
    ));
    assert!(matches!(
        service.reassign_unit("load_010", Some(weeks[0].id)),
        Err(EngineError::PeriodLocked { .. })
    ));
    assert!(matches!(
        service.reassign_unit("load_001", Some(weeks[1].id)),
        Err(EngineError::PeriodLocked { .. })
    ));
}

/// A period nobody was settled in can still be closed.
#[test]
fn test_empty_period_closes_with_zero_payout() {
    let service = service_with(vec![]);
    let week = january(&service)[3].clone();

    let payout = service.close(week.id, &ach(), "payroll").unwrap();

    assert_eq!(payout.total_amount, Decimal::ZERO);
    assert_eq!(payout.driver_count, 0);
}

/// Batch payment reports per-item outcomes.
#[test]
fn test_batch_payment_is_per_item() {
    let service = service_with(vec![insurance()]);
    let week = january(&service)[0].clone();
    record_standard_week(&service, week.id);
    let calculated = service.calculate(week.id, DRIVER).unwrap().settlement;
    service
        .add_manual_deduction(
            week.id,
            "drv_200",
            &settlement_engine::service::ManualDeduction {
                amount: dec("25.00"),
                priority: 3,
                critical: false,
                description: "Toll".to_string(),
            },
        )
        .unwrap();
    let uncalculated = service
        .ledger()
        .read(|s| s.settlement_for(week.id, "drv_200").unwrap().id);

    let outcomes = service.mark_many_paid(&[calculated.id, uncalculated], "ach", None, "payroll");

    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(EngineError::InvalidState { .. })
    ));
}

// =============================================================================
// HTTP
// =============================================================================

async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = create_router(state.clone())
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// The standard week settled, paid and closed over HTTP.
#[tokio::test]
async fn test_http_settlement_lifecycle() {
    let service = Arc::new(service_with(vec![insurance()]));
    let state = AppState::from_shared(Arc::clone(&service));

    let (status, body) = send(
        &state,
        "POST",
        "/companies/acme/periods",
        Some(serde_json::json!({"range_start": "2024-01-01", "range_end": "2024-01-08"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let period_id = body["periods"][0]["id"].as_str().unwrap().to_string();
    record_standard_week(&service, Uuid::parse_str(&period_id).unwrap());

    let (status, body) = send(
        &state,
        "POST",
        &format!("/periods/{}/drivers/{}/calculate", period_id, DRIVER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(body["settlement"]["net_payment"].as_str().unwrap()), dec("1540"));
    let settlement_id = body["settlement"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &state,
        "POST",
        "/settlements/pay",
        Some(serde_json::json!({
            "settlement_ids": [settlement_id],
            "method": "ach",
            "actor": "payroll"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &state,
        "POST",
        &format!("/periods/{}/close", period_id),
        Some(serde_json::json!({"payment_method": "ach", "actor": "payroll"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(body["total_amount"].as_str().unwrap()), dec("1540"));

    let (status, body) = send(
        &state,
        "POST",
        &format!("/periods/{}/drivers/{}/deductions", period_id, DRIVER),
        Some(serde_json::json!({"amount": "10.00", "description": "Late fee"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PERIOD_LOCKED");
}
