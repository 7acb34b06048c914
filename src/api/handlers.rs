//! HTTP request handlers for the settlement API.
//!
//! Every handler tags its log lines with a per-request correlation id and
//! delegates to [`SettlementService`](crate::service::SettlementService),
//! which owns the transaction boundary.

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::RevenueUnit;

use super::request::{
    BatchPayRequest, CloseRequest, CurrentPeriodQuery, GeneratePeriodsRequest,
    ManualDeductionRequest, PayRequest, ReassignRequest,
};
use super::response::{
    ApiError, ApiErrorResponse, BatchPayResponse, CalculationResponse, GeneratedPeriodsResponse,
    ReassignResponse,
};
use super::state::AppState;

/// Creates the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/companies/:company_id/periods", post(generate_periods_handler))
        .route(
            "/companies/:company_id/periods/current",
            get(current_period_handler),
        )
        .route(
            "/periods/:period_id/drivers/:driver_id/deductions",
            post(manual_deduction_handler),
        )
        .route(
            "/periods/:period_id/drivers/:driver_id/calculate",
            post(calculate_handler),
        )
        .route("/periods/:period_id/close-status", get(close_status_handler))
        .route("/periods/:period_id/close", post(close_handler))
        .route("/periods/:period_id/report", get(report_handler))
        .route("/settlements/pay", post(batch_pay_handler))
        .route("/settlements/:settlement_id/pay", post(pay_handler))
        .route("/units", post(record_unit_handler))
        .route("/units/:unit_id/reassign", post(reassign_handler))
        .with_state(state)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Json(body),
    )
        .into_response()
}

fn error_response(correlation_id: Uuid, err: EngineError) -> Response {
    warn!(correlation_id = %correlation_id, error = %err, "Request failed");
    let api_error: ApiErrorResponse = err.into();
    json_response(api_error.status, api_error.error)
}

/// Unwraps a JSON body, turning a rejection into a 400 response.
fn parse_body<T>(
    correlation_id: Uuid,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, Response> {
    let rejection = match payload {
        Ok(Json(req)) => return Ok(req),
        Err(rejection) => rejection,
    };
    let error = match rejection {
        JsonRejection::JsonDataError(err) => {
            let body_text = err.body_text();
            warn!(
                correlation_id = %correlation_id,
                error = %body_text,
                "JSON data error"
            );
            if body_text.contains("missing field") {
                ApiError::new("VALIDATION_ERROR", body_text)
            } else {
                ApiError::malformed_json(body_text)
            }
        }
        JsonRejection::JsonSyntaxError(err) => {
            warn!(
                correlation_id = %correlation_id,
                error = %err,
                "JSON syntax error"
            );
            ApiError::malformed_json(format!("Invalid JSON syntax: {}", err))
        }
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::new("MISSING_CONTENT_TYPE", "Content-Type must be application/json")
        }
        _ => ApiError::malformed_json("Failed to parse request body"),
    };
    Err(json_response(StatusCode::BAD_REQUEST, error))
}

/// Handler for `POST /companies/:company_id/periods`.
async fn generate_periods_handler(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    payload: Result<Json<GeneratePeriodsRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, company_id = %company_id, "Generating periods");
    let request = match parse_body(correlation_id, payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match state.service().generate_periods(
        &company_id,
        request.frequency,
        request.range_start,
        request.range_end,
    ) {
        Ok(result) => json_response(
            StatusCode::CREATED,
            GeneratedPeriodsResponse::from(result),
        ),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `GET /companies/:company_id/periods/current?date=`.
async fn current_period_handler(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    Query(query): Query<CurrentPeriodQuery>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    match state.service().period_for_date(&company_id, query.date) {
        Ok(period) => json_response(StatusCode::OK, period),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `POST /periods/:period_id/drivers/:driver_id/deductions`.
async fn manual_deduction_handler(
    State(state): State<AppState>,
    Path((period_id, driver_id)): Path<(Uuid, String)>,
    payload: Result<Json<ManualDeductionRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(
        correlation_id = %correlation_id,
        period_id = %period_id,
        driver_id = %driver_id,
        "Adding manual deduction"
    );
    let request = match parse_body(correlation_id, payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match state
        .service()
        .add_manual_deduction(period_id, &driver_id, &request.into())
    {
        Ok(instance) => json_response(StatusCode::CREATED, instance),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `POST /periods/:period_id/drivers/:driver_id/calculate`.
async fn calculate_handler(
    State(state): State<AppState>,
    Path((period_id, driver_id)): Path<(Uuid, String)>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(
        correlation_id = %correlation_id,
        period_id = %period_id,
        driver_id = %driver_id,
        "Processing settlement calculation"
    );

    match state.service().calculate(period_id, &driver_id) {
        Ok(calc) => {
            info!(
                correlation_id = %correlation_id,
                net_payment = %calc.settlement.net_payment,
                steps = calc.audit_trace.steps.len(),
                "Calculation completed successfully"
            );
            json_response(StatusCode::OK, CalculationResponse::from(calc))
        }
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `GET /periods/:period_id/close-status`.
async fn close_status_handler(
    State(state): State<AppState>,
    Path(period_id): Path<Uuid>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    match state.service().can_close(period_id) {
        Ok(check) => json_response(StatusCode::OK, check),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `POST /periods/:period_id/close`.
async fn close_handler(
    State(state): State<AppState>,
    Path(period_id): Path<Uuid>,
    payload: Result<Json<CloseRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, period_id = %period_id, "Closing period");
    let request = match parse_body(correlation_id, payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match state
        .service()
        .close(period_id, &request.payout_details(), &request.actor)
    {
        Ok(payout) => json_response(StatusCode::OK, payout),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `GET /periods/:period_id/report`.
async fn report_handler(State(state): State<AppState>, Path(period_id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    match state.service().period_report(period_id) {
        Ok(report) => json_response(StatusCode::OK, report),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `POST /settlements/:settlement_id/pay`.
async fn pay_handler(
    State(state): State<AppState>,
    Path(settlement_id): Path<Uuid>,
    payload: Result<Json<PayRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, settlement_id = %settlement_id, "Marking settlement paid");
    let request = match parse_body(correlation_id, payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match state.service().mark_paid(
        settlement_id,
        &request.method,
        request.reference.as_deref(),
        &request.actor,
    ) {
        Ok(settlement) => json_response(StatusCode::OK, settlement),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `POST /settlements/pay`.
///
/// Always answers 200; each item carries its own outcome.
async fn batch_pay_handler(
    State(state): State<AppState>,
    payload: Result<Json<BatchPayRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    let request = match parse_body(correlation_id, payload) {
        Ok(req) => req,
        Err(response) => return response,
    };
    info!(
        correlation_id = %correlation_id,
        items = request.settlement_ids.len(),
        "Processing batch payment"
    );

    let outcomes = state.service().mark_many_paid(
        &request.settlement_ids,
        &request.method,
        request.reference.as_deref(),
        &request.actor,
    );
    json_response(StatusCode::OK, BatchPayResponse::from(outcomes))
}

/// Handler for `POST /units`.
async fn record_unit_handler(
    State(state): State<AppState>,
    payload: Result<Json<RevenueUnit>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    let unit = match parse_body(correlation_id, payload) {
        Ok(unit) => unit,
        Err(response) => return response,
    };
    info!(correlation_id = %correlation_id, unit_id = %unit.id, "Recording revenue unit");

    match state.service().record_revenue_unit(unit) {
        Ok(unit) => json_response(StatusCode::CREATED, unit),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for `POST /units/:unit_id/reassign`.
async fn reassign_handler(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    payload: Result<Json<ReassignRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, unit_id = %unit_id, "Reassigning revenue unit");
    let request = match parse_body(correlation_id, payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match state
        .service()
        .reassign_unit(&unit_id, request.target_period_id)
    {
        Ok(moved) => json_response(StatusCode::OK, ReassignResponse::from(moved)),
        Err(err) => error_response(correlation_id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::models::{DriverSettlement, PaymentPeriod};
    use crate::service::SettlementService;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        let config = ConfigLoader::load("./config/demo")
            .expect("Failed to load config")
            .into_config();
        AppState::new(SettlementService::new(config))
    }

    fn post_json(uri: &str, body: impl Into<String>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.into()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn first_period(state: &AppState) -> PaymentPeriod {
        let (status, body) = send(
            state,
            post_json(
                "/companies/acme_freight/periods",
                r#"{"range_start": "2024-01-01", "range_end": "2024-01-15"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(body["periods"][0].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_generate_periods_returns_201() {
        let state = create_test_state();
        let response = create_router(state)
            .oneshot(post_json(
                "/companies/acme_freight/periods",
                r#"{"range_start": "2024-01-01", "range_end": "2024-02-01"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type, "application/json");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let generated: GeneratedPeriodsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(generated.periods.len(), 5);
        assert_eq!(generated.audit_step.rule_id, "period_generation");
    }

    #[tokio::test]
    async fn test_malformed_json_returns_400() {
        let state = create_test_state();
        let (status, body) = send(
            &state,
            post_json("/companies/acme_freight/periods", "{invalid json"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MALFORMED_JSON");
    }

    #[tokio::test]
    async fn test_missing_field_returns_validation_error() {
        let state = create_test_state();
        let (status, body) = send(
            &state,
            post_json(
                "/companies/acme_freight/periods",
                r#"{"range_start": "2024-01-01"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_company_returns_422() {
        let state = create_test_state();
        let (status, body) = send(
            &state,
            post_json(
                "/companies/ghost/periods",
                r#"{"range_start": "2024-01-01", "range_end": "2024-02-01"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_current_period_lookup() {
        let state = create_test_state();
        let period = first_period(&state).await;

        let (status, body) = send(
            &state,
            get("/companies/acme_freight/periods/current?date=2024-01-03"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], period.id.to_string());

        let (status, body) = send(
            &state,
            get("/companies/acme_freight/periods/current?date=2030-01-01"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_calculate_pay_and_close_flow() {
        let state = create_test_state();
        let period = first_period(&state).await;

        let unit = format!(
            r#"{{"id": "load_001", "company_id": "acme_freight", "driver_id": "drv_001",
                "period_id": "{}", "total_amount": "2000.00", "dispatch_rate": "10",
                "factoring_rate": "3", "leasing_rate": "0"}}"#,
            period.id
        );
        let (status, _) = send(&state, post_json("/units", unit)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &state,
            post_json(
                &format!("/periods/{}/drivers/drv_001/calculate", period.id),
                "",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let settlement: DriverSettlement =
            serde_json::from_value(body["settlement"].clone()).unwrap();
        // 2000 - 200 dispatch - 60 factoring - 50 insurance - 35 eld
        assert_eq!(settlement.net_payment, Decimal::from_str("1655.00").unwrap());
        assert!(body["audit_trace"]["steps"].as_array().unwrap().len() >= 4);

        let (status, body) = send(
            &state,
            get(&format!("/periods/{}/close-status", period.id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["can_close"], false);
        assert_eq!(body["blocking_drivers"][0], "drv_001");

        let (status, body) = send(
            &state,
            post_json(
                &format!("/settlements/{}/pay", settlement.id),
                r#"{"method": "ach", "reference": "ACH-1", "actor": "ops"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment_status"], "paid");

        let close = r#"{"payment_method": "ach", "actor": "ops"}"#;
        let uri = format!("/periods/{}/close", period.id);
        let (status, body) = send(&state, post_json(&uri, close)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["driver_count"], 1);

        let (status, body) = send(&state, post_json(&uri, close)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ALREADY_LOCKED");

        let (status, body) = send(&state, get(&format!("/periods/{}/report", period.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["period"]["status"], "locked");
        assert_eq!(body["totals"]["paid_count"], 1);
    }

    #[tokio::test]
    async fn test_close_blocked_lists_drivers() {
        let state = create_test_state();
        let period = first_period(&state).await;
        send(
            &state,
            post_json(
                &format!("/periods/{}/drivers/drv_003/deductions", period.id),
                r#"{"amount": "75.00", "description": "Damage claim"}"#,
            ),
        )
        .await;

        let (status, body) = send(
            &state,
            post_json(
                &format!("/periods/{}/close", period.id),
                r#"{"payment_method": "ach", "actor": "ops"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "BLOCKED_BY_INCOMPLETE_DRIVERS");
        assert_eq!(body["details"], "drv_003");
    }

    #[tokio::test]
    async fn test_manual_deduction_rejects_zero_amount() {
        let state = create_test_state();
        let period = first_period(&state).await;

        let (status, body) = send(
            &state,
            post_json(
                &format!("/periods/{}/drivers/drv_001/deductions", period.id),
                r#"{"amount": "0", "description": "Nothing"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_batch_pay_reports_each_item() {
        let state = create_test_state();
        let period = first_period(&state).await;
        let settlement = state
            .service()
            .calculate(period.id, "drv_001")
            .unwrap()
            .settlement;
        let missing = Uuid::new_v4();

        let body = format!(
            r#"{{"settlement_ids": ["{}", "{}"], "method": "ach", "actor": "ops"}}"#,
            settlement.id, missing
        );
        let (status, body) = send(&state, post_json("/settlements/pay", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paid"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["results"][1]["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_reassign_unknown_unit_returns_404() {
        let state = create_test_state();
        let (status, body) = send(
            &state,
            post_json("/units/ghost/reassign", r#"{"target_period_id": null}"#),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }
}
