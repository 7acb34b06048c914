//! Response bodies and error mapping for the settlement API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::{PeriodGenerationResult, SettlementCalculation, UnitReassignment};
use crate::error::EngineError;
use crate::models::{
    AuditStep, AuditTrace, DeductionInstance, DeferredDeduction, DriverSettlement, PaymentPeriod,
    RevenueUnit,
};
use crate::service::MarkPaidOutcome;

/// API error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new API error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Creates a malformed JSON error response.
    pub fn malformed_json(message: impl Into<String>) -> Self {
        Self::new("MALFORMED_JSON", message)
    }
}

/// API error with HTTP status code.
pub struct ApiErrorResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The error body.
    pub error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<EngineError> for ApiErrorResponse {
    fn from(error: EngineError) -> Self {
        let message = error.to_string();
        let (status, error) = match error {
            EngineError::Configuration { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("CONFIGURATION_ERROR", message),
            ),
            EngineError::ConfigNotFound { .. } | EngineError::ConfigParseError { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::with_details("CONFIG_ERROR", "Configuration error", message),
            ),
            EngineError::PeriodLocked { .. } => {
                (StatusCode::CONFLICT, ApiError::new("PERIOD_LOCKED", message))
            }
            EngineError::AlreadyLocked { .. } => {
                (StatusCode::CONFLICT, ApiError::new("ALREADY_LOCKED", message))
            }
            EngineError::StaleRecalculation { reason, .. } => (
                StatusCode::CONFLICT,
                ApiError::with_details("STALE_RECALCULATION", message, reason),
            ),
            EngineError::BlockedByIncompleteDrivers { drivers, .. } => (
                StatusCode::CONFLICT,
                ApiError::with_details(
                    "BLOCKED_BY_INCOMPLETE_DRIVERS",
                    "Payment period has unpaid drivers",
                    drivers.join(","),
                ),
            ),
            EngineError::PeriodOverlap { .. } => {
                (StatusCode::CONFLICT, ApiError::new("PERIOD_OVERLAP", message))
            }
            EngineError::InvalidState { .. } => {
                (StatusCode::CONFLICT, ApiError::new("INVALID_STATE", message))
            }
            EngineError::LedgerConstraint { .. } => (
                StatusCode::CONFLICT,
                ApiError::new("LEDGER_CONSTRAINT", message),
            ),
            EngineError::NotFound { .. } => {
                (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", message))
            }
            EngineError::InvalidInput { .. } => (
                StatusCode::BAD_REQUEST,
                ApiError::new("VALIDATION_ERROR", message),
            ),
        };
        ApiErrorResponse { status, error }
    }
}

/// Body returned by period generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPeriodsResponse {
    /// Newly created periods, in date order.
    pub periods: Vec<PaymentPeriod>,
    /// Periods that already existed and were left alone.
    pub skipped: usize,
    /// How the periods were derived.
    pub audit_step: AuditStep,
}

impl From<PeriodGenerationResult> for GeneratedPeriodsResponse {
    fn from(result: PeriodGenerationResult) -> Self {
        Self {
            periods: result.periods,
            skipped: result.skipped,
            audit_step: result.audit_step,
        }
    }
}

/// Body returned by a settlement calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationResponse {
    /// The stored settlement row.
    pub settlement: DriverSettlement,
    /// Every deduction instance of the pair.
    pub deductions: Vec<DeductionInstance>,
    /// Deferrals created by this calculation.
    pub deferrals: Vec<DeferredDeduction>,
    /// Ordered calculation steps.
    pub audit_trace: AuditTrace,
}

impl From<SettlementCalculation> for CalculationResponse {
    fn from(calc: SettlementCalculation) -> Self {
        Self {
            settlement: calc.settlement,
            deductions: calc.deductions,
            deferrals: calc.deferrals,
            audit_trace: calc.audit_trace,
        }
    }
}

/// One item of a batch payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayItem {
    /// The settlement the item referred to.
    pub settlement_id: Uuid,
    /// The paid settlement on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<DriverSettlement>,
    /// Why the item failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl From<MarkPaidOutcome> for BatchPayItem {
    fn from(outcome: MarkPaidOutcome) -> Self {
        match outcome.result {
            Ok(settlement) => Self {
                settlement_id: outcome.settlement_id,
                settlement: Some(settlement),
                error: None,
            },
            Err(err) => Self {
                settlement_id: outcome.settlement_id,
                settlement: None,
                error: Some(ApiErrorResponse::from(err).error),
            },
        }
    }
}

/// Body returned by a batch payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayResponse {
    /// Number of items paid.
    pub paid: usize,
    /// Number of items rejected.
    pub failed: usize,
    /// Per-item results, in request order.
    pub results: Vec<BatchPayItem>,
}

impl From<Vec<MarkPaidOutcome>> for BatchPayResponse {
    fn from(outcomes: Vec<MarkPaidOutcome>) -> Self {
        let results: Vec<BatchPayItem> = outcomes.into_iter().map(Into::into).collect();
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        Self {
            paid: results.len() - failed,
            failed,
            results,
        }
    }
}

/// Body returned by a unit reassignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassignResponse {
    /// The unit after the move.
    pub unit: RevenueUnit,
    /// Where the unit was before.
    pub previous_period_id: Option<Uuid>,
}

impl From<UnitReassignment> for ReassignResponse {
    fn from(moved: UnitReassignment) -> Self {
        Self {
            unit: moved.unit,
            previous_period_id: moved.previous_period_id,
        }
    }
}
