//! HTTP API for the settlement engine.
//!
//! Exposes period generation, deduction entry, calculation, payment and
//! period closure as JSON endpoints over [`SettlementService`](crate::service::SettlementService).

mod handlers;
mod request;
mod response;
mod state;

pub use handlers::create_router;
pub use request::{
    BatchPayRequest, CloseRequest, CurrentPeriodQuery, GeneratePeriodsRequest,
    ManualDeductionRequest, PayRequest, ReassignRequest,
};
pub use response::{
    ApiError, BatchPayItem, BatchPayResponse, CalculationResponse, GeneratedPeriodsResponse,
    ReassignResponse,
};
pub use state::AppState;
