//! Shared state for the settlement API.

use std::sync::Arc;

use crate::service::SettlementService;

/// Shared application state.
///
/// Every handler works through the same [`SettlementService`], so the
/// ledger's transaction boundaries hold across concurrent requests.
#[derive(Debug, Clone)]
pub struct AppState {
    service: Arc<SettlementService>,
}

impl AppState {
    /// Creates the state around a freshly built service.
    pub fn new(service: SettlementService) -> Self {
        Self::from_shared(Arc::new(service))
    }

    /// Creates the state around a service shared with other callers.
    pub fn from_shared(service: Arc<SettlementService>) -> Self {
        Self { service }
    }

    /// The settlement service.
    pub fn service(&self) -> &SettlementService {
        &self.service
    }
}
