//! Error types for the settlement engine.
//!
//! This module provides strongly-typed errors using the `thiserror` crate
//! for every failure a settlement operation can report. Single-entity
//! operations propagate the first error; batch operations collect one
//! error per item.

use thiserror::Error;
use uuid::Uuid;

/// The main error type for the settlement engine.
///
/// # Example
///
/// ```
/// use settlement_engine::error::EngineError;
///
/// let error = EngineError::ConfigNotFound {
///     path: "/missing/companies.yaml".to_string(),
/// };
/// assert_eq!(error.to_string(), "Configuration file not found: /missing/companies.yaml");
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Cadence, template or rate configuration is missing or contradictory.
    #[error("Configuration error: {message}")]
    Configuration {
        /// A description of the configuration problem.
        message: String,
    },

    /// Configuration file was not found at the specified path.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {message}")]
    ConfigParseError {
        /// The path to the file that failed to parse.
        path: String,
        /// A description of the parse error.
        message: String,
    },

    /// A mutation was attempted against a locked period.
    #[error("Payment period {period_id} is locked")]
    PeriodLocked {
        /// The locked period.
        period_id: Uuid,
    },

    /// A paid or invalidated settlement cannot be used as-is.
    #[error("Settlement {settlement_id} is stale: {reason}")]
    StaleRecalculation {
        /// The affected settlement.
        settlement_id: Uuid,
        /// Why the settlement cannot be used.
        reason: String,
    },

    /// Another caller locked the period first.
    #[error("Payment period {period_id} is already locked")]
    AlreadyLocked {
        /// The period that was already locked.
        period_id: Uuid,
    },

    /// The period still has drivers that are not paid.
    #[error(
        "Payment period {period_id} cannot be closed, drivers not paid: {}",
        .drivers.join(", ")
    )]
    BlockedByIncompleteDrivers {
        /// The period that could not be closed.
        period_id: Uuid,
        /// Drivers whose settlements are not in `paid` state.
        drivers: Vec<String>,
    },

    /// A generated period would split or overlap an existing one.
    #[error("Period {start}..{end} overlaps existing period {existing_id}")]
    PeriodOverlap {
        /// Start of the rejected candidate period.
        start: chrono::NaiveDate,
        /// Exclusive end of the rejected candidate period.
        end: chrono::NaiveDate,
        /// The existing period it collides with.
        existing_id: Uuid,
    },

    /// A referenced ledger record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Caller input was rejected before touching the ledger.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// A description of what was wrong.
        message: String,
    },

    /// The record is not in a state that allows the operation.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// A description of the state conflict.
        message: String,
    },

    /// A ledger uniqueness constraint rejected a write.
    #[error("Ledger constraint violated: {message}")]
    LedgerConstraint {
        /// The violated constraint.
        message: String,
    },
}

impl EngineError {
    /// Creates a [`EngineError::Configuration`] error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a [`EngineError::NotFound`] error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a [`EngineError::InvalidInput`] error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a [`EngineError::InvalidState`] error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

/// A type alias for Results that return EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
