//! Configuration loading and management for the settlement engine.
//!
//! This module loads per-company period cadences and recurring deduction
//! templates from YAML files. Both are owned by configuration collaborators
//! and are read-only to the engine.
//!
//! # Example
//!
//! ```no_run
//! use settlement_engine::config::ConfigLoader;
//!
//! let config = ConfigLoader::load("./config/demo").unwrap();
//! println!("Loaded {} templates", config.config().templates().len());
//! ```

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    CompaniesConfig, CompanyCadence, LoadDeductionPolicy, MAX_CUSTOM_PERIOD_DAYS,
    MAX_MONTHLY_CYCLE_DAY, PayoutRule, SettlementConfig, TemplatesConfig, iso_weekday,
};
