//! Driver payment period settlement engine.
//!
//! Turns a trucking company's revenue units, supplemental income, fuel spend
//! and recurring deductions into per-driver settlements for each payment
//! period, carries waived deductions forward, and locks a period once every
//! driver in it has been paid.
//!
//! All state lives in an in-memory [`ledger::Ledger`]; each operation of
//! [`service::SettlementService`] runs as one ledger transaction.
//!
//! # Example
//!
//! ```no_run
//! use settlement_engine::config::ConfigLoader;
//! use settlement_engine::service::SettlementService;
//! use chrono::NaiveDate;
//!
//! let config = ConfigLoader::load("./config/demo").unwrap().into_config();
//! let service = SettlementService::new(config);
//! service
//!     .generate_periods(
//!         "acme_freight",
//!         None,
//!         NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
//!     )
//!     .unwrap();
//! let period = service
//!     .period_for_date("acme_freight", NaiveDate::from_ymd_opt(2024, 1, 3).unwrap())
//!     .unwrap();
//! let calc = service.calculate(period.id, "drv_001").unwrap();
//! println!("Net payment: {}", calc.settlement.net_payment);
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod calculation;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod service;
