//! Configuration loading functionality.
//!
//! This module provides the [`ConfigLoader`] type for loading settlement
//! configuration from YAML files.

use std::fs;
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::models::DeductionTemplate;

use super::types::{CompaniesConfig, CompanyCadence, SettlementConfig, TemplatesConfig};

/// Loads and provides access to settlement configuration.
///
/// # Directory Structure
///
/// ```text
/// config/demo/
/// ├── companies.yaml            # Per-company period cadence
/// └── deduction_templates.yaml  # Recurring deduction templates
/// ```
///
/// # Example
///
/// ```no_run
/// use settlement_engine::config::ConfigLoader;
///
/// let loader = ConfigLoader::load("./config/demo").unwrap();
/// let cadence = loader.cadence("acme_freight").unwrap();
/// println!("Cycle starts on day {}", cadence.cycle_start_day);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: SettlementConfig,
}

impl ConfigLoader {
    /// Loads configuration from the specified directory.
    ///
    /// Returns an error if a file is missing, is not valid YAML, or holds a
    /// contradictory cadence or template.
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();

        let companies = Self::load_yaml::<CompaniesConfig>(&path.join("companies.yaml"))?;
        let templates = Self::load_yaml::<TemplatesConfig>(&path.join("deduction_templates.yaml"))?;

        let config = SettlementConfig::new(companies.companies, templates.templates)?;
        tracing::debug!(
            path = %path.display(),
            companies = config.companies().len(),
            templates = config.templates().len(),
            "Loaded settlement configuration"
        );

        Ok(Self { config })
    }

    /// Loads and parses a YAML file.
    fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> EngineResult<T> {
        let path_str = path.display().to_string();

        let content = fs::read_to_string(path).map_err(|_| EngineError::ConfigNotFound {
            path: path_str.clone(),
        })?;

        serde_yaml::from_str(&content).map_err(|e| EngineError::ConfigParseError {
            path: path_str,
            message: e.to_string(),
        })
    }

    /// Returns the underlying settlement configuration.
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Consumes the loader, returning the configuration.
    pub fn into_config(self) -> SettlementConfig {
        self.config
    }

    /// Gets a company's cadence.
    pub fn cadence(&self, company_id: &str) -> EngineResult<&CompanyCadence> {
        self.config.cadence(company_id)
    }

    /// Gets a template by id.
    pub fn template(&self, template_id: &str) -> EngineResult<&DeductionTemplate> {
        self.config
            .templates()
            .iter()
            .find(|t| t.id == template_id)
            .ok_or_else(|| EngineError::not_found("Deduction template", template_id))
    }
}
