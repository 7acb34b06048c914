//! Audit trace models.
//!
//! Every calculation records the decisions it made as an ordered list of
//! [`AuditStep`]s. Steps carry no wall-clock data, so recalculating unchanged
//! inputs reproduces the same trace.

use serde::{Deserialize, Serialize};

/// A single step in the audit trace recording a calculation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStep {
    /// The sequential step number.
    pub step_number: u32,
    /// The unique identifier of the rule that was applied.
    pub rule_id: String,
    /// The human-readable name of the rule.
    pub rule_name: String,
    /// The input data for this step.
    pub input: serde_json::Value,
    /// The output data from this step.
    pub output: serde_json::Value,
    /// Human-readable explanation of the decision.
    pub reasoning: String,
}

/// The complete audit trace for a calculation.
///
/// # Example
///
/// ```
/// use settlement_engine::models::AuditTrace;
///
/// let mut trace = AuditTrace::default();
/// assert_eq!(trace.next_step_number(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrace {
    /// The sequence of calculation steps.
    pub steps: Vec<AuditStep>,
}

impl AuditTrace {
    /// Number to give the next appended step.
    pub fn next_step_number(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    /// Appends a step.
    pub fn push(&mut self, step: AuditStep) {
        self.steps.push(step);
    }

    /// Finds the first step produced by `rule_id`.
    pub fn find(&self, rule_id: &str) -> Option<&AuditStep> {
        self.steps.iter().find(|s| s.rule_id == rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u32, rule_id: &str) -> AuditStep {
        AuditStep {
            step_number: n,
            rule_id: rule_id.to_string(),
            rule_name: rule_id.to_string(),
            input: serde_json::json!({}),
            output: serde_json::json!({}),
            reasoning: String::new(),
        }
    }

    #[test]
    fn test_step_numbers_follow_length() {
        let mut trace = AuditTrace::default();
        trace.push(step(1, "earnings_aggregation"));
        trace.push(step(2, "net_payment"));
        assert_eq!(trace.next_step_number(), 3);
    }

    #[test]
    fn test_find_by_rule_id() {
        let mut trace = AuditTrace::default();
        trace.push(step(1, "earnings_aggregation"));
        assert!(trace.find("earnings_aggregation").is_some());
        assert!(trace.find("shortfall_waiver").is_none());
    }
}
