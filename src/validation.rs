//! Job spec validation
//!
//! Rejects malformed submissions before any record is created: empty target
//! lists, out-of-range concurrency or failure thresholds, inconsistent goal
//! weights, and step declarations that reference unknown steps.

use crate::config::OrchestrationConfig;
use crate::error::{Result, ScanflowError};
use crate::models::{GoalWeights, JobSpec, ResourceRequirement};
use serde_json::Value;
use std::collections::HashSet;

/// Allowed deviation of the goal weight sum from 1.0
const GOAL_WEIGHT_TOLERANCE: f64 = 0.01;

/// Maximum nesting depth for job context documents
const MAX_CONTEXT_DEPTH: usize = 10;

/// Validates a job spec against the orchestration limits
pub fn validate_job_spec(spec: &JobSpec, limits: &OrchestrationConfig) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(ScanflowError::Validation("job name must not be empty".to_string()));
    }

    if spec.targets.is_empty() {
        return Err(ScanflowError::Validation(
            "target list must not be empty".to_string(),
        ));
    }
    if let Some(blank) = spec.targets.iter().position(|t| t.trim().is_empty()) {
        return Err(ScanflowError::Validation(format!(
            "target at index {blank} is blank"
        )));
    }

    if let Some(max) = spec.max_concurrent_scans {
        validate_concurrency(max, limits.max_concurrent_scans_limit)?;
    }

    if let Some(threshold) = spec.failure_threshold {
        if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
            return Err(ScanflowError::Validation(format!(
                "failure_threshold must be within [0, 1], got {threshold}"
            )));
        }
    }

    if spec.timeout_seconds == Some(0) {
        return Err(ScanflowError::Validation(
            "timeout_seconds must be positive".to_string(),
        ));
    }

    validate_goal_weights(&spec.goal_weights)?;
    validate_requirements(&spec.resource_requirements, "job")?;
    validate_steps(spec)?;
    validate_context(&spec.context, 0)?;

    Ok(())
}

/// Concurrency must be at least one and within the configured ceiling
pub fn validate_concurrency(max_concurrent_scans: usize, limit: usize) -> Result<()> {
    if max_concurrent_scans == 0 || max_concurrent_scans > limit {
        return Err(ScanflowError::Validation(format!(
            "max_concurrent_scans must be within [1, {limit}], got {max_concurrent_scans}"
        )));
    }
    Ok(())
}

/// Each weight in [0, 1] and the sum within tolerance of 1
pub fn validate_goal_weights(weights: &GoalWeights) -> Result<()> {
    for (name, weight) in weights.values() {
        if !(0.0..=1.0).contains(&weight) || weight.is_nan() {
            return Err(ScanflowError::Validation(format!(
                "goal weight '{name}' must be within [0, 1], got {weight}"
            )));
        }
    }

    let total = weights.total();
    if (total - 1.0).abs() > GOAL_WEIGHT_TOLERANCE {
        return Err(ScanflowError::Validation(format!(
            "goal weights must sum to 1.0, got {total:.3}"
        )));
    }
    Ok(())
}

fn validate_requirements(requirements: &[ResourceRequirement], owner: &str) -> Result<()> {
    for requirement in requirements {
        if requirement.amount <= 0.0 || !requirement.amount.is_finite() {
            return Err(ScanflowError::Validation(format!(
                "{owner} resource requirement for {} must be a positive amount, got {}",
                requirement.resource_type, requirement.amount
            )));
        }
    }
    Ok(())
}

fn validate_steps(spec: &JobSpec) -> Result<()> {
    let mut ids = HashSet::with_capacity(spec.steps.len());
    for step in &spec.steps {
        if step.id.trim().is_empty() {
            return Err(ScanflowError::Validation("step id must not be empty".to_string()));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(ScanflowError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    for step in &spec.steps {
        for dependency in &step.depends_on {
            if !ids.contains(dependency.as_str()) {
                return Err(ScanflowError::Validation(format!(
                    "step '{}' depends on unknown step '{dependency}'",
                    step.id
                )));
            }
        }
        if let Some(parent) = &step.parent_step {
            if !ids.contains(parent.as_str()) {
                return Err(ScanflowError::Validation(format!(
                    "step '{}' references unknown parent '{parent}'",
                    step.id
                )));
            }
        }
        if step.timeout_seconds == Some(0) {
            return Err(ScanflowError::Validation(format!(
                "step '{}' timeout_seconds must be positive",
                step.id
            )));
        }
        validate_requirements(&step.resources, &format!("step '{}'", step.id))?;
    }

    Ok(())
}

fn validate_context(value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_CONTEXT_DEPTH {
        return Err(ScanflowError::Validation(format!(
            "job context nesting too deep (max: {MAX_CONTEXT_DEPTH})"
        )));
    }
    match value {
        Value::Object(map) => map.values().try_for_each(|v| validate_context(v, depth + 1)),
        Value::Array(items) => items.iter().try_for_each(|v| validate_context(v, depth + 1)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceType, StepSpec, StepType};
    use serde_json::json;

    fn limits() -> OrchestrationConfig {
        OrchestrationConfig::default()
    }

    fn spec() -> JobSpec {
        JobSpec::new("nightly", vec!["pg://orders".into()])
    }

    #[test]
    fn accepts_minimal_spec() {
        assert!(validate_job_spec(&spec(), &limits()).is_ok());
    }

    #[test]
    fn rejects_empty_targets() {
        let spec = JobSpec::new("nightly", vec![]);
        let err = validate_job_spec(&spec, &limits()).unwrap_err();
        assert!(matches!(err, ScanflowError::Validation(_)));
    }

    #[test]
    fn rejects_concurrency_out_of_bounds() {
        assert!(validate_job_spec(&spec().with_max_concurrent_scans(0), &limits()).is_err());
        assert!(validate_job_spec(&spec().with_max_concurrent_scans(101), &limits()).is_err());
        assert!(validate_job_spec(&spec().with_max_concurrent_scans(100), &limits()).is_ok());
    }

    #[test]
    fn rejects_goal_weights_not_summing_to_one() {
        let weights = GoalWeights {
            throughput: 0.5,
            latency: 0.5,
            cost: 0.5,
            reliability: 0.0,
        };
        let err = validate_job_spec(&spec().with_goal_weights(weights), &limits()).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn rejects_unknown_dependency_and_duplicates() {
        let unknown = spec().with_step(StepSpec::new("a", StepType::Scan).depends_on(["ghost"]));
        assert!(validate_job_spec(&unknown, &limits()).is_err());

        let duplicate = spec()
            .with_step(StepSpec::new("a", StepType::Scan))
            .with_step(StepSpec::new("a", StepType::Validation));
        assert!(validate_job_spec(&duplicate, &limits()).is_err());
    }

    #[test]
    fn rejects_non_positive_requirements() {
        let spec = spec().with_resource(ResourceRequirement::new(ResourceType::Cpu, 0.0));
        assert!(validate_job_spec(&spec, &limits()).is_err());
    }

    #[test]
    fn rejects_deep_context() {
        let mut context = json!(1);
        for _ in 0..12 {
            context = json!({ "nested": context });
        }
        assert!(validate_job_spec(&spec().with_context(context), &limits()).is_err());
    }
}
