//! Multi-criteria ranking of recommendations.
//!
//! `score = expected_improvement × confidence × complexity × risk × effort × constraint`

use crate::constants::{complexity_factor, ranking, risk_factor};
use crate::models::{ConstraintEnforcement, OptimizationConstraints, OptimizationRecommendation};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecommendation {
    pub recommendation: OptimizationRecommendation,
    pub score: f64,
}

/// `max(0.1, 1 − hours / 40)`
pub fn effort_factor(estimated_effort_hours: f64) -> f64 {
    (1.0 - estimated_effort_hours / ranking::EFFORT_HORIZON_HOURS).max(ranking::MIN_EFFORT_FACTOR)
}

fn exceeds_effort(rec: &OptimizationRecommendation, constraints: &OptimizationConstraints) -> bool {
    constraints
        .max_effort_hours
        .is_some_and(|max| rec.estimated_effort_hours > max)
}

fn unacceptable_risk(rec: &OptimizationRecommendation, constraints: &OptimizationConstraints) -> bool {
    constraints
        .acceptable_risk_levels
        .as_ref()
        .is_some_and(|levels| !levels.contains(&rec.risk_level))
}

/// Penalty for soft-constraint violations; always 1.0 under hard enforcement
pub fn constraint_factor(
    rec: &OptimizationRecommendation,
    constraints: &OptimizationConstraints,
) -> f64 {
    if constraints.enforcement == ConstraintEnforcement::Hard {
        return 1.0;
    }
    let mut factor = 1.0;
    if exceeds_effort(rec, constraints) {
        factor *= ranking::EFFORT_CONSTRAINT_PENALTY;
    }
    if unacceptable_risk(rec, constraints) {
        factor *= ranking::RISK_CONSTRAINT_PENALTY;
    }
    factor
}

/// Whether the recommendation must be dropped under `constraints`
pub fn violates(rec: &OptimizationRecommendation, constraints: &OptimizationConstraints) -> bool {
    let complexity = constraints
        .max_complexity
        .is_some_and(|max| rec.implementation_complexity > max);
    let improvement = constraints
        .min_improvement
        .is_some_and(|min| rec.expected_improvement < min);
    if complexity || improvement {
        return true;
    }
    constraints.enforcement == ConstraintEnforcement::Hard
        && (exceeds_effort(rec, constraints) || unacceptable_risk(rec, constraints))
}

pub fn score(rec: &OptimizationRecommendation, constraints: &OptimizationConstraints) -> f64 {
    rec.expected_improvement
        * rec.confidence
        * complexity_factor(rec.implementation_complexity)
        * risk_factor(rec.risk_level)
        * effort_factor(rec.estimated_effort_hours)
        * constraint_factor(rec, constraints)
}

/// Filter violating recommendations and sort the rest by descending score.
///
/// Equal scores keep their input order.
pub fn rank(
    recommendations: Vec<OptimizationRecommendation>,
    constraints: &OptimizationConstraints,
) -> Vec<RankedRecommendation> {
    let mut ranked: Vec<RankedRecommendation> = recommendations
        .into_iter()
        .filter(|rec| !violates(rec, constraints))
        .map(|rec| RankedRecommendation {
            score: score(&rec, constraints),
            recommendation: rec,
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ImplementationComplexity, MetricType, OptimizationType, RiskLevel, TuningAction,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn rec(improvement: f64, confidence: f64) -> OptimizationRecommendation {
        OptimizationRecommendation {
            id: Uuid::new_v4(),
            optimization_type: OptimizationType::Caching,
            target_component: "scan".into(),
            job_id: None,
            title: "cache".into(),
            description: "cache".into(),
            expected_improvement: improvement,
            confidence,
            implementation_complexity: ImplementationComplexity::Low,
            estimated_effort_hours: 4.0,
            risk_level: RiskLevel::Low,
            prerequisites: vec![],
            implementation_steps: vec![],
            rollback_steps: vec![],
            action: TuningAction::Advisory,
            metric_type: MetricType::Latency,
            source_bottleneck: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn higher_improvement_ranks_first() {
        let low = rec(0.2, 0.8);
        let high = rec(0.3, 0.8);
        let ranked = rank(vec![low, high.clone()], &OptimizationConstraints::default());
        assert_eq!(ranked[0].recommendation.id, high.id);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn score_applies_every_factor() {
        let mut r = rec(0.5, 0.8);
        r.implementation_complexity = ImplementationComplexity::Medium;
        r.risk_level = RiskLevel::Medium;
        r.estimated_effort_hours = 20.0;
        let expected = 0.5 * 0.8 * 0.8 * 0.7 * 0.5;
        assert!((score(&r, &OptimizationConstraints::default()) - expected).abs() < 1e-12);
        assert_eq!(effort_factor(100.0), 0.1);
    }

    #[test]
    fn hard_constraints_filter() {
        let mut risky = rec(0.9, 0.9);
        risky.risk_level = RiskLevel::High;
        let constraints = OptimizationConstraints {
            acceptable_risk_levels: Some(vec![RiskLevel::Low]),
            ..Default::default()
        };
        let ranked = rank(vec![risky, rec(0.1, 0.5)], &constraints);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].recommendation.risk_level, RiskLevel::Low);
    }

    #[test]
    fn soft_constraints_penalize() {
        let mut costly = rec(0.5, 1.0);
        costly.estimated_effort_hours = 30.0;
        costly.risk_level = RiskLevel::High;
        let constraints = OptimizationConstraints {
            max_effort_hours: Some(10.0),
            acceptable_risk_levels: Some(vec![RiskLevel::Low]),
            enforcement: ConstraintEnforcement::Soft,
            ..Default::default()
        };
        assert!((constraint_factor(&costly, &constraints) - 0.15).abs() < 1e-12);
        assert_eq!(rank(vec![costly], &constraints).len(), 1);
    }

    #[test]
    fn min_improvement_filters_even_when_soft() {
        let constraints = OptimizationConstraints {
            min_improvement: Some(0.25),
            enforcement: ConstraintEnforcement::Soft,
            ..Default::default()
        };
        assert!(rank(vec![rec(0.2, 1.0)], &constraints).is_empty());
    }
}
