use chrono::Utc;
use proptest::prelude::*;
use scanflow_core::models::{
    ImplementationComplexity, MetricType, OptimizationRecommendation, OptimizationType, RiskLevel,
    StepSpec, StepType, TuningAction, WorkflowStep,
};
use uuid::Uuid;

/// Strategy for generating step dependency graphs that are acyclic by construction:
/// step `i` may only depend on steps with a lower index
pub fn acyclic_steps_strategy() -> impl Strategy<Value = Vec<WorkflowStep>> {
    (1usize..=12)
        .prop_flat_map(|n| {
            let deps = (0..n)
                .map(|i| prop::collection::btree_set(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>();
            (Just(n), deps, prop::collection::vec(0u32..5, n))
        })
        .prop_map(|(n, deps, orders)| {
            let job_id = Uuid::new_v4();
            (0..n)
                .map(|i| {
                    let parents: Vec<String> = deps[i]
                        .iter()
                        .filter(|p| **p < i)
                        .map(|p| format!("step_{p}"))
                        .collect();
                    let spec = StepSpec::new(format!("step_{i}"), StepType::Scan)
                        .with_order(orders[i])
                        .depends_on(parents);
                    WorkflowStep::from_spec(job_id, &spec, 3, 0)
                })
                .collect()
        })
}

/// Strategy for generating allocation amounts in resource units
pub fn amount_strategy() -> impl Strategy<Value = f64> {
    (1u32..=40).prop_map(|tenths| f64::from(tenths) / 10.0)
}

/// Strategy for generating percentage readings, including out-of-range noise
pub fn percent_strategy() -> impl Strategy<Value = f64> {
    -50.0f64..250.0
}

pub fn risk_strategy() -> impl Strategy<Value = RiskLevel> {
    prop_oneof![Just(RiskLevel::Low), Just(RiskLevel::Medium), Just(RiskLevel::High)]
}

pub fn complexity_strategy() -> impl Strategy<Value = ImplementationComplexity> {
    prop_oneof![
        Just(ImplementationComplexity::Low),
        Just(ImplementationComplexity::Medium),
        Just(ImplementationComplexity::High),
    ]
}

/// Strategy for generating advisory recommendations with arbitrary ranking inputs
pub fn recommendation_strategy() -> impl Strategy<Value = OptimizationRecommendation> {
    (
        0.0f64..=1.0,
        0.0f64..=1.0,
        complexity_strategy(),
        risk_strategy(),
        0.0f64..80.0,
    )
        .prop_map(|(improvement, confidence, complexity, risk, effort)| {
            OptimizationRecommendation {
                id: Uuid::new_v4(),
                optimization_type: OptimizationType::Caching,
                target_component: "scan".to_string(),
                job_id: None,
                title: "Cache repeated lookups".to_string(),
                description: String::new(),
                expected_improvement: improvement,
                confidence,
                implementation_complexity: complexity,
                estimated_effort_hours: effort,
                risk_level: risk,
                prerequisites: Vec::new(),
                implementation_steps: Vec::new(),
                rollback_steps: Vec::new(),
                action: TuningAction::Advisory,
                metric_type: MetricType::ExecutionTime,
                source_bottleneck: None,
                created_at: Utc::now(),
            }
        })
}
