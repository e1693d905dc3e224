mod common;

use common::strategies::*;
use proptest::prelude::*;
use scanflow_core::config::{ExecutionConfig, MonitoringConfig, ResourcesConfig};
use scanflow_core::events::EventPublisher;
use scanflow_core::models::{BottleneckType, OptimizationConstraints, ResourcePoolConfig, ResourceType};
use scanflow_core::monitoring::{
    degradation_severity, impact_score, latency_severity, utilization_severity,
};
use scanflow_core::optimization::{rank, score};
use scanflow_core::orchestration::{build_plan, is_valid_start_order, PlanOutcome};
use scanflow_core::resources::{AllocationRequest, ExhaustionPolicy, ResourceAllocator};
use uuid::Uuid;

proptest! {
    /// Property: plans over acyclic graphs list every step after all of its dependencies
    #[test]
    fn plan_order_is_topological(steps in acyclic_steps_strategy()) {
        let PlanOutcome::Valid(plan) = build_plan(&steps) else {
            return Err(TestCaseError::fail("acyclic graph reported as a cycle"));
        };
        prop_assert_eq!(plan.len(), steps.len());
        prop_assert!(is_valid_start_order(&plan.order, &steps));
        for step in &steps {
            for dep in &step.dependency_requirements {
                prop_assert!(plan.level(&step.id) > plan.level(dep));
            }
        }
    }

    /// Property: closing a loop between the first and last step is always reported
    #[test]
    fn back_edge_is_reported_as_cycle(mut steps in acyclic_steps_strategy()) {
        prop_assume!(steps.len() >= 2);
        let first = steps[0].id.clone();
        let last_index = steps.len() - 1;
        let last = steps[last_index].id.clone();
        steps[0].dependency_requirements.insert(last);
        steps[last_index].dependency_requirements.insert(first);

        match build_plan(&steps) {
            PlanOutcome::Cycle { steps: cycle } => {
                prop_assert!(cycle.len() >= 3);
                prop_assert_eq!(cycle.first(), cycle.last());
            }
            PlanOutcome::Valid(_) => return Err(TestCaseError::fail("cycle not detected")),
        }
    }

    /// Property: severities and impact scores stay within [0, 1]
    #[test]
    fn severities_are_normalized(
        percent in percent_strategy(),
        millis in 0.0f64..100_000.0,
        ratio in 0.0f64..20.0,
        success_rate in 0.0f64..=1.0,
    ) {
        let config = MonitoringConfig::default();
        for severity in [
            utilization_severity(percent),
            latency_severity(millis, config.latency_severity_ceiling_ms),
            degradation_severity(ratio),
        ] {
            prop_assert!((0.0..=1.0).contains(&severity));
            for kind in BottleneckType::ALL {
                let impact = impact_score(severity, kind, Some(success_rate), &config);
                prop_assert!((0.0..=1.0).contains(&impact));
            }
        }
    }

    /// Property: ranking is ordered by score, highest first
    #[test]
    fn ranking_is_sorted_by_score(recs in prop::collection::vec(recommendation_strategy(), 0..12)) {
        let constraints = OptimizationConstraints::default();
        let ranked = rank(recs.clone(), &constraints);
        prop_assert_eq!(ranked.len(), recs.len());
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    /// Property: more expected improvement never lowers the score
    #[test]
    fn score_is_monotonic_in_improvement(rec in recommendation_strategy(), bump in 0.0f64..0.5) {
        let constraints = OptimizationConstraints::default();
        let mut improved = rec.clone();
        improved.expected_improvement = (rec.expected_improvement + bump).min(1.0);
        prop_assert!(score(&improved, &constraints) >= score(&rec, &constraints));
    }

    /// Property: retry backoff grows with the attempt and never exceeds the cap
    #[test]
    fn backoff_is_capped_and_monotonic(delay in 0u64..120, attempt in 1u32..40) {
        let config = ExecutionConfig::default();
        let current = config.backoff_for(delay, attempt);
        let next = config.backoff_for(delay, attempt + 1);
        prop_assert!(current.as_secs() <= config.backoff_max_seconds);
        prop_assert!(next >= current);
    }

    /// Property: no interleaving of grants and releases overcommits a pool
    #[test]
    fn allocator_never_exceeds_capacity(
        ops in prop::collection::vec((amount_strategy(), any::<bool>()), 1..40)
    ) {
        tokio_test::block_on(async {
            let config = ResourcesConfig {
                pools: vec![ResourcePoolConfig::new("cpu", ResourceType::Cpu, 10.0)],
                allocation_attempts: 1,
                ..ResourcesConfig::default()
            };
            let allocator = ResourceAllocator::new(config, EventPublisher::default());
            let mut held: Vec<(Uuid, f64)> = Vec::new();

            for (amount, release_first) in ops {
                if release_first && !held.is_empty() {
                    let (id, _) = held.remove(0);
                    prop_assert!(allocator.release(id).unwrap());
                }
                let request = AllocationRequest::new(Uuid::new_v4(), ResourceType::Cpu, amount);
                if let Ok(allocation) = allocator.allocate(request, ExhaustionPolicy::Fail).await {
                    held.push((allocation.id, allocation.allocated_amount));
                }

                let snapshot = allocator.pool_snapshot("cpu").unwrap();
                let expected: f64 = held.iter().map(|(_, a)| a).sum();
                prop_assert!(snapshot.allocated <= snapshot.capacity + 1e-9);
                prop_assert!((snapshot.allocated - expected).abs() < 1e-6);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
