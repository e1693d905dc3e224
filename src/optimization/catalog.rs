//! Fixed recommendation catalog keyed by bottleneck type.

use crate::constants::POOL_COMPONENT_PREFIX;
use crate::models::{
    BottleneckDetection, BottleneckType, ImplementationComplexity, MetricType,
    OptimizationRecommendation, OptimizationType, OrchestrationStrategy, RiskLevel, TuningAction,
};
use crate::resources::PoolEfficiency;
use chrono::Utc;
use uuid::Uuid;

use ImplementationComplexity as C;
use RiskLevel as R;

/// How a catalog entry turns into a concrete change
#[derive(Debug, Clone, Copy, PartialEq)]
enum ActionTemplate {
    Concurrency(i32),
    Strategy(OrchestrationStrategy),
    /// Resize the pool named by the component; advisory for non-pool components
    PoolScale(f64),
    Advisory,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    optimization_type: OptimizationType,
    title: &'static str,
    description: &'static str,
    expected_improvement: f64,
    confidence: f64,
    complexity: ImplementationComplexity,
    risk: RiskLevel,
    effort_hours: f64,
    action: ActionTemplate,
}

#[allow(clippy::too_many_arguments)]
fn entry(
    optimization_type: OptimizationType,
    title: &'static str,
    description: &'static str,
    expected_improvement: f64,
    confidence: f64,
    complexity: ImplementationComplexity,
    risk: RiskLevel,
    effort_hours: f64,
    action: ActionTemplate,
) -> Entry {
    Entry {
        optimization_type,
        title,
        description,
        expected_improvement,
        confidence,
        complexity,
        risk,
        effort_hours,
        action,
    }
}

fn entries_for(bottleneck_type: BottleneckType) -> Vec<Entry> {
    use ActionTemplate::*;
    use OptimizationType::*;
    match bottleneck_type {
        BottleneckType::CpuBound => vec![
            entry(ResourceScaling, "Scale CPU capacity", "Grow the saturated pool by 25%", 0.25, 0.85, C::Low, R::Low, 1.0, PoolScale(1.25)),
            entry(Parallelization, "Parallelize scans", "Run more independent scans concurrently", 0.3, 0.8, C::Medium, R::Medium, 16.0, Concurrency(2)),
            entry(AlgorithmOptimization, "Optimize scan algorithm", "Profile and rewrite the hottest scan passes", 0.4, 0.6, C::High, R::Medium, 32.0, Advisory),
        ],
        BottleneckType::MemoryBound => vec![
            entry(ConcurrencyTuning, "Reduce concurrent scans", "Lower concurrency so fewer scans share memory", 0.2, 0.8, C::Low, R::Low, 1.0, Concurrency(-1)),
            entry(Streaming, "Stream instead of batch", "Process rows as a stream rather than materialized batches", 0.35, 0.75, C::Medium, R::Low, 12.0, Advisory),
            entry(ResourceScaling, "Scale memory capacity", "Grow the memory pool by 25%", 0.2, 0.8, C::Low, R::Low, 1.0, PoolScale(1.25)),
        ],
        BottleneckType::IoBound => vec![
            entry(AsyncIo, "Async I/O with pooling", "Move blocking reads to async I/O over pooled connections", 0.4, 0.7, C::High, R::Medium, 24.0, Advisory),
            entry(ConnectionPooling, "Pool source connections", "Reuse connections across scan steps", 0.3, 0.8, C::Medium, R::Low, 8.0, Advisory),
            entry(Caching, "Cache catalog metadata", "Cache metadata lookups between scans", 0.25, 0.75, C::Medium, R::Low, 10.0, Advisory),
        ],
        BottleneckType::NetworkBound => vec![
            entry(ConcurrencyTuning, "Throttle transfers", "Lower concurrent transfers against the source", 0.2, 0.75, C::Low, R::Low, 1.0, Concurrency(-1)),
            entry(Caching, "Cache remote reads", "Avoid re-reading unchanged remote partitions", 0.25, 0.7, C::Medium, R::Low, 10.0, Advisory),
        ],
        BottleneckType::DatabaseBound => vec![
            entry(ConnectionPooling, "Grow connection pool", "Raise database connection capacity by 50%", 0.35, 0.8, C::Low, R::Low, 2.0, PoolScale(1.5)),
            entry(Caching, "Batch metadata queries", "Batch and cache catalog queries", 0.25, 0.75, C::Medium, R::Low, 8.0, Advisory),
        ],
        BottleneckType::ConcurrencyBound => vec![
            entry(StrategyChange, "Balance load across sources", "Switch to load-balanced scheduling", 0.2, 0.7, C::Low, R::Low, 1.0, Strategy(OrchestrationStrategy::LoadBalanced)),
            entry(ConcurrencyTuning, "Raise concurrency limit", "Admit more concurrent scans per job", 0.3, 0.75, C::Low, R::Medium, 1.0, Concurrency(2)),
        ],
        BottleneckType::AlgorithmBound => vec![
            entry(AlgorithmOptimization, "Incremental scanning", "Scan only data changed since the last checkpoint", 0.45, 0.65, C::High, R::Medium, 32.0, Advisory),
            entry(Caching, "Memoize classification results", "Reuse classification results for unchanged columns", 0.3, 0.7, C::Medium, R::Low, 12.0, Advisory),
        ],
        BottleneckType::CoordinationBound => vec![
            entry(StrategyChange, "Serialize by dependency graph", "Switch to dependency-aware scheduling", 0.25, 0.7, C::Low, R::Low, 1.0, Strategy(OrchestrationStrategy::DependencyAware)),
            entry(ConcurrencyTuning, "Reduce synchronization points", "Lower concurrency to cut cross-step contention", 0.15, 0.65, C::Low, R::Low, 1.0, Concurrency(-1)),
        ],
    }
}

fn pool_of(component: &str) -> Option<&str> {
    component.strip_prefix(POOL_COMPONENT_PREFIX)
}

fn build(
    entry: &Entry,
    component: &str,
    job_id: Option<Uuid>,
    metric_type: MetricType,
    source_bottleneck: Option<Uuid>,
) -> OptimizationRecommendation {
    let action = match entry.action {
        ActionTemplate::Concurrency(delta) => TuningAction::AdjustConcurrency { delta },
        ActionTemplate::Strategy(strategy) => TuningAction::SwitchStrategy { strategy },
        ActionTemplate::PoolScale(capacity_factor) => match pool_of(component) {
            Some(pool_id) => TuningAction::ResizePool {
                pool_id: pool_id.to_string(),
                capacity_factor,
            },
            None => TuningAction::Advisory,
        },
        ActionTemplate::Advisory => TuningAction::Advisory,
    };

    let implementation_steps = match &action {
        TuningAction::AdjustConcurrency { delta } => {
            vec![format!("Adjust max_concurrent_scans by {delta:+}")]
        }
        TuningAction::SwitchStrategy { strategy } => {
            vec![format!("Switch orchestration strategy to {strategy}")]
        }
        TuningAction::ResizePool {
            pool_id,
            capacity_factor,
        } => vec![format!("Resize pool {pool_id} by factor {capacity_factor}")],
        TuningAction::Advisory => vec![entry.description.to_string()],
    };
    let rollback_steps = if action.is_advisory() {
        vec!["Revert the manual change".to_string()]
    } else {
        vec!["Restore the values captured when the change was applied".to_string()]
    };

    OptimizationRecommendation {
        id: Uuid::new_v4(),
        optimization_type: entry.optimization_type,
        target_component: component.to_string(),
        job_id,
        title: entry.title.to_string(),
        description: entry.description.to_string(),
        expected_improvement: entry.expected_improvement,
        confidence: entry.confidence,
        implementation_complexity: entry.complexity,
        estimated_effort_hours: entry.effort_hours,
        risk_level: entry.risk,
        prerequisites: Vec::new(),
        implementation_steps,
        rollback_steps,
        action,
        metric_type,
        source_bottleneck,
        created_at: Utc::now(),
    }
}

/// Catalog recommendations for a detected bottleneck, at most `limit`
pub fn recommendations_for(
    detection: &BottleneckDetection,
    limit: usize,
) -> Vec<OptimizationRecommendation> {
    entries_for(detection.bottleneck_type)
        .iter()
        .take(limit)
        .map(|entry| {
            let mut recommendation = build(
                entry,
                &detection.component,
                detection.job_id,
                detection.metric_type,
                Some(detection.id),
            );
            recommendation
                .prerequisites
                .push(format!("{} confirmed on {}", detection.bottleneck_type, detection.component));
            recommendation
        })
        .collect()
}

/// Proactive recommendation for a component whose metric is trending worse
pub fn predictive_recommendation(
    component: &str,
    metric_type: MetricType,
    risk: f64,
) -> OptimizationRecommendation {
    let entry = entry(
        OptimizationType::Predictive,
        "Pre-empt predicted degradation",
        "Reduce load before the degrading trend becomes a bottleneck",
        (risk * 0.5).clamp(0.05, 0.5),
        0.6,
        C::Low,
        R::Low,
        1.0,
        ActionTemplate::Concurrency(-1),
    );
    let mut recommendation = build(&entry, component, None, metric_type, None);
    recommendation.description = format!(
        "{} ({metric_type} degradation risk {:.0}%)",
        recommendation.description,
        risk * 100.0
    );
    recommendation
}

/// `resource_efficiency` recommendation for a pool whose grants go largely unused
pub fn efficiency_recommendation(
    efficiency: &PoolEfficiency,
    metric_type: MetricType,
) -> Option<OptimizationRecommendation> {
    let average = efficiency.average_efficiency?;
    let waste = (1.0 - average).clamp(0.0, 1.0);
    let capacity_factor = average.max(0.5);
    let entry = entry(
        OptimizationType::ResourceEfficiency,
        "Right-size over-provisioned pool",
        "Released allocations used well below what they reserved",
        (waste * 0.5).clamp(0.05, 0.5),
        0.7,
        C::Low,
        R::Medium,
        2.0,
        ActionTemplate::PoolScale(capacity_factor),
    );
    let component = crate::constants::pool_component(&efficiency.pool_id);
    let mut recommendation = build(&entry, &component, None, metric_type, None);
    recommendation.description = format!(
        "{}: average efficiency {:.0}% over {} allocation(s), cost {:.2}",
        recommendation.description,
        average * 100.0,
        efficiency.released_allocations,
        efficiency.total_cost
    );
    Some(recommendation)
}
