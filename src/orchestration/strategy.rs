//! # Scheduling Strategies
//!
//! Each orchestration strategy is an implementation of [`SchedulingStrategy`].
//! The job driver builds a [`SchedulingContext`] from its ready steps on every
//! tick, asks the strategy how many slots it admits and which steps to start.

use crate::config::OrchestrationConfig;
use crate::models::{GoalWeights, OrchestrationStrategy};
use std::collections::HashMap;

/// A step whose dependencies are satisfied and that may be started
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyStep {
    pub id: String,
    pub priority: i32,
    /// Position in the plan's topological order
    pub position: usize,
    pub level: usize,
    pub target: Option<String>,
}

/// Snapshot handed to a strategy on each dispatch
#[derive(Debug, Clone)]
pub struct SchedulingContext<'a> {
    pub ready: &'a [ReadyStep],
    pub running_total: usize,
    pub running_by_target: &'a HashMap<String, usize>,
    /// Lowest dependency level among non-terminal steps
    pub frontier_level: usize,
    pub max_concurrent: usize,
    /// Utilization of the most loaded pool, in [0, 1]
    pub system_utilization: f64,
    /// Recent step success rate; `None` without history
    pub success_rate: Option<f64>,
    pub goal_weights: GoalWeights,
}

impl SchedulingContext<'_> {
    fn free_slots(&self) -> usize {
        self.max_concurrent.saturating_sub(self.running_total)
    }

    fn in_plan_order(&self) -> Vec<&ReadyStep> {
        let mut ready: Vec<&ReadyStep> = self.ready.iter().collect();
        ready.sort_by_key(|s| s.position);
        ready
    }
}

pub trait SchedulingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of steps that may be started now
    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize;

    /// Ids of the steps to start now, at most `admission_policy` of them
    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String>;
}

fn take_ids<'a>(steps: impl IntoIterator<Item = &'a ReadyStep>, slots: usize) -> Vec<String> {
    steps.into_iter().take(slots).map(|s| s.id.clone()).collect()
}

/// One step at a time, in plan order
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialStrategy;

impl SchedulingStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize {
        usize::from(ctx.running_total == 0)
    }

    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String> {
        take_ids(ctx.in_plan_order(), self.admission_policy(ctx))
    }
}

/// Every ready step up to the concurrency limit
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelStrategy;

impl SchedulingStrategy for ParallelStrategy {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize {
        ctx.free_slots()
    }

    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String> {
        take_ids(ctx.in_plan_order(), self.admission_policy(ctx))
    }
}

/// Highest step priority first, plan order within equal priority
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityBasedStrategy;

impl SchedulingStrategy for PriorityBasedStrategy {
    fn name(&self) -> &'static str {
        "priority_based"
    }

    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize {
        ctx.free_slots()
    }

    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String> {
        let mut ready: Vec<&ReadyStep> = ctx.ready.iter().collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.position.cmp(&b.position)));
        take_ids(ready, self.admission_policy(ctx))
    }
}

/// Concurrency scaled down by current pool utilization
fn utilization_admission(ctx: &SchedulingContext<'_>) -> usize {
    let headroom = (1.0 - ctx.system_utilization).clamp(0.0, 1.0);
    let mut budget = (ctx.max_concurrent as f64 * headroom).floor() as usize;
    if budget == 0 && ctx.running_total == 0 {
        // Saturated pools must not starve an idle job
        budget = 1;
    }
    budget.min(ctx.max_concurrent).saturating_sub(ctx.running_total)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceAwareStrategy;

impl SchedulingStrategy for ResourceAwareStrategy {
    fn name(&self) -> &'static str {
        "resource_aware"
    }

    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize {
        utilization_admission(ctx)
    }

    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String> {
        take_ids(ctx.in_plan_order(), self.admission_policy(ctx))
    }
}

/// Utilization-gated like `resource_aware`, spreading starts across targets
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadBalancedStrategy;

impl SchedulingStrategy for LoadBalancedStrategy {
    fn name(&self) -> &'static str {
        "load_balanced"
    }

    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize {
        utilization_admission(ctx)
    }

    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String> {
        let slots = self.admission_policy(ctx);
        let mut load: HashMap<&str, usize> = ctx
            .running_by_target
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        let mut remaining = ctx.in_plan_order();
        let mut selected = Vec::with_capacity(slots);

        while selected.len() < slots && !remaining.is_empty() {
            let Some((idx, _)) = remaining.iter().enumerate().min_by_key(|(_, s)| {
                let target = s.target.as_deref().unwrap_or("");
                (load.get(target).copied().unwrap_or(0), s.position)
            }) else {
                break;
            };
            let step = remaining.remove(idx);
            *load.entry(step.target.as_deref().unwrap_or("")).or_default() += 1;
            selected.push(step.id.clone());
        }
        selected
    }
}

/// Strictly one dependency level at a time
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyAwareStrategy;

impl SchedulingStrategy for DependencyAwareStrategy {
    fn name(&self) -> &'static str {
        "dependency_aware"
    }

    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize {
        ctx.free_slots()
    }

    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String> {
        let frontier = ctx
            .in_plan_order()
            .into_iter()
            .filter(|s| s.level == ctx.frontier_level);
        take_ids(frontier, self.admission_policy(ctx))
    }
}

/// Chooses among the other strategies from system load and historical success
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveStrategy {
    pub high_load: f64,
    pub low_success_rate: f64,
}

impl AdaptiveStrategy {
    pub fn new(high_load: f64, low_success_rate: f64) -> Self {
        Self {
            high_load,
            low_success_rate,
        }
    }

    /// Strategy that governs the given context
    pub fn effective(&self, ctx: &SchedulingContext<'_>) -> &'static dyn SchedulingStrategy {
        if ctx.system_utilization > self.high_load {
            return &ResourceAwareStrategy;
        }
        if ctx
            .success_rate
            .map(|rate| rate < self.low_success_rate)
            .unwrap_or(false)
        {
            return &SequentialStrategy;
        }
        let mut priorities = ctx.ready.iter().map(|s| s.priority);
        let first = priorities.next();
        if priorities.any(|p| Some(p) != first) {
            return &PriorityBasedStrategy;
        }
        if !ctx.goal_weights.favors_speed() && ctx.goal_weights.cost > ctx.goal_weights.reliability {
            return &ResourceAwareStrategy;
        }
        &ParallelStrategy
    }
}

impl SchedulingStrategy for AdaptiveStrategy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn admission_policy(&self, ctx: &SchedulingContext<'_>) -> usize {
        self.effective(ctx).admission_policy(ctx)
    }

    fn select_next_ready_steps(&self, ctx: &SchedulingContext<'_>) -> Vec<String> {
        self.effective(ctx).select_next_ready_steps(ctx)
    }
}

/// Strategy implementation for a job's configured kind
pub fn strategy_for(
    kind: OrchestrationStrategy,
    config: &OrchestrationConfig,
) -> Box<dyn SchedulingStrategy> {
    match kind {
        OrchestrationStrategy::Sequential => Box::new(SequentialStrategy),
        OrchestrationStrategy::Parallel => Box::new(ParallelStrategy),
        OrchestrationStrategy::PriorityBased => Box::new(PriorityBasedStrategy),
        OrchestrationStrategy::ResourceAware => Box::new(ResourceAwareStrategy),
        OrchestrationStrategy::LoadBalanced => Box::new(LoadBalancedStrategy),
        OrchestrationStrategy::DependencyAware => Box::new(DependencyAwareStrategy),
        OrchestrationStrategy::Adaptive => Box::new(AdaptiveStrategy::new(
            config.adaptive_high_load,
            config.adaptive_low_success_rate,
        )),
    }
}
