//! # Resource Allocator
//!
//! Sole mutator of [`ResourceAllocation`] records. Every pool is guarded by its
//! own mutex so that the capacity check and the reservation happen in one
//! critical section; releases drain the pool's wait queue inside that same
//! section.
//!
//! Contention is arbitrated by `priority_level`: higher values are served
//! first, FIFO among equal priorities. A newcomer is granted immediately only
//! when nothing is queued or it outranks the head of the queue, so queued
//! requests are never overtaken by an equal or lower priority arrival.
//!
//! Only live allocations are held in the pool's table. Released allocations
//! move to a bounded history used for efficiency reporting; ids evicted from
//! that history are no longer known to the allocator.

use crate::config::{ExhaustionPolicy, ResourcesConfig};
use crate::constants::events;
use crate::error::{Result, ScanflowError};
use crate::events::EventPublisher;
use crate::logging::log_allocation_operation;
use crate::models::{AllocationStatus, ResourceAllocation, ResourcePoolConfig, ResourceType};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const CAPACITY_EPSILON: f64 = 1e-9;

/// A request for pool capacity
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub job_id: Uuid,
    pub step_id: Option<String>,
    pub resource_type: ResourceType,
    pub amount: f64,
    /// Explicit pool; otherwise the first configured pool of `resource_type`
    pub pool_id: Option<String>,
    pub priority: i32,
}

impl AllocationRequest {
    pub fn new(job_id: Uuid, resource_type: ResourceType, amount: f64) -> Self {
        Self {
            job_id,
            step_id: None,
            resource_type,
            amount,
            pool_id: None,
            priority: 0,
        }
    }

    pub fn for_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn in_pool(mut self, pool_id: impl Into<String>) -> Self {
        self.pool_id = Some(pool_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Point-in-time view of one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: String,
    pub resource_type: ResourceType,
    pub capacity: f64,
    /// Sum over `allocated` and `active` allocations
    pub allocated: f64,
    pub available: f64,
    pub utilization: f64,
    pub active_allocations: usize,
    pub queued_requests: usize,
}

/// Usage efficiency of released allocations in one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEfficiency {
    pub pool_id: String,
    pub released_allocations: usize,
    pub average_efficiency: Option<f64>,
    pub total_cost: f64,
}

struct QueuedRequest {
    priority: i32,
    seq: u64,
    allocation: ResourceAllocation,
    reply: oneshot::Sender<ResourceAllocation>,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    // Max-heap: higher priority first, then lower sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolState {
    config: ResourcePoolConfig,
    in_use: f64,
    /// Allocations currently holding capacity
    allocations: HashMap<Uuid, ResourceAllocation>,
    released: VecDeque<ResourceAllocation>,
    history_limit: usize,
    queue: BinaryHeap<QueuedRequest>,
    next_seq: u64,
}

impl PoolState {
    fn new(config: ResourcePoolConfig, history_limit: usize) -> Self {
        Self {
            config,
            in_use: 0.0,
            allocations: HashMap::new(),
            released: VecDeque::new(),
            history_limit: history_limit.max(1),
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn available(&self) -> f64 {
        (self.config.capacity - self.in_use).max(0.0)
    }

    fn fits(&self, amount: f64) -> bool {
        self.in_use + amount <= self.config.capacity + CAPACITY_EPSILON
    }

    /// A newcomer may bypass the queue only by strictly outranking its head
    fn admits_newcomer(&self, priority: i32, amount: f64) -> bool {
        let outranks_queue = self
            .queue
            .peek()
            .map_or(true, |head| priority > head.priority);
        outranks_queue && self.fits(amount)
    }

    fn find_mut(&mut self, allocation_id: Uuid) -> Option<&mut ResourceAllocation> {
        if self.allocations.contains_key(&allocation_id) {
            return self.allocations.get_mut(&allocation_id);
        }
        self.released.iter_mut().find(|a| a.id == allocation_id)
    }

    fn grant(&mut self, mut allocation: ResourceAllocation) -> ResourceAllocation {
        allocation.grant();
        self.in_use += allocation.allocated_amount;
        self.allocations.insert(allocation.id, allocation.clone());
        allocation
    }

    /// Move a live allocation into the released history. Returns the released
    /// record and the ids that fell out of the history.
    fn free(&mut self, allocation_id: Uuid) -> Option<(ResourceAllocation, Vec<Uuid>)> {
        let mut allocation = self.allocations.remove(&allocation_id)?;
        self.in_use = (self.in_use - allocation.allocated_amount).max(0.0);
        allocation.status = AllocationStatus::Released;
        allocation.released_at = Some(Utc::now());
        allocation.usage_efficiency = allocation.efficiency();

        self.released.push_back(allocation.clone());
        let mut evicted = Vec::new();
        while self.released.len() > self.history_limit {
            if let Some(old) = self.released.pop_front() {
                evicted.push(old.id);
            }
        }
        Some((allocation, evicted))
    }

    /// Serve waiters in priority order while the head of the queue fits.
    /// Returns the served allocations and any history ids evicted on the way.
    fn drain_queue(&mut self) -> (Vec<ResourceAllocation>, Vec<Uuid>) {
        let mut granted = Vec::new();
        let mut evicted = Vec::new();
        while let Some(head) = self.queue.peek() {
            if !self.fits(head.allocation.requested_amount) {
                break;
            }
            let Some(waiter) = self.queue.pop() else {
                break;
            };
            let allocation = self.grant(waiter.allocation);
            if waiter.reply.send(allocation.clone()).is_err() {
                // Requester went away while queued
                if let Some((_, dropped)) = self.free(allocation.id) {
                    evicted.extend(dropped);
                }
                continue;
            }
            granted.push(allocation);
        }
        (granted, evicted)
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            pool_id: self.config.id.clone(),
            resource_type: self.config.resource_type.clone(),
            capacity: self.config.capacity,
            allocated: self.in_use,
            available: self.available(),
            utilization: if self.config.capacity > 0.0 {
                (self.in_use / self.config.capacity).clamp(0.0, 1.0)
            } else {
                0.0
            },
            active_allocations: self.allocations.len(),
            queued_requests: self.queue.len(),
        }
    }
}

/// Reserves, tracks and releases typed resources per job and step
pub struct ResourceAllocator {
    pools: DashMap<String, Arc<Mutex<PoolState>>>,
    pool_order: RwLock<Vec<String>>,
    allocation_index: DashMap<Uuid, String>,
    config: ResourcesConfig,
    publisher: EventPublisher,
}

impl std::fmt::Debug for ResourceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("pools", &*self.pool_order.read())
            .field("allocations", &self.allocation_index.len())
            .finish()
    }
}

impl ResourceAllocator {
    pub fn new(config: ResourcesConfig, publisher: EventPublisher) -> Self {
        let allocator = Self {
            pools: DashMap::new(),
            pool_order: RwLock::new(Vec::new()),
            allocation_index: DashMap::new(),
            config: config.clone(),
            publisher,
        };
        for pool in config.pools {
            allocator.add_pool(pool);
        }
        allocator
    }

    /// Register a pool; an existing pool with the same id is left untouched
    pub fn add_pool(&self, pool: ResourcePoolConfig) -> bool {
        if self.pools.contains_key(&pool.id) {
            return false;
        }
        let id = pool.id.clone();
        let state = PoolState::new(pool, self.config.released_history_limit);
        self.pools.insert(id.clone(), Arc::new(Mutex::new(state)));
        self.pool_order.write().push(id);
        true
    }

    pub fn pool_ids(&self) -> Vec<String> {
        self.pool_order.read().clone()
    }

    pub fn default_policy(&self) -> ExhaustionPolicy {
        self.config.exhaustion_policy
    }

    fn pool(&self, pool_id: &str) -> Result<Arc<Mutex<PoolState>>> {
        self.pools
            .get(pool_id)
            .map(|p| Arc::clone(p.value()))
            .ok_or_else(|| ScanflowError::not_found("resource pool", pool_id))
    }

    /// Explicit pool id, or the first registered pool of the resource type
    pub fn resolve_pool(&self, resource_type: &ResourceType, pool_id: Option<&str>) -> Result<String> {
        if let Some(pool_id) = pool_id {
            let pool = self.pool(pool_id)?;
            let pool_type = pool.lock().config.resource_type.clone();
            if &pool_type != resource_type {
                return Err(ScanflowError::Validation(format!(
                    "pool {pool_id} holds {pool_type}, not {resource_type}"
                )));
            }
            return Ok(pool_id.to_string());
        }
        self.pool_order
            .read()
            .iter()
            .find(|id| {
                self.pools
                    .get(*id)
                    .map(|p| &p.lock().config.resource_type == resource_type)
                    .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| ScanflowError::not_found("resource pool for type", resource_type))
    }

    /// Atomically reserve capacity, queueing or failing per `policy` when the pool is full
    #[instrument(skip(self), fields(job_id = %request.job_id, amount = request.amount))]
    pub async fn allocate(
        &self,
        request: AllocationRequest,
        policy: ExhaustionPolicy,
    ) -> Result<ResourceAllocation> {
        if !(request.amount > 0.0 && request.amount.is_finite()) {
            return Err(ScanflowError::Validation(format!(
                "requested amount must be positive, got {}",
                request.amount
            )));
        }

        let pool_id = self.resolve_pool(&request.resource_type, request.pool_id.as_deref())?;
        let pool = self.pool(&pool_id)?;

        let receiver = {
            let mut state = pool.lock();
            let allocation = ResourceAllocation::requested(
                request.job_id,
                request.step_id.clone(),
                request.resource_type.clone(),
                &state.config,
                request.amount,
                request.priority,
            );

            if request.amount > state.config.capacity + CAPACITY_EPSILON {
                let available = state.available();
                drop(state);
                return Err(self.rejected(&pool_id, request.amount, available));
            }

            if state.admits_newcomer(request.priority, request.amount) {
                let allocation = state.grant(allocation);
                self.allocation_index.insert(allocation.id, pool_id.clone());
                drop(state);
                self.granted(&allocation);
                return Ok(allocation);
            }

            match policy {
                ExhaustionPolicy::Fail => {
                    let available = state.available();
                    drop(state);
                    return Err(self.rejected(&pool_id, request.amount, available));
                }
                ExhaustionPolicy::Queue => {
                    let (reply, receiver) = oneshot::channel();
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    // Index before the lock is released so a concurrent drain can be released by id
                    self.allocation_index.insert(allocation.id, pool_id.clone());
                    let allocation_id = allocation.id;
                    state.queue.push(QueuedRequest {
                        priority: request.priority,
                        seq,
                        allocation,
                        reply,
                    });
                    log_allocation_operation(
                        "queue",
                        &pool_id,
                        Some(allocation_id),
                        Some(request.amount),
                        "queued",
                    );
                    self.publisher.publish(
                        events::ALLOCATION_QUEUED,
                        json!({
                            "pool_id": pool_id,
                            "job_id": request.job_id,
                            "allocation_id": allocation_id,
                            "priority": request.priority,
                        }),
                    );
                    (allocation_id, receiver)
                }
            }
        };

        let (allocation_id, mut receiver) = receiver;
        match tokio::time::timeout(self.config.queue_timeout(), &mut receiver).await {
            Ok(Ok(allocation)) => {
                self.granted(&allocation);
                Ok(allocation)
            }
            Ok(Err(_)) => {
                self.allocation_index.remove(&allocation_id);
                Err(ScanflowError::Shutdown(format!(
                    "pool {pool_id} dropped queued request {allocation_id}"
                )))
            }
            Err(_) => {
                let mut state = pool.lock();
                let before = state.queue.len();
                state.queue.retain(|q| q.allocation.id != allocation_id);
                let still_queued = state.queue.len() != before;
                // A timed-out head may have been blocking smaller waiters
                let (_, evicted) = state.drain_queue();
                let available = state.available();
                drop(state);
                self.forget(&evicted);

                if still_queued {
                    self.allocation_index.remove(&allocation_id);
                    return Err(self.rejected(&pool_id, request.amount, available));
                }
                // Granted between the timeout firing and taking the lock
                match receiver.try_recv() {
                    Ok(allocation) => {
                        self.granted(&allocation);
                        Ok(allocation)
                    }
                    Err(_) => Err(self.rejected(&pool_id, request.amount, available)),
                }
            }
        }
    }

    /// Bounded retries at decreasing priority before surfacing exhaustion
    pub async fn allocate_with_retry(
        &self,
        request: AllocationRequest,
        policy: ExhaustionPolicy,
    ) -> Result<ResourceAllocation> {
        let attempts = self.config.allocation_attempts.max(1);
        let mut request = request;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.allocate(request.clone(), policy).await {
                Ok(allocation) => return Ok(allocation),
                Err(err @ ScanflowError::ResourceExhaustion { .. }) => {
                    debug!(attempt, attempts, error = %err, "Allocation attempt exhausted, retrying at reduced priority");
                    last_error = Some(err);
                    if attempt < attempts {
                        request.priority = request.priority.saturating_sub(1);
                        tokio::time::sleep(self.config.allocation_backoff() * attempt).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ScanflowError::Validation("allocation attempts must be positive".to_string())
        }))
    }

    /// `allocated → active`
    pub fn activate(&self, allocation_id: Uuid) -> Result<ResourceAllocation> {
        self.with_allocation(allocation_id, |allocation| {
            match allocation.status {
                AllocationStatus::Allocated => {
                    allocation.status = AllocationStatus::Active;
                    Ok(allocation.clone())
                }
                AllocationStatus::Active => Ok(allocation.clone()),
                other => Err(ScanflowError::StateTransition(format!(
                    "allocation {allocation_id} cannot be activated from {other:?}"
                ))),
            }
        })
    }

    /// Track actual/peak/average usage of a live allocation
    pub fn record_usage(&self, allocation_id: Uuid, actual: f64) -> Result<ResourceAllocation> {
        self.with_allocation(allocation_id, |allocation| {
            if !allocation.status.holds_capacity() {
                return Err(ScanflowError::StateTransition(format!(
                    "allocation {allocation_id} is no longer live"
                )));
            }
            allocation.record_usage(actual);
            Ok(allocation.clone())
        })
    }

    fn with_allocation<T>(
        &self,
        allocation_id: Uuid,
        f: impl FnOnce(&mut ResourceAllocation) -> Result<T>,
    ) -> Result<T> {
        let pool_id = self
            .allocation_index
            .get(&allocation_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| ScanflowError::not_found("allocation", allocation_id))?;
        let pool = self.pool(&pool_id)?;
        let mut state = pool.lock();
        let allocation = state
            .find_mut(allocation_id)
            .ok_or_else(|| ScanflowError::not_found("allocation", allocation_id))?;
        f(allocation)
    }

    /// Free the allocation's capacity; releasing twice is a no-op returning `false`
    #[instrument(skip(self))]
    pub fn release(&self, allocation_id: Uuid) -> Result<bool> {
        let pool_id = self
            .allocation_index
            .get(&allocation_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| ScanflowError::not_found("allocation", allocation_id))?;
        let pool = self.pool(&pool_id)?;

        let (released, granted) = {
            let mut state = pool.lock();
            let freed = state.free(allocation_id);
            match freed {
                Some((released, mut evicted)) => {
                    let (granted, dropped) = state.drain_queue();
                    evicted.extend(dropped);
                    drop(state);
                    self.forget(&evicted);
                    (Some(released), granted)
                }
                None => (None, Vec::new()),
            }
        };

        let Some(released) = released else {
            debug!(%allocation_id, "Release of already released allocation ignored");
            return Ok(false);
        };

        log_allocation_operation(
            "release",
            &pool_id,
            Some(allocation_id),
            Some(released.allocated_amount),
            "released",
        );
        self.publisher.publish(
            events::ALLOCATION_RELEASED,
            json!({
                "pool_id": pool_id,
                "allocation_id": allocation_id,
                "job_id": released.job_id,
                "usage_efficiency": released.usage_efficiency,
            }),
        );
        // Waiters served by the drain are announced by their own `allocate` call
        debug!(served = granted.len(), "Queued requests served after release");
        Ok(true)
    }

    /// Release every live allocation of a job and drop its queued requests
    pub fn release_all_for_job(&self, job_id: Uuid) -> usize {
        let mut released = 0;
        for pool_id in self.pool_ids() {
            let Ok(pool) = self.pool(&pool_id) else {
                continue;
            };
            let live: Vec<Uuid> = {
                let mut state = pool.lock();
                let dropped: Vec<Uuid> = state
                    .queue
                    .iter()
                    .filter(|q| q.allocation.job_id == job_id)
                    .map(|q| q.allocation.id)
                    .collect();
                state.queue.retain(|q| q.allocation.job_id != job_id);
                let (_, evicted) = state.drain_queue();
                let live = state
                    .allocations
                    .values()
                    .filter(|a| a.job_id == job_id)
                    .map(|a| a.id)
                    .collect();
                drop(state);
                self.forget(&dropped);
                self.forget(&evicted);
                live
            };
            for allocation_id in live {
                match self.release(allocation_id) {
                    Ok(true) => released += 1,
                    Ok(false) => {}
                    Err(err) => warn!(%allocation_id, error = %err, "Failed to release allocation"),
                }
            }
        }
        released
    }

    /// Change a pool's capacity; returns the previous capacity
    pub fn resize_pool(&self, pool_id: &str, capacity: f64) -> Result<f64> {
        if !(capacity > 0.0 && capacity.is_finite()) {
            return Err(ScanflowError::Validation(format!(
                "pool capacity must be positive, got {capacity}"
            )));
        }
        let pool = self.pool(pool_id)?;
        let previous = {
            let mut state = pool.lock();
            if capacity + CAPACITY_EPSILON < state.in_use {
                return Err(ScanflowError::Validation(format!(
                    "pool {pool_id} has {} allocated, cannot shrink to {capacity}",
                    state.in_use
                )));
            }
            let previous = state.config.capacity;
            state.config.capacity = capacity;
            let (_, evicted) = state.drain_queue();
            drop(state);
            self.forget(&evicted);
            previous
        };
        log_allocation_operation("resize", pool_id, None, Some(capacity), "resized");
        self.publisher.publish(
            events::POOL_RESIZED,
            json!({ "pool_id": pool_id, "previous": previous, "capacity": capacity }),
        );
        Ok(previous)
    }

    pub fn pool_snapshot(&self, pool_id: &str) -> Result<PoolSnapshot> {
        Ok(self.pool(pool_id)?.lock().snapshot())
    }

    pub fn pool_snapshots(&self) -> Vec<PoolSnapshot> {
        self.pool_ids()
            .iter()
            .filter_map(|id| self.pool_snapshot(id).ok())
            .collect()
    }

    /// Utilization of the most loaded pool, in [0, 1]
    pub fn overall_utilization(&self) -> f64 {
        self.pool_snapshots()
            .iter()
            .map(|s| s.utilization)
            .fold(0.0, f64::max)
    }

    pub fn get(&self, allocation_id: Uuid) -> Result<ResourceAllocation> {
        self.with_allocation(allocation_id, |allocation| Ok(allocation.clone()))
    }

    pub fn allocations_for_job(&self, job_id: Uuid) -> Vec<ResourceAllocation> {
        let mut allocations: Vec<ResourceAllocation> = self
            .pool_ids()
            .iter()
            .filter_map(|id| self.pool(id).ok())
            .flat_map(|pool| {
                let state = pool.lock();
                state
                    .allocations
                    .values()
                    .chain(state.released.iter())
                    .filter(|a| a.job_id == job_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        allocations.sort_by_key(|a| a.requested_at);
        allocations
    }

    /// Average `usage_efficiency` over each pool's released history
    pub fn efficiency_report(&self) -> Vec<PoolEfficiency> {
        self.pool_ids()
            .iter()
            .filter_map(|id| self.pool(id).ok())
            .map(|pool| {
                let state = pool.lock();
                let efficiencies: Vec<f64> = state
                    .released
                    .iter()
                    .filter_map(|a| a.usage_efficiency)
                    .collect();
                PoolEfficiency {
                    pool_id: state.config.id.clone(),
                    released_allocations: state.released.len(),
                    average_efficiency: crate::metrics::mean(&efficiencies),
                    total_cost: state.released.iter().map(|a| a.total_cost).sum(),
                }
            })
            .collect()
    }

    /// Allocation ids currently resolvable, live or in released history
    pub fn tracked_allocations(&self) -> usize {
        self.allocation_index.len()
    }

    fn forget(&self, allocation_ids: &[Uuid]) {
        for id in allocation_ids {
            self.allocation_index.remove(id);
        }
    }

    fn granted(&self, allocation: &ResourceAllocation) {
        log_allocation_operation(
            "allocate",
            &allocation.resource_pool,
            Some(allocation.id),
            Some(allocation.allocated_amount),
            "allocated",
        );
        self.publisher.publish(
            events::ALLOCATION_GRANTED,
            json!({
                "pool_id": allocation.resource_pool,
                "allocation_id": allocation.id,
                "job_id": allocation.job_id,
                "step_id": allocation.step_id,
                "amount": allocation.allocated_amount,
            }),
        );
    }

    fn rejected(&self, pool_id: &str, requested: f64, available: f64) -> ScanflowError {
        log_allocation_operation("allocate", pool_id, None, Some(requested), "rejected");
        self.publisher.publish(
            events::ALLOCATION_REJECTED,
            json!({ "pool_id": pool_id, "requested": requested, "available": available }),
        );
        ScanflowError::ResourceExhaustion {
            pool_id: pool_id.to_string(),
            requested,
            available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn allocator(capacity: f64, policy: ExhaustionPolicy) -> ResourceAllocator {
        let config = ResourcesConfig {
            pools: vec![ResourcePoolConfig::new("cpu", ResourceType::Cpu, capacity).with_cost_per_unit(2.0)],
            allocation_attempts: 2,
            allocation_backoff_ms: 1,
            queue_timeout_ms: 200,
            exhaustion_policy: policy,
            released_history_limit: 2,
        };
        ResourceAllocator::new(config, EventPublisher::default())
    }

    fn request(amount: f64) -> AllocationRequest {
        AllocationRequest::new(Uuid::new_v4(), ResourceType::Cpu, amount)
    }

    #[tokio::test]
    async fn over_capacity_request_fails_under_fail_policy() {
        let allocator = allocator(4.0, ExhaustionPolicy::Fail);
        let first = allocator.allocate(request(3.0), ExhaustionPolicy::Fail).await.unwrap();
        assert_eq!(first.total_cost, 6.0);

        let err = allocator.allocate(request(2.0), ExhaustionPolicy::Fail).await.unwrap_err();
        assert!(matches!(err, ScanflowError::ResourceExhaustion { available, .. } if (available - 1.0).abs() < 1e-9));
        assert_eq!(allocator.pool_snapshot("cpu").unwrap().allocated, 3.0);
    }

    #[tokio::test]
    async fn request_larger_than_pool_never_queues() {
        let allocator = allocator(4.0, ExhaustionPolicy::Queue);
        let err = allocator.allocate(request(5.0), ExhaustionPolicy::Queue).await.unwrap_err();
        assert!(matches!(err, ScanflowError::ResourceExhaustion { .. }));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let allocator = allocator(4.0, ExhaustionPolicy::Fail);
        let allocation = allocator.allocate(request(2.0), ExhaustionPolicy::Fail).await.unwrap();
        allocator.activate(allocation.id).unwrap();
        assert!(allocator.release(allocation.id).unwrap());
        assert!(!allocator.release(allocation.id).unwrap());
        assert_eq!(allocator.pool_snapshot("cpu").unwrap().allocated, 0.0);
        assert_eq!(allocator.get(allocation.id).unwrap().status, AllocationStatus::Released);
    }

    #[tokio::test]
    async fn queued_requests_are_served_by_priority() {
        let allocator = Arc::new(allocator(2.0, ExhaustionPolicy::Queue));
        let holder = allocator.allocate(request(2.0), ExhaustionPolicy::Queue).await.unwrap();

        let low = {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move {
                allocator
                    .allocate(request(2.0).with_priority(1), ExhaustionPolicy::Queue)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let high = {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move {
                allocator
                    .allocate(request(2.0).with_priority(9), ExhaustionPolicy::Queue)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(allocator.pool_snapshot("cpu").unwrap().queued_requests, 2);

        allocator.release(holder.id).unwrap();
        let high = high.await.unwrap().unwrap();
        assert_eq!(high.priority_level, 9);

        // Low-priority waiter cannot fit until the high one releases, then times out or is served
        allocator.release(high.id).unwrap();
        let low = low.await.unwrap().unwrap();
        assert_eq!(low.priority_level, 1);
    }

    #[tokio::test]
    async fn queued_head_is_not_overtaken_by_lower_priority_newcomer() {
        let allocator = Arc::new(allocator(4.0, ExhaustionPolicy::Queue));
        let holder = allocator.allocate(request(3.0), ExhaustionPolicy::Queue).await.unwrap();

        let waiter = {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move {
                allocator
                    .allocate(request(3.0).with_priority(100), ExhaustionPolicy::Queue)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(allocator.pool_snapshot("cpu").unwrap().queued_requests, 1);

        // One unit is free, but the queued request comes first
        let err = allocator
            .allocate(request(1.0).with_priority(-100), ExhaustionPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanflowError::ResourceExhaustion { .. }));
        assert_eq!(allocator.pool_snapshot("cpu").unwrap().allocated, 3.0);

        // Strictly outranking the head is allowed through
        let urgent = allocator
            .allocate(request(1.0).with_priority(101), ExhaustionPolicy::Fail)
            .await
            .unwrap();

        allocator.release(holder.id).unwrap();
        allocator.release(urgent.id).unwrap();
        let served = waiter.await.unwrap().unwrap();
        assert_eq!(served.priority_level, 100);
        assert_eq!(allocator.pool_snapshot("cpu").unwrap().allocated, 3.0);
    }

    #[tokio::test]
    async fn released_history_is_bounded() {
        let allocator = allocator(4.0, ExhaustionPolicy::Fail);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let allocation = allocator.allocate(request(1.0), ExhaustionPolicy::Fail).await.unwrap();
            allocator.release(allocation.id).unwrap();
            ids.push(allocation.id);
        }
        assert_eq!(allocator.tracked_allocations(), 2);
        assert_eq!(allocator.efficiency_report()[0].released_allocations, 2);

        // Recent releases stay idempotent, evicted ones are forgotten
        assert!(!allocator.release(ids[4]).unwrap());
        assert_eq!(allocator.release(ids[0]).unwrap_err().cause(), "not_found");
    }

    #[tokio::test]
    async fn queued_request_times_out_without_leaking_capacity() {
        let allocator = allocator(1.0, ExhaustionPolicy::Queue);
        let _holder = allocator.allocate(request(1.0), ExhaustionPolicy::Queue).await.unwrap();
        let err = allocator.allocate(request(1.0), ExhaustionPolicy::Queue).await.unwrap_err();
        assert!(matches!(err, ScanflowError::ResourceExhaustion { .. }));
        let snapshot = allocator.pool_snapshot("cpu").unwrap();
        assert_eq!(snapshot.queued_requests, 0);
        assert_eq!(snapshot.allocated, 1.0);
    }

    #[tokio::test]
    async fn release_all_for_job_frees_everything() {
        let allocator = allocator(8.0, ExhaustionPolicy::Fail);
        let job_id = Uuid::new_v4();
        for _ in 0..3 {
            let allocation = allocator
                .allocate(AllocationRequest::new(job_id, ResourceType::Cpu, 2.0), ExhaustionPolicy::Fail)
                .await
                .unwrap();
            allocator.activate(allocation.id).unwrap();
        }
        assert_eq!(allocator.release_all_for_job(job_id), 3);
        assert!(allocator
            .allocations_for_job(job_id)
            .iter()
            .all(|a| a.status == AllocationStatus::Released));
    }

    #[tokio::test]
    async fn efficiency_report_averages_released_usage() {
        let allocator = allocator(8.0, ExhaustionPolicy::Fail);
        let allocation = allocator.allocate(request(4.0), ExhaustionPolicy::Fail).await.unwrap();
        allocator.record_usage(allocation.id, 1.0).unwrap();
        allocator.release(allocation.id).unwrap();
        let report = allocator.efficiency_report();
        assert_eq!(report[0].average_efficiency, Some(0.25));
    }

    #[tokio::test]
    async fn resize_rejects_shrinking_below_usage() {
        let allocator = allocator(4.0, ExhaustionPolicy::Fail);
        allocator.allocate(request(3.0), ExhaustionPolicy::Fail).await.unwrap();
        assert!(allocator.resize_pool("cpu", 2.0).is_err());
        assert_eq!(allocator.resize_pool("cpu", 6.0).unwrap(), 4.0);
    }

    #[tokio::test]
    async fn retry_surfaces_exhaustion_after_bounded_attempts() {
        let allocator = allocator(1.0, ExhaustionPolicy::Fail);
        allocator.allocate(request(1.0), ExhaustionPolicy::Fail).await.unwrap();
        let err = allocator
            .allocate_with_retry(request(1.0), ExhaustionPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanflowError::ResourceExhaustion { .. }));
    }
}
