use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::performance::MetricType;

/// Typed resource drawn from an allocation pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Cpu,
    Memory,
    Storage,
    Network,
    DbConnections,
    Custom(String),
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
            Self::Storage => write!(f, "storage"),
            Self::Network => write!(f, "network"),
            Self::DbConnections => write!(f, "db_connections"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl ResourceType {
    /// Metric a pool of this type reports its utilization under
    pub fn utilization_metric(&self) -> Option<MetricType> {
        match self {
            Self::Cpu => Some(MetricType::CpuUtilization),
            Self::Memory => Some(MetricType::MemoryUtilization),
            Self::Network => Some(MetricType::NetworkUtilization),
            Self::DbConnections => Some(MetricType::DbConnectionUtilization),
            Self::Storage => Some(MetricType::StorageUtilization),
            Self::Custom(_) => None,
        }
    }
}

/// Named capacity bucket for one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePoolConfig {
    pub id: String,
    pub resource_type: ResourceType,
    pub capacity: f64,
    #[serde(default)]
    pub cost_per_unit: f64,
}

impl ResourcePoolConfig {
    pub fn new(id: impl Into<String>, resource_type: ResourceType, capacity: f64) -> Self {
        Self {
            id: id.into(),
            resource_type,
            capacity,
            cost_per_unit: 0.0,
        }
    }

    pub fn with_cost_per_unit(mut self, cost: f64) -> Self {
        self.cost_per_unit = cost;
        self
    }
}

/// `requested → allocated → active → released`; `rejected` for queued requests that gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Requested,
    Allocated,
    Active,
    Released,
    Rejected,
}

impl AllocationStatus {
    /// Allocations in these states count against pool capacity
    pub fn holds_capacity(&self) -> bool {
        matches!(self, Self::Allocated | Self::Active)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Released | Self::Rejected)
    }
}

/// A reservation of pool capacity on behalf of a job or step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_id: Option<String>,
    pub resource_type: ResourceType,
    pub resource_pool: String,
    pub priority_level: i32,
    pub requested_amount: f64,
    pub allocated_amount: f64,
    pub actual_usage: f64,
    pub peak_usage: f64,
    pub average_usage: f64,
    pub usage_samples: u32,
    pub status: AllocationStatus,
    pub cost_per_unit: f64,
    pub total_cost: f64,
    pub usage_efficiency: Option<f64>,
    pub requested_at: DateTime<Utc>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl ResourceAllocation {
    pub fn requested(
        job_id: Uuid,
        step_id: Option<String>,
        resource_type: ResourceType,
        pool: &ResourcePoolConfig,
        amount: f64,
        priority_level: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            step_id,
            resource_type,
            resource_pool: pool.id.clone(),
            priority_level,
            requested_amount: amount,
            allocated_amount: 0.0,
            actual_usage: 0.0,
            peak_usage: 0.0,
            average_usage: 0.0,
            usage_samples: 0,
            status: AllocationStatus::Requested,
            cost_per_unit: pool.cost_per_unit,
            total_cost: 0.0,
            usage_efficiency: None,
            requested_at: Utc::now(),
            allocated_at: None,
            released_at: None,
        }
    }

    /// Grant the requested amount; cost is fixed at grant time
    pub fn grant(&mut self) {
        self.allocated_amount = self.requested_amount;
        self.total_cost = self.cost_per_unit * self.allocated_amount;
        self.status = AllocationStatus::Allocated;
        self.allocated_at = Some(Utc::now());
    }

    pub fn record_usage(&mut self, actual: f64) {
        self.actual_usage = actual;
        self.peak_usage = self.peak_usage.max(actual);
        self.usage_samples += 1;
        self.average_usage += (actual - self.average_usage) / f64::from(self.usage_samples);
        self.usage_efficiency = self.efficiency();
    }

    /// `usage_efficiency = actual_usage / allocated_amount`, from the running average
    pub fn efficiency(&self) -> Option<f64> {
        if self.allocated_amount <= 0.0 || self.usage_samples == 0 {
            None
        } else {
            Some(self.average_usage / self.allocated_amount)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_fixes_cost_and_usage_tracks_average() {
        let pool = ResourcePoolConfig::new("cpu-main", ResourceType::Cpu, 16.0).with_cost_per_unit(0.5);
        let mut allocation =
            ResourceAllocation::requested(Uuid::new_v4(), None, ResourceType::Cpu, &pool, 4.0, 0);
        allocation.grant();
        assert_eq!(allocation.total_cost, 2.0);
        assert_eq!(allocation.status, AllocationStatus::Allocated);

        allocation.record_usage(2.0);
        allocation.record_usage(4.0);
        assert_eq!(allocation.peak_usage, 4.0);
        assert_eq!(allocation.average_usage, 3.0);
        assert_eq!(allocation.usage_efficiency, Some(0.75));
    }

    #[test]
    fn resource_type_serde() {
        let json = serde_json::to_string(&ResourceType::DbConnections).unwrap();
        assert_eq!(json, "\"db_connections\"");
        let custom: ResourceType = serde_json::from_str(r#"{"custom":"gpu"}"#).unwrap();
        assert_eq!(custom, ResourceType::Custom("gpu".into()));
    }
}
