use crate::error::Result;
use crate::models::{
    OptimizationRecommendation, OptimizationResult, OrchestrationJob, ResourceAllocation,
    WorkflowStep,
};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Create/read/update for the records the core must persist
#[async_trait]
pub trait OrchestrationRepository: Send + Sync {
    async fn save_job(&self, job: &OrchestrationJob) -> Result<()>;
    async fn find_job(&self, job_id: Uuid) -> Result<Option<OrchestrationJob>>;
    async fn save_steps(&self, job_id: Uuid, steps: &[WorkflowStep]) -> Result<()>;
    async fn find_steps(&self, job_id: Uuid) -> Result<Vec<WorkflowStep>>;
    async fn save_allocation(&self, allocation: &ResourceAllocation) -> Result<()>;
    async fn find_allocation(&self, allocation_id: Uuid) -> Result<Option<ResourceAllocation>>;
    async fn save_recommendation(&self, recommendation: &OptimizationRecommendation) -> Result<()>;
    async fn find_recommendation(&self, id: Uuid) -> Result<Option<OptimizationRecommendation>>;
    async fn save_result(&self, result: &OptimizationResult) -> Result<()>;
    async fn find_result(&self, id: Uuid) -> Result<Option<OptimizationResult>>;
}

/// Repository held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    jobs: DashMap<Uuid, OrchestrationJob>,
    steps: DashMap<Uuid, Vec<WorkflowStep>>,
    allocations: DashMap<Uuid, ResourceAllocation>,
    recommendations: DashMap<Uuid, OptimizationRecommendation>,
    results: DashMap<Uuid, OptimizationResult>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }
}

#[async_trait]
impl OrchestrationRepository for InMemoryRepository {
    async fn save_job(&self, job: &OrchestrationJob) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<OrchestrationJob>> {
        Ok(self.jobs.get(&job_id).map(|j| j.clone()))
    }

    async fn save_steps(&self, job_id: Uuid, steps: &[WorkflowStep]) -> Result<()> {
        self.steps.insert(job_id, steps.to_vec());
        Ok(())
    }

    async fn find_steps(&self, job_id: Uuid) -> Result<Vec<WorkflowStep>> {
        Ok(self.steps.get(&job_id).map(|s| s.clone()).unwrap_or_default())
    }

    async fn save_allocation(&self, allocation: &ResourceAllocation) -> Result<()> {
        self.allocations.insert(allocation.id, allocation.clone());
        Ok(())
    }

    async fn find_allocation(&self, allocation_id: Uuid) -> Result<Option<ResourceAllocation>> {
        Ok(self.allocations.get(&allocation_id).map(|a| a.clone()))
    }

    async fn save_recommendation(&self, recommendation: &OptimizationRecommendation) -> Result<()> {
        self.recommendations
            .insert(recommendation.id, recommendation.clone());
        Ok(())
    }

    async fn find_recommendation(&self, id: Uuid) -> Result<Option<OptimizationRecommendation>> {
        Ok(self.recommendations.get(&id).map(|r| r.clone()))
    }

    async fn save_result(&self, result: &OptimizationResult) -> Result<()> {
        self.results.insert(result.id, result.clone());
        Ok(())
    }

    async fn find_result(&self, id: Uuid) -> Result<Option<OptimizationResult>> {
        Ok(self.results.get(&id).map(|r| r.clone()))
    }
}
