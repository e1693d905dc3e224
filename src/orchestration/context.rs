//! Explicitly owned service context shared by the controller and every control loop.

use crate::config::ScanflowConfig;
use crate::events::EventPublisher;
use crate::metrics::MetricsStore;
use crate::registry::HandlerRegistry;
use crate::resources::ResourceAllocator;
use crate::services::{
    ComplianceEvaluator, InMemoryComplianceEvaluator, InMemoryNotificationDispatcher,
    InMemoryRepository, NotificationDispatcher, OrchestrationRepository, StaticTargetResolver,
    TargetResolver,
};
use std::sync::Arc;

/// Shared handles; cloning is cheap
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<ScanflowConfig>,
    pub publisher: EventPublisher,
    pub metrics: Arc<MetricsStore>,
    pub allocator: Arc<ResourceAllocator>,
    pub handlers: Arc<HandlerRegistry>,
    pub resolver: Arc<dyn TargetResolver>,
    pub compliance: Arc<dyn ComplianceEvaluator>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub repository: Arc<dyn OrchestrationRepository>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("allocator", &self.allocator)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    pub fn builder(config: ScanflowConfig) -> ServiceContextBuilder {
        ServiceContextBuilder::new(config)
    }
}

/// Builds a [`ServiceContext`], defaulting every collaborator to its in-memory implementation
pub struct ServiceContextBuilder {
    config: ScanflowConfig,
    handlers: Option<Arc<HandlerRegistry>>,
    resolver: Option<Arc<dyn TargetResolver>>,
    compliance: Option<Arc<dyn ComplianceEvaluator>>,
    notifier: Option<Arc<dyn NotificationDispatcher>>,
    repository: Option<Arc<dyn OrchestrationRepository>>,
}

impl ServiceContextBuilder {
    pub fn new(config: ScanflowConfig) -> Self {
        Self {
            config,
            handlers: None,
            resolver: None,
            compliance: None,
            notifier: None,
            repository: None,
        }
    }

    pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn TargetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn compliance(mut self, compliance: Arc<dyn ComplianceEvaluator>) -> Self {
        self.compliance = Some(compliance);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn OrchestrationRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn build(self) -> ServiceContext {
        let publisher = EventPublisher::new(self.config.orchestration.event_channel_capacity);
        let metrics = Arc::new(MetricsStore::new(self.config.metrics.clone()));
        let allocator = Arc::new(ResourceAllocator::new(
            self.config.resources.clone(),
            publisher.clone(),
        ));
        ServiceContext {
            config: Arc::new(self.config),
            publisher,
            metrics,
            allocator,
            handlers: self
                .handlers
                .unwrap_or_else(|| Arc::new(HandlerRegistry::new())),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(StaticTargetResolver::new())),
            compliance: self
                .compliance
                .unwrap_or_else(|| Arc::new(InMemoryComplianceEvaluator::new())),
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(InMemoryNotificationDispatcher::new())),
            repository: self
                .repository
                .unwrap_or_else(|| Arc::new(InMemoryRepository::new())),
        }
    }
}
