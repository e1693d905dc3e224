//! # Step Handler Registry
//!
//! Resolves the handler for a step: a handler registered for the exact step id
//! wins over one registered for its step type; unregistered types fall back to
//! [`PassthroughHandler`].

use super::step_handler::{PassthroughHandler, StepHandler};
use crate::logging::log_step_operation;
use crate::models::{StepType, WorkflowStep};
use dashmap::DashMap;
use std::sync::Arc;

/// Key for handler lookup in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    StepId(String),
    StepType(StepType),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<HandlerKey, Arc<dyn StepHandler>>,
    fallback: Option<Arc<dyn StepHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl HandlerRegistry {
    /// Registry with the passthrough handler as fallback
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            fallback: Some(Arc::new(PassthroughHandler)),
        }
    }

    /// Registry without a fallback; unknown steps have no handler
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register_for_type(&self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        log_step_operation("register_handler", None, None, "registered", Some(step_type.as_str()));
        self.handlers.insert(HandlerKey::StepType(step_type), handler);
    }

    pub fn register_for_step(&self, step_id: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let step_id = step_id.into();
        log_step_operation("register_handler", None, Some(&step_id), "registered", None);
        self.handlers.insert(HandlerKey::StepId(step_id), handler);
    }

    pub fn resolve(&self, step: &WorkflowStep) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .get(&HandlerKey::StepId(step.id.clone()))
            .or_else(|| self.handlers.get(&HandlerKey::StepType(step.step_type)))
            .map(|h| Arc::clone(h.value()))
            .or_else(|| self.fallback.clone())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
