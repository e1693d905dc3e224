use crate::error::{Result, ScanflowError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection details for one scan target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub target: String,
    /// Data source family, e.g. `postgres`, `s3`
    pub source_type: String,
    pub uri: String,
    #[serde(default)]
    pub properties: Value,
}

/// Turns target identifiers into connection descriptors
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, target: &str) -> Result<ConnectionDescriptor>;
}

/// Resolver backed by registered descriptors, falling back to the URI scheme
#[derive(Debug, Default)]
pub struct StaticTargetResolver {
    registered: DashMap<String, ConnectionDescriptor>,
    /// Reject targets that were never registered
    strict: bool,
}

impl StaticTargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            registered: DashMap::new(),
            strict: true,
        }
    }

    pub fn register(&self, descriptor: ConnectionDescriptor) {
        self.registered.insert(descriptor.target.clone(), descriptor);
    }
}

#[async_trait]
impl TargetResolver for StaticTargetResolver {
    async fn resolve(&self, target: &str) -> Result<ConnectionDescriptor> {
        if let Some(descriptor) = self.registered.get(target) {
            return Ok(descriptor.clone());
        }
        if self.strict {
            return Err(ScanflowError::not_found("scan target", target));
        }
        let (source_type, _) = target.split_once("://").ok_or_else(|| {
            ScanflowError::Validation(format!("target '{target}' has no scheme"))
        })?;
        Ok(ConnectionDescriptor {
            target: target.to_string(),
            source_type: source_type.to_string(),
            uri: target.to_string(),
            properties: Value::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheme_fallback() {
        let resolver = StaticTargetResolver::new();
        let descriptor = resolver.resolve("postgres://orders").await.unwrap();
        assert_eq!(descriptor.source_type, "postgres");
        assert!(resolver.resolve("orders").await.is_err());
    }

    #[tokio::test]
    async fn strict_rejects_unknown_targets() {
        let resolver = StaticTargetResolver::strict();
        assert!(matches!(
            resolver.resolve("s3://bucket").await,
            Err(ScanflowError::NotFound { .. })
        ));
        resolver.register(ConnectionDescriptor {
            target: "s3://bucket".into(),
            source_type: "s3".into(),
            uri: "s3://bucket".into(),
            properties: Value::Null,
        });
        assert!(resolver.resolve("s3://bucket").await.is_ok());
    }
}
