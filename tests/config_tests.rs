//! Configuration loading from TOML files.

use scanflow_core::config::{ConfigManager, ConfigurationError, ExhaustionPolicy, ScanflowConfig};
use scanflow_core::models::{ConstraintEnforcement, ResourceType};
use scanflow_core::orchestration::{OrchestrationBootstrap, ServiceContext};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/scanflow.toml")
}

#[test]
fn shipped_config_matches_builtin_defaults() {
    let manager = ConfigManager::load_file_only(&shipped_config()).unwrap();
    assert_eq!(manager.config(), &ScanflowConfig::default());
    assert_eq!(manager.source(), Some(shipped_config().as_path()));
}

#[test]
fn partial_file_keeps_defaults_for_missing_keys() {
    let file = toml_file(
        r#"
[execution]
default_max_retries = 5

[resources]
exhaustion_policy = "queue"

[[resources.pools]]
id = "scratch"
resource_type = "storage"
capacity = 4.0

[optimization.constraints]
enforcement = "soft"
max_effort_hours = 8.0
"#,
    );

    let manager = ConfigManager::load_file_only(file.path()).unwrap();
    let config = manager.config();
    assert_eq!(config.execution.default_max_retries, 5);
    assert_eq!(config.execution.default_retry_delay_seconds, 5);
    assert_eq!(config.resources.exhaustion_policy, ExhaustionPolicy::Queue);
    assert_eq!(config.resources.pools.len(), 1);
    assert_eq!(config.resources.pools[0].resource_type, ResourceType::Storage);
    assert_eq!(config.optimization.constraints.enforcement, ConstraintEnforcement::Soft);
    assert_eq!(config.optimization.constraints.max_effort_hours, Some(8.0));
    assert_eq!(config.monitoring.cpu_threshold, 80.0);

    let rendered = manager.debug_config();
    assert_eq!(rendered["execution"]["default_max_retries"], 5);
}

#[test]
fn out_of_range_values_are_rejected() {
    for contents in [
        "[orchestration]\ndefault_max_concurrent_scans = 0",
        "[orchestration]\nmax_concurrent_scans_limit = 4\ndefault_max_concurrent_scans = 8",
        "[monitoring]\nmin_consecutive_samples = 0",
        "[[resources.pools]]\nid = \"cpu\"\nresource_type = \"cpu\"\ncapacity = -1.0",
    ] {
        let file = toml_file(contents);
        let err = ConfigManager::load_file_only(file.path()).unwrap_err();
        assert!(
            matches!(err, ConfigurationError::InvalidValue { .. }),
            "{contents}: {err}"
        );
    }
}

#[test]
fn malformed_toml_fails_to_load() {
    let file = toml_file("[orchestration\nscheduler_tick_ms = ");
    let err = ConfigManager::load_file_only(file.path()).unwrap_err();
    assert!(matches!(err, ConfigurationError::LoadFailed { .. }));
}

#[test]
fn wrong_value_type_fails_to_load() {
    let file = toml_file("[execution]\ndefault_max_retries = \"many\"");
    assert!(matches!(
        ConfigManager::load_file_only(file.path()),
        Err(ConfigurationError::LoadFailed { .. })
    ));
}

#[tokio::test]
async fn loaded_config_bootstraps_a_system() {
    let manager = ConfigManager::load_file_only(&shipped_config()).unwrap();
    let ctx = ServiceContext::builder(manager.config().clone()).build();
    let system = OrchestrationBootstrap::bootstrap_testing(ctx).await.unwrap();

    let status = system.status();
    assert!(status.running);
    assert_eq!(status.active_jobs, 0);
    assert_eq!(system.context().allocator.pool_ids().len(), 5);

    system.shutdown().await;
}
