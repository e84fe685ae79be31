//! Integration tests for the service registry: lookup, dependency waits and
//! lifecycle ordering.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use svchost_core::{Dependencies, HookFuture, HostError, Phase, Service, ServiceConfig, factory};
use svchost_runtime::{Registration, RegistryEvent, RetryPolicy, Selector, ServiceRegistry};
use svchost_testing::{ClockService, CounterService, HookRecorder, Inert};

// ============================================================================
// Test Fixtures
// ============================================================================

fn counter_factory() -> impl svchost_core::ServiceFactory<Service = CounterService> {
    factory(&["ClockService"], |deps: Dependencies| {
        Ok(Arc::new(CounterService::new(deps.get("ClockService")?)))
    })
}

/// Registers another service from inside its configure hook.
struct Spawner {
    registry: Arc<ServiceRegistry>,
    child: Arc<HookRecorder>,
}

impl Service for Spawner {
    fn on_config<'a>(&'a self, _config: &'a ServiceConfig) -> Option<HookFuture<'a>> {
        Some(Box::pin(async move {
            self.registry.register_instance(Arc::clone(&self.child));
            Ok(())
        }))
    }
}

// ============================================================================
// Lookup
// ============================================================================

#[test]
fn test_get_by_id_name_and_type() {
    let registry = ServiceRegistry::new();
    let clock = Arc::new(ClockService::fixed_default());
    let id = registry.register_instance(Arc::clone(&clock));

    assert!(Arc::ptr_eq(&registry.get::<ClockService>(id).unwrap(), &clock));
    assert!(Arc::ptr_eq(
        &registry.get::<ClockService>("ClockService").unwrap(),
        &clock
    ));
    assert!(Arc::ptr_eq(&registry.get_by_type::<ClockService>().unwrap(), &clock));
    assert_eq!(registry.name_of(id).as_deref(), Some("ClockService"));
    assert_eq!(registry.ids(), vec![id]);
    assert_eq!(registry.names(), vec!["ClockService".to_string()]);
}

#[test]
fn test_get_with_wrong_type_is_rejected() {
    let registry = ServiceRegistry::new();
    registry.register_instance(Arc::new(Inert));
    assert!(matches!(
        registry.get::<ClockService>("Inert"),
        Err(HostError::Validation(_))
    ));
}

#[test]
fn test_duplicate_names_are_ambiguous_for_get_but_not_get_all() {
    let registry = ServiceRegistry::new();
    registry.register_instance(Arc::new(Inert));
    registry.register_instance(Arc::new(Inert));

    assert!(matches!(registry.get::<Inert>("Inert"), Err(HostError::Ambiguous(_))));
    assert_eq!(registry.get_all::<Inert>(Selector::of::<Inert>()).unwrap().len(), 2);
    assert!(matches!(
        registry.get_all::<Inert>("Nobody"),
        Err(HostError::NotFound(_))
    ));
}

#[test]
fn test_unregister_then_get_fails_and_reregister_gets_new_id() {
    let registry = ServiceRegistry::new();
    let inert = Arc::new(Inert);
    let mut events = registry.subscribe();

    let first = registry.register_instance(Arc::clone(&inert));
    assert_eq!(registry.unregister(first), vec![first]);
    assert!(matches!(registry.get::<Inert>(first), Err(HostError::NotFound(_))));

    let second = registry.register_instance(inert);
    assert_ne!(first, second);

    assert!(matches!(events.try_recv().unwrap(), RegistryEvent::Registered { id, .. } if id == first));
    assert!(matches!(events.try_recv().unwrap(), RegistryEvent::Unregistered { id, .. } if id == first));
    assert!(matches!(events.try_recv().unwrap(), RegistryEvent::Registered { id, .. } if id == second));
}

#[test]
fn test_unregister_by_type_removes_all_matches() {
    let registry = ServiceRegistry::new();
    registry.register_instance(Arc::new(Inert));
    registry.register_instance(Arc::new(Inert));
    registry.register_instance(Arc::new(ClockService::fixed_default()));

    assert_eq!(registry.unregister(Selector::of::<Inert>()).len(), 2);
    assert_eq!(registry.names(), vec!["ClockService".to_string()]);
}

// ============================================================================
// Dependency Injection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_factory_with_present_dependencies_registers_immediately() {
    let registry = ServiceRegistry::new();
    registry.register_instance(Arc::new(ClockService::fixed_default()));

    let id = registry.register_factory(counter_factory()).await.unwrap();
    assert_eq!(registry.name_of(id).as_deref(), Some("CounterService"));
}

#[tokio::test]
async fn test_factory_registers_under_service_name_override() {
    let registry = ServiceRegistry::new();
    let instance_id = registry.register_instance(Arc::new(HookRecorder::new("Audit")));
    let id = registry
        .register_factory(factory(&[], |_deps: Dependencies| {
            Ok(Arc::new(HookRecorder::new("Ledger")))
        }))
        .await
        .unwrap();

    assert_eq!(registry.name_of(instance_id).as_deref(), Some("Audit"));
    assert_eq!(registry.name_of(id).as_deref(), Some("Ledger"));
    let ledger = registry.get::<HookRecorder>("Ledger").unwrap();
    assert!(Arc::ptr_eq(&ledger, &registry.get::<HookRecorder>(id).unwrap()));
    assert!(registry.get::<HookRecorder>("HookRecorder").is_err());
}

#[tokio::test(start_paused = true)]
async fn test_factory_waits_for_late_dependency() {
    let registry = Arc::new(ServiceRegistry::new());

    let pending = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.register_factory(counter_factory()).await }
    });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(registry.get::<CounterService>("CounterService").is_err());

    registry.register_instance(Arc::new(ClockService::fixed_default()));
    let id = pending.await.unwrap().unwrap();

    let counter = registry.get::<CounterService>(id).unwrap();
    assert_eq!(counter.add(1), 1);
}

#[tokio::test(start_paused = true)]
async fn test_factory_gives_up_naming_missing_dependencies() {
    let registry = ServiceRegistry::with_retry_policy(
        RetryPolicy::new()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(10)),
    );
    registry.register_instance(Arc::new(Inert));

    let err = registry
        .register_factory(
            factory(&["Inert", "Database", "Cache"], |_deps: Dependencies| {
                Ok(Arc::new(HookRecorder::new("Api")))
            })
            .named("Api"),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        HostError::DependencyTimeout {
            service: "Api".into(),
            missing: vec!["Database".into(), "Cache".into()],
        }
    );
    assert_eq!(
        err.to_string(),
        "Some dependencies for Api failed to start: Database, Cache"
    );
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_factory_error_aborts_registration() {
    let registry = ServiceRegistry::new();
    let err = registry
        .register_factory(factory(&[], |_deps: Dependencies| -> svchost_core::Result<Arc<Inert>> {
            Err(HostError::Validation("bad config".into()))
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, HostError::Validation(_)));
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batch_stops_at_first_failure_without_rollback() {
    let registry = ServiceRegistry::with_retry_policy(RetryPolicy::new().with_max_retries(1));

    let err = registry
        .register(Registration::batch([
            Registration::instance(Arc::new(Inert)),
            Registration::factory(counter_factory()),
            Registration::instance(Arc::new(ClockService::fixed_default())),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(err, HostError::DependencyTimeout { .. }));
    assert_eq!(registry.names(), vec!["Inert".to_string()]);
}

#[tokio::test]
async fn test_batch_returns_ids_in_order() {
    let registry = ServiceRegistry::new();
    let ids = registry
        .register(Registration::batch([
            Registration::instance(Arc::new(ClockService::fixed_default())),
            Registration::factory(counter_factory()),
        ]))
        .await
        .unwrap();

    assert_eq!(ids, registry.ids());
    assert_eq!(registry.name_of(ids[1]).as_deref(), Some("CounterService"));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_init_before_config_fails_with_lifecycle_order() {
    let registry = ServiceRegistry::new();
    let recorder = Arc::new(HookRecorder::new("Db"));
    let id = registry.register_instance(Arc::clone(&recorder));

    let err = registry.init_all().await.unwrap_err();
    assert_eq!(
        err,
        HostError::LifecycleOrder {
            service: "Db".into(),
            id,
            required: Phase::Configured,
        }
    );
    assert!(err.is_fatal());
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_run_before_init_fails() {
    let registry = ServiceRegistry::new();
    registry.register_instance(Arc::new(HookRecorder::new("Db")));
    registry.config_all(&json!({})).await.unwrap();

    assert!(matches!(
        registry.run("Db").await,
        Err(HostError::LifecycleOrder { required: Phase::Initialized, .. })
    ));
}

#[tokio::test]
async fn test_full_lifecycle_runs_each_hook_once() {
    let registry = ServiceRegistry::new();
    let recorder = Arc::new(HookRecorder::new("Db"));
    registry.register_instance(Arc::clone(&recorder));

    let config = json!({"db": {"url": "memory://"}});
    registry.config_all(&config).await.unwrap();
    registry.init_all().await.unwrap();
    registry.run_all().await.unwrap();

    // Repeating a phase is a no-op.
    registry.config_all(&config).await.unwrap();
    registry.init_all().await.unwrap();
    registry.run_all().await.unwrap();

    assert_eq!(recorder.calls(), vec!["config", "init", "run"]);
    assert_eq!(recorder.config(), Some(config));
    assert_eq!(registry.phase_of("Db").unwrap(), Phase::Running);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_phase_calls_share_one_invocation() {
    let registry = ServiceRegistry::new();
    let recorder = Arc::new(HookRecorder::new("Slow").with_delay(Duration::from_millis(100)));
    registry.register_instance(Arc::clone(&recorder));

    let config = json!({});
    let (a, b) = tokio::join!(registry.config_all(&config), registry.config("Slow", &config));
    a.unwrap();
    b.unwrap();

    let (a, b) = tokio::join!(registry.init_all(), registry.init_all());
    a.unwrap();
    b.unwrap();

    assert_eq!(recorder.count("config"), 1);
    assert_eq!(recorder.count("init"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_phase_is_in_flight_while_hook_runs() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register_instance(Arc::new(
        HookRecorder::new("Slow").with_delay(Duration::from_secs(1)),
    ));

    let configuring = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.config_all(&json!({})).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.phase_of("Slow").unwrap(), Phase::Configuring);

    // Initialization cannot start while configuration is in flight.
    assert!(matches!(
        registry.init("Slow").await,
        Err(HostError::LifecycleOrder { .. })
    ));

    configuring.await.unwrap().unwrap();
    assert_eq!(registry.phase_of("Slow").unwrap(), Phase::Configured);
}

#[tokio::test]
async fn test_services_without_hooks_skip_in_flight_phases() {
    let registry = ServiceRegistry::new();
    registry.register_instance(Arc::new(Inert));

    assert_eq!(registry.phase_of("Inert").unwrap(), Phase::Registered);
    registry.config_all(&json!({})).await.unwrap();
    assert_eq!(registry.phase_of("Inert").unwrap(), Phase::Configured);
    registry.init_all().await.unwrap();
    assert_eq!(registry.phase_of("Inert").unwrap(), Phase::Initialized);
    registry.run_all().await.unwrap();
    assert_eq!(registry.phase_of("Inert").unwrap(), Phase::Running);
}

#[tokio::test]
async fn test_failed_hook_is_memoized() {
    let registry = ServiceRegistry::new();
    let recorder = Arc::new(HookRecorder::new("Flaky").failing_on("config"));
    registry.register_instance(Arc::clone(&recorder));

    let first = registry.config_all(&json!({})).await.unwrap_err();
    let second = registry.config("Flaky", &json!({})).await.unwrap_err();

    assert_eq!(first, second);
    assert_eq!(recorder.count("config"), 1);
    assert_eq!(registry.phase_of("Flaky").unwrap(), Phase::Configuring);
}

#[tokio::test]
async fn test_config_all_configures_services_registered_by_hooks() {
    let registry = Arc::new(ServiceRegistry::new());
    let child = Arc::new(HookRecorder::new("Child"));
    registry.register_instance(Arc::new(Spawner {
        registry: Arc::clone(&registry),
        child: Arc::clone(&child),
    }));

    registry.config_all(&json!({})).await.unwrap();

    assert_eq!(registry.len(), 2);
    assert_eq!(child.calls(), vec!["config"]);
    assert_eq!(registry.phase_of("Child").unwrap(), Phase::Configured);
}
