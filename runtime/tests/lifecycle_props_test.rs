//! Property tests for memoized lifecycle transitions under concurrent callers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use futures::future::join_all;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use svchost_core::Phase;
use svchost_runtime::ServiceRegistry;
use svchost_testing::HookRecorder;

const NAMES: [&str; 5] = ["Db", "Cache", "Queue", "Mailer", "Search"];

fn recorders(
    registry: &ServiceRegistry,
    services: usize,
    failing: Option<usize>,
    delay: Duration,
) -> Vec<Arc<HookRecorder>> {
    NAMES[..services]
        .iter()
        .copied()
        .enumerate()
        .map(|(index, name)| {
            let mut recorder = HookRecorder::new(name).with_delay(delay);
            if failing == Some(index) {
                recorder = recorder.failing_on("config");
            }
            let recorder = Arc::new(recorder);
            registry.register_instance(Arc::clone(&recorder));
            recorder
        })
        .collect()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn test_every_hook_runs_once_however_many_callers(
        services in 1usize..=5,
        callers in 1usize..8,
        delay_ms in 0u64..3,
    ) {
        tokio_test::block_on(async {
            let registry = ServiceRegistry::new();
            let recorders = recorders(&registry, services, None, Duration::from_millis(delay_ms));
            let config = json!({"callers": callers});

            let configured = join_all((0..callers).map(|_| registry.config_all(&config))).await;
            prop_assert!(configured.iter().all(Result::is_ok));
            let initialized = join_all((0..callers).map(|_| registry.init_all())).await;
            prop_assert!(initialized.iter().all(Result::is_ok));
            let running = join_all((0..callers).map(|_| registry.run_all())).await;
            prop_assert!(running.iter().all(Result::is_ok));

            for (recorder, name) in recorders.iter().zip(NAMES) {
                prop_assert_eq!(recorder.calls(), vec!["config", "init", "run"]);
                prop_assert_eq!(recorder.config(), Some(config.clone()));
                prop_assert_eq!(registry.phase_of(name).unwrap(), Phase::Running);
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_failed_configure_is_shared_by_every_caller(
        services in 1usize..=5,
        failing in 0usize..5,
        callers in 1usize..8,
    ) {
        let failing = failing % services;
        tokio_test::block_on(async {
            let registry = ServiceRegistry::new();
            let recorders = recorders(&registry, services, Some(failing), Duration::ZERO);

            let config = json!({});
            let outcomes = join_all((0..callers).map(|_| registry.config_all(&config))).await;
            let first = outcomes[0].clone().unwrap_err();
            for outcome in &outcomes {
                prop_assert_eq!(outcome.clone().unwrap_err(), first.clone());
            }

            prop_assert_eq!(recorders[failing].count("config"), 1);
            prop_assert!(recorders.iter().all(|r| r.count("config") <= 1));
            prop_assert_eq!(registry.phase_of(NAMES[failing]).unwrap(), Phase::Configuring);
            prop_assert!(registry.init_all().await.is_err());
            prop_assert!(recorders.iter().all(|r| r.count("init") == 0));
            Ok(())
        })?;
    }
}
