use openlovable::config::SandboxConfig;
use openlovable::sandbox::memory::InMemoryProvider;
use openlovable::sandbox::{CreateOptions, HealthOutcome, LifecycleState, SandboxLifecycleManager};
use openlovable::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;

fn manager(provider: Arc<InMemoryProvider>) -> Arc<SandboxLifecycleManager> {
    Arc::new(SandboxLifecycleManager::new(
        provider,
        &SandboxConfig {
            settle_delay_ms: 0,
            ..SandboxConfig::default()
        },
        CreateOptions {
            template: "test".into(),
            timeout_ms: 60_000,
        },
    ))
}

#[tokio::test]
async fn kill_is_idempotent() {
    let mgr = manager(Arc::new(InMemoryProvider::new()));
    mgr.create_sandbox().await.unwrap();

    mgr.kill_sandbox().await;
    assert!(!mgr.get_status().await.active);
    mgr.kill_sandbox().await;
    assert!(!mgr.get_status().await.active);
}

#[tokio::test]
async fn killed_sandbox_can_be_recreated() {
    let provider = Arc::new(InMemoryProvider::new());
    let mgr = manager(provider.clone());
    mgr.create_sandbox().await.unwrap();

    provider.set_unhealthy(true);
    for _ in 0..3 {
        mgr.run_health_check().await;
    }
    assert_eq!(mgr.state().await, LifecycleState::Killed);

    provider.set_unhealthy(false);
    let info = mgr.create_sandbox().await.unwrap();
    assert_eq!(mgr.state().await, LifecycleState::Running);
    assert!(mgr.get_status().await.healthy);
    assert_eq!(mgr.info().await.unwrap().sandbox_id, info.sandbox_id);
}

#[tokio::test(start_paused = true)]
async fn monitor_recovers_from_a_transient_failure() {
    let provider = Arc::new(InMemoryProvider::new());
    let mgr = manager(provider.clone());
    mgr.create_sandbox().await.unwrap();

    provider.fail_commands_containing("echo ok");
    tokio::time::sleep(Duration::from_millis(30_500)).await;
    provider.clear_failures();

    assert_eq!(mgr.state().await, LifecycleState::Running);
    assert_eq!(mgr.info().await.unwrap().sandbox_id, "mem-2");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mgr.reconnect_attempts().await, 0);
    assert_eq!(mgr.run_health_check().await, HealthOutcome::Healthy);
}

#[tokio::test]
async fn restart_restores_persisted_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("session.db");
    let provider = Arc::new(InMemoryProvider::new());

    let first = Arc::new(
        SandboxLifecycleManager::new(
            provider.clone(),
            &SandboxConfig {
                settle_delay_ms: 0,
                ..SandboxConfig::default()
            },
            CreateOptions {
                template: "test".into(),
                timeout_ms: 60_000,
            },
        )
        .with_session_store(Arc::new(SessionStore::open(&db).unwrap())),
    );
    let info = first.create_sandbox().await.unwrap();
    drop(first);

    let second = Arc::new(
        SandboxLifecycleManager::new(
            provider.clone(),
            &SandboxConfig::default(),
            CreateOptions {
                template: "test".into(),
                timeout_ms: 60_000,
            },
        )
        .with_session_store(Arc::new(SessionStore::open(&db).unwrap())),
    );
    let restored = second.restore().await.unwrap();
    assert_eq!(restored.sandbox_id, info.sandbox_id);
    assert_eq!(provider.environments().len(), 1);
}

#[tokio::test]
async fn restore_of_vanished_sandbox_clears_session() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("session.db");
    let store = Arc::new(SessionStore::open(&db).unwrap());
    store.save("mem-99", "https://mem-99.localhost:5173").unwrap();

    let mgr = Arc::new(
        SandboxLifecycleManager::new(
            Arc::new(InMemoryProvider::new()),
            &SandboxConfig::default(),
            CreateOptions {
                template: "test".into(),
                timeout_ms: 60_000,
            },
        )
        .with_session_store(store.clone()),
    );

    assert!(mgr.restore().await.is_none());
    assert!(store.load().unwrap().is_none());
    assert_eq!(mgr.state().await, LifecycleState::Idle);
}
