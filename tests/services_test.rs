//! Shared Service Manager contract: idempotent start, in-use protection,
//! reference accounting, health bookkeeping.

mod common;

use common::TestCore;
use tokio_util::sync::CancellationToken;
use vibeman::domain::service::ServiceStatus;
use vibeman::error::ErrorKind;
use vibeman::infra::runtime::{ContainerRuntime, ProjectRef};

#[tokio::test]
async fn test_start_is_idempotent() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    core.services.start("postgres", &cancel).await.unwrap();
    core.services.start("postgres", &cancel).await.unwrap();

    let ups = core.runtime.up_calls.lock().unwrap();
    assert_eq!(ups.iter().filter(|p| p.as_str() == "postgres").count(), 1);
}

#[tokio::test]
async fn test_start_records_container_and_start_time() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    core.services.start("postgres", &cancel).await.unwrap();
    let instance = core.services.get("postgres").await.unwrap();
    assert_eq!(instance.status, ServiceStatus::Running);
    assert!(instance.container_id.is_some());
    assert!(instance.start_time.is_some());
}

#[tokio::test]
async fn test_stop_refuses_while_referenced() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    core.services.start("postgres", &cancel).await.unwrap();
    core.services.add_reference("postgres", "demo:feat-x").await.unwrap();

    let err = core.services.stop("postgres", false, &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InUse);
    assert!(core.services.get("postgres").await.unwrap().is_running());

    // Forced stop goes through but keeps the refset.
    core.services.stop("postgres", true, &cancel).await.unwrap();
    let instance = core.services.get("postgres").await.unwrap();
    assert_eq!(instance.status, ServiceStatus::Stopped);
    assert!(instance.container_id.is_none());
    assert_eq!(instance.refcount(), 1);
}

#[tokio::test]
async fn test_reference_add_remove_is_a_no_op_on_state() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();
    core.services.start("postgres", &cancel).await.unwrap();

    let before = core.services.get("postgres").await.unwrap();
    core.services.add_reference("postgres", "demo:feat-x").await.unwrap();
    core.services.remove_reference("postgres", "demo:feat-x").await.unwrap();
    let after = core.services.get("postgres").await.unwrap();

    assert_eq!(before.refs, after.refs);
    assert_eq!(before.status, after.status);
    assert_eq!(before.container_id, after.container_id);
}

#[tokio::test]
async fn test_duplicate_and_unknown_holders_are_no_ops() {
    let core = TestCore::new("").await;

    core.services.add_reference("postgres", "demo:a").await.unwrap();
    core.services.add_reference("postgres", "demo:a").await.unwrap();
    assert_eq!(core.services.get("postgres").await.unwrap().refcount(), 1);

    core.services.remove_reference("postgres", "demo:ghost").await.unwrap();
    assert_eq!(core.services.get("postgres").await.unwrap().refcount(), 1);
}

#[tokio::test]
async fn test_last_release_does_not_stop_service() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    core.services.start("postgres", &cancel).await.unwrap();
    core.services.add_reference("postgres", "demo:a").await.unwrap();
    core.services.remove_reference("postgres", "demo:a").await.unwrap();

    let instance = core.services.get("postgres").await.unwrap();
    assert_eq!(instance.refcount(), 0);
    // Idle but running until an explicit stop.
    assert!(instance.is_running());
}

#[tokio::test]
async fn test_restart_cycles_the_containers() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    core.services.start("postgres", &cancel).await.unwrap();
    core.services.restart("postgres", &cancel).await.unwrap();

    assert_eq!(core.runtime.down_calls.lock().unwrap().len(), 1);
    let ups = core.runtime.up_calls.lock().unwrap();
    assert_eq!(ups.iter().filter(|p| p.as_str() == "postgres").count(), 2);
    drop(ups);
    assert!(core.services.get("postgres").await.unwrap().is_running());
}

#[tokio::test]
async fn test_restart_works_even_while_referenced() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    core.services.start("postgres", &cancel).await.unwrap();
    core.services.add_reference("postgres", "demo:a").await.unwrap();
    core.services.restart("postgres", &cancel).await.unwrap();

    let instance = core.services.get("postgres").await.unwrap();
    assert!(instance.is_running());
    assert_eq!(instance.refcount(), 1);
}

#[tokio::test]
async fn test_health_check_records_probe_result() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    core.services.start("postgres", &cancel).await.unwrap();
    core.services.health_check("postgres").await.unwrap();

    let instance = core.services.get("postgres").await.unwrap();
    assert!(instance.last_health_check.is_some());
    assert!(instance.last_health_error.is_empty());
    assert!(!core.runtime.exec_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_check_on_stopped_service_records_error() {
    let core = TestCore::new("").await;

    core.services.health_check("postgres").await.unwrap();
    let instance = core.services.get("postgres").await.unwrap();
    assert!(instance.last_health_check.is_some());
    assert_eq!(instance.last_health_error, "service is not running");
    // Recorded, never propagated: status is untouched.
    assert_eq!(instance.status, ServiceStatus::Stopped);
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    let err = core.services.start("mysql", &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    let err = core.services.get("mysql").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_list_is_a_sorted_snapshot() {
    let core = TestCore::new("").await;
    let instances = core.services.list().await.unwrap();
    let names: Vec<_> = instances.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["postgres", "redis"]);
}

#[tokio::test]
async fn test_registry_reconciles_against_runtime_on_first_use() {
    let core = TestCore::new("").await;
    let cancel = CancellationToken::new();

    // A service already running before the manager's first load (e.g.
    // left over from a previous process) is picked up as running.
    core.runtime
        .up(
            &ProjectRef::new("stacks/redis.yml", "redis"),
            &["redis".to_string()],
            &cancel,
        )
        .await
        .unwrap();

    let redis = core.services.get("redis").await.unwrap();
    assert_eq!(redis.status, ServiceStatus::Running);
    assert!(redis.container_id.is_some());
}

#[tokio::test]
async fn test_refcount_always_matches_refset() {
    let core = TestCore::new("").await;
    for holder in ["a:1", "a:2", "b:1"] {
        core.services.add_reference("postgres", holder).await.unwrap();
        let instance = core.services.get("postgres").await.unwrap();
        assert_eq!(instance.refcount(), instance.refs.len());
    }
    for holder in ["a:1", "missing", "b:1"] {
        core.services.remove_reference("postgres", holder).await.unwrap();
        let instance = core.services.get("postgres").await.unwrap();
        assert_eq!(instance.refcount(), instance.refs.len());
    }
    assert_eq!(core.services.get("postgres").await.unwrap().refcount(), 1);
}
