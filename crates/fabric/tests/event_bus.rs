//! Integration tests for the container event bus.

use std::sync::Arc;
use std::time::Duration;

use fabric::runtime::{
    BusState, Container, EventBus, EventKind, MemoryRuntime, OverflowPolicy, RuntimeEvent,
};
use fabric_common::RuntimeError;
use tokio::sync::mpsc;

async fn start_bus() -> (Arc<MemoryRuntime>, EventBus) {
    let runtime = Arc::new(MemoryRuntime::new());
    let bus = EventBus::start(runtime.clone(), OverflowPolicy::default())
        .await
        .unwrap();
    (runtime, bus)
}

/// Nothing arrives on `rx` within a short grace period.
async fn assert_silent(rx: &mut mpsc::Receiver<fabric_common::ContainerId>) {
    let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(received.is_err(), "unexpected event: {received:?}");
}

#[test_log::test(tokio::test)]
async fn test_creation_listener_receives_started_container() {
    let (runtime, bus) = start_bus().await;
    let (tx, mut rx) = mpsc::channel(8);
    bus.register_creation_listener(tx);

    runtime
        .start_container(Container::new("C1", "web", "nginx:latest"))
        .await;

    let id = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id.as_str(), "C1");
    assert_silent(&mut rx).await;

    bus.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_die_event_is_ignored() {
    let (runtime, bus) = start_bus().await;
    let (creations, mut created) = mpsc::channel(8);
    let (destructions, mut destroyed) = mpsc::channel(8);
    bus.register_creation_listener(creations);
    bus.register_destruction_listener(destructions);

    runtime.kill_container("C1").await;
    runtime
        .emit(RuntimeEvent::now("C1", EventKind::Other("pause".to_string())))
        .await;

    assert_silent(&mut created).await;
    assert_silent(&mut destroyed).await;
    bus.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_destruction_listener_receives_destroyed_container() {
    let (runtime, bus) = start_bus().await;
    let (tx, mut rx) = mpsc::channel(8);
    bus.register_destruction_listener(tx);

    runtime
        .start_container(Container::new("C2", "db", "postgres:16"))
        .await;
    runtime.destroy_container("C2").await;

    let id = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id.as_str(), "C2");
    bus.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_replaced_listener_gets_nothing() {
    let (runtime, bus) = start_bus().await;
    let (old_tx, mut old_rx) = mpsc::channel(8);
    let (new_tx, mut new_rx) = mpsc::channel(8);

    bus.register_creation_listener(old_tx);
    bus.register_creation_listener(new_tx);
    runtime
        .emit(RuntimeEvent::now("C3", EventKind::Started))
        .await;

    let id = tokio::time::timeout(Duration::from_secs(1), new_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id.as_str(), "C3");
    // The bus dropped its clone of the old sender, so the channel is closed.
    assert!(old_rx.recv().await.is_none());

    bus.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_idle_shutdown_twice() {
    let (runtime, bus) = start_bus().await;

    bus.shutdown().await;
    assert_eq!(bus.state(), BusState::Stopped);
    assert_eq!(runtime.listener_count(), 0);

    tokio::time::timeout(Duration::from_secs(1), bus.shutdown())
        .await
        .expect("second shutdown should return immediately");
    assert_eq!(bus.state(), BusState::Stopped);
}

#[test_log::test(tokio::test)]
async fn test_no_dispatch_after_shutdown() {
    let (runtime, bus) = start_bus().await;
    let (tx, mut rx) = mpsc::channel(8);
    bus.register_creation_listener(tx);

    bus.shutdown().await;
    // The listener is gone, so nothing reaches the bus.
    assert_eq!(
        runtime
            .emit(RuntimeEvent::now("C4", EventKind::Started))
            .await,
        0
    );
    assert_silent(&mut rx).await;
}

#[test_log::test(tokio::test)]
async fn test_exists() {
    let (runtime, bus) = start_bus().await;
    runtime.insert(Container::new("present", "web", "nginx:latest"));

    assert!(bus.exists("present").await.unwrap());
    assert!(!bus.exists("missing-id").await.unwrap());

    runtime.set_online(false);
    let err = bus.exists("present").await.unwrap_err();
    assert!(matches!(err, RuntimeError::Unavailable { .. }));

    bus.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_get_and_list() {
    let (runtime, bus) = start_bus().await;
    runtime.insert(Container::new("a", "web", "nginx:latest"));
    runtime.insert(Container::new("b", "db", "postgres:16"));

    let container = bus.get("a").await.unwrap();
    assert_eq!(container.image, "nginx:latest");
    assert!(bus.get("zzz").await.unwrap_err().is_not_found());

    let mut ids: Vec<String> = bus.list().await.unwrap().into_iter().map(|c| c.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);

    bus.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_unreachable_runtime_fails_start() {
    let runtime = fabric::runtime::connect("tcp://127.0.0.1:1").unwrap();
    let err = EventBus::start(runtime, OverflowPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Unavailable { .. }));
}
