// Link agent tests

mod common;

use common::*;
use ranging::config::PairingTriggerConfig;
use ranging::{
    AttributeTree, GattService, LinkAgent, LinkEvent, LinkStatus, PermissionManager,
    PermissionScope, PermissionStatus, RangingError, WorkflowConfig, WorkflowSignal,
    RAS_CONTROL_POINT_UUID, RAS_SERVICE_UUID,
};
use tokio::sync::mpsc;

fn trigger() -> PairingTriggerConfig {
    WorkflowConfig::default().pairing
}

fn agent(h: &Harness) -> (LinkAgent, mpsc::UnboundedReceiver<WorkflowSignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LinkAgent::new(h.links.clone(), h.permissions.clone(), tx, trigger()),
        rx,
    )
}

fn next_link(rx: &mut mpsc::UnboundedReceiver<WorkflowSignal>) -> (u64, LinkEvent) {
    match rx.try_recv() {
        Ok(WorkflowSignal::Link { link, event }) => (link, event),
        other => panic!("expected link event, got {:?}", other),
    }
}

/// Connect and deliver the connected callback
async fn connected(h: &Harness) -> (LinkAgent, mpsc::UnboundedReceiver<WorkflowSignal>) {
    let (mut link, mut rx) = agent(h);
    link.connect(&target()).await.unwrap();
    h.links.emit(LinkEvent::Connected);
    let (id, event) = next_link(&mut rx);
    assert_eq!(link.on_link_event(id, event).await.unwrap(), Some(LinkStatus::Connected));
    (link, rx)
}

#[tokio::test]
async fn test_connect_then_trigger_pairing() {
    let h = Harness::new();
    let (mut link, _rx) = connected(&h).await;

    assert_eq!(link.discover_and_trigger().await.unwrap(), LinkStatus::PairingTriggered);

    let writes = h.links.writes.lock().unwrap().clone();
    assert_eq!(writes, vec![(RAS_SERVICE_UUID, RAS_CONTROL_POINT_UUID, vec![0x00])]);
    assert!(link.is_open());
    assert_eq!(link.peripheral(), Some(&target()));
}

#[tokio::test]
async fn test_missing_control_point_leaves_link_open() {
    let h = Harness::new();
    *h.links.tree.lock().unwrap() = AttributeTree {
        services: vec![GattService {
            uuid: RAS_SERVICE_UUID,
            characteristics: vec![],
        }],
    };
    let (mut link, _rx) = connected(&h).await;

    assert_eq!(link.discover_and_trigger().await, Err(RangingError::ServiceNotFound));
    assert!(link.is_open());
    assert_eq!(h.links.closes(), 0);
    assert_eq!(h.links.write_count(), 0);
}

#[tokio::test]
async fn test_missing_service_is_not_found() {
    let h = Harness::new();
    *h.links.tree.lock().unwrap() = AttributeTree::default();
    let (mut link, _rx) = connected(&h).await;

    assert_eq!(link.discover_and_trigger().await, Err(RangingError::ServiceNotFound));
    assert!(link.is_open());
}

#[tokio::test]
async fn test_write_failure_is_reported() {
    let h = Harness::new();
    *h.links.fail_write.lock().unwrap() = Some(RangingError::Platform("gatt busy".to_string()));
    let (mut link, _rx) = connected(&h).await;

    assert_eq!(
        link.discover_and_trigger().await,
        Err(RangingError::WriteFailure("Platform error: gatt busy".to_string()))
    );
}

#[tokio::test]
async fn test_trigger_requires_connected_link() {
    let h = Harness::new();
    let (mut link, _rx) = agent(&h);

    assert_eq!(link.discover_and_trigger().await, Err(RangingError::LinkLost));

    link.connect(&target()).await.unwrap();
    assert_eq!(link.discover_and_trigger().await, Err(RangingError::LinkLost));
    assert_eq!(h.links.discovers.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disconnect_releases_link_once() {
    let h = Harness::new();
    let (mut link, mut rx) = connected(&h).await;

    h.links.emit(LinkEvent::Disconnected { status: 19 });
    let (id, event) = next_link(&mut rx);
    assert_eq!(link.on_link_event(id, event).await, Err(RangingError::LinkLost));
    assert!(!link.is_open());
    assert_eq!(h.links.closes(), 1);

    link.close().await;
    assert_eq!(h.links.closes(), 1);
}

#[tokio::test]
async fn test_duplicate_connected_is_ignored() {
    let h = Harness::new();
    let (mut link, mut rx) = connected(&h).await;

    h.links.emit(LinkEvent::Connected);
    let (id, event) = next_link(&mut rx);
    assert_eq!(link.on_link_event(id, event).await.unwrap(), None);
}

#[tokio::test]
async fn test_events_from_replaced_link_are_ignored() {
    let h = Harness::new();
    let (mut link, mut rx) = agent(&h);

    link.connect(&target()).await.unwrap();
    h.links.emit(LinkEvent::Disconnected { status: 8 });
    link.connect(&other()).await.unwrap();
    assert_eq!(h.links.closes(), 1);

    let (id, event) = next_link(&mut rx);
    assert_eq!(link.on_link_event(id, event).await.unwrap(), None);
    assert!(link.is_open());
    assert_eq!(link.peripheral(), Some(&other()));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let h = Harness::new();
    let (mut link, _rx) = agent(&h);

    link.close().await;
    link.connect(&target()).await.unwrap();
    link.close().await;
    link.close().await;

    assert_eq!(h.links.closes(), 1);
}

#[tokio::test]
async fn test_connect_requires_permission() {
    let permissions = PermissionManager::granted();
    permissions
        .set_permission(PermissionScope::Connect, PermissionStatus::Denied)
        .await;
    let h = Harness::with_permissions(permissions);
    let (mut link, _rx) = agent(&h);

    assert_eq!(
        link.connect(&target()).await,
        Err(RangingError::PermissionDenied(PermissionScope::Connect))
    );
    assert_eq!(h.links.opens(), 0);
}

#[tokio::test]
async fn test_immediate_open_failure() {
    let h = Harness::new();
    *h.links.fail_open.lock().unwrap() = Some(RangingError::Platform("adapter gone".to_string()));
    let (mut link, _rx) = agent(&h);

    assert_eq!(
        link.connect(&target()).await,
        Err(RangingError::ConnectFailure("Platform error: adapter gone".to_string()))
    );
    assert!(!link.is_open());
}

#[tokio::test]
async fn test_failed_connection_attempt_is_a_connect_failure() {
    let h = Harness::new();
    let (mut link, mut rx) = agent(&h);
    link.connect(&target()).await.unwrap();

    h.links.emit(LinkEvent::ConnectFailed { status: 133 });
    let (id, event) = next_link(&mut rx);
    assert_eq!(
        link.on_link_event(id, event).await,
        Err(RangingError::ConnectFailure("status 133".to_string()))
    );
    assert!(!link.is_open());
    assert_eq!(h.links.closes(), 1);

    link.close().await;
    assert_eq!(h.links.closes(), 1);
}
