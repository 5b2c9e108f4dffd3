//! Доставка между инстансами через общую шину.

use std::sync::Arc;

use sensorlink::{ConnectionKey, InMemoryBus, NodeConfig, RelayNode, RetryPolicy};

mod common;
use common::{assert_silent, connection, next_text, settle, shared};

fn node(bus: &Arc<InMemoryBus>) -> RelayNode {
    RelayNode::new(
        Arc::new(bus.client()),
        NodeConfig {
            retry: RetryPolicy::no_retry(),
            reconcile_interval: None,
        },
    )
}

/// Тест проверяет, что сообщение, опубликованное на одном инстансе, доходит до
/// соединения на другом.
#[tokio::test]
async fn message_crosses_instances() {
    let bus = InMemoryBus::new(64);
    let east = node(&bus);
    let west = node(&bus);

    let alice = ConnectionKey::user("alice").unwrap();
    let sensor = ConnectionKey::device("thermo-1").unwrap();
    let (ha, mut rx_alice) = connection(&alice);
    let (hs, mut rx_sensor) = connection(&sensor);

    east.connect(shared(&ha)).await;
    west.connect(shared(&hs)).await;

    west.publisher().to_user("alice", "21.5C").await.unwrap();
    east.publisher().to_device("thermo-1", "calibrate").await.unwrap();

    assert_eq!(next_text(&mut rx_alice).await.as_deref(), Some("21.5C"));
    assert_eq!(next_text(&mut rx_sensor).await.as_deref(), Some("calibrate"));

    settle().await;
    // Инстанс без соединения получает сообщение только если подписан.
    assert_eq!(east.router_stats().delivered, 1);
    assert_eq!(west.router_stats().delivered, 1);
    assert_eq!(east.router_stats().not_found, 0);
    assert_eq!(west.router_stats().not_found, 0);
}

/// Тест проверяет переезд пользователя на другой инстанс: после закрытия
/// старого соединения сообщения получает только новое.
#[tokio::test]
async fn user_moves_between_instances() {
    let bus = InMemoryBus::new(64);
    let east = node(&bus);
    let west = node(&bus);
    let alice = ConnectionKey::user("alice").unwrap();

    let (old, mut rx_old) = connection(&alice);
    east.connect(shared(&old)).await;

    let (new, mut rx_new) = connection(&alice);
    west.connect(shared(&new)).await;
    east.disconnect(shared(&old)).await;
    settle().await;

    assert_eq!(bus.subscriber_count("user.alice"), 1);
    assert!(east.registry().is_empty());

    east.publisher().to_user("alice", "where are you").await.unwrap();
    assert_eq!(next_text(&mut rx_new).await.as_deref(), Some("where are you"));

    settle().await;
    assert_silent(&mut rx_old);
    assert_silent(&mut rx_new);
}

/// Тест проверяет, что сообщение без получателя ни на одном инстансе
/// просто теряется.
#[tokio::test]
async fn nobody_home_anywhere() {
    let bus = InMemoryBus::new(64);
    let east = node(&bus);
    let west = node(&bus);

    west.publisher().to_device("ghost", "boo").await.unwrap();
    settle().await;

    assert_eq!(east.router_stats(), Default::default());
    assert_eq!(west.router_stats(), Default::default());
    assert_eq!(bus.stats().undelivered_count, 1);
}
