// tests/broker_memory.rs

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use mbus_rpc::{
    // ---
    create_memory_broker,
    CorrelationId,
    Envelope,
    QueueOptions,
    RoutingKey,
};

fn call_envelope(routing_key: &str, reply_to: &str, body: &'static [u8]) -> Envelope {
    // ---
    Envelope::call(
        RoutingKey::from(routing_key),
        Bytes::from_static(body),
        CorrelationId::generate(),
        RoutingKey::from(reply_to),
        Arc::from("application/json"),
    )
}

#[tokio::test]
async fn declared_bound_queue_delivers_published_envelopes() {
    // ---
    // Arrange
    // ---
    let broker = create_memory_broker().await.expect("broker");

    broker
        .declare_queue("q.alpha", &QueueOptions::route())
        .await
        .expect("declare failed");
    broker
        .bind("q.alpha", &RoutingKey::from("alpha"))
        .await
        .expect("bind failed");

    let mut consumer = broker.consume("q.alpha").await.expect("consume failed");

    // ---
    // Act
    // ---
    broker
        .publish(call_envelope("alpha", "nowhere", b"hello"))
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let env = timeout(Duration::from_millis(500), consumer.inbox.recv())
        .await
        .expect("no delivery within 500ms")
        .expect("inbox closed");

    assert_eq!(env.body, Bytes::from_static(b"hello"));
    assert_eq!(env.routing_key.as_str(), "alpha");
    assert!(env.correlation_id.is_some());
}

#[tokio::test]
async fn unroutable_publish_is_dropped_silently() {
    // ---
    let broker = create_memory_broker().await.expect("broker");

    broker
        .declare_queue("q.bound", &QueueOptions::route())
        .await
        .expect("declare failed");
    broker
        .bind("q.bound", &RoutingKey::from("bound"))
        .await
        .expect("bind failed");

    let mut consumer = broker.consume("q.bound").await.expect("consume failed");

    // No queue is bound under "elsewhere"; the publish must still succeed.
    broker
        .publish(call_envelope("elsewhere", "nowhere", b"lost"))
        .await
        .expect("unroutable publish should not error");

    let res = timeout(Duration::from_millis(100), consumer.inbox.recv()).await;
    assert!(res.is_err(), "bound queue unexpectedly received the envelope");
}

#[tokio::test]
async fn competing_consumers_split_the_stream() {
    // ---
    let broker = create_memory_broker().await.expect("broker");

    broker
        .declare_queue("q.shared", &QueueOptions::durable_shared())
        .await
        .expect("declare failed");
    broker
        .bind("q.shared", &RoutingKey::from("shared"))
        .await
        .expect("bind failed");

    let mut first = broker.consume("q.shared").await.expect("consume failed");
    let mut second = broker.consume("q.shared").await.expect("consume failed");

    broker
        .publish(call_envelope("shared", "nowhere", b"one"))
        .await
        .expect("publish failed");
    broker
        .publish(call_envelope("shared", "nowhere", b"two"))
        .await
        .expect("publish failed");

    // Each envelope goes to exactly one consumer; rotation gives one each.
    let a = timeout(Duration::from_millis(500), first.inbox.recv())
        .await
        .expect("first consumer starved")
        .expect("inbox closed");
    let b = timeout(Duration::from_millis(500), second.inbox.recv())
        .await
        .expect("second consumer starved")
        .expect("inbox closed");

    let mut bodies = vec![a.body, b.body];
    bodies.sort();
    assert_eq!(bodies, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
}

#[tokio::test]
async fn cancelling_last_consumer_auto_deletes_the_queue() {
    // ---
    let broker = create_memory_broker().await.expect("broker");

    broker
        .declare_queue("q.auto", &QueueOptions::route())
        .await
        .expect("declare failed");
    broker
        .bind("q.auto", &RoutingKey::from("auto"))
        .await
        .expect("bind failed");

    let mut consumer = broker.consume("q.auto").await.expect("consume failed");

    broker
        .cancel_consumer(&consumer.tag)
        .await
        .expect("cancel failed");

    // The inbox closes...
    assert!(consumer.inbox.recv().await.is_none());

    // ...and the auto-delete queue is gone, so consuming it errors.
    assert!(broker.consume("q.auto").await.is_err());
}

#[tokio::test]
async fn deleting_a_queue_closes_its_consumers() {
    // ---
    let broker = create_memory_broker().await.expect("broker");

    broker
        .declare_queue("q.gone", &QueueOptions::route())
        .await
        .expect("declare failed");

    let mut consumer = broker.consume("q.gone").await.expect("consume failed");

    broker.delete_queue("q.gone").await.expect("delete failed");

    assert!(consumer.inbox.recv().await.is_none());
}

#[tokio::test]
async fn exclusive_queue_rejects_redeclaration() {
    // ---
    let broker = create_memory_broker().await.expect("broker");

    broker
        .declare_queue("q.private", &QueueOptions::exclusive_reply())
        .await
        .expect("declare failed");

    let res = broker
        .declare_queue("q.private", &QueueOptions::exclusive_reply())
        .await;
    assert!(res.is_err(), "exclusive queue was re-declared");

    // Shared queues re-declare without complaint.
    broker
        .declare_queue("q.public", &QueueOptions::durable_shared())
        .await
        .expect("declare failed");
    broker
        .declare_queue("q.public", &QueueOptions::durable_shared())
        .await
        .expect("shared re-declare should be a no-op");
}
