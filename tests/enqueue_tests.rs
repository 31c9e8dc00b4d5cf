//! Tests for the enqueue path: subscription fan-out, idempotency, and the
//! fire-and-forget contract.

mod common;

use common::*;
use uuid::Uuid;
use vocalis_webhooks::{DeliveryStatus, WebhookEventType};

#[tokio::test]
async fn test_fan_out_creates_one_delivery_per_subscription() {
    let harness = TestHarness::new();

    let sub_a = subscription(ORG_A, "https://hooks.example.com/a", &["call.completed"]);
    let sub_b = subscription(ORG_A, "https://hooks.example.com/b", &["call.completed"]);
    harness.store.add_subscription(sub_a.clone()).await;
    harness.store.add_subscription(sub_b.clone()).await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({"call_id": "call_42"}),
        )
        .await;

    assert_eq!(harness.store.delivery_count().await, 2);

    for sub in [&sub_a, &sub_b] {
        let deliveries = harness.store.deliveries_for_subscription(sub.id).await;
        assert_eq!(deliveries.len(), 1);
        let delivery = &deliveries[0];
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, 0);
        assert_eq!(delivery.event_id, "evt_1");
        assert_eq!(delivery.event_type, "call.completed");
    }
}

#[tokio::test]
async fn test_duplicate_enqueue_is_idempotent() {
    let harness = TestHarness::new();
    let sub = subscription(ORG_A, "https://hooks.example.com/a", &["call.completed"]);
    harness.store.add_subscription(sub.clone()).await;

    for _ in 0..3 {
        harness
            .queue
            .enqueue(
                ORG_A,
                WebhookEventType::CallCompleted,
                "evt_1",
                serde_json::json!({}),
            )
            .await;
    }

    assert_eq!(harness.store.delivery_count().await, 1);
}

#[tokio::test]
async fn test_distinct_events_create_distinct_deliveries() {
    let harness = TestHarness::new();
    let sub = subscription(ORG_A, "https://hooks.example.com/a", &["call.completed"]);
    harness.store.add_subscription(sub.clone()).await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;
    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_2",
            serde_json::json!({}),
        )
        .await;

    assert_eq!(harness.store.delivery_count().await, 2);
}

#[tokio::test]
async fn test_no_matching_subscriptions_is_a_noop() {
    let harness = TestHarness::new();

    // No subscriptions at all.
    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;
    assert_eq!(harness.store.delivery_count().await, 0);

    // Subscription for a different event type.
    harness
        .store
        .add_subscription(subscription(
            ORG_A,
            "https://hooks.example.com/a",
            &["call.started"],
        ))
        .await;
    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;
    assert_eq!(harness.store.delivery_count().await, 0);
}

#[tokio::test]
async fn test_inactive_subscription_is_excluded() {
    let harness = TestHarness::new();
    let mut sub = subscription(ORG_A, "https://hooks.example.com/a", &["call.completed"]);
    sub.active = false;
    harness.store.add_subscription(sub).await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;

    assert_eq!(harness.store.delivery_count().await, 0);
}

#[tokio::test]
async fn test_other_organization_is_excluded() {
    let harness = TestHarness::new();
    harness
        .store
        .add_subscription(subscription(
            ORG_B,
            "https://hooks.example.com/b",
            &["call.completed"],
        ))
        .await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;

    assert_eq!(harness.store.delivery_count().await, 0);
}

#[tokio::test]
async fn test_max_attempts_derived_from_subscription() {
    let harness = TestHarness::new();
    let mut sub = subscription(ORG_A, "https://hooks.example.com/a", &["call.completed"]);
    sub.max_retries = 3;
    harness.store.add_subscription(sub.clone()).await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;

    let deliveries = harness.store.deliveries_for_subscription(sub.id).await;
    // max_retries + 1: retries plus the initial attempt.
    assert_eq!(deliveries[0].max_attempts, 4);
}

#[tokio::test]
async fn test_payload_snapshot_fields() {
    let harness = TestHarness::new();
    let sub = subscription(ORG_A, "https://hooks.example.com/a", &["call.completed"]);
    harness.store.add_subscription(sub.clone()).await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({"call_id": "call_42", "duration_secs": 300}),
        )
        .await;

    let deliveries = harness.store.deliveries_for_subscription(sub.id).await;
    let payload = &deliveries[0].payload;

    assert_eq!(payload["event"], "call.completed");
    assert_eq!(payload["event_id"], "evt_1");
    assert_eq!(payload["organization_id"], ORG_A.to_string());
    assert_eq!(payload["data"]["call_id"], "call_42");
    assert_eq!(payload["data"]["duration_secs"], 300);
    assert!(payload["timestamp"].is_string());
}

#[tokio::test]
async fn test_same_event_different_subscriptions_both_enqueued_on_retry() {
    // A duplicate enqueue must not skip a subscriber that missed the first
    // fan-out (e.g. its insert failed): idempotency is per subscription.
    let harness = TestHarness::new();
    let sub_a = subscription(ORG_A, "https://hooks.example.com/a", &["call.completed"]);
    harness.store.add_subscription(sub_a.clone()).await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;

    // A second subscriber appears, then the event is enqueued again.
    let sub_b = subscription(ORG_A, "https://hooks.example.com/b", &["call.completed"]);
    harness.store.add_subscription(sub_b.clone()).await;

    harness
        .queue
        .enqueue(
            ORG_A,
            WebhookEventType::CallCompleted,
            "evt_1",
            serde_json::json!({}),
        )
        .await;

    assert_eq!(
        harness
            .store
            .deliveries_for_subscription(sub_a.id)
            .await
            .len(),
        1
    );
    assert_eq!(
        harness
            .store
            .deliveries_for_subscription(sub_b.id)
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_enqueue_never_panics_on_unknown_org() {
    // The fire-and-forget contract: nothing to deliver, nothing thrown.
    let harness = TestHarness::new();
    harness
        .queue
        .enqueue(
            Uuid::new_v4(),
            WebhookEventType::CallDispositionSet,
            "evt_x",
            serde_json::json!(null),
        )
        .await;
    assert_eq!(harness.store.delivery_count().await, 0);
}
