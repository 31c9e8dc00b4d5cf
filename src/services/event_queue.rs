//! Enqueue path: fan an event out into one delivery row per subscriber.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{NewDelivery, WebhookEventType, WebhookPayload, WebhookSubscription};
use crate::store::DeliveryStore;

/// Fans domain events out to matching subscriptions as pending deliveries.
///
/// The enqueue path runs inside the triggering action's request lifecycle
/// and is fire-and-forget: it never blocks on delivery and never surfaces
/// an error to the caller. Internal failures are logged; partial fan-out is
/// a normal operating mode, not a bug.
#[derive(Clone)]
pub struct WebhookEventQueue {
    store: Arc<dyn DeliveryStore>,
}

impl WebhookEventQueue {
    #[must_use]
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self { store }
    }

    /// Enqueue an event for delivery to every interested subscriber.
    ///
    /// Creates one `pending` delivery row per active subscription whose
    /// event set contains `event_type`. Idempotent per
    /// `(subscription, event_id)`: re-enqueueing the same event cannot
    /// produce a second row for the same subscriber. Zero matching
    /// subscriptions is a no-op.
    pub async fn enqueue(
        &self,
        organization_id: Uuid,
        event_type: WebhookEventType,
        event_id: &str,
        data: serde_json::Value,
    ) {
        let subscriptions = match self
            .store
            .find_active_subscriptions(organization_id, event_type.as_str())
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event_id,
                    event_type = %event_type,
                    organization_id = %organization_id,
                    error = %e,
                    "Failed to query matching subscriptions"
                );
                return;
            }
        };

        if subscriptions.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event_id,
                event_type = %event_type,
                organization_id = %organization_id,
                "No active subscriptions match event type"
            );
            return;
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event_id,
            event_type = %event_type,
            organization_id = %organization_id,
            subscription_count = subscriptions.len(),
            "Enqueueing event for matching subscriptions"
        );

        // One immutable snapshot shared by every delivery row.
        let payload = WebhookPayload {
            event: event_type.as_str().to_string(),
            event_id: event_id.to_string(),
            timestamp: Utc::now(),
            organization_id,
            data,
        };

        let payload_json = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event_id,
                    error = %e,
                    "Failed to serialize webhook payload"
                );
                return;
            }
        };

        for subscription in subscriptions {
            self.enqueue_for_subscription(&subscription, &payload, &payload_json)
                .await;
        }
    }

    /// Insert one delivery row; failures are logged and do not abort the
    /// rest of the fan-out.
    async fn enqueue_for_subscription(
        &self,
        subscription: &WebhookSubscription,
        payload: &WebhookPayload,
        payload_json: &serde_json::Value,
    ) {
        // The "+1" accounts for the initial attempt.
        let max_attempts = subscription.max_retries + 1;

        let result = self
            .store
            .insert_delivery(NewDelivery {
                subscription_id: subscription.id,
                event_type: payload.event.clone(),
                event_id: payload.event_id.clone(),
                payload: payload_json.clone(),
                max_attempts,
            })
            .await;

        match result {
            Ok(Some(delivery)) => {
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    event_id = %payload.event_id,
                    "Created delivery record"
                );
            }
            Ok(None) => {
                tracing::debug!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    event_id = %payload.event_id,
                    "Delivery already enqueued for this event"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    event_id = %payload.event_id,
                    error = %e,
                    "Failed to create delivery record"
                );
            }
        }
    }
}
