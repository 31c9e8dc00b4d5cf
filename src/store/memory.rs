//! In-memory delivery store.
//!
//! The default/simple mode for single-instance deployments and the store
//! the test suites run against. State is lost on process restart; the
//! Postgres store is the durable production mode.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{DeliveryStatus, NewDelivery, WebhookDelivery, WebhookSubscription};
use crate::store::DeliveryStore;

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<Uuid, WebhookSubscription>,
    deliveries: HashMap<Uuid, WebhookDelivery>,
    /// Insertion order; `created_at` ties are broken by arrival.
    delivery_order: Vec<Uuid>,
    /// Natural-key index enforcing enqueue idempotency.
    delivery_keys: HashSet<(Uuid, String)>,
}

/// In-memory implementation of [`DeliveryStore`].
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription (subscription management is outside this
    /// subsystem; this mirrors what the platform's CRUD layer would write).
    pub async fn add_subscription(&self, subscription: WebhookSubscription) {
        let mut inner = self.inner.write().await;
        inner.subscriptions.insert(subscription.id, subscription);
    }

    /// All delivery rows for a subscription, oldest first.
    pub async fn deliveries_for_subscription(&self, subscription_id: Uuid) -> Vec<WebhookDelivery> {
        let inner = self.inner.read().await;
        inner
            .delivery_order
            .iter()
            .filter_map(|id| inner.deliveries.get(id))
            .filter(|d| d.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    /// Total number of delivery rows.
    pub async fn delivery_count(&self) -> usize {
        self.inner.read().await.deliveries.len()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn find_active_subscriptions(
        &self,
        organization_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| {
                s.organization_id == organization_id
                    && s.active
                    && s.events.iter().any(|e| e == event_type)
            })
            .cloned()
            .collect())
    }

    async fn find_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let inner = self.inner.read().await;
        Ok(inner.subscriptions.get(&id).cloned())
    }

    async fn insert_delivery(
        &self,
        delivery: NewDelivery,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        let mut inner = self.inner.write().await;

        let key = (delivery.subscription_id, delivery.event_id.clone());
        if inner.delivery_keys.contains(&key) {
            return Ok(None);
        }

        let row = WebhookDelivery {
            id: Uuid::new_v4(),
            subscription_id: delivery.subscription_id,
            event_type: delivery.event_type,
            event_id: delivery.event_id,
            payload: delivery.payload,
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts: delivery.max_attempts,
            response_status: None,
            response_body: None,
            response_time_ms: None,
            last_error: None,
            next_retry_at: None,
            created_at: Utc::now(),
            delivered_at: None,
        };

        inner.delivery_keys.insert(key);
        inner.delivery_order.push(row.id);
        inner.deliveries.insert(row.id, row.clone());

        Ok(Some(row))
    }

    async fn find_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError> {
        let inner = self.inner.read().await;
        Ok(inner.deliveries.get(&id).cloned())
    }

    async fn claim_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError> {
        let mut inner = self.inner.write().await;

        let Some(row) = inner.deliveries.get_mut(&id) else {
            return Ok(None);
        };

        match row.status {
            DeliveryStatus::Pending | DeliveryStatus::Retrying => {
                row.status = DeliveryStatus::Processing;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, WebhookError> {
        let inner = self.inner.read().await;

        Ok(inner
            .delivery_order
            .iter()
            .filter_map(|id| inner.deliveries.get(id))
            .filter(|d| match d.status {
                DeliveryStatus::Pending => true,
                DeliveryStatus::Retrying => d.next_retry_at.is_some_and(|at| at <= now),
                _ => false,
            })
            .take(limit)
            .map(|d| d.id)
            .collect())
    }

    async fn record_delivered(
        &self,
        id: Uuid,
        attempts: i32,
        response_status: i16,
        response_body: Option<String>,
        response_time_ms: i32,
    ) -> Result<(), WebhookError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .deliveries
            .get_mut(&id)
            .ok_or(WebhookError::DeliveryNotFound)?;

        row.status = DeliveryStatus::Delivered;
        row.attempts = attempts;
        row.response_status = Some(response_status);
        row.response_body = response_body;
        row.response_time_ms = Some(response_time_ms);
        row.next_retry_at = None;
        row.delivered_at = Some(Utc::now());

        Ok(())
    }

    async fn record_retrying(
        &self,
        id: Uuid,
        attempts: i32,
        last_error: String,
        response_status: Option<i16>,
        response_body: Option<String>,
        response_time_ms: Option<i32>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .deliveries
            .get_mut(&id)
            .ok_or(WebhookError::DeliveryNotFound)?;

        row.status = DeliveryStatus::Retrying;
        row.attempts = attempts;
        row.last_error = Some(last_error);
        row.response_status = response_status;
        row.response_body = response_body;
        row.response_time_ms = response_time_ms;
        row.next_retry_at = Some(next_retry_at);

        Ok(())
    }

    async fn record_failed(
        &self,
        id: Uuid,
        attempts: i32,
        last_error: String,
        response_status: Option<i16>,
        response_body: Option<String>,
        response_time_ms: Option<i32>,
    ) -> Result<(), WebhookError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .deliveries
            .get_mut(&id)
            .ok_or(WebhookError::DeliveryNotFound)?;

        row.status = DeliveryStatus::Failed;
        row.attempts = attempts;
        row.last_error = Some(last_error);
        row.response_status = response_status;
        row.response_body = response_body;
        row.response_time_ms = response_time_ms;
        row.next_retry_at = None;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetryPolicy;
    use std::collections::HashMap as StdHashMap;

    fn subscription(organization_id: Uuid, events: &[&str], active: bool) -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            organization_id,
            url: "https://example.com/hook".to_string(),
            secret_encrypted: None,
            events: events.iter().map(|s| (*s).to_string()).collect(),
            active,
            headers: StdHashMap::new(),
            timeout_ms: 10_000,
            retry_policy: RetryPolicy::Exponential,
            max_retries: 5,
        }
    }

    fn new_delivery(subscription_id: Uuid, event_id: &str) -> NewDelivery {
        NewDelivery {
            subscription_id,
            event_type: "call.completed".to_string(),
            event_id: event_id.to_string(),
            payload: serde_json::json!({"event": "call.completed"}),
            max_attempts: 6,
        }
    }

    #[tokio::test]
    async fn test_subscription_filtering() {
        let store = InMemoryStore::new();
        let org = Uuid::new_v4();
        let other_org = Uuid::new_v4();

        store
            .add_subscription(subscription(org, &["call.completed"], true))
            .await;
        store
            .add_subscription(subscription(org, &["call.started"], true))
            .await;
        store
            .add_subscription(subscription(org, &["call.completed"], false))
            .await;
        store
            .add_subscription(subscription(other_org, &["call.completed"], true))
            .await;

        let matches = store
            .find_active_subscriptions(org, "call.completed")
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_delivery_idempotent() {
        let store = InMemoryStore::new();
        let sub_id = Uuid::new_v4();

        let first = store
            .insert_delivery(new_delivery(sub_id, "evt_1"))
            .await
            .unwrap();
        assert!(first.is_some());

        let duplicate = store
            .insert_delivery(new_delivery(sub_id, "evt_1"))
            .await
            .unwrap();
        assert!(duplicate.is_none());

        // Same event for a different subscription is a distinct delivery.
        let other = store
            .insert_delivery(new_delivery(Uuid::new_v4(), "evt_1"))
            .await
            .unwrap();
        assert!(other.is_some());

        assert_eq!(store.delivery_count().await, 2);
    }

    #[tokio::test]
    async fn test_claim_transitions_and_excludes() {
        let store = InMemoryStore::new();
        let row = store
            .insert_delivery(new_delivery(Uuid::new_v4(), "evt_1"))
            .await
            .unwrap()
            .unwrap();

        let claimed = store.claim_delivery(row.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, DeliveryStatus::Processing);

        // Second claim of a processing row must not hand it out again.
        assert!(store.claim_delivery(row.id).await.unwrap().is_none());

        store
            .record_delivered(row.id, 1, 200, None, 12)
            .await
            .unwrap();
        assert!(store.claim_delivery(row.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_deliveries_selection() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let pending = store
            .insert_delivery(new_delivery(Uuid::new_v4(), "evt_pending"))
            .await
            .unwrap()
            .unwrap();

        let due_retry = store
            .insert_delivery(new_delivery(Uuid::new_v4(), "evt_due"))
            .await
            .unwrap()
            .unwrap();
        store.claim_delivery(due_retry.id).await.unwrap();
        store
            .record_retrying(
                due_retry.id,
                1,
                "HTTP 500".to_string(),
                Some(500),
                None,
                None,
                now - chrono::Duration::seconds(10),
            )
            .await
            .unwrap();

        let future_retry = store
            .insert_delivery(new_delivery(Uuid::new_v4(), "evt_later"))
            .await
            .unwrap()
            .unwrap();
        store.claim_delivery(future_retry.id).await.unwrap();
        store
            .record_retrying(
                future_retry.id,
                1,
                "HTTP 500".to_string(),
                Some(500),
                None,
                None,
                now + chrono::Duration::seconds(3600),
            )
            .await
            .unwrap();

        let due = store.due_deliveries(now, 10).await.unwrap();
        assert_eq!(due, vec![pending.id, due_retry.id]);
    }

    #[tokio::test]
    async fn test_due_deliveries_respects_limit_and_order() {
        let store = InMemoryStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let row = store
                .insert_delivery(new_delivery(Uuid::new_v4(), &format!("evt_{i}")))
                .await
                .unwrap()
                .unwrap();
            ids.push(row.id);
        }

        let due = store.due_deliveries(Utc::now(), 3).await.unwrap();
        assert_eq!(due, ids[..3]);
    }

    #[tokio::test]
    async fn test_record_failed_sets_terminal_fields() {
        let store = InMemoryStore::new();
        let row = store
            .insert_delivery(new_delivery(Uuid::new_v4(), "evt_1"))
            .await
            .unwrap()
            .unwrap();

        store.claim_delivery(row.id).await.unwrap();
        store
            .record_failed(row.id, 1, "HTTP 400".to_string(), Some(400), None, Some(5))
            .await
            .unwrap();

        let stored = store.find_delivery(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 400"));
        assert_eq!(stored.response_status, Some(400));
        assert!(stored.next_retry_at.is_none());
        assert!(stored.delivered_at.is_none());
    }
}
