//! Persistence seam for subscriptions and delivery rows.
//!
//! Subscriptions are managed elsewhere and read-only here. Delivery rows
//! are exclusively owned by this subsystem: created by the enqueue path,
//! claimed and transitioned by the worker, never deleted (audit trail).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{NewDelivery, WebhookDelivery, WebhookSubscription};

/// Backing store for the delivery engine.
///
/// The `claim` step is the concurrency contract: it must atomically move a
/// row from `pending`/`retrying` to `processing` so two drain cycles can
/// never double-process the same delivery.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Active subscriptions for an organization that want the event type.
    async fn find_active_subscriptions(
        &self,
        organization_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError>;

    /// Load a subscription by id.
    async fn find_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    /// Insert a delivery row in `pending` state.
    ///
    /// Idempotent on `(subscription_id, event_id)`: returns `None` when a
    /// row for that pair already exists, without touching it.
    async fn insert_delivery(
        &self,
        delivery: NewDelivery,
    ) -> Result<Option<WebhookDelivery>, WebhookError>;

    /// Load a delivery by id.
    async fn find_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError>;

    /// Atomically claim a delivery for processing.
    ///
    /// Moves `pending | retrying` to `processing` and returns the claimed
    /// row; returns `None` if the row is gone, already claimed, or in a
    /// terminal state.
    async fn claim_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError>;

    /// Ids of deliveries due for an attempt, oldest first.
    ///
    /// Due means `pending`, or `retrying` with `next_retry_at <= now`.
    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, WebhookError>;

    /// Record a successful delivery (terminal).
    async fn record_delivered(
        &self,
        id: Uuid,
        attempts: i32,
        response_status: i16,
        response_body: Option<String>,
        response_time_ms: i32,
    ) -> Result<(), WebhookError>;

    /// Record a failed attempt with a scheduled retry.
    #[allow(clippy::too_many_arguments)]
    async fn record_retrying(
        &self,
        id: Uuid,
        attempts: i32,
        last_error: String,
        response_status: Option<i16>,
        response_body: Option<String>,
        response_time_ms: Option<i32>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    /// Record a terminal failure.
    async fn record_failed(
        &self,
        id: Uuid,
        attempts: i32,
        last_error: String,
        response_status: Option<i16>,
        response_body: Option<String>,
        response_time_ms: Option<i32>,
    ) -> Result<(), WebhookError>;
}
