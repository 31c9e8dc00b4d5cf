//! Postgres-backed delivery store.
//!
//! Conceptual schema (managed by the platform's migrations):
//!
//! ```sql
//! CREATE TABLE webhook_subscriptions (
//!     id UUID PRIMARY KEY,
//!     organization_id UUID NOT NULL,
//!     url TEXT NOT NULL,
//!     secret_encrypted TEXT,
//!     events TEXT[] NOT NULL,
//!     active BOOLEAN NOT NULL DEFAULT TRUE,
//!     headers JSONB NOT NULL DEFAULT '{}',
//!     timeout_ms INTEGER NOT NULL DEFAULT 10000,
//!     retry_policy TEXT NOT NULL DEFAULT 'exponential',
//!     max_retries INTEGER NOT NULL DEFAULT 5
//! );
//!
//! CREATE TABLE webhook_deliveries (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     subscription_id UUID NOT NULL REFERENCES webhook_subscriptions(id),
//!     event_type TEXT NOT NULL,
//!     event_id TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'pending',
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     max_attempts INTEGER NOT NULL,
//!     response_status SMALLINT,
//!     response_body TEXT,
//!     response_time_ms INTEGER,
//!     last_error TEXT,
//!     next_retry_at TIMESTAMPTZ,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     delivered_at TIMESTAMPTZ,
//!     UNIQUE (subscription_id, event_id)
//! );
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{
    DeliveryStatus, NewDelivery, RetryPolicy, WebhookDelivery, WebhookSubscription,
};
use crate::store::DeliveryStore;

/// Postgres implementation of [`DeliveryStore`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    organization_id: Uuid,
    url: String,
    secret_encrypted: Option<String>,
    events: Vec<String>,
    active: bool,
    headers: serde_json::Value,
    timeout_ms: i32,
    retry_policy: String,
    max_retries: i32,
}

impl From<SubscriptionRow> for WebhookSubscription {
    fn from(row: SubscriptionRow) -> Self {
        let headers: HashMap<String, String> =
            serde_json::from_value(row.headers).unwrap_or_default();

        Self {
            id: row.id,
            organization_id: row.organization_id,
            url: row.url,
            secret_encrypted: row.secret_encrypted,
            events: row.events,
            active: row.active,
            headers,
            timeout_ms: row.timeout_ms.max(0) as u64,
            retry_policy: RetryPolicy::parse(&row.retry_policy).unwrap_or_default(),
            max_retries: row.max_retries,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: Uuid,
    subscription_id: Uuid,
    event_type: String,
    event_id: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    response_status: Option<i16>,
    response_body: Option<String>,
    response_time_ms: Option<i32>,
    last_error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl From<DeliveryRow> for WebhookDelivery {
    fn from(row: DeliveryRow) -> Self {
        Self {
            id: row.id,
            subscription_id: row.subscription_id,
            event_type: row.event_type,
            event_id: row.event_id,
            payload: row.payload,
            status: DeliveryStatus::parse(&row.status).unwrap_or_default(),
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            response_status: row.response_status,
            response_body: row.response_body,
            response_time_ms: row.response_time_ms,
            last_error: row.last_error,
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        }
    }
}

const DELIVERY_COLUMNS: &str = "id, subscription_id, event_type, event_id, payload, status, \
     attempts, max_attempts, response_status, response_body, response_time_ms, \
     last_error, next_retry_at, created_at, delivered_at";

#[async_trait]
impl DeliveryStore for PostgresStore {
    async fn find_active_subscriptions(
        &self,
        organization_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            r"
            SELECT id, organization_id, url, secret_encrypted, events, active,
                   headers, timeout_ms, retry_policy, max_retries
            FROM webhook_subscriptions
            WHERE organization_id = $1 AND active AND $2 = ANY(events)
            ",
        )
        .bind(organization_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r"
            SELECT id, organization_id, url, secret_encrypted, events, active,
                   headers, timeout_ms, retry_policy, max_retries
            FROM webhook_subscriptions
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_delivery(
        &self,
        delivery: NewDelivery,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        // ON CONFLICT DO NOTHING + RETURNING yields no row for a duplicate
        // (subscription_id, event_id), which is exactly the idempotency
        // signal the enqueue path wants.
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            r"
            INSERT INTO webhook_deliveries
                (subscription_id, event_type, event_id, payload, status, attempts, max_attempts)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5)
            ON CONFLICT (subscription_id, event_id) DO NOTHING
            RETURNING {DELIVERY_COLUMNS}
            "
        ))
        .bind(delivery.subscription_id)
        .bind(&delivery.event_type)
        .bind(&delivery.event_id)
        .bind(&delivery.payload)
        .bind(delivery.max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn claim_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError> {
        // The conditional update is the claim: only one worker can move the
        // row out of pending/retrying, so concurrent drains cannot
        // double-process it.
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            r"
            UPDATE webhook_deliveries
            SET status = 'processing'
            WHERE id = $1 AND status IN ('pending', 'retrying')
            RETURNING {DELIVERY_COLUMNS}
            "
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, WebhookError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r"
            SELECT id
            FROM webhook_deliveries
            WHERE status = 'pending'
               OR (status = 'retrying' AND next_retry_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn record_delivered(
        &self,
        id: Uuid,
        attempts: i32,
        response_status: i16,
        response_body: Option<String>,
        response_time_ms: i32,
    ) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'delivered', attempts = $2, response_status = $3,
                response_body = $4, response_time_ms = $5,
                next_retry_at = NULL, delivered_at = now()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(response_status)
        .bind(response_body)
        .bind(response_time_ms)
        .execute(&self.pool)
        .await?;

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
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'retrying', attempts = $2, last_error = $3,
                response_status = $4, response_body = $5,
                response_time_ms = $6, next_retry_at = $7
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(last_error)
        .bind(response_status)
        .bind(response_body)
        .bind(response_time_ms)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;

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
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'failed', attempts = $2, last_error = $3,
                response_status = $4, response_body = $5,
                response_time_ms = $6, next_retry_at = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(last_error)
        .bind(response_status)
        .bind(response_body)
        .bind(response_time_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// Integration tests for this store live in tests/postgres_store_tests.rs
// and require a running database (cargo test --features integration).
