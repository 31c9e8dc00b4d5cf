//! Delivery attempt execution: claim a row, perform the signed HTTP call,
//! interpret the outcome, and transition delivery state.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::backoff::BackoffCalculator;
use crate::config::WebhooksConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::{RetryPolicy, WebhookDelivery, WebhookSubscription};
use crate::store::DeliveryStore;
use crate::validation;

/// Response body characters kept for the audit trail.
const MAX_RESPONSE_BODY_CHARS: usize = 1000;

/// Signature header on outgoing deliveries.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Event type header on outgoing deliveries.
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// Delivery id header on outgoing deliveries.
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-Id";

/// What happened to a delivery during one worker pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The endpoint acknowledged with a 2xx; terminal.
    Delivered,
    /// The attempt failed and a retry is scheduled.
    Retrying,
    /// The delivery is terminally failed.
    Failed,
    /// The row was not claimable (already processing or terminal).
    Skipped,
}

/// Executes individual delivery attempts.
#[derive(Clone)]
pub struct DeliveryWorker {
    store: Arc<dyn DeliveryStore>,
    http_client: reqwest::Client,
    encryption_key: Vec<u8>,
    backoff: BackoffCalculator,
    allow_http: bool,
    allow_internal_hosts: bool,
}

impl DeliveryWorker {
    /// Create a worker with a shared HTTP client.
    ///
    /// Redirects are never followed: a redirect response must not re-route
    /// a signed payload to an address the subscriber did not register.
    pub fn new(store: Arc<dyn DeliveryStore>, config: &WebhooksConfig) -> Result<Self, WebhookError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            http_client,
            encryption_key: config.encryption_key.clone(),
            backoff: BackoffCalculator::default(),
            allow_http: config.allow_http,
            allow_internal_hosts: config.allow_internal_hosts,
        })
    }

    /// Replace the retry scheduler (tests use a zero-delay calculator).
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffCalculator) -> Self {
        self.backoff = backoff;
        self
    }

    /// Perform one delivery attempt.
    ///
    /// Claims the row (atomic `pending|retrying → processing`), runs the
    /// signed HTTP call bounded by the subscription's timeout, and records
    /// the outcome. Every path out of here leaves the row in a definite
    /// state; a timed-out or cancelled request becomes `retrying` or
    /// `failed`, never a stuck `processing`.
    pub async fn deliver(&self, delivery_id: Uuid) -> Result<AttemptOutcome, WebhookError> {
        let Some(delivery) = self.store.claim_delivery(delivery_id).await? else {
            tracing::debug!(
                target: "webhook_delivery",
                delivery_id = %delivery_id,
                "Delivery not claimable, skipping"
            );
            return Ok(AttemptOutcome::Skipped);
        };

        let subscription = match self.store.find_subscription(delivery.subscription_id).await? {
            Some(sub) if sub.active => sub,
            Some(_) => {
                return self
                    .fail_without_attempt(&delivery, "Subscription is inactive")
                    .await;
            }
            None => {
                return self
                    .fail_without_attempt(&delivery, "Subscription not found")
                    .await;
            }
        };

        // Configuration errors: the delivery is not attempted and never
        // retried; the row carries the reason for operators.
        if let Err(e) = validation::validate_webhook_url(
            &subscription.url,
            self.allow_http,
            self.allow_internal_hosts,
        ) {
            return self
                .fail_without_attempt(&delivery, &format!("Invalid delivery URL: {e}"))
                .await;
        }

        let secret = match &subscription.secret_encrypted {
            Some(encrypted) => match crypto::decrypt_secret(encrypted, &self.encryption_key) {
                Ok(secret) => secret,
                Err(e) => {
                    return self
                        .fail_without_attempt(
                            &delivery,
                            &format!("Failed to decrypt subscription secret: {e}"),
                        )
                        .await;
                }
            },
            None => {
                return self
                    .fail_without_attempt(&delivery, "Subscription has no signing secret")
                    .await;
            }
        };

        // The serialized payload bytes are the exact message that is both
        // signed and sent.
        let payload_bytes = serde_json::to_vec(&delivery.payload)?;
        let signature = crypto::sign_payload(&secret, &payload_bytes);

        self.execute_attempt(&delivery, &subscription, payload_bytes, &signature)
            .await
    }

    /// Run the HTTP call and classify the outcome.
    async fn execute_attempt(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        payload_bytes: Vec<u8>,
        signature: &str,
    ) -> Result<AttemptOutcome, WebhookError> {
        let mut request = self
            .http_client
            .post(&subscription.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, delivery.event_type.as_str())
            .header(DELIVERY_ID_HEADER, delivery.id.to_string())
            .timeout(std::time::Duration::from_millis(subscription.timeout_ms));

        for (name, value) in validation::sanitize_headers(&subscription.headers) {
            request = request.header(name.as_str(), value.as_str());
        }

        let attempts = delivery.attempts + 1;
        let start = Instant::now();
        let result = request.body(payload_bytes).send().await;
        let response_time_ms = start.elapsed().as_millis() as i32;

        match result {
            Ok(response) => {
                let status = response.status();
                let body: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_RESPONSE_BODY_CHARS)
                    .collect();

                if status.is_success() {
                    self.handle_success(delivery, subscription, attempts, status.as_u16() as i16, body, response_time_ms)
                        .await
                } else if status.is_server_error() {
                    // 5xx: the subscriber may recover; retry if budget remains.
                    self.handle_retriable_failure(
                        delivery,
                        subscription,
                        attempts,
                        format!("HTTP {}", status.as_u16()),
                        Some(status.as_u16() as i16),
                        Some(body),
                        Some(response_time_ms),
                    )
                    .await
                } else {
                    // 4xx (and other non-5xx): the subscriber will not accept
                    // this payload on resend; terminal.
                    self.handle_permanent_failure(
                        delivery,
                        subscription,
                        attempts,
                        format!("HTTP {}", status.as_u16()),
                        Some(status.as_u16() as i16),
                        Some(body),
                        Some(response_time_ms),
                    )
                    .await
                }
            }
            Err(e) => {
                let error_msg = if e.is_timeout() {
                    format!("Request timeout ({}ms)", subscription.timeout_ms)
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };

                self.handle_retriable_failure(
                    delivery,
                    subscription,
                    attempts,
                    error_msg,
                    None,
                    None,
                    Some(response_time_ms),
                )
                .await
            }
        }
    }

    async fn handle_success(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        attempts: i32,
        response_status: i16,
        response_body: String,
        response_time_ms: i32,
    ) -> Result<AttemptOutcome, WebhookError> {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            response_status,
            response_time_ms,
            attempts,
            "Webhook delivery succeeded"
        );

        self.store
            .record_delivered(
                delivery.id,
                attempts,
                response_status,
                Some(response_body),
                response_time_ms,
            )
            .await?;

        Ok(AttemptOutcome::Delivered)
    }

    /// A transient failure: schedule a retry if policy and budget allow,
    /// otherwise fail terminally.
    #[allow(clippy::too_many_arguments)]
    async fn handle_retriable_failure(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        attempts: i32,
        last_error: String,
        response_status: Option<i16>,
        response_body: Option<String>,
        response_time_ms: Option<i32>,
    ) -> Result<AttemptOutcome, WebhookError> {
        let budget_remains = attempts < delivery.max_attempts;
        let will_retry = subscription.retry_policy != RetryPolicy::None && budget_remains;

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            error = %last_error,
            attempts,
            max_attempts = delivery.max_attempts,
            will_retry,
            "Webhook delivery failed"
        );

        if will_retry {
            // attempts is 1-based here; the backoff wants the 0-based index
            // of the attempt that just failed.
            let next_retry_at = self.backoff.next_retry_at((attempts - 1).max(0) as u32);
            self.store
                .record_retrying(
                    delivery.id,
                    attempts,
                    last_error,
                    response_status,
                    response_body,
                    response_time_ms,
                    next_retry_at,
                )
                .await?;
            Ok(AttemptOutcome::Retrying)
        } else {
            self.store
                .record_failed(
                    delivery.id,
                    attempts,
                    last_error,
                    response_status,
                    response_body,
                    response_time_ms,
                )
                .await?;
            Ok(AttemptOutcome::Failed)
        }
    }

    /// A permanent rejection (4xx class): terminal regardless of budget.
    #[allow(clippy::too_many_arguments)]
    async fn handle_permanent_failure(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        attempts: i32,
        last_error: String,
        response_status: Option<i16>,
        response_body: Option<String>,
        response_time_ms: Option<i32>,
    ) -> Result<AttemptOutcome, WebhookError> {
        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            error = %last_error,
            attempts,
            "Webhook delivery rejected by subscriber, not retrying"
        );

        self.store
            .record_failed(
                delivery.id,
                attempts,
                last_error,
                response_status,
                response_body,
                response_time_ms,
            )
            .await?;

        Ok(AttemptOutcome::Failed)
    }

    /// Configuration error: fail the delivery without an HTTP attempt.
    ///
    /// `attempts` is left unchanged since no attempt was made.
    async fn fail_without_attempt(
        &self,
        delivery: &WebhookDelivery,
        reason: &str,
    ) -> Result<AttemptOutcome, WebhookError> {
        tracing::error!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            event_id = %delivery.event_id,
            error = %reason,
            "Delivery failed without attempt"
        );

        self.store
            .record_failed(
                delivery.id,
                delivery.attempts,
                reason.to_string(),
                None,
                None,
                None,
            )
            .await?;

        Ok(AttemptOutcome::Failed)
    }
}
