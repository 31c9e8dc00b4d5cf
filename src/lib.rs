//! Resilient outbound delivery for the Vocalis platform.
//!
//! Two independent protections for everything that leaves the system:
//!
//! - Per-vendor [`CircuitBreaker`]s wrap calls to volatile third-party
//!   services (telephony, transcription, synthesis) with timeouts, failure
//!   counting, and fail-fast behavior.
//! - The webhook delivery engine durably notifies subscriber endpoints of
//!   domain events: enqueue fans an event out into per-subscription
//!   delivery rows, a drainer feeds due rows to the worker, and the worker
//!   performs signed HTTP calls with at-least-once retry semantics.

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod validation;

pub use backoff::BackoffCalculator;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitError, CircuitMetrics,
    CircuitState, VendorHealth,
};
pub use config::WebhooksConfig;
pub use error::WebhookError;
pub use models::{
    DeliveryStatus, RetryPolicy, WebhookDelivery, WebhookEventType, WebhookPayload,
    WebhookSubscription,
};
pub use services::delivery_worker::{AttemptOutcome, DeliveryWorker};
pub use services::drainer::{DrainStats, QueueDrainer};
pub use services::event_queue::WebhookEventQueue;
pub use store::memory::InMemoryStore;
pub use store::postgres::PostgresStore;
pub use store::DeliveryStore;
