//! Domain types for webhook subscriptions, deliveries, and event payloads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain events that subscribers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    CallStarted,
    CallCompleted,
    CallFailed,
    CallRecordingAvailable,
    CallTranscriptCompleted,
    CallDispositionSet,
}

impl WebhookEventType {
    /// Wire string for this event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallStarted => "call.started",
            Self::CallCompleted => "call.completed",
            Self::CallFailed => "call.failed",
            Self::CallRecordingAvailable => "call.recording.available",
            Self::CallTranscriptCompleted => "call.transcript.completed",
            Self::CallDispositionSet => "call.disposition.set",
        }
    }

    /// Parse from the wire string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call.started" => Some(Self::CallStarted),
            "call.completed" => Some(Self::CallCompleted),
            "call.failed" => Some(Self::CallFailed),
            "call.recording.available" => Some(Self::CallRecordingAvailable),
            "call.transcript.completed" => Some(Self::CallTranscriptCompleted),
            "call.disposition.set" => Some(Self::CallDispositionSet),
            _ => None,
        }
    }

    /// All known event types.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[
            Self::CallStarted,
            Self::CallCompleted,
            Self::CallFailed,
            Self::CallRecordingAvailable,
            Self::CallTranscriptCompleted,
            Self::CallDispositionSet,
        ]
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry behavior configured on a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Failed deliveries are never retried.
    None,
    /// Exponential backoff with jitter between attempts.
    #[default]
    Exponential,
}

impl RetryPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Exponential => "exponential",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Delivery lifecycle states.
///
/// `Pending → Processing → (Delivered | Retrying | Failed)`, with
/// `Retrying → Processing` on the next attempt. `Delivered` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Processing,
    Delivered,
    Retrying,
    Failed,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "delivered" => Some(Self::Delivered),
            "retrying" => Some(Self::Retrying),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// A subscriber's registered endpoint.
///
/// Subscriptions are created and managed elsewhere in the platform; this
/// subsystem only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub url: String,
    /// AES-256-GCM encrypted signing secret, base64-encoded.
    pub secret_encrypted: Option<String>,
    /// Event type strings this subscription wants.
    pub events: Vec<String>,
    pub active: bool,
    /// Extra static headers sent with every delivery.
    pub headers: HashMap<String, String>,
    /// Per-request timeout for deliveries to this endpoint.
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
    /// Retries after the initial attempt.
    pub max_retries: i32,
}

impl WebhookSubscription {
    /// Whether this subscription wants the given event type.
    #[must_use]
    pub fn wants_event(&self, event_type: WebhookEventType) -> bool {
        self.events.iter().any(|e| e == event_type.as_str())
    }
}

/// One attempt-tracked unit of work: "this event must reach this subscriber."
///
/// Rows are created by the enqueue path and only ever transition forward;
/// they are never deleted by this subsystem (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    /// External correlation id; subscribers dedupe on this.
    pub event_id: String,
    /// Immutable payload snapshot taken at enqueue time.
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub response_status: Option<i16>,
    /// Truncated response body from the most recent attempt.
    pub response_body: Option<String>,
    pub response_time_ms: Option<i32>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a delivery row.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub subscription_id: Uuid,
    pub event_type: String,
    pub event_id: String,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
}

/// JSON body delivered to subscriber endpoints.
///
/// The serialized bytes of this struct are both the POST body and the
/// message covered by the signature header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub organization_id: Uuid,
    pub data: serde_json::Value,
}
