//! Common test utilities for vocalis-webhooks integration tests.
//!
//! Provides wiremock responders, fixtures, and a wired-up harness running
//! the full enqueue → drain → deliver pipeline against the in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use vocalis_webhooks::{
    crypto, BackoffCalculator, DeliveryWorker, InMemoryStore, QueueDrainer, RetryPolicy,
    WebhookEventQueue, WebhookSubscription, WebhooksConfig,
};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Standard test organization IDs.
pub const ORG_A: Uuid = Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const ORG_B: Uuid = Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

/// Standard test secrets.
pub const SECRET_1: &str = "whsec_test_secret_key_12345";
pub const SECRET_2: &str = "whsec_another_secret_67890";

/// Key used to encrypt subscription secrets in tests.
pub fn test_encryption_key() -> Vec<u8> {
    vec![0x42u8; 32]
}

/// Encrypt a plaintext secret the way the subscription CRUD layer would.
pub fn encrypt_test_secret(secret: &str) -> String {
    crypto::encrypt_secret(secret, &test_encryption_key()).expect("encryption failed")
}

/// Build a subscription pointing at a test endpoint.
pub fn subscription(org: Uuid, url: &str, events: &[&str]) -> WebhookSubscription {
    WebhookSubscription {
        id: Uuid::new_v4(),
        organization_id: org,
        url: url.to_string(),
        secret_encrypted: Some(encrypt_test_secret(SECRET_1)),
        events: events.iter().map(|s| (*s).to_string()).collect(),
        active: true,
        headers: HashMap::new(),
        timeout_ms: 5_000,
        retry_policy: RetryPolicy::Exponential,
        max_retries: 5,
    }
}

// ---------------------------------------------------------------------------
// Harness - the full pipeline on an in-memory store
// ---------------------------------------------------------------------------

/// Queue, worker, and drainer wired to one in-memory store.
///
/// The backoff is zero-delay so retrying rows are immediately due again and
/// a test can drive the retry schedule by calling `drain` repeatedly.
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub queue: WebhookEventQueue,
    pub drainer: QueueDrainer,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_concurrency(4)
    }

    pub fn with_concurrency(concurrency: usize) -> Self {
        let store = Arc::new(InMemoryStore::new());
        // Wiremock endpoints are plain HTTP on loopback, so the harness
        // runs with both dev relaxations on.
        let config = WebhooksConfig::new(test_encryption_key())
            .expect("config")
            .with_allow_http(true)
            .with_allow_internal_hosts(true)
            .with_drain_concurrency(concurrency);

        let store_dyn: Arc<dyn vocalis_webhooks::DeliveryStore> = store.clone();
        let queue = WebhookEventQueue::new(store_dyn.clone());
        let worker = DeliveryWorker::new(store_dyn.clone(), &config)
            .expect("worker")
            .with_backoff(BackoffCalculator::new(0, 0));
        let drainer = QueueDrainer::new(store_dyn, worker, config.drain_batch_size, concurrency);

        Self {
            store,
            queue,
            drainer,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("body should be JSON")
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    /// Create a new capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            timestamp: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// CountingResponder - counts requests
// ---------------------------------------------------------------------------

/// A wiremock responder that counts incoming requests.
#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    /// Create a new counting responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a counting responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
        }
    }

    /// Get the current request count.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before
/// succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    /// Create a responder that fails `n` times with 500, then returns 200.
    pub fn fail_times(n: u32) -> Self {
        Self::fail_with_status(n, 500)
    }

    /// Create a responder that fails with a custom status code.
    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
        }
    }

    /// Get the current attempt count.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

/// A wiremock responder that adds a delay before responding.
#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
}

impl DelayedResponder {
    /// Create a responder that delays for `ms` milliseconds.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            response_code: 200,
        }
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(self.response_code)
            .set_delay(std::time::Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Signature verification helper
// ---------------------------------------------------------------------------

/// Verify the signature header of a captured request against a secret.
pub fn verify_captured_signature(request: &CapturedRequest, secret: &str) -> bool {
    let Some(header) = request.header("x-webhook-signature") else {
        return false;
    };
    crypto::verify_signature(secret, &request.body, header, crypto::SIGNATURE_TOLERANCE_SECS)
}
