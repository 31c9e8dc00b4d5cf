//! Delivery subsystem configuration.

use std::env;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::WebhookError;

/// Default number of due deliveries pulled per drain cycle.
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 50;

/// Default number of deliveries attempted concurrently within a batch.
pub const DEFAULT_DRAIN_CONCURRENCY: usize = 8;

const DEFAULT_USER_AGENT: &str = "vocalis-webhooks/1.0";

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct WebhooksConfig {
    /// 32-byte key for decrypting subscription secrets at rest.
    pub encryption_key: Vec<u8>,
    /// Allow plain-HTTP delivery URLs (dev/test only).
    pub allow_http: bool,
    /// Allow delivery to private/internal addresses (dev/test only;
    /// disables SSRF protection).
    pub allow_internal_hosts: bool,
    /// Due deliveries pulled per drain cycle.
    pub drain_batch_size: usize,
    /// Deliveries attempted concurrently within a drain batch.
    pub drain_concurrency: usize,
    /// User-Agent header sent with deliveries.
    pub user_agent: String,
}

impl WebhooksConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WEBHOOK_ENCRYPTION_KEY`: base64-encoded 32-byte key
    ///
    /// Optional:
    /// - `WEBHOOK_ALLOW_HTTP`: "true" to allow plain-HTTP URLs (default false)
    /// - `WEBHOOK_ALLOW_INTERNAL_HOSTS`: "true" to disable SSRF protection
    ///   (default false; dev/test only)
    /// - `WEBHOOK_DRAIN_BATCH_SIZE`: batch size per drain cycle (default 50)
    /// - `WEBHOOK_DRAIN_CONCURRENCY`: parallel attempts per batch (default 8)
    /// - `WEBHOOK_USER_AGENT`: User-Agent for outgoing requests
    pub fn from_env() -> Result<Self, WebhookError> {
        let key_b64 = env::var("WEBHOOK_ENCRYPTION_KEY").map_err(|_| WebhookError::ConfigMissing {
            var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
        })?;

        let encryption_key = decode_key(&key_b64)?;

        let allow_http = env_flag("WEBHOOK_ALLOW_HTTP");
        let allow_internal_hosts = env_flag("WEBHOOK_ALLOW_INTERNAL_HOSTS");

        let drain_batch_size = parse_env_usize("WEBHOOK_DRAIN_BATCH_SIZE", DEFAULT_DRAIN_BATCH_SIZE)?;
        let drain_concurrency =
            parse_env_usize("WEBHOOK_DRAIN_CONCURRENCY", DEFAULT_DRAIN_CONCURRENCY)?;

        let user_agent =
            env::var("WEBHOOK_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());

        Ok(Self {
            encryption_key,
            allow_http,
            allow_internal_hosts,
            drain_batch_size,
            drain_concurrency,
            user_agent,
        })
    }

    /// Create a configuration with the given key and defaults for the rest.
    pub fn new(encryption_key: Vec<u8>) -> Result<Self, WebhookError> {
        if encryption_key.len() != 32 {
            return Err(WebhookError::ConfigInvalid {
                var: "encryption_key".to_string(),
                reason: format!("expected 32 bytes, got {}", encryption_key.len()),
            });
        }

        Ok(Self {
            encryption_key,
            allow_http: false,
            allow_internal_hosts: false,
            drain_batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            drain_concurrency: DEFAULT_DRAIN_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    #[must_use]
    pub fn with_allow_internal_hosts(mut self, allow: bool) -> Self {
        self.allow_internal_hosts = allow;
        self
    }

    #[must_use]
    pub fn with_drain_batch_size(mut self, size: usize) -> Self {
        self.drain_batch_size = size;
        self
    }

    #[must_use]
    pub fn with_drain_concurrency(mut self, concurrency: usize) -> Self {
        self.drain_concurrency = concurrency;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

fn env_flag(var: &str) -> bool {
    env::var(var)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

fn decode_key(key_b64: &str) -> Result<Vec<u8>, WebhookError> {
    let key = BASE64
        .decode(key_b64)
        .map_err(|e| WebhookError::ConfigInvalid {
            var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
            reason: format!("not valid base64: {e}"),
        })?;

    if key.len() != 32 {
        return Err(WebhookError::ConfigInvalid {
            var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
            reason: format!("expected 32 bytes, got {}", key.len()),
        });
    }

    Ok(key)
}

fn parse_env_usize(var: &str, default: usize) -> Result<usize, WebhookError> {
    match env::var(var) {
        Ok(value) => value
            .parse::<usize>()
            .map_err(|_| WebhookError::ConfigInvalid {
                var: var.to_string(),
                reason: format!("not a number: {value}"),
            }),
        Err(_) => Ok(default),
    }
}
