//! HTTP client for webhook dispatch with configurable timeouts.
//!
//! Sends job payloads as JSON POST requests and reports the endpoint's
//! status code back to the dispatcher, which decides whether the attempt
//! counts as delivered or failed.

use std::time::Duration;

use hookwire_core::JobId;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the webhook dispatch client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout covering the whole request, connect included.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "Hookwire-Webhook-Delivery/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// HTTP client shared by all in-flight deliveries.
///
/// Wraps a pooled `reqwest::Client` so concurrent dispatches of a batch
/// reuse connections. Cloning is cheap and shares the pool.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// One delivery attempt about to go out.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Job being delivered.
    pub job_id: JobId,
    /// Destination URL registered for the job's event type.
    pub target_url: String,
    /// JSON body to post.
    pub payload: serde_json::Value,
    /// Attempt number for this delivery, 1-based.
    pub attempt_number: u32,
}

/// Outcome of a delivery attempt that reached the endpoint.
///
/// Any status code counts as "reached"; the dispatcher treats non-2xx as a
/// failed attempt. Attempts that never produce a status (connect errors,
/// timeouts) surface as `DeliveryError` instead.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code returned by the endpoint.
    pub status: u16,
    /// Total duration of the request.
    pub duration: Duration,
}

impl DeliveryResponse {
    /// True when the endpoint acknowledged the delivery with a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl DeliveryClient {
    /// Creates a new dispatch client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new dispatch client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Posts a job payload to its registered endpoint.
    ///
    /// The response body is not read; only the status code matters to the
    /// retry decision.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the request exceeds the configured timeout
    /// - `Network` for connection failures and other transport errors
    pub async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "webhook_dispatch",
            job_id = %request.job_id,
            url = %request.target_url,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!("dispatching webhook");

            let response = match self
                .client
                .post(&request.target_url)
                .json(&request.payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let status = response.status().as_u16();

            if response.status().is_success() {
                tracing::debug!(
                    status,
                    duration_ms = duration.as_millis(),
                    "endpoint acknowledged delivery"
                );
            } else {
                tracing::warn!(
                    status,
                    duration_ms = duration.as_millis(),
                    "endpoint rejected delivery"
                );
            }

            Ok(DeliveryResponse { status, duration })
        }
        .instrument(span)
        .await
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}
