// crates/deskrelay-relay/src/hops.rs
// ============================================================================
// Module: Relay Hops
// Description: HTTP clients for the gateway and agent hops.
// Purpose: Forward calls with bearer credentials under hard timeouts.
// Dependencies: reqwest, tokio, url, deskrelay-core
// ============================================================================

//! ## Overview
//! Each hop wraps the whole request, including reading the response body, in
//! `tokio::time::timeout`. On expiry the request future is dropped, which
//! closes the connection, and the hop reports `timed_out`. Transport errors
//! are `unavailable`. No hop is retried.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use deskrelay_core::ErrorKind;
use deskrelay_core::ExecutionEnvelope;
use deskrelay_core::FailureReport;
use deskrelay_core::protocol::AGENT_EXECUTE_PATH;
use deskrelay_core::protocol::AgentExecuteRequest;
use deskrelay_core::protocol::GATEWAY_INVOKE_PATH;
use deskrelay_core::protocol::InvokeRequest;
use deskrelay_core::protocol::InvokeResponse;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::RelayError;
use crate::relay::RelayFailure;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Endpoint, credential, and timeout for one hop.
#[derive(Debug, Clone)]
pub struct HopSettings {
    /// Base URL of the downstream service.
    pub base_url: String,
    /// Bearer token presented downstream.
    pub token: String,
    /// Hard timeout for the whole exchange.
    pub timeout_ms: u64,
}

// ============================================================================
// SECTION: Hop Client
// ============================================================================

/// JSON-over-HTTP client for one downstream service.
#[derive(Debug, Clone)]
struct Hop {
    /// Component name used in error messages.
    name: &'static str,
    /// Full endpoint URL.
    endpoint: Url,
    /// Bearer token.
    token: String,
    /// Hard timeout.
    timeout: Duration,
    /// Shared HTTP client.
    client: reqwest::Client,
}

impl Hop {
    /// Builds a hop posting to `path` under the configured base URL.
    fn new(name: &'static str, settings: &HopSettings, path: &str) -> Result<Self, RelayError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|err| RelayError::Config(format!("{name} url invalid: {err}")))?;
        let endpoint =
            base.join(path).map_err(|err| RelayError::Config(format!("{name} url invalid: {err}")))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| RelayError::Config(format!("{name} client init failed: {err}")))?;
        Ok(Self {
            name,
            endpoint,
            token: settings.token.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            client,
        })
    }

    /// Posts `body` and returns the status and parsed JSON response.
    async fn post<T: Serialize + Sync>(&self, body: &T) -> Result<(u16, Value), RelayFailure> {
        let exchange = async {
            let response = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(&self.token)
                .json(body)
                .send()
                .await
                .map_err(|err| self.unavailable(&err))?;
            let status = response.status().as_u16();
            let value = response.json::<Value>().await.map_err(|err| self.unavailable(&err))?;
            Ok((status, value))
        };
        tokio::time::timeout(self.timeout, exchange).await.unwrap_or_else(|_| {
            Err(RelayFailure::new(
                ErrorKind::TimedOut,
                format!("{} call timed out after {} ms", self.name, self.timeout.as_millis()),
            ))
        })
    }

    /// Maps a transport error to `unavailable`.
    fn unavailable(&self, err: &reqwest::Error) -> RelayFailure {
        RelayFailure::new(ErrorKind::Unavailable, format!("{} unreachable: {err}", self.name))
    }
}

// ============================================================================
// SECTION: Gateway Hop
// ============================================================================

/// Client for the gateway invoke endpoint.
#[derive(Debug, Clone)]
pub struct GatewayHop {
    /// Underlying hop.
    hop: Hop,
}

impl GatewayHop {
    /// Creates the gateway hop.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the URL or client is invalid.
    pub fn new(settings: &HopSettings) -> Result<Self, RelayError> {
        Ok(Self {
            hop: Hop::new("gateway", settings, GATEWAY_INVOKE_PATH)?,
        })
    }

    /// Sends an invocation and returns the gateway's decision.
    ///
    /// # Errors
    ///
    /// Returns [`RelayFailure`] on timeout, transport failure, or an
    /// unparseable response.
    pub async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, RelayFailure> {
        let (status, body) = self.hop.post(request).await?;
        serde_json::from_value(body).map_err(|err| {
            RelayFailure::new(
                ErrorKind::Unavailable,
                format!("gateway returned an unreadable response (status {status}): {err}"),
            )
        })
    }
}

// ============================================================================
// SECTION: Agent Hop
// ============================================================================

/// Client for the agent execution endpoint.
#[derive(Debug, Clone)]
pub struct AgentHop {
    /// Underlying hop.
    hop: Hop,
}

impl AgentHop {
    /// Creates the agent hop.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the URL or client is invalid.
    pub fn new(settings: &HopSettings) -> Result<Self, RelayError> {
        Ok(Self {
            hop: Hop::new("agent", settings, AGENT_EXECUTE_PATH)?,
        })
    }

    /// Delivers an envelope unmodified and returns the raw primitive result.
    ///
    /// # Errors
    ///
    /// Returns [`RelayFailure`] carrying the agent's error kind, or a
    /// timeout or transport failure.
    pub async fn deliver(&self, envelope: &ExecutionEnvelope) -> Result<Value, RelayFailure> {
        let request = AgentExecuteRequest {
            envelope: envelope.clone(),
        };
        let (status, body) = self.hop.post(&request).await?;
        if status == 200 {
            return Ok(body);
        }
        match serde_json::from_value::<FailureReport>(body) {
            Ok(report) => Err(RelayFailure::new(report.error_kind, report.error)),
            Err(_) => Err(RelayFailure::new(
                ErrorKind::Unavailable,
                format!("agent returned status {status} without a failure report"),
            )),
        }
    }
}
