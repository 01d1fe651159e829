//! The Pipeline Manager: resolves a logical route to a
//! pipeline, drives the retry loop across candidates, and enforces the
//! `StreamCommitted` invariant.
//!
//! There is no single handler this mirrors one-to-one — a proxy handler that
//! makes one upstream call per request and leaves failover to the credential
//! pool's blacklist state is the closest analogue. This builds the retry
//! loop directly on top of the primitives `Tracker::next_candidate` and
//! `PipelineError::is_retriable` were shaped for, in the same plain-async-fn
//! style those handlers use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relaymux_common::{PipelineError, PipelineHandle, RequestId};
use relaymux_transform::switch::{ClientDialect, DialectRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::coalescer::spawn_coalescer;
use crate::pipeline::{Pipeline, PipelineResponse, ProviderOutcome};
use crate::tracker::Tracker;
use crate::vault::{CredentialVault, Secret};

/// A logical route: the ordered pool of pipelines eligible to serve one
/// (dialect, alias) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalRoute {
    pub candidates: Vec<PipelineHandle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub retry_budget: usize,
    pub text_window: Duration,
    /// Process-wide default request timeout, used whenever a pipeline
    /// carries no override of its own.
    #[serde(default = "default_timeout")]
    pub default_timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            text_window: Duration::from_millis(1000),
            default_timeout: default_timeout(),
        }
    }
}

pub struct PipelineManager {
    config: ManagerConfig,
    routes: HashMap<String, LogicalRoute>,
    pipelines: HashMap<PipelineHandle, Arc<Pipeline>>,
    vault: CredentialVault,
    tracker: Tracker,
}

impl PipelineManager {
    pub fn new(
        config: ManagerConfig,
        routes: HashMap<String, LogicalRoute>,
        pipelines: HashMap<PipelineHandle, Arc<Pipeline>>,
        vault: CredentialVault,
        tracker: Tracker,
    ) -> Self {
        Self {
            config,
            routes,
            pipelines,
            vault,
            tracker,
        }
    }

    pub fn route(&self, alias: &str) -> Option<&LogicalRoute> {
        self.routes.get(alias)
    }

    /// Runs the retry loop for one request. `alias`
    /// names a `LogicalRoute`; the Anthropic dialect never retries past the
    /// first attempt (its tool-use protocol has no safe replay point once a
    /// partial body has left the manager), and once a stream has emitted its
    /// first byte to the caller no further retry may occur regardless of
    /// dialect (`StreamCommitted`).
    pub async fn dispatch(
        &self,
        alias: &str,
        request: DialectRequest,
        request_id: RequestId,
    ) -> Result<PipelineResponse, PipelineError> {
        let route = self
            .routes
            .get(alias)
            .ok_or_else(|| PipelineError::route_not_found(alias))?;

        let no_retry = matches!(request.dialect(), ClientDialect::AnthropicMessages);
        let attempts = if no_retry { 1 } else { self.config.retry_budget };

        let mut excluded = Vec::new();
        let mut last_err: Option<PipelineError> = None;
        let mut rate_limited_attempts: u32 = 0;

        for attempt in 0..attempts {
            let Some(handle) = self
                .tracker
                .next_candidate(&route.candidates, &excluded, attempt)
                .await
            else {
                break;
            };

            let Some(pipeline) = self.pipelines.get(&handle) else {
                excluded.push(handle);
                continue;
            };

            let secret = match self.vault.resolve(&handle.provider_id, &handle.key_id) {
                Ok(secret) => secret,
                Err(err) => {
                    last_err = Some(err);
                    excluded.push(handle);
                    continue;
                }
            };
            let fingerprint = self.vault.fingerprint(&handle.provider_id, &handle.key_id).ok();

            match self.run_one(pipeline, &request, secret, request_id).await {
                Ok(outcome) => {
                    self.tracker.record_success(&handle, fingerprint.as_ref()).await;
                    return self.finish_response(pipeline, &request, outcome);
                }
                Err(err) if err.is_retriable() => {
                    if matches!(err, PipelineError::UpstreamRateLimited { .. }) {
                        self.tracker
                            .record_rate_limited(&handle, fingerprint.as_ref())
                            .await;
                        rate_limited_attempts += 1;
                    } else {
                        self.tracker.record_error(&handle).await;
                    }
                    excluded.push(handle);
                    last_err = Some(err);
                    if no_retry {
                        break;
                    }
                }
                Err(err) => {
                    self.tracker.record_error(&handle).await;
                    return Err(err);
                }
            }
        }

        // §4.8 step 5: the retry budget ran out (or no eligible candidate
        // remained) while at least one attempt in this dispatch saw a 429.
        // Aggregate that as `RateLimitExhausted` rather than surfacing the
        // last bare `UpstreamRateLimited`, which would drop the "budget
        // exhausted across N attempts" context the caller needs.
        if rate_limited_attempts > 0 {
            return Err(PipelineError::RateLimitExhausted {
                category: alias.to_string(),
                attempts: rate_limited_attempts,
                excluded,
            });
        }

        Err(last_err.unwrap_or_else(|| PipelineError::no_eligible_pipeline(alias)))
    }

    async fn run_one(
        &self,
        pipeline: &Pipeline,
        request: &DialectRequest,
        secret: &Secret,
        request_id: RequestId,
    ) -> Result<ProviderOutcome, PipelineError> {
        pipeline
            .process(request.clone(), secret, request_id, self.config.default_timeout)
            .await
    }

    fn finish_response(
        &self,
        pipeline: &Pipeline,
        request: &DialectRequest,
        outcome: ProviderOutcome,
    ) -> Result<PipelineResponse, PipelineError> {
        match outcome {
            ProviderOutcome::Buffered(response) => {
                if pipeline.blueprint().process_mode
                    == crate::pipeline::ProcessMode::Passthrough
                {
                    return Ok(PipelineResponse::PassthroughBuffered(serde_json::to_value(
                        &response,
                    )
                    .map_err(|e| PipelineError::internal(e.to_string()))?));
                }
                let dialect_response = pipeline.switch_outbound(response)?;
                Ok(PipelineResponse::Buffered(dialect_response))
            }
            ProviderOutcome::Stream(upstream) => {
                let dialect = pipeline.blueprint().switch_dialect;
                let model = request.model().to_string();
                let rx = spawn_coalescer(dialect, model, self.config.text_window, upstream);
                Ok(PipelineResponse::Stream(rx))
            }
        }
    }
}

/// `StreamCommitted`: once this has been set after the first streamed byte
/// reaches the client, the Manager must not be asked to retry that request.
/// Callers (the HTTP front door) hold this flag, not the Manager itself,
/// since only the transport layer knows whether a byte actually reached the
/// socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCommitted(bool);

impl StreamCommitted {
    pub fn commit(&mut self) {
        self.0 = true;
    }

    pub fn is_committed(self) -> bool {
        self.0
    }
}

pub type ByteReceiver = mpsc::Receiver<bytes::Bytes>;
