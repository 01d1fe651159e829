//! The event shapes published to the debug event bus. Modelled on a
//! traffic-log event shape, recast from request/response log lines onto the
//! stage-transition/snapshot model this core actually needs; the fan-out
//! mechanics (`EventHub`/`EventSink`) stay the same either way.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use relaymux_common::{Fingerprint, PipelineHandle, RequestId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Stage(StageEvent),
    Upstream(UpstreamCallEvent),
    Operational(OperationalEvent),
}

/// One stage boundary crossing. Emitted
/// before and after each of the four stages; never carries a Secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub at: SystemTime,
    pub request_id: RequestId,
    pub pipeline_id: PipelineHandle,
    pub stage: &'static str,
    pub phase: StagePhase,
    /// A short digest of the payload, never the payload itself.
    pub payload_digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagePhase {
    Before,
    After,
}

/// One provider HTTP exchange: one event before dispatch, one after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamCallEvent {
    pub at: SystemTime,
    pub request_id: RequestId,
    pub provider_id: String,
    pub model_id: String,
    pub is_stream: bool,
    pub phase: StagePhase,
    pub status: Option<u16>,
    pub elapsed_ms: Option<u64>,
}

/// Health & Failover Tracker transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    FingerprintBlacklisted {
        fingerprint: Fingerprint,
        touched: Vec<PipelineHandle>,
    },
    FingerprintRecovered {
        fingerprint: Fingerprint,
    },
    PipelineDegraded {
        pipeline_id: PipelineHandle,
    },
}
