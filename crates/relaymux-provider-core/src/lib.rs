//! The core pipeline runtime: the Credential Vault, the
//! Health & Failover Tracker, the Pipeline Instance and its `ProviderAdapter`
//! seam, the Streaming Coalescer, and the Pipeline Manager that ties them
//! together.
//!
//! This crate intentionally does not depend on axum or any concrete HTTP
//! client — `ProviderAdapter` implementations live in
//! `relaymux-provider-impl`, and the HTTP front door lives in the binary
//! crate. The config-ingestion boundary that builds a `PipelineManager` from
//! a resolved configuration shape lives in `crate::config`.

pub mod coalescer;
pub mod config;
pub mod events;
pub mod headers;
pub mod manager;
pub mod pipeline;
pub mod token_store;
pub mod tracker;
pub mod vault;

pub use events::{
    Event, EventHub, EventSink, OperationalEvent, StageEvent, StagePhase, TerminalEventSink,
    UpstreamCallEvent,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use manager::{ByteReceiver, LogicalRoute, ManagerConfig, PipelineManager, StreamCommitted};
pub use pipeline::{
    AuthVariant, Pipeline, PipelineBlueprint, PipelineResponse, ProcessMode, ProviderAdapter,
    ProviderCallContext, ProviderOutcome, StreamingPolicy,
};
pub use token_store::TokenStore;
pub use tracker::{HealthState, Tracker, TrackerConfig};
pub use vault::{CredentialVault, CredentialVaultBuilder, Secret};
