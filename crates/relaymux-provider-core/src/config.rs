//! The config-ingestion boundary: the *resolved* shape
//! the core is handed once at startup, and the builder that turns it into a
//! `PipelineManager`. Loading, merging, and on-disk layout are out of scope
//! here — deployments tend to carry their own layered mergers for that, and
//! none of them is authoritative; this module only defines and consumes the
//! shape they would all eventually produce: a plain resolved struct the
//! engine is constructed from, not the merge logic that built it.

use std::collections::HashMap;
use std::sync::Arc;

use relaymux_common::{PipelineError, PipelineHandle};
use relaymux_transform::compatibility::CompatibilityPatch;
use relaymux_transform::switch::ClientDialect;
use serde::{Deserialize, Serialize};

use crate::events::EventHub;
use crate::manager::{LogicalRoute, ManagerConfig, PipelineManager};
use crate::pipeline::{
    AuthVariant, Pipeline, PipelineBlueprint, ProcessMode, ProviderAdapter, StreamingPolicy,
};
use crate::token_store::TokenStore;
use crate::tracker::{Tracker, TrackerConfig};
use crate::vault::CredentialVault;

/// One resolved credential: the (providerId, keyId) pair the vault indexes
/// by, plus the bearer secret. The secret never appears in any other part of
/// this shape or in any log line derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedCredential {
    pub provider_id: String,
    pub key_id: String,
    pub secret: String,
}

/// One resolved pipeline: everything needed to build a `Pipeline` except the
/// concrete `ProviderAdapter`, which the caller supplies per `provider_kind`
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPipeline {
    pub handle: PipelineHandle,
    pub base_url: String,
    pub switch_dialect: ClientDialect,
    #[serde(default)]
    pub compatibility: Vec<CompatibilityPatch>,
    pub provider_kind: String,
    #[serde(default)]
    pub provider_protocols: Vec<String>,
    pub streaming_policy: StreamingPolicy,
    pub process_mode: ProcessMode,
    /// Per-pipeline timeout override in milliseconds;
    /// absent means the process-wide `ManagerConfig::default_timeout` applies.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Which of the two §4.2 auth variants this pipeline's Provider stage
    /// uses. Defaults to `ApiKey`; `OAuth` requires a `TokenStore` to be
    /// wired into `build()`, or every call on this pipeline fails.
    #[serde(default)]
    pub auth_variant: AuthVariant,
}

/// The full resolved configuration: `pipelines`, `routePools` (aliased to
/// `LogicalRoute` candidate lists), and `keyVault`. `route_meta` is omitted —
/// this core has no per-route metadata beyond the candidate list itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    #[serde(default)]
    pub pipelines: Vec<ResolvedPipeline>,
    #[serde(default)]
    pub route_pools: HashMap<String, Vec<PipelineHandle>>,
    #[serde(default)]
    pub key_vault: Vec<ResolvedCredential>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            pipelines: Vec::new(),
            route_pools: HashMap::new(),
            key_vault: Vec::new(),
            tracker: TrackerConfig::default(),
            manager: ManagerConfig::default(),
        }
    }
}

/// Looks up the concrete `ProviderAdapter` a pipeline's declared
/// `provider_kind` should run on. Implementations register themselves here;
/// an unknown `provider_kind` is a build-time wiring bug, not a runtime
/// dispatch miss — a closed, exhaustively-matched factory in place of a
/// dynamic string-keyed registry.
pub trait ProviderAdapterFactory: Send + Sync {
    fn build(&self, provider_kind: &str) -> Option<Arc<dyn ProviderAdapter>>;
}

/// Environment variables honoured by the core: overrides
/// for the text-coalescing window, the retry budget, and the blacklist
/// threshold, applied on top of whatever `ResolvedConfig` already carries. A
/// present-but-unparseable value is ignored rather than treated as fatal —
/// these are operational tuning knobs, not structural configuration.
const ENV_TEXT_WINDOW_MS: &str = "RELAYMUX_TEXT_WINDOW_MS";
const ENV_RETRY_BUDGET: &str = "RELAYMUX_RETRY_BUDGET";
const ENV_BLACKLIST_THRESHOLD: &str = "RELAYMUX_BLACKLIST_THRESHOLD";

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn apply_env_overrides(mut resolved: ResolvedConfig) -> ResolvedConfig {
    if let Some(ms) = env_override::<u64>(ENV_TEXT_WINDOW_MS) {
        resolved.manager.text_window = std::time::Duration::from_millis(ms);
    }
    if let Some(budget) = env_override::<usize>(ENV_RETRY_BUDGET) {
        resolved.manager.retry_budget = budget;
    }
    if let Some(threshold) = env_override::<u32>(ENV_BLACKLIST_THRESHOLD) {
        resolved.tracker.blacklist_threshold = threshold;
    }
    resolved
}

/// Builds a `PipelineManager`, the `CredentialVault` it dispatches through,
/// and the `Tracker` it shares with every pipeline, from one `ResolvedConfig`
/// and a factory resolving each pipeline's `provider_kind` to a concrete
/// adapter. Spawns the Tracker's recovery task. Fails with
/// `PipelineError::Internal` the first time a pipeline names a `provider_kind`
/// the factory doesn't recognize — the caller should treat that as a fatal
/// startup error, not attempt partial bring-up.
pub fn build(
    resolved: ResolvedConfig,
    events: EventHub,
    factory: &dyn ProviderAdapterFactory,
) -> Result<PipelineManager, PipelineError> {
    build_with_token_store(resolved, events, factory, None)
}

/// As `build`, but also wires a `TokenStore` in for any pipeline declaring
/// `AuthVariant::OAuth`. Filesystem/vault-backed implementations of
/// `TokenStore` are a deployment's own concern; this crate ships none.
pub fn build_with_token_store(
    resolved: ResolvedConfig,
    events: EventHub,
    factory: &dyn ProviderAdapterFactory,
    token_store: Option<Arc<dyn TokenStore>>,
) -> Result<PipelineManager, PipelineError> {
    let resolved = apply_env_overrides(resolved);

    let mut vault_builder = CredentialVault::builder();
    for cred in resolved.key_vault {
        vault_builder.insert(cred.provider_id, cred.key_id, cred.secret);
    }
    let vault = vault_builder.build();

    let tracker = Tracker::new(resolved.tracker, events.clone());
    tracker.spawn_recovery_task();

    let mut pipelines = HashMap::new();
    for p in resolved.pipelines {
        if !vault.contains(&p.handle.provider_id, &p.handle.key_id) {
            return Err(PipelineError::CredentialMissing {
                provider_id: p.handle.provider_id.clone(),
                key_id: p.handle.key_id.clone(),
            });
        }
        let adapter = factory.build(&p.provider_kind).ok_or_else(|| {
            PipelineError::internal(format!(
                "pipeline {} names unknown provider_kind {:?}",
                p.handle, p.provider_kind
            ))
        })?;
        let blueprint = PipelineBlueprint {
            switch_dialect: p.switch_dialect,
            compatibility: p.compatibility,
            provider_kind: p.provider_kind,
            provider_protocols: p.provider_protocols,
            streaming_policy: p.streaming_policy,
            process_mode: p.process_mode,
            base_url: p.base_url,
            timeout: p.timeout_ms.map(std::time::Duration::from_millis),
            auth_variant: p.auth_variant,
        };
        let pipeline = Pipeline::new_with_token_store(
            p.handle.clone(),
            blueprint,
            adapter,
            events.clone(),
            token_store.clone(),
        );
        pipelines.insert(p.handle, Arc::new(pipeline));
    }

    for (alias, candidates) in &resolved.route_pools {
        for handle in candidates {
            if !pipelines.contains_key(handle) {
                return Err(PipelineError::internal(format!(
                    "route {alias:?} names unknown pipeline {handle}"
                )));
            }
        }
    }

    let routes = resolved
        .route_pools
        .into_iter()
        .map(|(alias, candidates)| (alias, LogicalRoute { candidates }))
        .collect();

    Ok(PipelineManager::new(
        resolved.manager,
        routes,
        pipelines,
        vault,
        tracker,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaymux_common::PipelineError;
    use relaymux_transform::canonical::CanonicalRequest;
    use crate::pipeline::{ProviderCallContext, ProviderOutcome};
    use crate::vault::Secret;

    struct StubAdapter;

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }

        async fn call(
            &self,
            _request: CanonicalRequest,
            _secret: &Secret,
            _ctx: ProviderCallContext,
        ) -> Result<ProviderOutcome, PipelineError> {
            unimplemented!("not exercised by this test")
        }
    }

    struct StubFactory;

    impl ProviderAdapterFactory for StubFactory {
        fn build(&self, provider_kind: &str) -> Option<Arc<dyn ProviderAdapter>> {
            match provider_kind {
                "stub" => Some(Arc::new(StubAdapter)),
                _ => None,
            }
        }
    }

    #[test]
    fn build_wires_a_route_to_its_pipeline() {
        let handle = PipelineHandle {
            provider_id: "openai".into(),
            model_id: "gpt-4o".into(),
            key_id: "key-a".into(),
        };
        let mut resolved = ResolvedConfig::default();
        resolved.key_vault.push(ResolvedCredential {
            provider_id: "openai".into(),
            key_id: "key-a".into(),
            secret: "sk-test".into(),
        });
        resolved.pipelines.push(ResolvedPipeline {
            handle: handle.clone(),
            base_url: "https://api.openai.com".into(),
            switch_dialect: ClientDialect::Chat,
            compatibility: Vec::new(),
            provider_kind: "stub".into(),
            provider_protocols: vec!["chat".into()],
            streaming_policy: StreamingPolicy::Auto,
            process_mode: ProcessMode::Chat,
            timeout_ms: None,
            auth_variant: AuthVariant::ApiKey,
        });
        resolved
            .route_pools
            .insert("default".into(), vec![handle.clone()]);

        let manager = build(resolved, EventHub::new(16), &StubFactory).unwrap();
        let route = manager.route("default").unwrap();
        assert_eq!(route.candidates, vec![handle]);
    }

    #[test]
    fn a_pipeline_with_no_vault_entry_fails_the_whole_build() {
        let handle = PipelineHandle {
            provider_id: "openai".into(),
            model_id: "gpt-4o".into(),
            key_id: "key-a".into(),
        };
        let mut resolved = ResolvedConfig::default();
        // no key_vault entry for "key-a"
        resolved.pipelines.push(ResolvedPipeline {
            handle,
            base_url: "https://api.openai.com".into(),
            switch_dialect: ClientDialect::Chat,
            compatibility: Vec::new(),
            provider_kind: "stub".into(),
            provider_protocols: vec!["chat".into()],
            streaming_policy: StreamingPolicy::Auto,
            process_mode: ProcessMode::Chat,
            timeout_ms: None,
            auth_variant: AuthVariant::ApiKey,
        });

        let err = build(resolved, EventHub::new(16), &StubFactory).unwrap_err();
        assert!(matches!(err, PipelineError::CredentialMissing { .. }));
    }

    #[test]
    fn a_route_naming_an_unknown_pipeline_fails_the_whole_build() {
        let known = PipelineHandle {
            provider_id: "openai".into(),
            model_id: "gpt-4o".into(),
            key_id: "key-a".into(),
        };
        let unknown = PipelineHandle {
            provider_id: "openai".into(),
            model_id: "gpt-4o".into(),
            key_id: "key-ghost".into(),
        };
        let mut resolved = ResolvedConfig::default();
        resolved.key_vault.push(ResolvedCredential {
            provider_id: "openai".into(),
            key_id: "key-a".into(),
            secret: "sk-test".into(),
        });
        resolved.pipelines.push(ResolvedPipeline {
            handle: known,
            base_url: "https://api.openai.com".into(),
            switch_dialect: ClientDialect::Chat,
            compatibility: Vec::new(),
            provider_kind: "stub".into(),
            provider_protocols: vec!["chat".into()],
            streaming_policy: StreamingPolicy::Auto,
            process_mode: ProcessMode::Chat,
            timeout_ms: None,
            auth_variant: AuthVariant::ApiKey,
        });
        resolved.route_pools.insert("default".into(), vec![unknown]);

        let err = build(resolved, EventHub::new(16), &StubFactory).unwrap_err();
        assert!(matches!(err, PipelineError::Internal { .. }));
    }

    #[test]
    fn an_unknown_provider_kind_fails_the_whole_build() {
        let handle = PipelineHandle {
            provider_id: "openai".into(),
            model_id: "gpt-4o".into(),
            key_id: "key-a".into(),
        };
        let mut resolved = ResolvedConfig::default();
        resolved.key_vault.push(ResolvedCredential {
            provider_id: "openai".into(),
            key_id: "key-a".into(),
            secret: "sk-test".into(),
        });
        resolved.pipelines.push(ResolvedPipeline {
            handle,
            base_url: "https://api.openai.com".into(),
            switch_dialect: ClientDialect::Chat,
            compatibility: Vec::new(),
            provider_kind: "nonexistent".into(),
            provider_protocols: vec!["chat".into()],
            streaming_policy: StreamingPolicy::Auto,
            process_mode: ProcessMode::Chat,
            timeout_ms: None,
            auth_variant: AuthVariant::ApiKey,
        });

        assert!(build(resolved, EventHub::new(16), &StubFactory).is_err());
    }
}
