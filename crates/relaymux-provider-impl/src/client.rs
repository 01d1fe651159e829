//! The shared `wreq` client. One client per outbound
//! proxy configuration, cached for the lifetime of the process — building a
//! new client per request would defeat connection pooling.
//!
//! Grounded on `providers/http_client.rs`'s client cache, collapsed from
//! a per-provider-kind cache key down to a per-proxy one: this crate no
//! longer has provider-specific client quirks (no per-vendor TLS pinning, no
//! `ClaudeCode`-only client), so the proxy string is the only axis left.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use relaymux_common::PipelineError;

static CLIENT_CACHE: OnceLock<Mutex<HashMap<Option<String>, wreq::Client>>> = OnceLock::new();

pub(crate) fn shared_client(proxy: Option<&str>) -> Result<wreq::Client, PipelineError> {
    let key = normalize_proxy(proxy);
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    {
        let guard = cache.lock().expect("client cache poisoned");
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }
    }

    let client = build_client(key.as_deref())?;
    let mut guard = cache.lock().expect("client cache poisoned");
    guard.insert(key, client.clone());
    Ok(client)
}

fn build_client(proxy: Option<&str>) -> Result<wreq::Client, PipelineError> {
    let mut builder = wreq::Client::builder();
    if let Some(proxy_url) = proxy {
        let proxy = wreq::Proxy::all(proxy_url)
            .map_err(|err| PipelineError::internal(format!("invalid outbound proxy: {err}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|err| PipelineError::internal(format!("failed to build http client: {err}")))
}

fn normalize_proxy(value: Option<&str>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}
