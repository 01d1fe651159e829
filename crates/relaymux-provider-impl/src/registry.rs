//! The provider-kind stage factory: a statically typed factory table keyed
//! by a closed enum of known implementation names, in place of a dynamic,
//! string-keyed module registry — unknown names fail at build time rather
//! than at first request.
//!
//! `ProviderKind` closes the open string space down to an enum, and
//! `ProviderKind::from_str` is the one place an unrecognized name surfaces —
//! at config-build time, via `relaymux_provider_core::config::build`'s
//! `ProviderAdapterFactory`, not at first request.

use std::str::FromStr;
use std::sync::Arc;

use relaymux_provider_core::ProviderAdapter;
use relaymux_provider_core::config::ProviderAdapterFactory;

use crate::http_adapter::HttpChatProviderAdapter;

/// The closed set of `ProviderAdapter` implementations this crate ships.
/// Adding a vendor-specific wire shape means adding a variant here and a
/// corresponding match arm in `build` — never a new string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// The reference adapter: an OpenAI-Chat-Completions-shaped HTTP upstream.
    HttpChat,
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http_chat" => Ok(ProviderKind::HttpChat),
            _ => Err(()),
        }
    }
}

pub struct StaticProviderFactory {
    proxy: Option<String>,
    user_agent: String,
}

impl StaticProviderFactory {
    pub fn new(proxy: Option<String>, user_agent: impl Into<String>) -> Self {
        Self {
            proxy,
            user_agent: user_agent.into(),
        }
    }
}

impl ProviderAdapterFactory for StaticProviderFactory {
    fn build(&self, provider_kind: &str) -> Option<Arc<dyn ProviderAdapter>> {
        match ProviderKind::from_str(provider_kind).ok()? {
            ProviderKind::HttpChat => Some(Arc::new(HttpChatProviderAdapter::new(
                self.proxy.clone(),
                self.user_agent.clone(),
            ))),
        }
    }
}
