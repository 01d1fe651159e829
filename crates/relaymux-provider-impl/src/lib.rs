//! Concrete `ProviderAdapter` implementations and the
//! static stage factory that resolves a pipeline's declared `provider_kind`
//! to one of them.
//!
//! This crate does perform network IO (unlike `relaymux-provider-core`): it
//! builds and issues the outbound `wreq` call directly, matching the
//! teacher's separation between the provider layer (owns upstream IO) and
//! the router/front-door layer (owns inbound IO).

mod auth;
mod client;
mod http_adapter;
mod registry;

pub use http_adapter::HttpChatProviderAdapter;
pub use registry::{ProviderKind, StaticProviderFactory};
