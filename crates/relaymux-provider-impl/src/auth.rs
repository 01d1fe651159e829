//! Header-setting helpers for the outbound HTTP call. Grounded on the
//! teacher's `auth_extractor.rs`, trimmed to the bearer-token shape every
//! remaining provider kind needs — the vendor-specific OAuth flavours
//! (cookie jars, refresh tokens, signed JWTs) are filesystem-backed token
//! storage, out of scope.

use relaymux_provider_core::{Headers, header_set};

pub(crate) fn set_bearer(headers: &mut Headers, secret: &str) {
    header_set(headers, "Authorization", format!("Bearer {secret}"));
}

pub(crate) fn set_content_type_json(headers: &mut Headers) {
    header_set(headers, "Content-Type", "application/json");
}

pub(crate) fn set_user_agent(headers: &mut Headers, ua: &str) {
    header_set(headers, "User-Agent", ua);
}
