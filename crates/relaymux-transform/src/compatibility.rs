//! Compatibility Patches: provider-idiosyncratic rewrites
//! that cannot be expressed at the Switch layer because they depend on the
//! concrete provider rather than the client dialect.
//!
//! Patches are pure functions of (body, configuration); they never perform
//! network or disk I/O. On the request side they run after the Switch and
//! before the Provider; on the response side they run first, before the
//! coalescer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{CanonicalMessage, CanonicalRequest, CanonicalResponse, CanonicalRole};

/// One compatibility rewrite, configured statically per pipeline. Carries
/// `Serialize`/`Deserialize` so a resolved pipeline configuration can declare
/// a patch list as plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompatibilityPatch {
    /// Renames a canonical field to a vendor-specific name. `canonical_name` and
    /// `vendor_name` both index into `CanonicalRequest::metadata` /
    /// `extra`-style bags at the call site; this patch only records the
    /// mapping the Provider Adapter consults.
    FieldRename {
        canonical_name: String,
        vendor_name: String,
    },
    /// Injects the required "thinking" toggle payload into request metadata.
    ThinkingFlag { metadata_key: String, value: String },
    /// Coerces function-call `arguments` to a JSON-string form.
    ToolArgumentCanonicalisation,
    /// Merges consecutive same-role messages, for providers that forbid them.
    RoleNormalisation,
    /// Zero-op.
    Passthrough,
}

impl CompatibilityPatch {
    pub fn apply_request(&self, req: &mut CanonicalRequest) {
        match self {
            CompatibilityPatch::FieldRename {
                canonical_name,
                vendor_name,
            } => {
                if let Some(value) = req.metadata.remove(canonical_name) {
                    req.metadata.insert(vendor_name.clone(), value);
                }
            }
            CompatibilityPatch::ThinkingFlag { metadata_key, value } => {
                req.metadata.insert(metadata_key.clone(), value.clone());
            }
            CompatibilityPatch::ToolArgumentCanonicalisation => {
                for message in &mut req.messages {
                    canonicalise_tool_arguments(message);
                }
            }
            CompatibilityPatch::RoleNormalisation => {
                req.messages = merge_consecutive_same_role(std::mem::take(&mut req.messages));
            }
            CompatibilityPatch::Passthrough => {}
        }
    }

    pub fn apply_response(&self, _resp: &mut CanonicalResponse) {
        // None of the known patch kinds have response-side work today beyond
        // field rename, which is applied by the Provider Adapter directly
        // against the raw wire body before canonicalisation.
    }
}

fn canonicalise_tool_arguments(message: &mut CanonicalMessage) {
    for tool_call in &mut message.tool_calls {
        if serde_json::from_str::<Value>(&tool_call.arguments).is_err() {
            tool_call.arguments = serde_json::Value::String(tool_call.arguments.clone())
                .to_string();
        }
    }
}

fn merge_consecutive_same_role(messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    let mut merged: Vec<CanonicalMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(prev) if prev.role == message.role && roles_are_mergeable(prev.role) => {
                if let Some(extra) = message.content {
                    let combined = prev.content.get_or_insert_with(String::new);
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&extra);
                }
                prev.tool_calls.extend(message.tool_calls);
            }
            _ => merged.push(message),
        }
    }
    merged
}

fn roles_are_mergeable(role: CanonicalRole) -> bool {
    matches!(role, CanonicalRole::User | CanonicalRole::Assistant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::CanonicalToolCall;

    fn message(role: CanonicalRole, content: &str) -> CanonicalMessage {
        CanonicalMessage {
            role,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[test]
    fn role_normalisation_merges_consecutive_user_messages() {
        let messages = vec![
            message(CanonicalRole::User, "part one"),
            message(CanonicalRole::User, "part two"),
            message(CanonicalRole::Assistant, "reply"),
        ];
        let merged = merge_consecutive_same_role(messages);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content.as_deref(), Some("part one\npart two"));
    }

    #[test]
    fn tool_argument_canonicalisation_wraps_non_json_arguments() {
        let mut message = message(CanonicalRole::Assistant, "");
        message.tool_calls.push(CanonicalToolCall {
            id: "call_1".to_string(),
            name: "lookup".to_string(),
            arguments: "not json".to_string(),
        });
        canonicalise_tool_arguments(&mut message);
        assert_eq!(message.tool_calls[0].arguments, "\"not json\"");
    }

    #[test]
    fn thinking_flag_patch_sets_metadata() {
        let mut req = CanonicalRequest::default();
        let patch = CompatibilityPatch::ThinkingFlag {
            metadata_key: "thinking".to_string(),
            value: "enabled".to_string(),
        };
        patch.apply_request(&mut req);
        assert_eq!(req.metadata.get("thinking").map(String::as_str), Some("enabled"));
    }
}
