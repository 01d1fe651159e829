//! The on-disk config reader. Deliberately thin: the resolved-pipeline shape
//! is treated as something provided to the core by an external configuration
//! collaborator, with merging and layering left out of scope. This reads
//! exactly one JSON file into `relaymux_provider_core::config::ResolvedConfig`
//! and nothing more — no environment layering, no includes, no hot reload.

use std::path::Path;

use anyhow::{Context, Result};
use relaymux_provider_core::config::ResolvedConfig;

pub(crate) fn load(path: impl AsRef<Path>) -> Result<ResolvedConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let resolved: ResolvedConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(resolved)
}
