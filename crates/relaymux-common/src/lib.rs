//! Shared identifiers, the credential fingerprint, and the pipeline error
//! taxonomy. Every other crate in the workspace
//! depends on this one; it depends on nothing workspace-internal.

mod error;
mod fingerprint;
mod ids;

pub use error::PipelineError;
pub use fingerprint::Fingerprint;
pub use ids::{PipelineHandle, RequestId};
