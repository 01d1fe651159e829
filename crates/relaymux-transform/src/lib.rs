//! The Dialect Switch and Compatibility Patch layers: the canonical
//! intermediate shape, the bidirectional per-dialect codecs, and the
//! provider-idiosyncratic rewrites that sit between them and the Provider
//! Adapter.
//!
//! The Streaming Coalescer is not in this crate: it
//! needs an async timer for its text-coalescing window, so it lives in
//! `relaymux-provider-core` alongside the Pipeline Instance it is a stage of.
//! This crate supplies the per-chunk `CanonicalDelta` conversions the
//! coalescer drives.

pub mod canonical;
pub mod compatibility;
pub mod switch;
