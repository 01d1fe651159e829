pub mod anthropic;
pub mod chat;
pub mod responses;
pub mod sse;

pub use sse::{SseEvent, SseParser, encode_event};
