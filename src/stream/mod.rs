//! Streaming Relay (spec §4.6): parses upstream SSE, decodes each event
//! per the provider's dialect, runs it through the transformer chain, and
//! re-encodes canonical SSE frames for the client.

pub mod relay;
pub mod sse;

pub use relay::relay_stream;
pub use sse::{encode_sse_event, SseEvent, SseParser};
