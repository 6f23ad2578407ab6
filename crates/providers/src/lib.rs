//! Streaming transport for the generation proxy.
//!
//! - `sse`: blank-line framed `data:` events with a `[DONE]` sentinel
//! - `accumulator`: turns frames into a growing response buffer and its
//!   directive-safe visible projection
//! - `proxy`: the `Transport` seam and its reqwest implementation

pub mod accumulator;
pub mod proxy;
pub mod sse;

pub use accumulator::{Progress, StreamAccumulator};
pub use proxy::{ByteStream, ProxyClient, Transport, DEFAULT_PROXY_URL};
