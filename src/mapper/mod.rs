//! Protocol translation between the caller's OpenAI-compatible wire
//! format and Anthropic-native endpoints.
//!
//! Three independent pieces: request shaping (outbound), non-streaming
//! response mapping (inbound), and the incremental SSE re-framer for
//! streamed responses.

mod request;
mod response;
mod stream;

pub use request::to_anthropic_body;
pub use response::{anthropic_to_openai, map_stop_reason};
pub use stream::StreamReframer;

/// Protocol mapping failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MapError {
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}
