//! HTTP gateway module.
//!
//! The OpenAI-compatible surface callers talk to, plus the machinery
//! behind it: the orchestrator state machine and the single-attempt
//! executor.

mod executor;
mod handlers;
mod orchestrator;
mod server;
pub mod types;

pub use executor::{worst_case_cost, AttemptExecutor};
pub use handlers::{
    AUTH_HEADER, MODEL_HEADER, ORG_HEADER, PROVIDER_HEADER, REQUEST_ID_HEADER, STREAMING_HEADER,
};
pub use orchestrator::{
    Gateway, GatewayFailure, GatewaySuccess, NoPromptTemplates, PromptTemplates,
};
pub use server::{create_router, run_server, AppState, RequestId};
pub use types::{ensure_stream_options, ChatCompletionRequest, ChatMessage, MessageContent};
