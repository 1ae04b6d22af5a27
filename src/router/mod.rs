//! Attempt construction for model requests.
//!
//! This module turns a caller's model list into the priority-ordered
//! fallback plan the executor walks:
//! - parsing model tokens into structured specs
//! - ranking provider/credential candidates (BYOK before platform-funded)
//! - reconciling requested plugins with per-endpoint support

mod attempts;
mod plugins;
mod spec;
mod types;

pub use attempts::{AttemptBuilder, BuildContext};
pub use plugins::negotiate_plugins;
pub use spec::{parse_model_list, parse_model_token, ModelSpec, ParseError};
pub use types::{
    Attempt, AttemptError, AuthMode, DisallowListEntry, ErrorKind, Plugin, WEB_SEARCH_PLUGIN,
};
