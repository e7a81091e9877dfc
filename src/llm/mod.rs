//! Client and shared types for the remote text-completion services.
//!
//! Classification, exposure mapping, cluster synthesis, and link rationale all
//! go through the same messages endpoint; the per-stage modules own their
//! prompts and response validation.

mod client;
mod types;

pub use client::LlmClient;
pub use types::{parse_json_response, ErrorCode, ServiceError, ServiceResult};
