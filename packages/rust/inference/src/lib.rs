//! Inference client for Sieve: classification and summarization over HTTP.
//!
//! Supports Gemini and Qwen (DashScope). Transient failures (HTTP 429, 5xx,
//! timeouts) are retried with exponential backoff; everything else fails fast.

mod client;
mod prompts;
mod provider;
mod retry;

pub use client::{
    InferenceClient, InferenceConfig, ProviderCredentials, parse_classification, strip_code_fence,
};
pub use provider::{GEMINI_BASE_URL, Provider, QWEN_BASE_URL};
pub use retry::RetryPolicy;
