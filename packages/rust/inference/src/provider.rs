//! Wire formats of the supported inference providers.
//!
//! Each variant knows how to build one HTTP request and how to pull the
//! generated text out of a successful response. Everything else (timeouts,
//! retries, pacing) is shared and lives in the client.

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use sieve_shared::{ProviderKind, Result, SieveError};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const QWEN_BASE_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

/// A configured provider endpoint.
#[derive(Debug, Clone)]
pub enum Provider {
    Gemini { api_key: String, base_url: String },
    Qwen { api_key: String, base_url: String },
}

impl Provider {
    /// Build a provider, using the public endpoint unless `base_url` is given.
    pub fn new(kind: ProviderKind, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        let api_key = api_key.into();
        match kind {
            ProviderKind::Gemini => Self::Gemini {
                api_key,
                base_url: base_url.unwrap_or_else(|| GEMINI_BASE_URL.into()),
            },
            ProviderKind::Qwen => Self::Qwen {
                api_key,
                base_url: base_url.unwrap_or_else(|| QWEN_BASE_URL.into()),
            },
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Gemini { .. } => ProviderKind::Gemini,
            Self::Qwen { .. } => ProviderKind::Qwen,
        }
    }

    /// Build the generation request. `json_output` asks the model for a bare
    /// JSON object.
    pub fn build_request(
        &self,
        http: &Client,
        model: &str,
        prompt: &str,
        json_output: bool,
    ) -> RequestBuilder {
        match self {
            Self::Gemini { api_key, base_url } => {
                let mut body = json!({
                    "contents": [{ "parts": [{ "text": prompt }] }],
                });
                if json_output {
                    body["generationConfig"] = json!({ "responseMimeType": "application/json" });
                }
                http.post(format!(
                    "{}/models/{model}:generateContent",
                    base_url.trim_end_matches('/')
                ))
                .query(&[("key", api_key.as_str())])
                .json(&body)
            }
            Self::Qwen { api_key, base_url } => {
                let mut parameters = json!({ "result_format": "message" });
                if json_output {
                    parameters["response_format"] = json!({ "type": "json_object" });
                }
                http.post(base_url.as_str())
                    .bearer_auth(api_key)
                    .json(&json!({
                        "model": model,
                        "input": { "messages": [{ "role": "user", "content": prompt }] },
                        "parameters": parameters,
                    }))
            }
        }
    }

    /// Extract the generated text from a successful response body.
    /// A body that does not match the expected shape is a permanent error.
    pub fn parse_response(&self, body: &str) -> Result<String> {
        let text = match self {
            Self::Gemini { .. } => {
                let response: GeminiResponse = serde_json::from_str(body).map_err(|e| {
                    SieveError::permanent(format!("malformed gemini response: {e}"))
                })?;
                response
                    .candidates
                    .into_iter()
                    .next()
                    .and_then(|c| c.content)
                    .and_then(|c| c.parts.into_iter().next())
                    .map(|p| p.text)
            }
            Self::Qwen { .. } => {
                let response: QwenResponse = serde_json::from_str(body).map_err(|e| {
                    SieveError::permanent(format!("malformed qwen response: {e}"))
                })?;
                response.output.and_then(|output| {
                    output
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .or(output.text)
                })
            }
        };

        match text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(SieveError::permanent(format!(
                "empty response from {}",
                self.kind()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct QwenResponse {
    output: Option<QwenOutput>,
}

#[derive(Debug, Deserialize)]
struct QwenOutput {
    #[serde(default)]
    choices: Vec<QwenChoice>,
    /// Present when `result_format` is `text`.
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QwenChoice {
    message: QwenMessage,
}

#[derive(Debug, Deserialize)]
struct QwenMessage {
    content: String,
}
