//! HTTP inference client implementing [`Classifier`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sieve_shared::{
    AppConfig, Classification, Classifier, InterestLevel, ModelTarget, ProviderKind, Result,
    SieveError,
};
use tracing::{debug, instrument, warn};

use crate::prompts::{classify_prompt, summarize_prompt};
use crate::provider::Provider;
use crate::retry::RetryPolicy;

const USER_AGENT: &str = concat!("Sieve/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Credentials for one provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub api_key: String,
    /// Endpoint override; `None` uses the public endpoint.
    pub base_url: Option<String>,
}

/// Everything needed to build an [`InferenceClient`].
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub providers: HashMap<ProviderKind, ProviderCredentials>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl InferenceConfig {
    /// Build from the app config, reading each provider's key from its
    /// environment variable. Providers without a key are left out.
    pub fn from_app_config(config: &AppConfig) -> Self {
        let mut providers = HashMap::new();
        for kind in [ProviderKind::Gemini, ProviderKind::Qwen] {
            let settings = config.providers.get(kind);
            match settings.api_key() {
                Some(api_key) => {
                    providers.insert(
                        kind,
                        ProviderCredentials {
                            api_key,
                            base_url: settings.base_url.clone(),
                        },
                    );
                }
                None => debug!(provider = %kind, env = %settings.api_key_env, "no API key set"),
            }
        }

        Self {
            providers,
            timeout: config.inference_timeout(),
            retry: RetryPolicy::from(&config.inference),
        }
    }

    pub fn with_provider(mut self, kind: ProviderKind, credentials: ProviderCredentials) -> Self {
        self.providers.insert(kind, credentials);
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Calls the configured providers with retries on transient failures.
pub struct InferenceClient {
    http: Client,
    providers: HashMap<ProviderKind, Provider>,
    retry: RetryPolicy,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SieveError::Network(format!("failed to build HTTP client: {e}")))?;

        let providers = config
            .providers
            .into_iter()
            .map(|(kind, creds)| (kind, Provider::new(kind, creds.api_key, creds.base_url)))
            .collect();

        Ok(Self {
            http,
            providers,
            retry: config.retry,
        })
    }

    /// Providers that have credentials.
    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    fn provider(&self, kind: ProviderKind) -> Result<&Provider> {
        self.providers
            .get(&kind)
            .ok_or_else(|| SieveError::config(format!("provider {kind} not configured")))
    }

    /// Send `prompt` to the target model and return the generated text.
    async fn generate(&self, target: &ModelTarget, prompt: &str, json_output: bool) -> Result<String> {
        let provider = self.provider(target.provider)?;
        let http = &self.http;
        let model = target.model.as_str();

        self.retry
            .run(provider.kind().as_str(), move || {
                send_once(http, provider, model, prompt, json_output)
            })
            .await
    }
}

/// One HTTP round trip, with the failure classified as transient or permanent.
async fn send_once(
    http: &Client,
    provider: &Provider,
    model: &str,
    prompt: &str,
    json_output: bool,
) -> Result<String> {
    let response = provider
        .build_request(http, model, prompt, json_output)
        .send()
        .await
        .map_err(|e| {
            let message = format!("{} request failed: {e}", provider.kind());
            if e.is_timeout() || e.is_connect() {
                SieveError::transient(message)
            } else {
                SieveError::permanent(message)
            }
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
        SieveError::transient(format!("{} body read failed: {e}", provider.kind()))
    })?;

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(SieveError::transient(format!(
            "{} returned HTTP {status}: {}",
            provider.kind(),
            snippet(&body)
        )));
    }
    if !status.is_success() {
        return Err(SieveError::permanent(format!(
            "{} returned HTTP {status}: {}",
            provider.kind(),
            snippet(&body)
        )));
    }

    provider.parse_response(&body)
}

fn snippet(body: &str) -> &str {
    crate::prompts::truncate(body.trim(), 200)
}

#[async_trait]
impl Classifier for InferenceClient {
    #[instrument(skip_all, fields(provider = %target.provider, model = %target.model))]
    async fn classify(
        &self,
        target: &ModelTarget,
        title: &str,
        content: &str,
        rules: &str,
        language: &str,
    ) -> Result<Classification> {
        let prompt = classify_prompt(title, content, rules, language);
        let raw = self.generate(target, &prompt, true).await?;
        parse_classification(&raw)
    }

    #[instrument(skip_all, fields(provider = %target.provider, model = %target.model))]
    async fn summarize(
        &self,
        target: &ModelTarget,
        title: &str,
        content: &str,
        language: &str,
    ) -> Result<String> {
        let prompt = summarize_prompt(title, content, language);
        let raw = self.generate(target, &prompt, false).await?;
        Ok(strip_code_fence(&raw, "html").to_string())
    }
}

// ---------------------------------------------------------------------------
// Response post-processing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    #[serde(default)]
    thought: Option<String>,
    #[serde(rename = "type")]
    level: String,
    #[serde(default)]
    reason: String,
}

/// Parse the model's JSON verdict. Anything unparseable is permanent.
pub fn parse_classification(raw: &str) -> Result<Classification> {
    let cleaned = strip_code_fence(raw, "json");
    let payload: ClassificationPayload = serde_json::from_str(cleaned).map_err(|e| {
        warn!(raw = %crate::prompts::truncate(raw, 200), "unparseable classification");
        SieveError::permanent(format!("malformed classification: {e}"))
    })?;

    let level: InterestLevel = payload
        .level
        .parse()
        .map_err(|e: SieveError| SieveError::permanent(e.to_string()))?;

    Ok(Classification {
        thought: payload.thought.filter(|t| !t.trim().is_empty()),
        level,
        reason: payload.reason,
    })
}

/// Remove a surrounding Markdown code fence (```lang ... ```), if any.
pub fn strip_code_fence<'a>(raw: &'a str, lang: &str) -> &'a str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.strip_prefix(lang).unwrap_or(rest);
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gemini_target() -> ModelTarget {
        ModelTarget {
            provider: ProviderKind::Gemini,
            model: "gemini-test".into(),
        }
    }

    fn client_for(kind: ProviderKind, server: &MockServer) -> InferenceClient {
        let config = InferenceConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
            },
            ..InferenceConfig::default()
        }
        .with_provider(
            kind,
            ProviderCredentials {
                api_key: "test-key".into(),
                base_url: Some(server.uri()),
            },
        );
        InferenceClient::new(config).expect("client")
    }

    fn gemini_text(text: &str) -> serde_json::Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```", "json"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```", "json"), "{}");
        assert_eq!(strip_code_fence("  {} ", "json"), "{}");
        assert_eq!(strip_code_fence("```html\n<p>x</p>\n```", "html"), "<p>x</p>");
    }

    #[test]
    fn classification_parsing() {
        let c = parse_classification(
            "```json\n{\"thought\":\"t\",\"type\":\"high_interest\",\"reason\":\"r\"}\n```",
        )
        .expect("parse");
        assert_eq!(c.level, InterestLevel::HighInterest);
        assert_eq!(c.reason, "r");
        assert_eq!(c.thought.as_deref(), Some("t"));

        let err = parse_classification(r#"{"type":"meh","reason":"r"}"#).unwrap_err();
        assert!(!err.is_transient());
        assert!(parse_classification("not json").is_err());
    }

    #[tokio::test]
    async fn classify_via_gemini() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text(
                r#"{"type":"interest","reason":"about compilers"}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(ProviderKind::Gemini, &server);
        let verdict = client
            .classify(&gemini_target(), "Title", "Body", "High: rust", "en")
            .await
            .expect("classify");

        assert_eq!(verdict.level, InterestLevel::Interest);
        assert_eq!(verdict.reason, "about compilers");
    }

    #[tokio::test]
    async fn summarize_via_qwen() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": { "choices": [{ "message": { "role": "assistant", "content": "<p>short</p>" } }] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(ProviderKind::Qwen, &server);
        let target = ModelTarget {
            provider: ProviderKind::Qwen,
            model: "qwen-plus".into(),
        };
        let summary = client
            .summarize(&target, "Title", "Long body", "en")
            .await
            .expect("summarize");
        assert_eq!(summary, "<p>short</p>");
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text("<p>ok</p>")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(ProviderKind::Gemini, &server);
        let summary = client
            .summarize(&gemini_target(), "T", "C", "en")
            .await
            .expect("third attempt succeeds");
        assert_eq!(summary, "<p>ok</p>");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(ProviderKind::Gemini, &server);
        let err = client
            .summarize(&gemini_target(), "T", "C", "en")
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_surfaces_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(ProviderKind::Gemini, &server);
        let err = client
            .classify(&gemini_target(), "T", "C", "rules", "en")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unconfigured_provider_fails_fast() {
        let server = MockServer::start().await;
        let client = client_for(ProviderKind::Gemini, &server);
        let target = ModelTarget {
            provider: ProviderKind::Qwen,
            model: "qwen-plus".into(),
        };
        let err = client
            .summarize(&target, "T", "C", "en")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provider qwen not configured"));
        assert_eq!(client.configured_providers(), vec![ProviderKind::Gemini]);
    }
}
