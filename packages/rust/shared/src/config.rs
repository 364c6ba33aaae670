//! Application configuration for Sieve.
//!
//! User config lives at `~/.sieve/sieve.toml`. A path ending in `.json` is
//! parsed as JSON instead. CLI flags override config file values, which
//! override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SieveError};
use crate::types::ProviderKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sieve.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sieve";

// ---------------------------------------------------------------------------
// Config structs (matching sieve.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Rules and defaults applied to every source.
    #[serde(default)]
    pub global: GlobalConfig,

    /// Pacing and concurrency of inference calls.
    #[serde(default)]
    pub gate: GateSettings,

    /// HTTP behavior of the inference client.
    #[serde(default)]
    pub inference: InferenceSettings,

    /// Per-provider credentials and endpoints.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Report output.
    #[serde(default)]
    pub output: OutputConfig,

    /// Feeds to process.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// `[global]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Comma-separated terms per interest level.
    #[serde(default)]
    pub high_interest: String,
    #[serde(default)]
    pub interest: String,
    #[serde(default)]
    pub uninterested: String,
    #[serde(default)]
    pub exclude: String,

    /// Language used for reasons and summaries.
    #[serde(default = "default_language")]
    pub preferred_language: String,

    /// Minimum content length (in characters) for it to be summarized
    /// instead of the description.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    #[serde(default)]
    pub ai: AiConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            high_interest: String::new(),
            interest: String::new(),
            uninterested: String::new(),
            exclude: String::new(),
            preferred_language: default_language(),
            min_content_chars: default_min_content_chars(),
            ai: AiConfig::default(),
        }
    }
}

fn default_language() -> String {
    "en".into()
}
fn default_min_content_chars() -> usize {
    100
}

/// `[global.ai]` / `[sources.ai]`: provider and model selection.
///
/// Unset fields fall through to the next layer (source → global → built-in).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// `[gate]` section. A value of 0 means "use the default".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSettings {
    /// Milliseconds between token refills.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Token bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Maximum inference calls in flight.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            burst: default_burst(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl GateSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(if self.interval_ms == 0 {
            default_interval_ms()
        } else {
            self.interval_ms
        })
    }

    pub fn burst(&self) -> u32 {
        if self.burst == 0 { default_burst() } else { self.burst }
    }

    pub fn max_in_flight(&self) -> usize {
        if self.max_in_flight == 0 {
            default_max_in_flight()
        } else {
            self.max_in_flight
        }
    }
}

fn default_interval_ms() -> u64 {
    500
}
fn default_burst() -> u32 {
    5
}
fn default_max_in_flight() -> usize {
    5
}

/// `[inference]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles on every retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "ProviderSettings::gemini")]
    pub gemini: ProviderSettings,
    #[serde(default = "ProviderSettings::qwen")]
    pub qwen: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            gemini: ProviderSettings::gemini(),
            qwen: ProviderSettings::qwen(),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Qwen => &self.qwen,
        }
    }
}

/// `[providers.<name>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Name of the env var holding the API key (never store the key itself).
    pub api_key_env: String,

    /// Override the provider's endpoint (proxies, tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    fn gemini() -> Self {
        Self {
            api_key_env: ProviderKind::Gemini.default_api_key_env().into(),
            base_url: None,
        }
    }

    fn qwen() -> Self {
        Self {
            api_key_env: ProviderKind::Qwen.default_api_key_env().into(),
            base_url: None,
        }
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Where `sieve run` and `sieve report` write the JSON report.
    #[serde(default = "default_json_path")]
    pub json_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_path: default_json_path(),
        }
    }
}

fn default_json_path() -> String {
    "index.json".into()
}

/// `[[sources]]` entry: one feed and its source-specific rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name; part of every item's identity.
    pub name: String,

    /// Display title for reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Feed URL.
    pub url: String,

    #[serde(default)]
    pub high_interest: String,
    #[serde(default)]
    pub interest: String,
    #[serde(default)]
    pub uninterested: String,
    #[serde(default)]
    pub exclude: String,

    /// Plugins run on every item, in order.
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Summarize and re-classify interesting items.
    #[serde(default)]
    pub summarize: bool,

    #[serde(default)]
    pub ai: AiConfig,
}

impl AppConfig {
    /// A small starter config written by `sieve config init`.
    pub fn sample() -> Self {
        Self {
            sources: vec![SourceConfig {
                name: "hn".into(),
                title: Some("Hacker News".into()),
                url: "https://news.ycombinator.com/rss".into(),
                summarize: true,
                ..SourceConfig::default()
            }],
            ..Self::default()
        }
    }

    /// Check the config is usable for a run.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(SieveError::config("no sources configured"));
        }

        let mut seen = HashSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            if source.name.trim().is_empty() {
                return Err(SieveError::config(format!("source #{idx}: name is required")));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(SieveError::config(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if source.url.trim().is_empty() {
                return Err(SieveError::config(format!(
                    "source {}: url is required",
                    source.name
                )));
            }
            let url = url::Url::parse(&source.url).map_err(|e| {
                SieveError::config(format!("source {}: invalid url: {e}", source.name))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SieveError::config(format!(
                    "source {}: unsupported url scheme {}",
                    source.name,
                    url.scheme()
                )));
            }
        }

        Ok(())
    }

    /// The per-request inference timeout.
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference.timeout_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sieve/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SieveError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sieve/sieve.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from the default location.
/// Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SieveError::io(path, e))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content)
            .map_err(|e| SieveError::config(format!("failed to parse {}: {e}", path.display())))
    } else {
        toml::from_str(&content)
            .map_err(|e| SieveError::config(format!("failed to parse {}: {e}", path.display())))
    }
}

/// Write the sample config to `path`, creating parent directories.
/// Refuses to overwrite an existing file.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(SieveError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| SieveError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::sample())
        .map_err(|e| SieveError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| SieveError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}

/// Create the config directory and write the sample config file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}
