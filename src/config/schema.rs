use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// AI provider configuration
    #[serde(default)]
    pub ai: AIConfig,

    /// Query orchestration budgets
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Browser control surface
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Local bridge API
    #[serde(default)]
    pub api: ApiConfig,
}

// ==================== AI Configuration ====================

/// API type for the provider
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Openai,
    Anthropic,
    Ollama,
}

/// AI Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Display name for this provider
    pub name: String,
    /// API type (determines request format)
    #[serde(default)]
    pub api_type: ApiType,
    /// Base URL for the API
    pub base_url: String,
    /// API key (optional for local providers like Ollama)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable to read the API key from when `api_key` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Available models for this provider
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderConfig {
    /// Key from the config file, falling back to `api_key_env`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.is_empty())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AIConfig {
    /// Model used for reasoning (format: "provider_id:model_name")
    #[serde(default)]
    pub default_llm: Option<String>,

    /// Upper bound for a single reasoning request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Completion token cap sent to the provider
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// AI providers keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            default_llm: None,
            request_timeout_seconds: default_request_timeout(),
            max_tokens: default_max_tokens(),
            providers: HashMap::new(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    1024
}

// ==================== Orchestrator ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Maximum reasoning steps per query
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock deadline per query in seconds
    #[serde(default = "default_deadline")]
    pub deadline_seconds: u64,

    /// Fixed backoff before the single retry of a transient failure
    #[serde(default = "default_backoff")]
    pub retry_backoff_ms: u64,

    /// Most recent turns sent to the reasoning backend
    #[serde(default = "default_context_turns")]
    pub max_context_turns: usize,

    /// Character budget for the context sent to the reasoning backend
    #[serde(default = "default_context_chars")]
    pub context_char_budget: usize,

    /// Cap for a single extracted-content turn
    #[serde(default = "default_turn_chars")]
    pub max_turn_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            deadline_seconds: default_deadline(),
            retry_backoff_ms: default_backoff(),
            max_context_turns: default_context_turns(),
            context_char_budget: default_context_chars(),
            max_turn_chars: default_turn_chars(),
        }
    }
}

fn default_max_steps() -> u32 {
    10
}

fn default_deadline() -> u64 {
    60
}

fn default_backoff() -> u64 {
    500
}

fn default_context_turns() -> usize {
    20
}

fn default_context_chars() -> usize {
    8000
}

fn default_turn_chars() -> usize {
    4000
}

// ==================== Browser ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserConfig {
    /// Chrome executable path
    #[serde(default = "default_chrome_path")]
    pub chrome_path: PathBuf,

    /// Remote debugging port
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,

    /// Attach to an already running browser on `cdp_port` instead of launching one
    #[serde(default)]
    pub attach: bool,

    /// Launch Chrome headless
    #[serde(default)]
    pub headless: bool,

    /// User data directory for the launched browser
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: PathBuf,

    /// Page load timeout in milliseconds
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,

    /// Cap for extracted page text
    #[serde(default = "default_content_chars")]
    pub max_content_chars: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: default_chrome_path(),
            cdp_port: default_cdp_port(),
            attach: false,
            headless: false,
            user_data_dir: default_user_data_dir(),
            load_timeout_ms: default_load_timeout(),
            max_content_chars: default_content_chars(),
        }
    }
}

/// Get default Chrome path based on platform
fn default_chrome_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        PathBuf::from("C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe")
    }
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        PathBuf::from("/usr/bin/google-chrome")
    }
}

fn default_cdp_port() -> u16 {
    9222
}

fn default_user_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("browsion-query").join("chrome-profile"))
        .unwrap_or_else(|| PathBuf::from("./chrome-profile"))
}

fn default_load_timeout() -> u64 {
    15000
}

fn default_content_chars() -> usize {
    8000
}

// ==================== Bridge API ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Serve the local HTTP bridge
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port on 127.0.0.1
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Required `X-API-Key` header value, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
            api_key: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    38473
}
