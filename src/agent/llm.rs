use crate::agent::context::ConversationContext;
use crate::agent::types::{
    ActionRequest, Decision, LLMMessage, LLMResponse, TokenUsage, TurnRole,
};
use crate::config::validation::parse_model_selection;
use crate::config::{AIConfig, ApiType, ProviderConfig};
use crate::error::ReasoningError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Decides the next browsing step for a conversation
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Return exactly one action for `context`, within `timeout`
    async fn decide(
        &self,
        context: &ConversationContext,
        timeout: Duration,
    ) -> Result<Decision, ReasoningError>;
}

/// LLM Provider trait
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a chat completion request
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse, ReasoningError>;

    /// Get provider name
    fn name(&self) -> &str;

    /// Get model name
    fn model(&self) -> &str;
}

fn transport_error(e: reqwest::Error) -> ReasoningError {
    if e.is_timeout() {
        ReasoningError::Timeout
    } else {
        ReasoningError::ServiceUnavailable(format!("Request failed: {}", e))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    api: &str,
) -> Result<reqwest::Response, ReasoningError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let detail = if status == StatusCode::TOO_MANY_REQUESTS {
        format!("{} API rate limited: {}", api, error_text)
    } else {
        format!("{} API error ({}): {}", api, status.as_u16(), error_text)
    };
    Err(ReasoningError::ServiceUnavailable(detail))
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ReasoningError> {
    response
        .json()
        .await
        .map_err(|e| ReasoningError::MalformedResponse(format!("Failed to parse response: {}", e)))
}

fn usage_field(json: &serde_json::Value, key: &str) -> u32 {
    json[key].as_u64().unwrap_or(0) as u32
}

/// OpenAI-compatible provider (OpenAI, Azure, custom endpoints, etc.)
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
    model: String,
    provider_id: String,
    max_tokens: u32,
}

impl OpenAIProvider {
    pub fn new(provider_id: String, config: ProviderConfig, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            config,
            model,
            provider_id,
            max_tokens,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse, ReasoningError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": 0.1
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = self.config.resolved_api_key() {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(transport_error)?;
        let json = read_json(ensure_success(response, "OpenAI").await?).await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ReasoningError::MalformedResponse("OpenAI response has no message content".into())
            })?
            .to_string();

        let usage = &json["usage"];
        Ok(LLMResponse {
            content,
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens: usage_field(usage, "prompt_tokens"),
                completion_tokens: usage_field(usage, "completion_tokens"),
                total_tokens: usage_field(usage, "total_tokens"),
            },
        })
    }

    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Anthropic provider
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
    model: String,
    provider_id: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(provider_id: String, config: ProviderConfig, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            config,
            model,
            provider_id,
            max_tokens,
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse, ReasoningError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        // System prompt travels outside the message list
        let mut system_prompt = String::new();
        let mut anthropic_messages = Vec::new();
        for msg in messages {
            if msg.role == "system" {
                system_prompt = msg.content.clone();
            } else {
                anthropic_messages.push(serde_json::json!({
                    "role": msg.role,
                    "content": msg.content
                }));
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": anthropic_messages,
            "max_tokens": self.max_tokens,
        });
        if !system_prompt.is_empty() {
            body["system"] = serde_json::Value::String(system_prompt);
        }

        let api_key = self.config.resolved_api_key().ok_or_else(|| {
            ReasoningError::ServiceUnavailable("Anthropic API key required".to_string())
        })?;

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let json = read_json(ensure_success(response, "Anthropic").await?).await?;

        let content = json["content"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                ReasoningError::MalformedResponse("Anthropic response has no text block".into())
            })?
            .to_string();

        let usage = &json["usage"];
        let prompt_tokens = usage_field(usage, "input_tokens");
        let completion_tokens = usage_field(usage, "output_tokens");
        Ok(LLMResponse {
            content,
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }

    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Ollama provider (local)
pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
    model: String,
    provider_id: String,
}

impl OllamaProvider {
    pub fn new(provider_id: String, config: ProviderConfig, model: String) -> Self {
        Self {
            client: Client::new(),
            config,
            model,
            provider_id,
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse, ReasoningError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let json = read_json(ensure_success(response, "Ollama").await?).await?;

        let content = json["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ReasoningError::MalformedResponse("Ollama response has no message content".into())
            })?
            .to_string();

        let prompt_tokens = usage_field(&json, "prompt_eval_count");
        let completion_tokens = usage_field(&json, "eval_count");
        Ok(LLMResponse {
            content,
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }

    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Reasoning client backed by the configured default LLM
pub struct LLMClient {
    config: AIConfig,
}

impl LLMClient {
    pub fn new(config: AIConfig) -> Self {
        Self { config }
    }

    /// Create a provider instance with the specified model
    fn create_provider(
        &self,
        provider_id: &str,
        model: &str,
    ) -> Result<Box<dyn LLMProvider>, String> {
        let provider_config = self
            .config
            .providers
            .get(provider_id)
            .ok_or_else(|| format!("Provider '{}' not configured", provider_id))?;

        let provider: Box<dyn LLMProvider> = match provider_config.api_type {
            ApiType::Openai => Box::new(OpenAIProvider::new(
                provider_id.to_string(),
                provider_config.clone(),
                model.to_string(),
                self.config.max_tokens,
            )),
            ApiType::Anthropic => Box::new(AnthropicProvider::new(
                provider_id.to_string(),
                provider_config.clone(),
                model.to_string(),
                self.config.max_tokens,
            )),
            ApiType::Ollama => Box::new(OllamaProvider::new(
                provider_id.to_string(),
                provider_config.clone(),
                model.to_string(),
            )),
        };

        Ok(provider)
    }

    /// Get the default LLM provider (format: "provider_id:model_name")
    pub fn get_default_llm(&self) -> Result<Box<dyn LLMProvider>, String> {
        let selection = self.config.default_llm.as_ref().ok_or_else(|| {
            "No default LLM configured. Set ai.default_llm in the config file.".to_string()
        })?;

        let (provider_id, model) = parse_model_selection(selection).map_err(|e| e.to_string())?;
        self.create_provider(provider_id, model)
    }
}

#[async_trait]
impl ReasoningClient for LLMClient {
    async fn decide(
        &self,
        context: &ConversationContext,
        timeout: Duration,
    ) -> Result<Decision, ReasoningError> {
        let provider = self
            .get_default_llm()
            .map_err(ReasoningError::ServiceUnavailable)?;
        let messages = build_messages(context);

        tracing::debug!(
            "Calling {}:{} with {} messages",
            provider.name(),
            provider.model(),
            messages.len()
        );
        let response = tokio::time::timeout(timeout, provider.complete(&messages))
            .await
            .map_err(|_| ReasoningError::Timeout)??;

        tracing::info!(
            "LLM response received: {} chars, {} tokens",
            response.content.len(),
            response.usage.total_tokens
        );
        parse_decision(&response.content)
    }
}

/// Send a one-line probe to the default provider to check the configuration
pub async fn test_provider(
    client: &LLMClient,
    timeout: Duration,
) -> Result<LLMResponse, ReasoningError> {
    let provider = client
        .get_default_llm()
        .map_err(ReasoningError::ServiceUnavailable)?;
    let messages = vec![LLMMessage::new("user", "Reply with the single word OK.")];
    tokio::time::timeout(timeout, provider.complete(&messages))
        .await
        .map_err(|_| ReasoningError::Timeout)?
}

#[derive(Deserialize)]
struct RawDecision {
    action: ActionRequest,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse one decision out of a model reply
pub fn parse_decision(content: &str) -> Result<Decision, ReasoningError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ReasoningError::MalformedResponse("empty reply".to_string()));
    }

    let (start, end) = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(ReasoningError::MalformedResponse(format!(
                "no JSON object in reply: {}",
                excerpt(trimmed)
            )))
        }
    };
    let json_str = &trimmed[start..=end];

    let decision = match serde_json::from_str::<RawDecision>(json_str) {
        Ok(raw) => Decision::new(raw.action).with_rationale(raw.reasoning.unwrap_or_default()),
        // Some models answer with the bare action object
        Err(wrapped_err) => match serde_json::from_str::<ActionRequest>(json_str) {
            Ok(action) => Decision::new(action),
            Err(_) => {
                return Err(ReasoningError::MalformedResponse(format!(
                    "{} in reply: {}",
                    wrapped_err,
                    excerpt(trimmed)
                )))
            }
        },
    };

    if let ActionRequest::FinalAnswer { text } = &decision.action {
        if text.trim().is_empty() {
            return Err(ReasoningError::MalformedResponse(
                "final answer is empty".to_string(),
            ));
        }
    }

    Ok(decision)
}

fn excerpt(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Map a conversation onto chat messages, system prompt first
pub fn build_messages(context: &ConversationContext) -> Vec<LLMMessage> {
    let mut messages = Vec::with_capacity(context.len() + 1);
    messages.push(LLMMessage::new("system", build_system_prompt()));

    for turn in context.turns() {
        let message = match turn.role {
            TurnRole::User => LLMMessage::new("user", turn.content.clone()),
            TurnRole::Assistant => LLMMessage::new("assistant", turn.content.clone()),
            TurnRole::ActionResult => {
                LLMMessage::new("user", format!("[action result] {}", turn.content))
            }
        };
        messages.push(message);
    }

    messages
}

/// Build system prompt for the orchestrator
pub fn build_system_prompt() -> String {
    r##"You are a browser assistant. You answer the user's request by browsing the web one step at a time.

Messages starting with [action result] report what happened after your previous action.

Respond with a single JSON object and nothing else:
{"action": <action>, "reasoning": "<one short sentence>"}

Available actions:
1. Navigate to a URL (the page text is extracted for you afterwards):
   {"type": "navigate", "url": "https://example.com"}
2. Extract the text of the current page again:
   {"type": "extract_content"}
3. Give the final answer to the user:
   {"type": "final_answer", "text": "..."}

URLs must be absolute. If an action failed, try a different approach or explain the problem in a final answer.
Be efficient: answer as soon as you have enough information."##
        .to_string()
}
