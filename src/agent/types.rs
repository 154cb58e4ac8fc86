use crate::error::RunError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One user submission. Never mutated once a run owns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    /// Natural-language instruction
    pub text: String,
    /// Text previously extracted by the UI from the visible page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_content: Option<String>,
    /// URL the UI is currently showing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    /// Earlier turns the caller wants carried into this run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_turns: Vec<ConversationTurn>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_content: None,
            current_url: None,
            prior_turns: Vec::new(),
        }
    }

    pub fn with_page(mut self, current_url: Option<String>, page_content: Option<String>) -> Self {
        self.current_url = current_url;
        self.page_content = page_content;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TurnRole {
    User,
    Assistant,
    ActionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    /// Unix milliseconds
    pub timestamp: u64,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// The next step chosen by the reasoning backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionRequest {
    /// Load a URL, then extract its content
    Navigate { url: String },
    /// Extract the content of the current page
    ExtractContent,
    /// Stop and answer
    FinalAnswer { text: String },
}

impl ActionRequest {
    /// Short label used in logs and progress events
    pub fn label(&self) -> String {
        match self {
            ActionRequest::Navigate { url } => format!("navigate {}", url),
            ActionRequest::ExtractContent => "extract_content".to_string(),
            ActionRequest::FinalAnswer { .. } => "final_answer".to_string(),
        }
    }
}

/// One reasoning step: the chosen action plus the model's rationale
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: ActionRequest,
    pub rationale: Option<String>,
}

impl Decision {
    pub fn new(action: ActionRequest) -> Self {
        Self {
            action,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        let rationale = rationale.into();
        if !rationale.trim().is_empty() {
            self.rationale = Some(rationale);
        }
        self
    }
}

/// Last committed navigation of the browser surface
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageState {
    pub url: String,
    pub title: String,
}

impl PageState {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }

    /// True when nothing meaningful has been loaded yet
    pub fn is_blank(&self) -> bool {
        self.url.is_empty() || self.url == "about:blank"
    }
}

/// Lifecycle of one orchestration run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Terminal output for one query: `{"content": ..}` or `{"error": ..}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Content(String),
    Error(String),
}

impl Response {
    pub fn content(&self) -> Option<&str> {
        match self {
            Response::Content(text) => Some(text),
            Response::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Response::Content(_) => None,
            Response::Error(message) => Some(message),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl From<RunError> for Response {
    fn from(err: RunError) -> Self {
        Response::Error(err.to_string())
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Reasoning steps taken
    pub steps: u32,
    pub response: Response,
    pub elapsed_ms: u64,
}

/// LLM message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// LLM response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Progress notifications published while a run is in flight
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        query: String,
    },
    StepCompleted {
        run_id: String,
        step: u32,
        action: String,
        outcome: String,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        steps: u32,
    },
    ManualNavigation {
        url: String,
        ok: bool,
    },
}
