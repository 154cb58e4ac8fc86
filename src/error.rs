use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure of `BrowserSurface::navigate`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationError {
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("page load timed out after {0}ms")]
    LoadTimeout(u64),

    #[error("network error: {0}")]
    Network(String),
}

impl NavigationError {
    /// Network failures are the only navigation failures worth a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, NavigationError::Network(_))
    }
}

/// Failure of `BrowserSurface::extract_content`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("no page is loaded")]
    NotLoaded,

    #[error("page content is not text: {0}")]
    Unsupported(String),
}

/// Failure of `ReasoningClient::decide`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("reasoning backend timed out")]
    Timeout,

    #[error("reasoning backend unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("malformed reasoning response: {0}")]
    MalformedResponse(String),
}

impl ReasoningError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReasoningError::Timeout | ReasoningError::ServiceUnavailable(_)
        )
    }
}

/// Terminal failures of a query, as reported to the bridge caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("another query is already running and one is queued; try again later")]
    Busy,

    #[error("query was superseded by a manual navigation")]
    Superseded,

    #[error("query text must not be empty")]
    EmptyQuery,

    #[error("reasoning failed after retry: {0}")]
    Reasoning(ReasoningError),

    #[error("could not complete within step budget of {max_steps} steps{}", partial_suffix(.last_url, .last_content))]
    StepBudgetExceeded {
        max_steps: u32,
        last_url: Option<String>,
        last_content: Option<String>,
    },

    #[error("timed out after {elapsed_secs}s (incomplete){}", partial_suffix(&None, .last_content))]
    TimedOut {
        elapsed_secs: u64,
        last_content: Option<String>,
    },
}

fn partial_suffix(url: &Option<String>, content: &Option<String>) -> String {
    let mut out = String::new();
    if let Some(url) = url {
        out.push_str(&format!("; last page: {}", url));
    }
    if let Some(content) = content {
        out.push_str(&format!("; last extracted content: {}", content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_budget_message_includes_partial_content() {
        let err = RunError::StepBudgetExceeded {
            max_steps: 10,
            last_url: Some("https://example.com/".to_string()),
            last_content: Some("Example Domain".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("step budget of 10"));
        assert!(msg.contains("https://example.com/"));
        assert!(msg.contains("Example Domain"));
    }

    #[test]
    fn test_timed_out_message_marks_incomplete() {
        let err = RunError::TimedOut {
            elapsed_secs: 60,
            last_content: None,
        };
        assert_eq!(err.to_string(), "timed out after 60s (incomplete)");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ReasoningError::Timeout.is_transient());
        assert!(ReasoningError::ServiceUnavailable("503".into()).is_transient());
        assert!(!ReasoningError::MalformedResponse("x".into()).is_transient());
        assert!(NavigationError::Network("reset".into()).is_transient());
        assert!(!NavigationError::InvalidUrl("x".into()).is_transient());
    }
}
