use crate::agent::browser::{truncate_text, BrowserSurface};
use crate::agent::types::{ActionRequest, PageState};
use std::time::Duration;

/// Execute one browser-side action.
///
/// Failures are reported in the result, never returned as errors: the
/// reasoning step sees them on its next turn and may adapt.
pub async fn execute_action(
    surface: &dyn BrowserSurface,
    action: &ActionRequest,
    retry_backoff: Duration,
) -> ActionResult {
    match action {
        ActionRequest::Navigate { url } => {
            let mut navigated = surface.navigate(url).await;
            if let Err(e) = &navigated {
                if e.is_transient() {
                    tracing::warn!("Navigation to {} failed ({}), retrying once", url, e);
                    tokio::time::sleep(retry_backoff).await;
                    navigated = surface.navigate(url).await;
                }
            }

            let page = match navigated {
                Ok(page) => page,
                Err(e) => {
                    return ActionResult::failure(format!("Navigation to {} failed: {}", url, e))
                }
            };

            match surface.extract_content().await {
                Ok(text) => ActionResult::with_content(
                    format!("Navigated to {}", describe_page(&page)),
                    Some(page),
                    text,
                ),
                Err(e) => ActionResult {
                    success: true,
                    message: format!(
                        "Navigated to {}, but its content could not be read: {}",
                        describe_page(&page),
                        e
                    ),
                    page: Some(page),
                    content: None,
                },
            }
        }

        ActionRequest::ExtractContent => match surface.extract_content().await {
            Ok(text) => {
                let page = surface.get_state();
                ActionResult::with_content(
                    format!("Extracted content of {}", describe_page(&page)),
                    None,
                    text,
                )
            }
            Err(e) => ActionResult::failure(format!("Content extraction failed: {}", e)),
        },

        ActionRequest::FinalAnswer { .. } => ActionResult::success("Final answer given"),
    }
}

fn describe_page(page: &PageState) -> String {
    if page.title.trim().is_empty() {
        page.url.clone()
    } else {
        format!("{} ({})", page.url, page.title.trim())
    }
}

/// Result of an action execution
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    /// Whether the action succeeded
    pub success: bool,
    /// Human-readable message
    pub message: String,
    /// Page committed by a navigation
    pub page: Option<PageState>,
    /// Extracted page text
    pub content: Option<String>,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            page: None,
            content: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            page: None,
            content: None,
        }
    }

    pub fn with_content(
        message: impl Into<String>,
        page: Option<PageState>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            message: message.into(),
            page,
            content: Some(content.into()),
        }
    }

    /// Text of the action-result turn, page content cut at `max_chars`
    pub fn turn_text(&self, max_chars: usize) -> String {
        match &self.content {
            Some(content) if content.trim().is_empty() => {
                format!("{}\nThe page has no readable text.", self.message)
            }
            Some(content) => format!(
                "{}\nPage content:\n{}",
                self.message,
                truncate_text(content, max_chars)
            ),
            None => self.message.clone(),
        }
    }
}
