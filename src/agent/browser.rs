//! Browser control surface seam and page-text normalization.
//!
//! The orchestrator only ever talks to a [`BrowserSurface`]; the CDP client in
//! [`crate::agent::cdp`] is the production implementation.

use crate::agent::types::PageState;
use crate::error::{ExtractionError, NavigationError};
use async_trait::async_trait;

/// Appended to any text cut at a character budget
pub const TRUNCATION_MARKER: &str = "\n[... content truncated]";

/// A single navigable browser view
#[async_trait]
pub trait BrowserSurface: Send + Sync {
    /// Load `url` and wait for it to commit
    async fn navigate(&self, url: &str) -> Result<PageState, NavigationError>;

    /// Last committed navigation. Never blocks on in-flight browser work.
    fn get_state(&self) -> PageState;

    /// Bounded plain-text rendering of the loaded page
    async fn extract_content(&self) -> Result<String, ExtractionError>;
}

/// Check that `raw` is an absolute URL the browser may load
pub fn validate_url(raw: &str) -> Result<url::Url, NavigationError> {
    let trimmed = raw.trim();
    let parsed =
        url::Url::parse(trimmed).map_err(|_| NavigationError::InvalidUrl(raw.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {
            if parsed.host_str().map_or(true, str::is_empty) {
                return Err(NavigationError::InvalidUrl(raw.to_string()));
            }
        }
        "file" | "about" => {}
        _ => return Err(NavigationError::InvalidUrl(raw.to_string())),
    }

    Ok(parsed)
}

/// Whether two URLs point at the same page once normalized
pub fn same_page(a: &str, b: &str) -> bool {
    match (url::Url::parse(a.trim()), url::Url::parse(b.trim())) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(text[..byte_idx].trim_end());
            out.push_str(TRUNCATION_MARKER);
            out
        }
    }
}

/// Collapse whitespace and blank-line runs in page text, then bound it
pub fn normalize_text(raw: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_chars + TRUNCATION_MARKER.len()));
    let mut pending_blank = false;

    for line in raw.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(&collapsed);
    }

    truncate_text(&out, max_chars)
}
