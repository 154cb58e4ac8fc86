//! In-memory reasoning client and browser surface shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use browsion_query_lib::agent::browser::{normalize_text, validate_url, BrowserSurface};
use browsion_query_lib::agent::context::ConversationContext;
use browsion_query_lib::agent::llm::ReasoningClient;
use browsion_query_lib::agent::types::{ActionRequest, Decision, PageState};
use browsion_query_lib::config::OrchestratorConfig;
use browsion_query_lib::error::{ExtractionError, NavigationError, ReasoningError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

pub fn navigate(url: &str) -> Decision {
    Decision::new(ActionRequest::Navigate {
        url: url.to_string(),
    })
}

pub fn extract() -> Decision {
    Decision::new(ActionRequest::ExtractContent)
}

pub fn answer(text: &str) -> Decision {
    Decision::new(ActionRequest::FinalAnswer {
        text: text.to_string(),
    })
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
}

/// Replays scripted replies, then repeats `fallback` (or a final answer)
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<Result<Decision, ReasoningError>>>,
    fallback: Option<Decision>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
    pub calls: AtomicUsize,
    pub contexts: Mutex<Vec<ConversationContext>>,
    pub timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<Result<Decision, ReasoningError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            delay: None,
            gate: None,
            entered: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    pub fn decisions(decisions: Vec<Decision>) -> Self {
        Self::new(decisions.into_iter().map(Ok).collect())
    }

    /// Reply with `decision` forever once the script runs out
    pub fn repeating(mut self, decision: Decision) -> Self {
        self.fallback = Some(decision);
        self
    }

    /// Take `delay` before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block every reply until a permit is added to `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context seen by the `n`th call (0-based)
    pub fn context(&self, n: usize) -> ConversationContext {
        self.contexts.lock()[n].clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoner {
    async fn decide(
        &self,
        context: &ConversationContext,
        timeout: Duration,
    ) -> Result<Decision, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(context.clone());
        self.timeouts.lock().push(timeout);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.replies.lock().pop_front();
        match scripted {
            Some(reply) => reply,
            None => Ok(self
                .fallback
                .clone()
                .unwrap_or_else(|| answer("script exhausted"))),
        }
    }
}

/// A browser that knows a fixed set of pages
pub struct FakeBrowser {
    pages: HashMap<String, (String, String)>,
    state: Mutex<PageState>,
    failures: Mutex<VecDeque<NavigationError>>,
    pub navigations: Mutex<Vec<String>>,
    pub extractions: AtomicUsize,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            state: Mutex::new(PageState::default()),
            failures: Mutex::new(VecDeque::new()),
            navigations: Mutex::new(Vec::new()),
            extractions: AtomicUsize::new(0),
        }
    }

    pub fn with_page(mut self, url: &str, title: &str, content: &str) -> Self {
        self.pages
            .insert(url.to_string(), (title.to_string(), content.to_string()));
        self
    }

    /// Fail the next navigations with these errors, in order
    pub fn failing_with(self, errors: Vec<NavigationError>) -> Self {
        *self.failures.lock() = errors.into();
        self
    }

    pub fn navigation_count(&self) -> usize {
        self.navigations.lock().len()
    }

    pub fn extraction_count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserSurface for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<PageState, NavigationError> {
        validate_url(url)?;
        self.navigations.lock().push(url.to_string());

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        match self.pages.get(url) {
            Some((title, _)) => {
                let page = PageState::new(url, title.as_str());
                *self.state.lock() = page.clone();
                Ok(page)
            }
            None => Err(NavigationError::Network("net::ERR_NAME_NOT_RESOLVED".into())),
        }
    }

    fn get_state(&self) -> PageState {
        self.state.lock().clone()
    }

    async fn extract_content(&self) -> Result<String, ExtractionError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        let state = self.get_state();
        if state.is_blank() {
            return Err(ExtractionError::NotLoaded);
        }
        let (_, content) = self
            .pages
            .get(&state.url)
            .ok_or(ExtractionError::NotLoaded)?;
        Ok(normalize_text(content, 8000))
    }
}
