use crate::agent::{CdpBrowser, LLMClient, Orchestrator};
use crate::api::ws::EventBroadcaster;
use crate::bridge::{Bridge, OrchestratorBridge};
use crate::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;

/// Application global state
#[derive(Clone)]
pub struct AppState {
    /// The only handle the transports get on the core
    pub bridge: Arc<dyn Bridge>,
    /// Run progress feed for WebSocket clients
    pub events: EventBroadcaster,
    /// Owned so the launched Chrome can be closed on shutdown
    browser: Option<Arc<CdpBrowser>>,
}

impl AppState {
    /// Wire the CDP browser, the configured LLM and the orchestrator together
    pub fn new(config: &AppConfig) -> Self {
        let events = EventBroadcaster::new();
        let browser = Arc::new(CdpBrowser::new(config.browser.clone()));
        let reasoner = Arc::new(LLMClient::new(config.ai.clone()));

        let orchestrator = Orchestrator::new(reasoner, browser.clone(), config.orchestrator.clone())
            .with_request_timeout(Duration::from_secs(config.ai.request_timeout_seconds))
            .with_events(events.sender());
        let bridge = OrchestratorBridge::new(Arc::new(orchestrator)).with_events(events.sender());

        Self {
            bridge: Arc::new(bridge),
            events,
            browser: Some(browser),
        }
    }

    /// State around an existing bridge (tests, embedding hosts)
    pub fn with_bridge(bridge: Arc<dyn Bridge>, events: EventBroadcaster) -> Self {
        Self {
            bridge,
            events,
            browser: None,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(browser) = &self.browser {
            browser.shutdown().await;
        }
    }
}
