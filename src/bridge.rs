//! Request/response contract between the UI host and the core.
//!
//! One run executes at a time. A second query waits its turn; any query
//! beyond that is rejected with `Busy`. Manual navigation during a run
//! supersedes the run.

use crate::agent::browser::{validate_url, BrowserSurface};
use crate::agent::engine::Orchestrator;
use crate::agent::types::{PageState, Query, Response, RunEvent};
use crate::error::RunError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

/// The running query plus at most one waiting
const MAX_IN_FLIGHT: usize = 2;

/// Operations the UI host may invoke
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Admit a query and run it to completion. `Err` means the query was
    /// never admitted (`Busy`); run failures come back in the Response.
    async fn submit_query(
        &self,
        text: String,
        page_content: Option<String>,
        current_url: Option<String>,
    ) -> Result<Response, RunError>;

    /// Run a query to completion. Never fails: errors come back in the Response.
    async fn send_query(
        &self,
        text: String,
        page_content: Option<String>,
        current_url: Option<String>,
    ) -> Response {
        self.submit_query(text, page_content, current_url)
            .await
            .unwrap_or_else(Response::from)
    }

    /// Manual navigation outside the reasoning loop
    async fn navigate_browser(&self, url: String) -> Result<PageState, String>;

    /// Last committed navigation; answers immediately even mid-run
    fn get_browser_state(&self) -> PageState;
}

/// Bridge backed by an [`Orchestrator`] and its browser surface
pub struct OrchestratorBridge {
    orchestrator: Arc<Orchestrator>,
    run_slot: Mutex<()>,
    in_flight: AtomicUsize,
    active: parking_lot::Mutex<Option<CancellationToken>>,
    events: Option<broadcast::Sender<RunEvent>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl OrchestratorBridge {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            run_slot: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            active: parking_lot::Mutex::new(None),
            events: None,
        }
    }

    /// Publish manual-navigation events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn surface(&self) -> &Arc<dyn BrowserSurface> {
        self.orchestrator.surface()
    }

    /// Queue `query` behind the active run and answer it
    pub async fn submit(&self, query: Query) -> Result<Response, RunError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= MAX_IN_FLIGHT {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Rejecting query: a run is active and another is queued");
            return Err(RunError::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        // tokio's Mutex hands the slot out in FIFO order
        let _slot = self.run_slot.lock().await;

        let cancel = CancellationToken::new();
        *self.active.lock() = Some(cancel.clone());
        let report = self.orchestrator.run_report(query, cancel).await;
        self.active.lock().take();

        Ok(report.response)
    }
}

#[async_trait]
impl Bridge for OrchestratorBridge {
    async fn submit_query(
        &self,
        text: String,
        page_content: Option<String>,
        current_url: Option<String>,
    ) -> Result<Response, RunError> {
        self.submit(Query::new(text).with_page(current_url, page_content))
            .await
    }

    async fn navigate_browser(&self, url: String) -> Result<PageState, String> {
        // A URL that cannot be loaded leaves the active run alone
        validate_url(&url).map_err(|e| {
            tracing::warn!("Rejected manual navigation: {}", e);
            e.to_string()
        })?;

        if let Some(active) = self.active.lock().take() {
            tracing::info!("Manual navigation to {} supersedes the active run", url);
            active.cancel();
        }

        let result = self.surface().navigate(&url).await;
        if let Some(tx) = &self.events {
            let _ = tx.send(RunEvent::ManualNavigation {
                url: url.clone(),
                ok: result.is_ok(),
            });
        }

        result.map_err(|e| {
            tracing::warn!("Manual navigation to {} failed: {}", url, e);
            e.to_string()
        })
    }

    fn get_browser_state(&self) -> PageState {
        self.surface().get_state()
    }
}
