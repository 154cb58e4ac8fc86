use crate::agent::action::execute_action;
use crate::agent::browser::{same_page, truncate_text, BrowserSurface};
use crate::agent::context::ConversationContext;
use crate::agent::llm::ReasoningClient;
use crate::agent::types::{
    ActionRequest, Decision, Query, Response, RunEvent, RunReport, RunStatus, TurnRole,
};
use crate::config::schema::OrchestratorConfig;
use crate::error::{ReasoningError, RunError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default per-call budget for the reasoning backend
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Live state of one run. Owned by the run, dropped when it ends.
struct RunState {
    context: ConversationContext,
    started: Instant,
    deadline: Instant,
    steps: u32,
    last_url: Option<String>,
    /// Page the caller said they were viewing
    seeded_url: Option<String>,
    last_content: Option<String>,
    /// URLs (requested and committed) of the preceding step's navigation
    last_navigation: Option<(String, String)>,
}

impl RunState {
    fn timed_out(&self) -> RunError {
        RunError::TimedOut {
            elapsed_secs: self.started.elapsed().as_secs(),
            last_content: self.last_content.clone(),
        }
    }
}

/// Drives queries through the decide / act / observe loop
pub struct Orchestrator {
    reasoner: Arc<dyn ReasoningClient>,
    surface: Arc<dyn BrowserSurface>,
    config: OrchestratorConfig,
    request_timeout: Duration,
    events: Option<broadcast::Sender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(
        reasoner: Arc<dyn ReasoningClient>,
        surface: Arc<dyn BrowserSurface>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            reasoner,
            surface,
            config,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            events: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Publish progress events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn surface(&self) -> &Arc<dyn BrowserSurface> {
        &self.surface
    }

    /// Answer one query. Every failure is folded into the returned Response.
    pub async fn run(&self, query: Query) -> Response {
        self.run_report(query, CancellationToken::new()).await.response
    }

    /// Answer one query, stopping early with `Superseded` once `cancel` fires
    pub async fn run_report(&self, query: Query, cancel: CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if query.is_empty() {
            tracing::warn!("Rejected empty query");
            return RunReport {
                run_id,
                status: RunStatus::Failed,
                steps: 0,
                response: RunError::EmptyQuery.into(),
                elapsed_ms: 0,
            };
        }

        tracing::info!("Run {} started: {}", run_id, query.text.trim());
        self.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            query: query.text.trim().to_string(),
        });

        let mut run = RunState {
            context: ConversationContext::seed(&query, self.config.max_turn_chars),
            started,
            deadline: started + Duration::from_secs(self.config.deadline_seconds),
            steps: 0,
            last_url: None,
            seeded_url: query
                .current_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            last_content: None,
            last_navigation: None,
        };

        let (status, response) = match self.drive(&run_id, &mut run, &cancel).await {
            Ok(answer) => (RunStatus::Succeeded, Response::Content(answer)),
            Err(e) => {
                let status = match e {
                    RunError::TimedOut { .. } => RunStatus::TimedOut,
                    _ => RunStatus::Failed,
                };
                tracing::warn!("Run {} ended {:?}: {}", run_id, status, e);
                (status, Response::from(e))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Run {} finished: {:?} after {} steps in {}ms",
            run_id,
            status,
            run.steps,
            elapsed_ms
        );
        self.emit(RunEvent::RunFinished {
            run_id: run_id.clone(),
            status,
            steps: run.steps,
        });

        RunReport {
            run_id,
            status,
            steps: run.steps,
            response,
            elapsed_ms,
        }
    }

    async fn drive(
        &self,
        run_id: &str,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<String, RunError> {
        loop {
            if run.steps >= self.config.max_steps {
                return Err(RunError::StepBudgetExceeded {
                    max_steps: self.config.max_steps,
                    last_url: self.last_known_url(run),
                    last_content: run.last_content.clone(),
                });
            }
            if Instant::now() >= run.deadline {
                return Err(run.timed_out());
            }
            run.steps += 1;
            let step = run.steps;

            let decision = self.decide(run, cancel).await?;
            if let Some(rationale) = &decision.rationale {
                run.context.push(TurnRole::Assistant, rationale.clone());
            }

            let guarded = self.loop_guard(run, &decision.action);
            let action = if guarded {
                ActionRequest::ExtractContent
            } else {
                decision.action
            };
            tracing::info!("Run {} step {}: {}", run_id, step, action.label());

            if let ActionRequest::FinalAnswer { text } = action {
                self.emit(RunEvent::StepCompleted {
                    run_id: run_id.to_string(),
                    step,
                    action: "final_answer".to_string(),
                    outcome: "answered".to_string(),
                });
                return Ok(text);
            }

            let backoff = Duration::from_millis(self.config.retry_backoff_ms);
            let result = self
                .suspend(
                    execute_action(self.surface.as_ref(), &action, backoff),
                    run,
                    cancel,
                )
                .await?;

            if let Some(page) = &result.page {
                run.last_url = Some(page.url.clone());
            }
            if let Some(content) = result.content.as_deref().filter(|c| !c.trim().is_empty()) {
                run.last_content = Some(truncate_text(content, self.config.max_turn_chars));
            }
            // A rewritten repeat keeps guarding the same page
            if !guarded {
                run.last_navigation = match (&action, &result.page) {
                    (ActionRequest::Navigate { url }, Some(page)) => {
                        Some((url.clone(), page.url.clone()))
                    }
                    _ => None,
                };
            }

            run.context
                .push(TurnRole::ActionResult, result.turn_text(self.config.max_turn_chars));
            self.emit(RunEvent::StepCompleted {
                run_id: run_id.to_string(),
                step,
                action: action.label(),
                outcome: result.message.clone(),
            });
        }
    }

    /// Page of the run's last navigation, else the browser's current page,
    /// else the page the query was asked from
    fn last_known_url(&self, run: &RunState) -> Option<String> {
        run.last_url.clone().or_else(|| {
            let state = self.surface.get_state();
            if state.is_blank() {
                run.seeded_url.clone()
            } else {
                Some(state.url)
            }
        })
    }

    /// One reasoning step with a single retry for transient failures
    async fn decide(
        &self,
        run: &RunState,
        cancel: &CancellationToken,
    ) -> Result<Decision, RunError> {
        let context = run
            .context
            .bounded(self.config.max_context_turns, self.config.context_char_budget);
        let mut retried = false;

        loop {
            let remaining = run.deadline.saturating_duration_since(Instant::now());
            let timeout = self.request_timeout.min(remaining);

            match self
                .suspend(self.reasoner.decide(&context, timeout), run, cancel)
                .await?
            {
                Ok(decision) => return Ok(decision),
                Err(ReasoningError::MalformedResponse(detail)) => {
                    tracing::warn!("Malformed reasoning reply: {}", detail);
                    return Ok(Decision::new(ActionRequest::FinalAnswer {
                        text: format!(
                            "Sorry, I could not produce an answer: the reasoning service returned a reply that could not be understood ({}).",
                            detail
                        ),
                    }));
                }
                Err(e) if e.is_transient() && !retried => {
                    tracing::warn!("Reasoning failed ({}), retrying once", e);
                    retried = true;
                    let backoff = Duration::from_millis(self.config.retry_backoff_ms);
                    self.suspend(tokio::time::sleep(backoff), run, cancel).await?;
                }
                Err(e) => return Err(RunError::Reasoning(e)),
            }
        }
    }

    /// Whether `action` re-navigates to the page the previous step loaded
    fn loop_guard(&self, run: &RunState, action: &ActionRequest) -> bool {
        if let (ActionRequest::Navigate { url }, Some((requested, committed))) =
            (action, &run.last_navigation)
        {
            if same_page(url, requested) || same_page(url, committed) {
                tracing::info!("Loop guard: {} is already loaded, extracting instead", url);
                return true;
            }
        }
        false
    }

    /// Await `fut` unless the run is cancelled or its deadline passes first
    async fn suspend<F: Future>(
        &self,
        fut: F,
        run: &RunState,
        cancel: &CancellationToken,
    ) -> Result<F::Output, RunError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunError::Superseded),
            _ = tokio::time::sleep_until(run.deadline) => Err(run.timed_out()),
            out = fut => Ok(out),
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
