//! Integration tests for the query orchestrator control loop.
//! Runs against the in-memory reasoner and browser from `common`.

mod common;

use browsion_query_lib::agent::browser::BrowserSurface;
use browsion_query_lib::agent::engine::Orchestrator;
use browsion_query_lib::agent::types::{
    ConversationTurn, Query, Response, RunEvent, RunStatus, TurnRole,
};
use browsion_query_lib::config::OrchestratorConfig;
use browsion_query_lib::error::{NavigationError, ReasoningError};
use common::{answer, extract, navigate, test_config, FakeBrowser, ScriptedReasoner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const EXAMPLE_URL: &str = "https://example.com";
const EXAMPLE_TEXT: &str = "Example Domain\n\nThis domain is for use in illustrative examples in documents.";

fn example_browser() -> FakeBrowser {
    FakeBrowser::new().with_page(EXAMPLE_URL, "Example Domain", EXAMPLE_TEXT)
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_backoff_ms: 10,
        ..test_config()
    }
}

fn orchestrator(
    reasoner: &Arc<ScriptedReasoner>,
    browser: &Arc<FakeBrowser>,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(reasoner.clone(), browser.clone(), config)
}

fn assert_one_key(response: &Response) {
    let json = serde_json::to_value(response).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 1, "Response must carry exactly one key: {}", json);
    let value = obj.values().next().unwrap().as_str().unwrap();
    assert!(!value.is_empty());
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_summarize_example_com_in_two_steps() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL),
        answer("This page is a placeholder domain."),
    ]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let report = orch
        .run_report(Query::new("summarize example.com"), CancellationToken::new())
        .await;

    assert_eq!(
        report.response,
        Response::Content("This page is a placeholder domain.".into())
    );
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.steps, 2);
    assert_eq!(reasoner.call_count(), 2);
    assert_eq!(browser.navigation_count(), 1);
    assert_eq!(browser.extraction_count(), 1);

    // The second reasoning step sees the extracted page
    let second = reasoner.context(1);
    let last = second.turns().last().unwrap();
    assert_eq!(last.role, TurnRole::ActionResult);
    assert!(last.content.contains("Example Domain"));
    assert_eq!(second.query().content, "summarize example.com");
}

#[tokio::test]
async fn test_network_failure_is_folded_into_context() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL),
        answer("Could not reach the site."),
    ]));
    let browser = Arc::new(example_browser().failing_with(vec![
        NavigationError::Network("net::ERR_CONNECTION_REFUSED".into()),
        NavigationError::Network("net::ERR_CONNECTION_REFUSED".into()),
    ]));
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let response = orch.run(Query::new("summarize example.com")).await;

    assert_eq!(response, Response::Content("Could not reach the site.".into()));
    // One retry after the first network failure
    assert_eq!(browser.navigation_count(), 2);
    assert_eq!(browser.extraction_count(), 0);

    let failure_turn = reasoner.context(1).turns().last().unwrap().clone();
    assert_eq!(failure_turn.role, TurnRole::ActionResult);
    assert!(failure_turn.content.contains("failed"));
}

#[tokio::test]
async fn test_single_network_failure_recovers_on_retry() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL),
        answer("placeholder"),
    ]));
    let browser = Arc::new(
        example_browser().failing_with(vec![NavigationError::Network("reset".into())]),
    );
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let response = orch.run(Query::new("summarize example.com")).await;

    assert_eq!(response, Response::Content("placeholder".into()));
    assert_eq!(browser.navigation_count(), 2);
    assert!(reasoner
        .context(1)
        .turns()
        .last()
        .unwrap()
        .content
        .contains("Example Domain"));
}

#[tokio::test]
async fn test_load_timeout_is_not_retried() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL),
        answer("too slow"),
    ]));
    let browser = Arc::new(
        example_browser().failing_with(vec![NavigationError::LoadTimeout(15_000)]),
    );
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let response = orch.run(Query::new("open it")).await;

    assert_eq!(response, Response::Content("too slow".into()));
    assert_eq!(browser.navigation_count(), 1);
}

#[tokio::test]
async fn test_two_reasoning_timeouts_fail_the_run() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        Err(ReasoningError::Timeout),
        Err(ReasoningError::Timeout),
    ]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let report = orch
        .run_report(Query::new("anything"), CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(reasoner.call_count(), 2);
    let error = report.response.error().unwrap();
    assert!(error.contains("reasoning"), "unexpected error: {}", error);
    assert!(report.response.content().is_none());
}

#[tokio::test]
async fn test_transient_reasoning_failure_retried_once() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        Err(ReasoningError::ServiceUnavailable("HTTP 503".into())),
        Ok(answer("second time lucky")),
    ]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let report = orch
        .run_report(Query::new("anything"), CancellationToken::new())
        .await;

    assert_eq!(report.response, Response::Content("second time lucky".into()));
    // A retry is not a new step
    assert_eq!(report.steps, 1);
    assert_eq!(reasoner.call_count(), 2);
}

#[tokio::test]
async fn test_step_budget_reports_last_content() {
    let reasoner = Arc::new(
        ScriptedReasoner::decisions(vec![navigate(EXAMPLE_URL)]).repeating(extract()),
    );
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let report = orch
        .run_report(Query::new("keep reading"), CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.steps, 10);
    assert_eq!(reasoner.call_count(), 10);
    let error = report.response.error().unwrap();
    assert!(error.contains("step budget"));
    assert!(error.contains("https://example.com"));
    assert!(error.contains("Example Domain"));
}

#[tokio::test]
async fn test_step_budget_without_progress_still_reports() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![]).repeating(extract()));
    let browser = Arc::new(example_browser());
    let config = OrchestratorConfig {
        max_steps: 3,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config);

    let response = orch.run(Query::new("read the page")).await;

    assert_eq!(reasoner.call_count(), 3);
    assert!(response.error().unwrap().contains("3 steps"));
    assert_one_key(&response);
}

#[tokio::test]
async fn test_step_budget_names_page_already_open() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![]).repeating(extract()));
    let browser = Arc::new(FakeBrowser::new().with_page(
        "https://news.test/",
        "News",
        "Headline one",
    ));
    browser.navigate("https://news.test/").await.unwrap();
    let config = OrchestratorConfig {
        max_steps: 3,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config);

    let response = orch.run(Query::new("what is the top story?")).await;

    let error = response.error().unwrap();
    assert!(error.contains("last page: https://news.test/"));
    assert!(error.contains("Headline one"));
    assert_eq!(browser.navigation_count(), 1);
}

#[tokio::test]
async fn test_step_budget_falls_back_to_query_url() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![]).repeating(extract()));
    let browser = Arc::new(example_browser());
    let config = OrchestratorConfig {
        max_steps: 2,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config);

    let query = Query::new("what is this?").with_page(Some("https://viewed.test/".into()), None);
    let response = orch.run(query).await;

    assert!(response
        .error()
        .unwrap()
        .contains("last page: https://viewed.test/"));
}

// ---------------------------------------------------------------------------
// Loop guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_repeat_navigation_becomes_extraction() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL),
        navigate("https://example.com/"),
        answer("done"),
    ]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let response = orch.run(Query::new("read example.com")).await;

    assert_eq!(response, Response::Content("done".into()));
    assert_eq!(browser.navigation_count(), 1);
    // Auto-extract after the navigation plus the rewritten step
    assert_eq!(browser.extraction_count(), 2);
}

#[tokio::test]
async fn test_insistent_navigation_never_reloads() {
    let reasoner =
        Arc::new(ScriptedReasoner::decisions(vec![]).repeating(navigate(EXAMPLE_URL)));
    let browser = Arc::new(example_browser());
    let config = OrchestratorConfig {
        max_steps: 5,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config);

    let response = orch.run(Query::new("loop forever")).await;

    assert!(response.is_error());
    assert_eq!(reasoner.call_count(), 5);
    assert_eq!(browser.navigation_count(), 1);
}

#[tokio::test]
async fn test_navigation_to_new_page_is_not_guarded() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL),
        navigate("https://example.org"),
        navigate(EXAMPLE_URL),
        answer("compared"),
    ]));
    let browser = Arc::new(
        example_browser().with_page("https://example.org", "Example Org", "Another page"),
    );
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let response = orch.run(Query::new("compare the two")).await;

    assert_eq!(response, Response::Content("compared".into()));
    assert_eq!(browser.navigation_count(), 3);
}

// ---------------------------------------------------------------------------
// Malformed replies and response shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_reply_becomes_diagnostic_answer() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![Err(
        ReasoningError::MalformedResponse("no JSON object in reply".into()),
    )]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let report = orch
        .run_report(Query::new("hello"), CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(reasoner.call_count(), 1);
    let content = report.response.content().unwrap();
    assert!(content.contains("could not be understood"));
    assert_one_key(&report.response);
}

#[tokio::test]
async fn test_every_outcome_has_exactly_one_key() {
    let scripts: Vec<Vec<Result<_, ReasoningError>>> = vec![
        vec![Ok(answer("direct"))],
        vec![Err(ReasoningError::MalformedResponse("garbage".into()))],
        vec![
            Err(ReasoningError::ServiceUnavailable("down".into())),
            Err(ReasoningError::ServiceUnavailable("down".into())),
        ],
        vec![Ok(navigate("https://unknown.invalid")), Ok(answer("gone"))],
    ];

    for script in scripts {
        let reasoner = Arc::new(ScriptedReasoner::new(script));
        let browser = Arc::new(example_browser());
        let orch = orchestrator(&reasoner, &browser, fast_config());
        let response = orch.run(Query::new("q")).await;
        assert_one_key(&response);
    }
}

#[tokio::test]
async fn test_empty_query_rejected_without_reasoning() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![answer("unused")]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let report = orch
        .run_report(Query::new("   "), CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.steps, 0);
    assert_eq!(reasoner.call_count(), 0);
    assert!(report.response.error().unwrap().contains("empty"));
}

// ---------------------------------------------------------------------------
// Deadline and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_deadline_returns_incomplete_partial_content() {
    let reasoner = Arc::new(
        ScriptedReasoner::decisions(vec![navigate(EXAMPLE_URL)])
            .repeating(extract())
            .with_delay(Duration::from_millis(400)),
    );
    let browser = Arc::new(example_browser());
    let config = OrchestratorConfig {
        deadline_seconds: 1,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config);

    let started = std::time::Instant::now();
    let report = orch
        .run_report(Query::new("slow thinking"), CancellationToken::new())
        .await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.status, RunStatus::TimedOut);
    let error = report.response.error().unwrap();
    assert!(error.contains("incomplete"));
    assert!(error.contains("Example Domain"));
    assert!(report.steps < 10);
}

#[tokio::test]
async fn test_reasoning_timeout_never_exceeds_remaining_time() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![answer("quick")]));
    let browser = Arc::new(example_browser());
    let config = OrchestratorConfig {
        deadline_seconds: 2,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config)
        .with_request_timeout(Duration::from_secs(30));

    orch.run(Query::new("q")).await;

    let timeouts = reasoner.timeouts.lock().clone();
    assert_eq!(timeouts.len(), 1);
    assert!(timeouts[0] <= Duration::from_secs(2));
}

#[tokio::test]
async fn test_cancelled_run_is_superseded() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let reasoner = Arc::new(
        ScriptedReasoner::decisions(vec![answer("never delivered")]).gated(gate.clone()),
    );
    let browser = Arc::new(example_browser());
    let orch = Arc::new(orchestrator(&reasoner, &browser, fast_config()));

    let cancel = CancellationToken::new();
    let handle = {
        let orch = orch.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orch.run_report(Query::new("q"), cancel).await })
    };

    reasoner.entered.notified().await;
    cancel.cancel();
    let report = handle.await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.response.error().unwrap().contains("superseded"));
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_page_context_seeds_first_step() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![answer("It is a placeholder.")]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let query = Query::new("what is this page?")
        .with_page(Some(EXAMPLE_URL.into()), Some(EXAMPLE_TEXT.into()));
    let response = orch.run(query).await;

    assert_eq!(response, Response::Content("It is a placeholder.".into()));
    assert_eq!(browser.navigation_count(), 0);
    let first = reasoner.context(0);
    assert!(first
        .turns()
        .iter()
        .any(|t| t.content.contains("illustrative examples")));
    assert_eq!(first.turns().last().unwrap().content, "what is this page?");
}

#[tokio::test]
async fn test_context_is_bounded_but_keeps_query() {
    let reasoner = Arc::new(
        ScriptedReasoner::decisions(vec![navigate(EXAMPLE_URL)])
            .repeating(extract().with_rationale("reading again")),
    );
    let browser = Arc::new(example_browser());
    let config = OrchestratorConfig {
        max_steps: 6,
        max_context_turns: 4,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config);

    let mut query = Query::new("the original question");
    query.prior_turns = vec![ConversationTurn::new(TurnRole::User, "an old question")];
    orch.run(query).await;

    let last = reasoner.context(reasoner.call_count() - 1);
    assert!(last.len() <= 4);
    assert_eq!(last.query().content, "the original question");
    assert!(!last.turns().iter().any(|t| t.content == "an old question"));
}

#[tokio::test]
async fn test_long_query_still_sees_extracted_page() {
    let page = format!("Long article\n{}", "word ".repeat(2000));
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate("https://long.test/"),
        answer("done"),
    ]));
    let browser = Arc::new(FakeBrowser::new().with_page("https://long.test/", "Long", &page));
    let orch = orchestrator(&reasoner, &browser, fast_config());

    let question = format!("Summarize this. {}", "Context. ".repeat(450));
    assert!(question.len() > 4000);
    orch.run(Query::new(question)).await;

    let second = reasoner.context(1);
    let last = second.turns().last().unwrap();
    assert_eq!(last.role, TurnRole::ActionResult);
    assert!(last.content.contains("Long article"));
}

#[tokio::test]
async fn test_tight_budget_still_sees_extracted_page() {
    let page = format!("Long article\n{}", "word ".repeat(2000));
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate("https://long.test/"),
        answer("done"),
    ]));
    let browser = Arc::new(FakeBrowser::new().with_page("https://long.test/", "Long", &page));
    let config = OrchestratorConfig {
        context_char_budget: 3000,
        max_turn_chars: 4000,
        ..fast_config()
    };
    let orch = orchestrator(&reasoner, &browser, config);

    orch.run(Query::new("summarize long.test")).await;

    let second = reasoner.context(1);
    assert_eq!(second.len(), 2);
    assert!(second.turns()[1].content.contains("Long article"));
}

#[tokio::test]
async fn test_rationale_recorded_as_assistant_turn() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL).with_rationale("The user asked about example.com"),
        answer("done"),
    ]));
    let browser = Arc::new(example_browser());
    let orch = orchestrator(&reasoner, &browser, fast_config());

    orch.run(Query::new("summarize example.com")).await;

    let second = reasoner.context(1);
    assert!(second
        .turns()
        .iter()
        .any(|t| t.role == TurnRole::Assistant
            && t.content == "The user asked about example.com"));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_progress_events_bracket_the_run() {
    let reasoner = Arc::new(ScriptedReasoner::decisions(vec![
        navigate(EXAMPLE_URL),
        answer("done"),
    ]));
    let browser = Arc::new(example_browser());
    let (tx, mut rx) = broadcast::channel(16);
    let orch = orchestrator(&reasoner, &browser, fast_config()).with_events(tx);

    orch.run(Query::new("summarize example.com")).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], RunEvent::RunStarted { .. }));
    assert!(matches!(events[1], RunEvent::StepCompleted { step: 1, .. }));
    assert!(matches!(events[2], RunEvent::StepCompleted { step: 2, .. }));
    match &events[3] {
        RunEvent::RunFinished { status, steps, .. } => {
            assert_eq!(*status, RunStatus::Succeeded);
            assert_eq!(*steps, 2);
        }
        other => panic!("unexpected final event: {:?}", other),
    }
}
