use crate::agent::browser::{normalize_text, validate_url, BrowserSurface};
use crate::agent::types::PageState;
use crate::config::schema::BrowserConfig;
use crate::config::validation::validate_chrome_path;
use crate::error::{ExtractionError, NavigationError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const LAUNCH_RETRIES: u32 = 30;

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// CDP Client using raw WebSocket for better Chrome compatibility
pub struct CDPClient {
    /// WebSocket sender
    ws_tx: Option<Arc<Mutex<WsSink>>>,
    /// Pending command responses keyed by message id
    responses: Arc<Mutex<HashMap<u32, tokio::sync::oneshot::Sender<serde_json::Value>>>>,
    /// Chrome process ID, when we launched it
    chrome_pid: Option<u32>,
    msg_id: AtomicU32,
    cdp_port: u16,
    /// Cleared by the reader task when the socket goes away
    connected: Arc<AtomicBool>,
}

impl CDPClient {
    pub fn new(cdp_port: u16) -> Self {
        Self {
            ws_tx: None,
            responses: Arc::new(Mutex::new(HashMap::new())),
            chrome_pid: None,
            msg_id: AtomicU32::new(1),
            cdp_port,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.ws_tx.is_some() && self.connected.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for its result
    async fn send_command(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let tx = self.ws_tx.as_ref().ok_or("WebSocket not connected")?;

        let id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let (resp_tx, rx) = tokio::sync::oneshot::channel();
        self.responses.lock().await.insert(id, resp_tx);

        let command = json!({
            "id": id,
            "method": method,
            "params": params
        });

        let sent = tx
            .lock()
            .await
            .send(WsMessage::Text(command.to_string()))
            .await;
        if let Err(e) = sent {
            self.responses.lock().await.remove(&id);
            self.connected.store(false, Ordering::SeqCst);
            return Err(format!("Failed to send command: {}", e));
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err("Response channel closed".to_string()),
            Err(_) => {
                self.responses.lock().await.remove(&id);
                return Err(format!("Command timeout: {}", method));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown CDP error");
            return Err(format!("{} failed: {}", method, message));
        }

        Ok(response.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Evaluate an expression in the page and return its value
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, String> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true
                }),
            )
            .await?;

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Launch Chrome with CDP enabled and connect
    pub async fn launch(
        &mut self,
        chrome_path: &Path,
        user_data_dir: &Path,
        headless: bool,
    ) -> Result<(), String> {
        validate_chrome_path(chrome_path).map_err(|e| e.to_string())?;

        let mut cmd = Command::new(chrome_path);
        cmd.arg(format!("--user-data-dir={}", user_data_dir.display()));
        cmd.arg(format!("--remote-debugging-port={}", self.cdp_port));

        if headless {
            cmd.arg("--headless=new");
            cmd.arg("--disable-gpu");
        }

        cmd.arg("--no-first-run");
        cmd.arg("--no-default-browser-check");
        cmd.arg("--disable-background-networking");
        cmd.arg("--disable-sync");

        // Start about:blank to avoid loading a page
        cmd.arg("about:blank");

        let child = cmd
            .spawn()
            .map_err(|e| format!("Failed to launch Chrome: {}", e))?;
        self.chrome_pid = Some(child.id());
        tracing::info!(
            "Launched Chrome (pid {}) on CDP port {}",
            child.id(),
            self.cdp_port
        );

        // Give Chrome time to start and be ready for CDP connections
        let mut last_error = String::new();
        for attempt in 1..=LAUNCH_RETRIES {
            tokio::time::sleep(Duration::from_millis(500)).await;
            match self.connect_page_target().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!("Retry {}/{}: {}", attempt, LAUNCH_RETRIES, e);
                    last_error = e;
                }
            }
        }

        Err(format!(
            "Failed to connect to Chrome after {} retries: {}",
            LAUNCH_RETRIES, last_error
        ))
    }

    /// Attach to a Chrome already listening on the CDP port
    pub async fn attach(&mut self) -> Result<(), String> {
        self.connect_page_target().await
    }

    async fn connect_page_target(&mut self) -> Result<(), String> {
        let list_url = format!("http://127.0.0.1:{}/json/list", self.cdp_port);

        let response = reqwest::get(&list_url)
            .await
            .map_err(|e| format!("Connection error: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        let targets: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse targets response: {}", e))?;

        let ws_url = targets
            .as_array()
            .and_then(|arr| {
                arr.iter()
                    .find(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            })
            .ok_or("No page target found")?
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or("No webSocketDebuggerUrl in page target")?
            .to_string();

        tracing::info!("Connecting to page target WebSocket: {}", ws_url);
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| format!("Failed to connect WebSocket: {}", e))?;
        let (tx, mut rx) = StreamExt::split(ws_stream);

        self.ws_tx = Some(Arc::new(Mutex::new(tx)));
        self.connected.store(true, Ordering::SeqCst);

        let responses = self.responses.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) else {
                            continue;
                        };
                        // Events carry no id and are ignored
                        if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
                            if let Some(sender) = responses.lock().await.remove(&(id as u32)) {
                                let _ = sender.send(json);
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::debug!("WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("WebSocket error: {:?}", e);
                        break;
                    }
                    _ => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with a closed channel
            responses.lock().await.clear();
        });

        self.send_command("Page.enable", json!({})).await?;
        self.send_command("Runtime.enable", json!({})).await?;
        tracing::info!("CDP client connected on port {}", self.cdp_port);

        Ok(())
    }

    /// Navigate and wait until the document has finished loading
    pub async fn navigate(&self, url: &str, load_timeout: Duration) -> Result<PageState, NavigationError> {
        let result = self
            .send_command("Page.navigate", json!({ "url": url }))
            .await
            .map_err(NavigationError::Network)?;

        if let Some(error_text) = result
            .get("errorText")
            .and_then(|e| e.as_str())
            .filter(|e| !e.is_empty())
        {
            return Err(NavigationError::Network(error_text.to_string()));
        }

        let started = Instant::now();
        loop {
            tokio::time::sleep(READY_POLL_INTERVAL).await;
            let state = self
                .evaluate("document.readyState")
                .await
                .map_err(NavigationError::Network)?;
            if state.as_str() == Some("complete") {
                break;
            }
            if started.elapsed() >= load_timeout {
                return Err(NavigationError::LoadTimeout(load_timeout.as_millis() as u64));
            }
        }

        let page_url = self.get_url().await.map_err(NavigationError::Network)?;
        let title = self
            .get_title()
            .await
            .map_err(NavigationError::Network)?
            .unwrap_or_default();
        tracing::info!("Navigated to: {}", page_url);

        Ok(PageState::new(page_url, title))
    }

    /// Get current URL from browser
    pub async fn get_url(&self) -> Result<String, String> {
        Ok(self
            .evaluate("window.location.href")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// Get page title
    pub async fn get_title(&self) -> Result<Option<String>, String> {
        Ok(self
            .evaluate("document.title")
            .await?
            .as_str()
            .map(|s| s.to_string()))
    }

    /// Rendered text of the current document
    pub async fn extract_text(&self, max_chars: usize) -> Result<String, ExtractionError> {
        let js = r##"
            (function() {
                return {
                    href: window.location.href,
                    contentType: document.contentType || "",
                    text: document.body ? document.body.innerText : ""
                };
            })();
        "##;

        let page = self.evaluate(js).await.map_err(|e| {
            tracing::warn!("Content extraction failed: {}", e);
            ExtractionError::NotLoaded
        })?;

        let href = page.get("href").and_then(|v| v.as_str()).unwrap_or_default();
        if href.is_empty() || href == "about:blank" {
            return Err(ExtractionError::NotLoaded);
        }

        let content_type = page
            .get("contentType")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if !is_text_content_type(content_type) {
            return Err(ExtractionError::Unsupported(content_type.to_string()));
        }

        let text = page.get("text").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(normalize_text(text, max_chars))
    }

    /// Close the connection and the browser if we started it
    pub async fn close(&mut self) -> Result<(), String> {
        if let Some(tx) = self.ws_tx.take() {
            let _ = tx.lock().await.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(pid) = self.chrome_pid.take() {
            kill_process(pid);
        }

        tracing::info!("CDP client closed on port {}", self.cdp_port);
        Ok(())
    }
}

impl Drop for CDPClient {
    fn drop(&mut self) {
        // Ensure Chrome is killed when client is dropped
        if let Some(pid) = self.chrome_pid {
            kill_process(pid);
        }
    }
}

fn kill_process(pid: u32) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill").arg(pid.to_string()).spawn();
    }
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .spawn();
    }
}

/// Whether a document MIME type renders as readable text
pub fn is_text_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.is_empty()
        || mime.starts_with("text/")
        || mime == "application/xhtml+xml"
        || mime == "application/xml"
        || mime == "application/json"
}

/// The production browser surface: one Chrome page driven over CDP.
///
/// Connects lazily on first use and reconnects when the socket drops.
/// Commands are serialized through the client lock; `get_state` reads a
/// cached snapshot so it never waits behind a slow page load.
pub struct CdpBrowser {
    config: BrowserConfig,
    client: Mutex<Option<CDPClient>>,
    state: parking_lot::RwLock<PageState>,
}

impl CdpBrowser {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            state: parking_lot::RwLock::new(PageState::default()),
        }
    }

    async fn connected_client(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<CDPClient>>, String> {
        let mut guard = self.client.lock().await;
        if guard.as_ref().map_or(false, CDPClient::is_connected) {
            return Ok(guard);
        }

        if let Some(mut stale) = guard.take() {
            tracing::warn!("CDP connection lost, reconnecting");
            let _ = stale.close().await;
        }

        let mut client = CDPClient::new(self.config.cdp_port);
        if self.config.attach {
            client.attach().await?;
        } else {
            client
                .launch(
                    &self.config.chrome_path,
                    &self.config.user_data_dir,
                    self.config.headless,
                )
                .await?;
        }
        *guard = Some(client);
        Ok(guard)
    }

    /// Close the browser connection, killing Chrome if it was launched here
    pub async fn shutdown(&self) {
        if let Some(mut client) = self.client.lock().await.take() {
            let _ = client.close().await;
        }
    }
}

#[async_trait]
impl BrowserSurface for CdpBrowser {
    async fn navigate(&self, url: &str) -> Result<PageState, NavigationError> {
        let target = validate_url(url)?;

        let guard = self
            .connected_client()
            .await
            .map_err(NavigationError::Network)?;
        let client = guard
            .as_ref()
            .ok_or_else(|| NavigationError::Network("browser not connected".to_string()))?;

        let load_timeout = Duration::from_millis(self.config.load_timeout_ms);
        let page = client.navigate(target.as_str(), load_timeout).await?;
        *self.state.write() = page.clone();
        Ok(page)
    }

    fn get_state(&self) -> PageState {
        self.state.read().clone()
    }

    async fn extract_content(&self) -> Result<String, ExtractionError> {
        if self.get_state().is_blank() {
            return Err(ExtractionError::NotLoaded);
        }

        let guard = self.connected_client().await.map_err(|e| {
            tracing::warn!("Browser unavailable for extraction: {}", e);
            ExtractionError::NotLoaded
        })?;
        let client = guard.as_ref().ok_or(ExtractionError::NotLoaded)?;
        client.extract_text(self.config.max_content_chars).await
    }
}
