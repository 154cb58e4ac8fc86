//! Browsion Query MCP Server: ask the browser assistant questions from any
//! MCP client. Communicates with the browsion-query HTTP API over localhost.
//!
//! Usage: browsion-query-mcp  (stdio transport; set BROWSION_QUERY_API_PORT if not 38473)

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    schemars, tool, tool_handler, tool_router, ServerHandler,
    service::RequestContext,
    RoleServer, ServiceExt,
    ErrorData as McpError,
};
use reqwest::Client;
use serde_json::json;
use std::env;

const DEFAULT_PORT: u16 = 38473;

fn api_base() -> String {
    let port = env::var("BROWSION_QUERY_API_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    format!("http://127.0.0.1:{}", port)
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct SendQueryParam {
    /// Natural-language question or instruction for the browser assistant
    text: String,
    /// Text of the page the user is looking at, if already known
    #[serde(default)]
    page_content: Option<String>,
    /// URL of the page the user is looking at
    #[serde(default)]
    current_url: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct NavigateParam {
    /// Absolute URL to load (http, https, file or about)
    url: String,
}

#[derive(Clone)]
struct QueryMcpServer {
    client: Client,
    base: String,
    api_key: Option<String>,
    tool_router: ToolRouter<Self>,
}

impl QueryMcpServer {
    fn new() -> Self {
        Self {
            client: Client::new(),
            base: api_base(),
            api_key: env::var("BROWSION_QUERY_API_KEY").ok().filter(|s| !s.is_empty()),
            tool_router: Self::tool_router(),
        }
    }

    fn apply_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String, McpError> {
        let resp = self.apply_key(req).send().await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let status = resp.status();
        let text = resp.text().await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        if !status.is_success() {
            return Err(McpError::internal_error(text, None));
        }
        Ok(text)
    }

    async fn api_post(&self, path: &str, body: &serde_json::Value) -> Result<String, McpError> {
        self.send(self.client.post(format!("{}{}", self.base, path)).json(body)).await
    }

    async fn api_get(&self, path: &str) -> Result<String, McpError> {
        self.send(self.client.get(format!("{}{}", self.base, path))).await
    }

    fn text_result(text: impl Into<String>) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_router]
impl QueryMcpServer {
    /// Ask the browser assistant
    #[tool(description = "Ask the browser assistant a question. It browses on its own (navigating and reading pages) until it can answer. Returns a JSON object with exactly one key: \"content\" holding the answer, or \"error\" describing why no answer was produced. Only one query runs at a time; a busy error means retry later.")]
    async fn send_query(
        &self,
        Parameters(p): Parameters<SendQueryParam>,
    ) -> Result<CallToolResult, McpError> {
        let body = json!({
            "text": p.text,
            "page_content": p.page_content,
            "current_url": p.current_url,
        });
        let resp = self.api_post("/api/query", &body).await?;
        Self::text_result(resp)
    }

    /// Navigate the shared browser view
    #[tool(description = "Load a URL in the assistant's browser view and wait for it to finish loading. Returns {url, title} of the loaded page. Interrupts any query that is currently running.")]
    async fn navigate_browser(
        &self,
        Parameters(p): Parameters<NavigateParam>,
    ) -> Result<CallToolResult, McpError> {
        let resp = self.api_post("/api/browser/navigate", &json!({ "url": p.url })).await?;
        Self::text_result(resp)
    }

    /// Current page of the browser view
    #[tool(description = "Get the URL and title of the page currently loaded in the assistant's browser view. Answers immediately, even while a query is running.")]
    async fn get_browser_state(&self) -> Result<CallToolResult, McpError> {
        let resp = self.api_get("/api/browser/state").await?;
        Self::text_result(resp)
    }
}

#[tool_handler]
impl ServerHandler for QueryMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "browsion-query-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: Some("Browsion Query".into()),
                description: Some(
                    "Answer questions by letting an AI assistant browse the web".into(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "# Browsion Query\n\
                 \n\
                 - `send_query` asks the assistant; it may navigate several pages before answering.\n\
                 - Pass `current_url` / `page_content` when the question is about a page you already have.\n\
                 - `navigate_browser` loads a page manually and cancels a running query.\n\
                 - `get_browser_state` shows what the browser is on right now."
                    .into(),
            ),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        Ok(self.get_info())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let base = api_base();
    let client = Client::new();

    match client.get(format!("{}/api/health", base)).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("browsion-query API reachable at {}", base);
        }
        Ok(resp) => {
            eprintln!("browsion-query API returned HTTP {}: {}", resp.status(), base);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("browsion-query API not reachable at {}: {}", base, e);
            eprintln!("Start browsion-query first (default port {}).", DEFAULT_PORT);
            std::process::exit(1);
        }
    }

    let server = QueryMcpServer::new();
    let transport = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let service = server.serve(transport).await?;
    service.waiting().await?;
    Ok(())
}
