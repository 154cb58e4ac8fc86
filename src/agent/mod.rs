//! Query orchestration: reasoning client, browser surface and the control loop.

pub mod action;
pub mod browser;
pub mod cdp;
pub mod context;
pub mod engine;
pub mod llm;
pub mod types;

pub use browser::BrowserSurface;
pub use cdp::{CDPClient, CdpBrowser};
pub use context::ConversationContext;
pub use engine::Orchestrator;
pub use llm::{LLMClient, ReasoningClient};
pub use types::*;
