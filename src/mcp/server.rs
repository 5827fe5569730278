//! Mail MCP Server implementation

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use mailvault::{MailVault, MessageId};

const MAX_LIMIT: usize = 100;

/// Parameters for mail_search tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Search query; matched semantically and as a substring")]
    pub query: String,
    #[schemars(description = "Maximum number of results (default: 10, max: 100)")]
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// Parameters for mail_get_message tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetMessageParams {
    #[schemars(description = "Store id of the message")]
    #[serde(default)]
    pub id: Option<MessageId>,
    #[schemars(description = "Provider message id, used when id is absent")]
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadParams {
    #[schemars(description = "Provider thread id")]
    pub thread_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadContextParams {
    #[schemars(description = "Provider thread id")]
    pub thread_id: String,
    #[schemars(description = "Keep only the last N messages (default from config)")]
    #[serde(default)]
    pub max_messages: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LabelParams {
    #[schemars(description = "Label name, e.g. INBOX or a user label")]
    pub label: String,
    #[schemars(description = "Maximum number of results (default: 10, max: 100)")]
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[schemars(description = "Skip this many results")]
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
struct ThreadContextJson<'a> {
    thread_id: &'a str,
    context: String,
}

/// Mail MCP Service
#[derive(Clone)]
pub struct MailService {
    root: PathBuf,
    tool_router: ToolRouter<Self>,
}

impl MailService {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            tool_router: Self::tool_router(),
        }
    }

    fn open_vault(&self) -> Result<MailVault, McpError> {
        MailVault::open(&self.root).map_err(to_mcp_error)
    }
}

fn to_mcp_error(e: mailvault::Error) -> McpError {
    McpError::internal_error(format!("{}: {}", e.code(), e), None)
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(value) {
        Ok(output) => Ok(text_result(output)),
        Err(e) => {
            let message = format!("JSON serialization failed: {}", e);
            Err(McpError::internal_error(message, None))
        }
    }
}

fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

#[tool_router]
impl MailService {
    #[tool(description = "Search mail by meaning and by substring. Semantic matches come first, keyword matches fill the rest.")]
    async fn mail_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let vault = self.open_vault()?;
        let results = vault
            .search(&params.0.query, Some(clamp_limit(params.0.limit)))
            .map_err(to_mcp_error)?;
        json_result(&results)
    }

    #[tool(description = "Get one message with recipients, attachments and labels, by store id or provider id.")]
    async fn mail_get_message(
        &self,
        params: Parameters<GetMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        let vault = self.open_vault()?;
        let message = match (params.0.id, params.0.provider_id.as_deref()) {
            (Some(id), _) => vault.store().get_by_id(id),
            (None, Some(pid)) => vault.store().get_by_provider_id(pid),
            (None, None) => {
                return Err(McpError::invalid_params(
                    "either id or provider_id is required",
                    None,
                ))
            }
        }
        .map_err(to_mcp_error)?;

        match message {
            Some(message) => json_result(&message),
            None => Ok(text_result("Message not found")),
        }
    }

    #[tool(description = "List the messages of a thread, oldest first.")]
    async fn mail_thread(
        &self,
        params: Parameters<ThreadParams>,
    ) -> Result<CallToolResult, McpError> {
        let vault = self.open_vault()?;
        let messages = vault
            .store()
            .get_thread_messages(&params.0.thread_id)
            .map_err(to_mcp_error)?;
        json_result(&messages)
    }

    #[tool(description = "Render the latest messages of a thread as plain text, ready for summarization.")]
    async fn mail_thread_context(
        &self,
        params: Parameters<ThreadContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let vault = self.open_vault()?;
        let max = params.0.max_messages.map(clamp_limit);
        let context = vault
            .thread_context(&params.0.thread_id, max)
            .map_err(to_mcp_error)?;
        json_result(&ThreadContextJson {
            thread_id: &params.0.thread_id,
            context,
        })
    }

    #[tool(description = "List messages carrying a label, newest first.")]
    async fn mail_by_label(
        &self,
        params: Parameters<LabelParams>,
    ) -> Result<CallToolResult, McpError> {
        let vault = self.open_vault()?;
        let limit = clamp_limit(params.0.limit);
        let messages = vault
            .store()
            .get_by_label(&params.0.label, limit, params.0.offset)
            .map_err(to_mcp_error)?;
        json_result(&messages)
    }

    #[tool(description = "Message, thread and user counts plus vector index statistics.")]
    async fn mail_status(&self) -> Result<CallToolResult, McpError> {
        let vault = self.open_vault()?;
        let status = vault.status().map_err(to_mcp_error)?;
        json_result(&status)
    }
}

#[tool_handler]
impl ServerHandler for MailService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "mailvault MCP Server. Hybrid keyword and semantic search over stored mail, thread listing and thread context for summarization.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server
pub async fn run_mcp_server(root: PathBuf) -> Result<()> {
    use tokio::io::{stdin, stdout};

    info!("Starting MCP server for {}", root.display());
    let service = MailService::new(root);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(25), 25);
        assert_eq!(clamp_limit(10_000), MAX_LIMIT);
    }

    #[test]
    fn test_search_params_defaults() {
        let params: SearchParams = serde_json::from_str(r#"{"query": "invoice"}"#).unwrap();
        assert_eq!(params.limit, 10);

        let params: LabelParams = serde_json::from_str(r#"{"label": "INBOX"}"#).unwrap();
        assert_eq!((params.limit, params.offset), (10, 0));
    }
}
