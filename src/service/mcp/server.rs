//! MCP tool server that publishes a [`ToolExecutor`] to other MCP clients.

use std::sync::Arc;

use rmcp::{
    ErrorData, RoleServer, ServerHandler, ServiceExt,
    model::{CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool},
    service::RequestContext,
};
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::{
    base::types::Void,
    service::{
        llm::ToolDescriptor,
        tools::{ToolCallContext, ToolExecutor},
    },
};

const INSTRUCTIONS: &str = "Conversation history, document search, Discord and filesystem tools for the botforge Discord bot.";

// Structs.

/// Serves the tools of a [`ToolExecutor`] over MCP.
#[derive(Clone)]
pub struct McpToolServer {
    tools: ToolExecutor,
}

impl McpToolServer {
    pub fn new(tools: ToolExecutor) -> Self {
        Self { tools }
    }

    /// Serves on stdin/stdout until the peer disconnects.
    #[instrument(skip_all)]
    pub async fn serve_stdio(self) -> Void {
        info!("Serving {} tool(s) over MCP on stdio.", self.tools.descriptors().len());

        let service = self.serve(rmcp::transport::stdio()).await?;
        service.waiting().await?;

        info!("MCP client disconnected.");

        Ok(())
    }

    /// Tools in their MCP form.
    pub fn list(&self) -> Vec<Tool> {
        self.tools.descriptors().iter().map(to_mcp_tool).collect()
    }

    /// Runs a tool and wraps its payload as MCP content.
    pub async fn call(&self, name: &str, arguments: Value) -> CallToolResult {
        if !self.tools.has_tool(name) {
            return CallToolResult::error(vec![Content::text(format!("Unknown tool: {name}"))]);
        }

        match self.tools.execute(name, &arguments, &ToolCallContext::default()).await {
            Ok(payload) => CallToolResult::success(vec![Content::text(payload.to_string())]),
            Err(err) => {
                error!("Tool `{}` failed: {}", name, err);
                CallToolResult::error(vec![Content::text(json!({ "error": err.to_string() }).to_string())])
            }
        }
    }
}

impl ServerHandler for McpToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }

    async fn list_tools(&self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.list()))
    }

    async fn call_tool(&self, request: CallToolRequestParam, _context: RequestContext<RoleServer>) -> Result<CallToolResult, ErrorData> {
        let arguments = request.arguments.map(Value::Object).unwrap_or_else(|| json!({}));

        Ok(self.call(&request.name, arguments).await)
    }
}

// Helpers.

fn to_mcp_tool(descriptor: &ToolDescriptor) -> Tool {
    let schema = match &descriptor.parameters {
        Value::Object(schema) => schema.clone(),
        _ => serde_json::Map::new(),
    };

    Tool::new(descriptor.name.clone(), descriptor.description.clone(), Arc::new(schema))
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tools::filesystem::FilesystemTools;

    fn server(dir: &tempfile::TempDir) -> McpToolServer {
        McpToolServer::new(FilesystemTools::new(&[dir.path().to_path_buf()]).into())
    }

    #[test]
    fn test_lists_tools_with_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let tools = server(&dir).list();

        let names = tools.iter().map(|t| t.name.to_string()).collect::<Vec<_>>();
        assert_eq!(names, vec!["read_file", "write_file", "list_files", "analyze_codebase", "get_file_info"]);
        assert_eq!(tools[0].input_schema.get("type"), Some(&json!("object")));
    }

    #[tokio::test]
    async fn test_call_wraps_payloads_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();
        let server = server(&dir);

        let ok = server.call("read_file", json!({ "path": "hello.txt" })).await;
        assert_ne!(ok.is_error, Some(true));
        let payload = serde_json::from_str::<Value>(&ok.content[0].as_text().unwrap().text).unwrap();
        assert_eq!(payload["content"], "hi");

        let missing = server.call("read_file", json!({ "path": "nope.txt" })).await;
        assert_eq!(missing.is_error, Some(true));

        let unknown = server.call("drop_tables", json!({})).await;
        assert_eq!(unknown.is_error, Some(true));
    }
}
