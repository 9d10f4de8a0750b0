//! Model Context Protocol (MCP) integration.
//!
//! The client side connects to the tool servers listed in an `mcp.json` and exposes their tools
//! to the model through [`GenericToolExecutor`]. The server side ([`server`]) publishes the
//! store and filesystem tools to other MCP clients.

pub mod server;

use std::{collections::BTreeMap, ops::Deref, str::FromStr, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolResult, Tool},
    service::RunningService,
    transport::{StreamableHttpClientTransport, TokioChildProcess, streamable_http_client::StreamableHttpClientTransportConfig},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::{
    base::types::Res,
    service::{
        llm::ToolDescriptor,
        tools::{GenericToolExecutor, ToolCallContext, ToolExecutor},
    },
};

// Types.

/// Struct that represents a server in the MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub name: String,
    pub config: McpServerConfig,
}

/// Enum that represents the configuration of an MCP server, which can be either local or remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Local {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, alias = "env")]
        envs: Option<BTreeMap<String, String>>,
    },
    Remote {
        url: String,
        #[serde(default)]
        headers: Option<BTreeMap<String, String>>,
    },
}

/// A connected MCP server and the tools it advertised.
#[derive(Debug, Clone)]
pub struct Mcp {
    pub name: String,
    pub client: Arc<RunningService<RoleClient, ()>>,
    pub tools: Vec<Tool>,
}

/// Struct for McpClient.
///
/// Holds one running connection per configured server. It is designed to be trivially cloneable.
#[derive(Clone)]
pub struct McpClient {
    pub inner: Arc<McpClientInner>,
}

impl Deref for McpClient {
    type Target = McpClientInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Inner implementation of the MCP client.
pub struct McpClientInner {
    pub mcps: Vec<Mcp>,
}

impl McpClient {
    /// Connects to every server listed in the `mcp.json` at `path`.
    ///
    /// A missing file yields a client without servers; servers that fail to start are skipped.
    #[instrument(name = "McpClient::new", skip_all)]
    pub async fn new(path: &str) -> Res<Self> {
        let json_servers = load_mcp_json(path)?;
        let servers = get_servers_from_mcp_json(json_servers)?;
        let mcps = hydrate_mcps(servers.iter()).await;

        info!("Connected to {} MCP server(s).", mcps.len());

        Ok(Self {
            inner: Arc::new(McpClientInner { mcps }),
        })
    }

    fn find(&self, tool: &str) -> Option<&Mcp> {
        self.mcps.iter().find(|mcp| mcp.tools.iter().any(|t| t.name == tool))
    }
}

impl From<McpClient> for ToolExecutor {
    fn from(client: McpClient) -> Self {
        Self::new(Arc::new(client))
    }
}

#[async_trait]
impl GenericToolExecutor for McpClient {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.mcps.iter().flat_map(|mcp| mcp.tools.iter()).filter_map(tool_descriptor).collect()
    }

    #[instrument(skip(self, arguments, _context))]
    async fn execute(&self, name: &str, arguments: &Value, _context: &ToolCallContext) -> Res<Value> {
        let mcp = self.find(name).ok_or_else(|| anyhow!("Unknown tool: {name}"))?;

        let arguments = match arguments {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let request = serde_json::from_value(json!({ "name": name, "arguments": arguments }))?;
        let result = mcp.client.call_tool(request).await?;

        Ok(tool_result_json(&result))
    }
}

// Helpers.

/// Load the server map of an MCP JSON configuration, merging `servers` and `mcpServers`.
pub fn load_mcp_json(path: &str) -> Res<Map<String, Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => return Err(err.into()),
    };

    let json = serde_json::from_str::<Value>(&raw)?;

    let mut json_servers = Map::new();

    for key in ["servers", "mcpServers"] {
        if let Some(Value::Object(servers)) = json.get(key) {
            json_servers.extend(servers.clone());
        }
    }

    Ok(json_servers)
}

/// Parse the server map into a vector of [`McpServer`].
pub fn get_servers_from_mcp_json(json_servers: Map<String, Value>) -> Res<Vec<McpServer>> {
    json_servers
        .into_iter()
        .map(|(name, value)| {
            let config = serde_json::from_value::<McpServerConfig>(value).map_err(|err| anyhow!("Invalid MCP server `{name}`: {err}"))?;
            Ok(McpServer { name, config })
        })
        .collect()
}

/// Given an [`McpServer`], start a client session against it.
pub async fn get_mcp_server_client(server: &McpServer) -> Res<RunningService<RoleClient, ()>> {
    match &server.config {
        McpServerConfig::Local { command, args, envs } => {
            let mut command = Command::new(command);

            command.args(args);

            if let Some(envs) = envs {
                command.envs(envs);
            }

            let transport = TokioChildProcess::new(command)?;

            Ok(().serve(transport).await?)
        }
        McpServerConfig::Remote { url, headers } => {
            let mut header_map = HeaderMap::new();

            if let Some(headers) = headers {
                for (key, value) in headers {
                    header_map.insert(HeaderName::from_str(key)?, HeaderValue::from_str(value)?);
                }
            }

            let client = reqwest::Client::builder().default_headers(header_map).build()?;
            let config = StreamableHttpClientTransportConfig::with_uri(url.as_str());
            let transport = StreamableHttpClientTransport::with_client(client, config);

            Ok(().serve(transport).await?)
        }
    }
}

/// Connect to the servers concurrently and list their tools.
pub async fn hydrate_mcps(servers: impl IntoIterator<Item = &McpServer>) -> Vec<Mcp> {
    let tasks = servers.into_iter().map(|server| async move {
        let result: Res<Mcp> = async {
            let client = Arc::new(get_mcp_server_client(server).await?);
            let tools = client.list_all_tools().await?;

            Ok(Mcp { name: server.name.clone(), client, tools })
        }
        .await;

        result.map_err(|err| warn!("Skipping MCP server `{}`: {}", server.name, err)).ok()
    });

    futures::future::join_all(tasks).await.into_iter().flatten().collect()
}

/// Converts an MCP tool into the descriptor advertised to the model.
fn tool_descriptor(tool: &Tool) -> Option<ToolDescriptor> {
    let value = serde_json::to_value(tool).ok()?;

    Some(ToolDescriptor {
        name: value.get("name")?.as_str()?.to_string(),
        description: value.get("description").and_then(Value::as_str).unwrap_or_default().to_string(),
        parameters: value.get("inputSchema").cloned().unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
    })
}

/// Converts an MCP tool result into a JSON payload.
///
/// Text content that parses as JSON is returned as-is; other text is wrapped.
fn tool_result_json(result: &CallToolResult) -> Value {
    let text = result.content.iter().filter_map(|c| c.as_text()).map(|t| t.text.as_str()).collect::<Vec<_>>().join("\n");

    if result.is_error.unwrap_or(false) {
        return json!({ "error": text });
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "success": true, "text": text }),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use rmcp::model::Content;

    use super::*;

    #[test]
    fn test_load_mcp_json() {
        let json = load_mcp_json("tests/mcp.json").unwrap();

        assert_eq!(json.len(), 2);
        assert!(json.contains_key("everything"));
        assert!(json.contains_key("deepwiki"));

        let everything = json.get("everything").unwrap();
        assert_eq!(everything["command"], "npx");
        assert_eq!(everything["args"], json!(["-y", "@modelcontextprotocol/server-everything"]));
    }

    #[test]
    fn test_load_missing_mcp_json() {
        assert!(load_mcp_json("tests/does-not-exist.json").unwrap().is_empty());
    }

    #[test]
    fn test_get_servers_from_mcp_json() {
        let json = load_mcp_json("tests/mcp.json").unwrap();
        let servers = get_servers_from_mcp_json(json).unwrap();

        assert_eq!(servers.len(), 2);

        let deepwiki = servers.iter().find(|s| s.name == "deepwiki").unwrap();
        assert!(matches!(&deepwiki.config, McpServerConfig::Remote { url, .. } if url == "https://mcp.deepwiki.com/mcp"));

        let everything = servers.iter().find(|s| s.name == "everything").unwrap();
        assert!(matches!(&everything.config, McpServerConfig::Local { envs: Some(envs), .. } if envs.get("LOG_LEVEL").map(String::as_str) == Some("warn")));
    }

    #[test]
    fn test_tool_result_json() {
        let structured = CallToolResult::success(vec![Content::text(r#"{"success":true,"count":2}"#)]);
        assert_eq!(tool_result_json(&structured)["count"], 2);

        let plain = CallToolResult::success(vec![Content::text("Echo: hi")]);
        assert_eq!(tool_result_json(&plain), json!({ "success": true, "text": "Echo: hi" }));

        let failed = CallToolResult::error(vec![Content::text("boom")]);
        assert_eq!(tool_result_json(&failed), json!({ "error": "boom" }));
    }

    #[tokio::test]
    #[ignore = "spawns `npx @modelcontextprotocol/server-everything`"]
    async fn test_create_mcp_client() {
        let client = McpClient::new("tests/mcp.json").await.unwrap();

        assert!(client.descriptors().iter().any(|d| d.name == "echo"));

        let result = client.execute("echo", &json!({ "message": "Hello, MCP!" }), &ToolCallContext::default()).await.unwrap();

        assert_eq!(result["text"], "Echo: Hello, MCP!");
    }
}
