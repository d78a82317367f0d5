use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use botway_common::{Error, Result};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::tools::{ToolLoader, ToolOrigin, ToolSpec};

/// Cached info about a tool discovered from an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// A live connection to one MCP server.
struct McpConnection {
    service: RunningService<RoleClient, ()>,
    tools: Vec<McpToolInfo>,
}

/// Manages the lifecycle of MCP server connections.
pub struct McpManager {
    connections: Arc<RwLock<HashMap<String, McpConnection>>>,
    call_timeout: Duration,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            call_timeout: Duration::from_secs(60),
        }
    }

    /// Connect to an MCP server by spawning a child process and discover
    /// its tools.
    pub async fn connect(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        timeout_secs: u64,
    ) -> Result<()> {
        let mut cmd = Command::new(command);
        cmd.args(args);

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| Error::Mcp(format!("failed to spawn MCP server '{name}': {e}")))?;

        let service = tokio::time::timeout(Duration::from_secs(timeout_secs), ().serve(transport))
            .await
            .map_err(|_| {
                Error::Mcp(format!(
                    "MCP server '{name}' handshake timed out after {timeout_secs}s"
                ))
            })?
            .map_err(|e| Error::Mcp(format!("MCP server '{name}' handshake failed: {e}")))?;

        let mcp_tools = service
            .list_all_tools()
            .await
            .map_err(|e| Error::Mcp(format!("failed to list tools from '{name}': {e}")))?;

        let tools: Vec<McpToolInfo> = mcp_tools
            .into_iter()
            .map(|t| McpToolInfo {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: serde_json::to_value(&*t.input_schema).unwrap_or_default(),
            })
            .collect();

        info!(
            "MCP server '{name}' connected: {} tool(s) discovered",
            tools.len()
        );

        self.connections
            .write()
            .await
            .insert(name.to_string(), McpConnection { service, tools });
        Ok(())
    }

    pub async fn disconnect_all(&self) {
        let conns: HashMap<String, McpConnection> =
            std::mem::take(&mut *self.connections.write().await);
        for (name, conn) in conns {
            info!("disconnecting MCP server '{name}'");
            if let Err(e) = conn.service.cancel().await {
                warn!("error cancelling MCP server '{name}': {e}");
            }
        }
    }

    /// All discovered tools of the servers the filter permits, namespaced
    /// as `mcp-{server}-{tool}`.
    pub async fn list_tools(&self, server_filter: Option<&[String]>) -> Vec<ToolSpec> {
        let conns = self.connections.read().await;
        conns
            .iter()
            .filter(|(name, _)| match server_filter {
                None => true,
                Some(servers) => servers.iter().any(|s| s == *name),
            })
            .flat_map(|(name, conn)| {
                conn.tools.iter().map(move |t| ToolSpec {
                    name: format!("mcp-{name}-{}", t.name),
                    description: t.description.clone().unwrap_or_default(),
                    parameters: t.input_schema.clone(),
                    origin: ToolOrigin::Mcp,
                })
            })
            .collect()
    }

    /// Resolve a namespaced tool name back to (server, tool).
    async fn resolve(&self, namespaced: &str) -> Option<(String, String)> {
        let conns = self.connections.read().await;
        for (server, conn) in conns.iter() {
            let prefix = format!("mcp-{server}-");
            if let Some(bare) = namespaced.strip_prefix(&prefix) {
                if conn.tools.iter().any(|t| t.name == bare) {
                    return Some((server.clone(), bare.to_string()));
                }
            }
        }
        None
    }

    /// Call a namespaced tool and join any text content of the result.
    pub async fn call_tool(
        &self,
        namespaced: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let (server, tool) = self
            .resolve(namespaced)
            .await
            .ok_or_else(|| Error::ToolNotFound(namespaced.to_string()))?;

        let conns = self.connections.read().await;
        let conn = conns
            .get(&server)
            .ok_or_else(|| Error::Mcp(format!("MCP server '{server}' not connected")))?;

        let arguments = match args {
            serde_json::Value::Object(map) => Some(map),
            serde_json::Value::Null => None,
            other => {
                return Err(Error::ToolExecution(format!(
                    "MCP tool arguments must be an object, got {other}"
                )))
            }
        };

        let params = rmcp::model::CallToolRequestParams {
            meta: None,
            name: tool.clone().into(),
            arguments,
        };

        let result = tokio::time::timeout(self.call_timeout, conn.service.call_tool(params))
            .await
            .map_err(|_| Error::ToolExecution(format!("MCP tool '{namespaced}' timed out")))?
            .map_err(|e| Error::ToolExecution(format!("MCP tool '{namespaced}' failed: {e}")))?;

        let text_parts: Vec<String> = result
            .content
            .into_iter()
            .filter_map(|c| match c.raw {
                rmcp::model::RawContent::Text(t) => Some(t.text),
                _ => None,
            })
            .collect();

        Ok(serde_json::Value::String(text_parts.join("\n")))
    }
}

/// Adapts the MCP manager to the tool-loader seam.
pub struct McpToolLoader {
    manager: Arc<McpManager>,
}

impl McpToolLoader {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolLoader for McpToolLoader {
    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Mcp
    }

    async fn get_tools(&self, filter: Option<&[String]>) -> Vec<ToolSpec> {
        self.manager.list_tools(filter).await
    }

    async fn has_tool(&self, name: &str) -> bool {
        self.manager.resolve(name).await.is_some()
    }

    async fn execute(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        self.manager.call_tool(name, args).await
    }
}
