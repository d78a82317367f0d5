pub mod builtin;
pub mod plugin_loader;

use async_trait::async_trait;
use botway_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub use builtin::BuiltinToolLoader;
pub use plugin_loader::PluginToolLoader;

/// Where a tool was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    Internal,
    Plugin,
    Mcp,
}

/// An LLM-callable function: globally-unique name, description and a
/// JSON-Schema parameter object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub origin: ToolOrigin,
}

/// A source of tools. Loaders own dispatch for the tools they expose;
/// names are unique across loaders.
#[async_trait]
pub trait ToolLoader: Send + Sync {
    fn origin(&self) -> ToolOrigin;

    /// Tools permitted by the filter. `None` means all.
    async fn get_tools(&self, filter: Option<&[String]>) -> Vec<ToolSpec>;

    async fn has_tool(&self, name: &str) -> bool;

    async fn execute(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// Aggregates tools from the internal, plugin and MCP loaders and routes
/// execution to the first loader that knows the name.
#[derive(Default)]
pub struct ToolManager {
    loaders: Vec<Arc<dyn ToolLoader>>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_loader(&mut self, loader: Arc<dyn ToolLoader>) {
        self.loaders.push(loader);
    }

    /// Union of all permitted tools. The plugin filter applies to the
    /// plugin loader, the MCP filter to the MCP loader; the internal
    /// loader is never filtered.
    pub async fn get_all_tools(
        &self,
        plugin_filter: Option<&[String]>,
        mcp_filter: Option<&[String]>,
    ) -> Vec<ToolSpec> {
        let mut tools = Vec::new();
        for loader in &self.loaders {
            let filter = match loader.origin() {
                ToolOrigin::Internal => None,
                ToolOrigin::Plugin => plugin_filter,
                ToolOrigin::Mcp => mcp_filter,
            };
            tools.extend(loader.get_tools(filter).await);
        }
        tools
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        for loader in &self.loaders {
            if loader.has_tool(name).await {
                debug!("executing tool '{name}' via {:?} loader", loader.origin());
                return loader.execute(name, args).await;
            }
        }
        Err(Error::ToolNotFound(name.to_string()))
    }

    /// OpenAI function-calling schema for a tool set.
    pub fn generate_tools_for_openai(tools: &[ToolSpec]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    /// Anthropic tool-use schema for a tool set.
    pub fn generate_tools_for_anthropic(tools: &[ToolSpec]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }
}
