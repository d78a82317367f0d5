use std::sync::Arc;

use async_trait::async_trait;
use botway_common::Result;
use botway_plugins::PluginHost;

use super::{ToolLoader, ToolOrigin, ToolSpec};

/// Exposes plugin tools to the tool manager. Plugin names double as the
/// filter vocabulary: a filter entry matches when the namespaced tool name
/// belongs to that plugin.
pub struct PluginToolLoader {
    host: Arc<dyn PluginHost>,
}

impl PluginToolLoader {
    pub fn new(host: Arc<dyn PluginHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ToolLoader for PluginToolLoader {
    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Plugin
    }

    async fn get_tools(&self, filter: Option<&[String]>) -> Vec<ToolSpec> {
        self.host
            .list_tools(filter)
            .into_iter()
            .map(|t| ToolSpec {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
                origin: ToolOrigin::Plugin,
            })
            .collect()
    }

    async fn has_tool(&self, name: &str) -> bool {
        self.host.list_tools(None).iter().any(|t| t.name == name)
    }

    async fn execute(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        self.host.execute_tool(name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botway_common::Error;
    use botway_plugins::{Plugin, PluginInfo, PluginToolSpec, StaticPluginHost};
    use serde_json::json;

    struct SumPlugin;

    #[async_trait]
    impl Plugin for SumPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo {
                name: "math".into(),
                version: "0.1.0".into(),
                description: "adds".into(),
            }
        }

        fn tools(&self) -> Vec<PluginToolSpec> {
            vec![PluginToolSpec {
                name: "sum".into(),
                description: "add two numbers".into(),
                parameters: json!({"type": "object"}),
            }]
        }

        async fn execute_tool(
            &self,
            _name: &str,
            args: serde_json::Value,
        ) -> Result<serde_json::Value> {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        }
    }

    fn loader() -> PluginToolLoader {
        let mut host = StaticPluginHost::new();
        host.register(Arc::new(SumPlugin));
        PluginToolLoader::new(Arc::new(host))
    }

    #[tokio::test]
    async fn tools_surface_with_namespaced_names() {
        let loader = loader();
        let tools = loader.get_tools(None).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "plugin-math-sum");
        assert_eq!(tools[0].origin, ToolOrigin::Plugin);
        assert!(loader.has_tool("plugin-math-sum").await);
    }

    #[tokio::test]
    async fn execution_reaches_the_plugin() {
        let loader = loader();
        let out = loader
            .execute("plugin-math-sum", json!({"a": 2, "b": 3}))
            .await
            .unwrap();
        assert_eq!(out, json!(5));
    }

    #[tokio::test]
    async fn unknown_tool_maps_to_tool_not_found() {
        let loader = loader();
        assert!(matches!(
            loader.execute("plugin-math-missing", json!({})).await,
            Err(Error::ToolNotFound(_) | Error::Plugin(_))
        ));
    }
}
