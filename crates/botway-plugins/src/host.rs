use std::sync::Arc;

use async_trait::async_trait;
use botway_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{EventContext, PluginEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// A chat command a plugin exposes (`!name arg1 arg2 ...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    /// Usage line shown on malformed invocations.
    #[serde(default)]
    pub usage: Option<String>,
}

/// One value produced by a command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandReturn {
    Text { text: String },
    ImageUrl { url: String },
    ImageBase64 { data: String },
    FileUrl { name: String, url: String },
    Error { message: String },
}

/// An LLM-callable function a plugin exposes. Exposed to the tool manager
/// under the namespaced name `plugin-{plugin}-{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-Schema object describing the arguments.
    pub parameters: serde_json::Value,
}

/// One in-process plugin. The external plugin-host protocol is out of
/// scope; everything the core needs funnels through this trait.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    async fn execute_command(&self, name: &str, params: &[String]) -> Result<Vec<CommandReturn>> {
        let _ = params;
        Err(Error::Plugin(format!(
            "plugin '{}' has no command '{name}'",
            self.info().name
        )))
    }

    fn tools(&self) -> Vec<PluginToolSpec> {
        Vec::new()
    }

    async fn execute_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let _ = args;
        Err(Error::Plugin(format!(
            "plugin '{}' has no tool '{name}'",
            self.info().name
        )))
    }

    /// Observe one lifecycle event, optionally mutating the context.
    async fn handle_event(&self, ctx: &mut EventContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// What the pipeline consumes: a host aggregating plugins behind a narrow
/// surface. Installation and upgrades live outside the core.
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Run the event through every bound plugin's handler in registration
    /// order and return the accumulated context.
    async fn emit_event(
        &self,
        event: PluginEvent,
        bound_plugins: Option<&[String]>,
    ) -> Result<EventContext>;

    fn list_plugins(&self) -> Vec<PluginInfo>;

    fn get_plugin_info(&self, name: &str) -> Option<PluginInfo>;

    fn list_commands(&self, bound_plugins: Option<&[String]>) -> Vec<CommandSpec>;

    /// Execute a command by name among the bound plugins.
    async fn execute_command(
        &self,
        name: &str,
        params: &[String],
        bound_plugins: Option<&[String]>,
    ) -> Result<Vec<CommandReturn>>;

    /// Tools the bound plugins expose, already namespaced.
    fn list_tools(&self, bound_plugins: Option<&[String]>) -> Vec<PluginToolSpec>;

    /// Execute a namespaced plugin tool.
    async fn execute_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value>;
}

fn tool_namespace(plugin: &str, tool: &str) -> String {
    format!("plugin-{plugin}-{tool}")
}

/// In-process host over a fixed plugin list. Used by the CLI wiring and
/// by tests; a remote host would implement `PluginHost` the same way.
#[derive(Default)]
pub struct StaticPluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl StaticPluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        debug!("registered plugin '{}'", plugin.info().name);
        self.plugins.push(plugin);
    }

    fn bound<'a>(
        &'a self,
        bound_plugins: Option<&'a [String]>,
    ) -> impl Iterator<Item = &'a Arc<dyn Plugin>> {
        self.plugins.iter().filter(move |p| match bound_plugins {
            None => true,
            Some(names) => names.iter().any(|n| *n == p.info().name),
        })
    }
}

#[async_trait]
impl PluginHost for StaticPluginHost {
    async fn emit_event(
        &self,
        event: PluginEvent,
        bound_plugins: Option<&[String]>,
    ) -> Result<EventContext> {
        let mut ctx = EventContext::new(event);
        for plugin in self.bound(bound_plugins) {
            plugin.handle_event(&mut ctx).await?;
        }
        Ok(ctx)
    }

    fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(|p| p.info()).collect()
    }

    fn get_plugin_info(&self, name: &str) -> Option<PluginInfo> {
        self.plugins
            .iter()
            .map(|p| p.info())
            .find(|i| i.name == name)
    }

    fn list_commands(&self, bound_plugins: Option<&[String]>) -> Vec<CommandSpec> {
        self.bound(bound_plugins)
            .flat_map(|p| p.commands())
            .collect()
    }

    async fn execute_command(
        &self,
        name: &str,
        params: &[String],
        bound_plugins: Option<&[String]>,
    ) -> Result<Vec<CommandReturn>> {
        for plugin in self.bound(bound_plugins) {
            if plugin.commands().iter().any(|c| c.name == name) {
                return plugin.execute_command(name, params).await;
            }
        }
        Err(Error::Plugin(format!("unknown command: {name}")))
    }

    fn list_tools(&self, bound_plugins: Option<&[String]>) -> Vec<PluginToolSpec> {
        self.bound(bound_plugins)
            .flat_map(|p| {
                let plugin_name = p.info().name;
                p.tools()
                    .into_iter()
                    .map(move |mut t| {
                        t.name = tool_namespace(&plugin_name, &t.name);
                        t
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    async fn execute_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        for plugin in &self.plugins {
            let plugin_name = plugin.info().name;
            let prefix = format!("plugin-{plugin_name}-");
            if let Some(bare) = name.strip_prefix(&prefix) {
                return plugin.execute_tool(bare, args).await;
            }
        }
        Err(Error::ToolNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botway_common::MessageChain;

    struct EchoPlugin;

    #[async_trait]
    impl Plugin for EchoPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo {
                name: "foo".into(),
                version: "0.1.0".into(),
                description: "echoes".into(),
            }
        }

        fn commands(&self) -> Vec<CommandSpec> {
            vec![CommandSpec {
                name: "echo".into(),
                description: "echo args".into(),
                usage: Some("echo <text>".into()),
            }]
        }

        async fn execute_command(
            &self,
            _name: &str,
            params: &[String],
        ) -> Result<Vec<CommandReturn>> {
            Ok(vec![CommandReturn::Text {
                text: params.join(" "),
            }])
        }

        fn tools(&self) -> Vec<PluginToolSpec> {
            vec![PluginToolSpec {
                name: "echo".into(),
                description: "echo a value".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "x": { "type": "integer" } }
                }),
            }]
        }

        async fn execute_tool(
            &self,
            _name: &str,
            args: serde_json::Value,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "ok": true, "echo": args }))
        }

        async fn handle_event(&self, ctx: &mut EventContext) -> Result<()> {
            if let PluginEvent::PersonNormalMessageReceived { text, .. } = &ctx.event {
                if text == "block me" {
                    ctx.prevent_default();
                    ctx.add_return_reply(MessageChain::text("blocked"));
                }
            }
            Ok(())
        }
    }

    fn host() -> StaticPluginHost {
        let mut host = StaticPluginHost::new();
        host.register(Arc::new(EchoPlugin));
        host
    }

    #[tokio::test]
    async fn tools_are_namespaced() {
        let host = host();
        let tools = host.list_tools(None);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "plugin-foo-echo");

        let out = host
            .execute_tool("plugin-foo-echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(out["ok"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn binding_filter_hides_plugins() {
        let host = host();
        assert_eq!(host.list_commands(None).len(), 1);
        assert!(host.list_commands(Some(&[])).is_empty());
        assert_eq!(host.list_commands(Some(&["foo".to_string()])).len(), 1);
    }

    #[tokio::test]
    async fn event_handlers_mutate_context() {
        let host = host();
        let ctx = host
            .emit_event(
                PluginEvent::PersonNormalMessageReceived {
                    sender_id: "1".into(),
                    text: "block me".into(),
                },
                None,
            )
            .await
            .unwrap();
        assert!(ctx.prevent_default);
        assert_eq!(ctx.reply_chain.unwrap().plain_text(), "blocked");
    }

    #[tokio::test]
    async fn unknown_command_errors() {
        let host = host();
        let err = host.execute_command("nope", &[], None).await.unwrap_err();
        assert!(matches!(err, Error::Plugin(_)));
    }
}
