use async_trait::async_trait;
use botway_common::{Error, Result};
use serde_json::json;

use super::{ToolLoader, ToolOrigin, ToolSpec};

/// Internal tools compiled into the binary. Kept deliberately small: the
/// interesting tools arrive through plugins and MCP servers.
pub struct BuiltinToolLoader;

const CURRENT_TIME: &str = "current_time";

#[async_trait]
impl ToolLoader for BuiltinToolLoader {
    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Internal
    }

    async fn get_tools(&self, _filter: Option<&[String]>) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: CURRENT_TIME.to_string(),
            description: "Get the current date and time (UTC).".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
            origin: ToolOrigin::Internal,
        }]
    }

    async fn has_tool(&self, name: &str) -> bool {
        name == CURRENT_TIME
    }

    async fn execute(&self, name: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
        match name {
            CURRENT_TIME => {
                let now = chrono::Utc::now();
                Ok(json!({
                    "iso": now.to_rfc3339(),
                    "unix": now.timestamp(),
                }))
            }
            other => Err(Error::ToolNotFound(other.to_string())),
        }
    }
}
