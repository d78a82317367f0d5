use std::path::{Path, PathBuf};

use botway_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

/// Loads the application configuration from a TOML file, expanding
/// `${ENV_VAR}` references in string values before deserialization.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AppConfig> {
        info!("loading config from {}", self.path.display());
        let raw = std::fs::read_to_string(&self.path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<AppConfig> {
        let expanded = expand_env(raw);
        toml::from_str(&expanded).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }
}

/// Replace `${NAME}` with the value of the environment variable NAME.
/// Unset variables expand to the empty string.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if let Ok(value) = std::env::var(name) {
                    out.push_str(&value);
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let cfg = ConfigLoader::parse("").unwrap();
        assert!(cfg.pipelines.is_empty());
        assert!(!cfg.webchat.enable);
    }

    #[test]
    fn env_expansion_substitutes_set_variables() {
        // Safety: test-local variable name, no concurrent reader depends on it.
        unsafe { std::env::set_var("BOTWAY_TEST_KEY", "sk-123") };
        let raw = r#"
[[models]]
uuid = "m-1"
name = "gpt"
requester = "openai-chat-completions"
api-key = "${BOTWAY_TEST_KEY}"
"#;
        let cfg = ConfigLoader::parse(raw).unwrap();
        assert_eq!(cfg.models[0].api_key.as_deref(), Some("sk-123"));
    }

    #[test]
    fn env_expansion_leaves_unset_empty() {
        assert_eq!(expand_env("a=${BOTWAY_DOES_NOT_EXIST}!"), "a=!");
    }

    #[test]
    fn env_expansion_keeps_unterminated_reference() {
        assert_eq!(expand_env("tail ${UNCLOSED"), "tail ${UNCLOSED");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = ConfigLoader::parse("not = [toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
