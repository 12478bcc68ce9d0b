use crate::error::{ForecastError, Result};
use crate::mcp::client::ClientOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do when the oracle asks for several tools in one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallPolicy {
    /// Run the first requested call and drop the rest.
    #[default]
    FirstOnly,
    /// Run every requested call in order, one result per call.
    All,
}

/// How to launch the tool provider process.
///
/// Example in `~/.forecast/config.json` or `.forecast.json`:
/// ```json
/// {
///   "server": {
///     "name": "weather",
///     "command": "node",
///     "args": ["../server/dist/index.js"]
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_server_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_server_name() -> String {
    "weather".to_string()
}

fn default_server_command() -> String {
    "forecast-mcp".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            command: default_server_command(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Oracle invocations allowed per question before giving up.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Per-request deadline in milliseconds; 0 disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline for the provider handshake in milliseconds; 0 disables it.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default)]
    pub tool_call_policy: ToolCallPolicy,
    /// Feed tool failures back to the model instead of failing the question.
    #[serde(default = "default_reinject_tool_errors")]
    pub reinject_tool_errors: bool,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_model() -> String {
    std::env::var("FORECAST_MODEL").unwrap_or_else(|_| "gpt-4-1106-preview".to_string())
}

fn default_base_url() -> String {
    std::env::var("FORECAST_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_turns() -> usize {
    10
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_reinject_tool_errors() -> bool {
    true
}

fn env_api_key() -> String {
    std::env::var("FORECAST_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .unwrap_or_default()
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: env_api_key(),
            max_tokens: default_max_tokens(),
            max_turns: default_max_turns(),
            request_timeout_ms: default_request_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            tool_call_policy: ToolCallPolicy::default(),
            reinject_tool_errors: default_reinject_tool_errors(),
            server: ServerConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// `~/.forecast/config.json`, then keys from `./.forecast.json` on top.
    pub fn load() -> Result<Self> {
        let local = std::env::current_dir()
            .ok()
            .map(|d| d.join(".forecast.json"));
        Self::load_from(&Self::resolve_path("config.json"), local.as_deref())
    }

    pub fn load_from(global: &Path, local: Option<&Path>) -> Result<Self> {
        let mut config = if global.exists() {
            let data = std::fs::read_to_string(global)?;
            serde_json::from_str::<ForecastConfig>(&data)
                .map_err(|e| ForecastError::Config(format!("{}: {e}", global.display())))?
        } else {
            ForecastConfig::default()
        };

        if config.api_key.is_empty() {
            config.api_key = env_api_key();
        }

        if let Some(local) = local.filter(|p| p.exists()) {
            let data = std::fs::read_to_string(local)?;
            let override_val: serde_json::Value = serde_json::from_str(&data)
                .map_err(|e| ForecastError::Config(format!("{}: {e}", local.display())))?;
            let mut base = serde_json::to_value(&config)?;
            if let (Some(base_obj), Some(over_obj)) =
                (base.as_object_mut(), override_val.as_object())
            {
                for (k, v) in over_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            config = serde_json::from_value(base)
                .map_err(|e| ForecastError::Config(format!("{}: {e}", local.display())))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(ForecastError::Config("max_turns must be at least 1".into()));
        }
        if self.server.command.trim().is_empty() {
            return Err(ForecastError::Config("server.command is empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            handshake_timeout: self.handshake_timeout(),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn resolve_path(relative: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".forecast")
            .join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForecastConfig::load_from(&dir.path().join("config.json"), None).unwrap();
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.tool_call_policy, ToolCallPolicy::FirstOnly);
        assert!(config.reinject_tool_errors);
        assert_eq!(config.server.command, "forecast-mcp");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn local_file_overrides_global_keys() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("config.json");
        let local = dir.path().join(".forecast.json");
        fs::write(
            &global,
            r#"{"max_turns": 4, "api_key": "sk-global", "server": {"command": "node", "args": ["index.js"]}}"#,
        )
        .unwrap();
        fs::write(&local, r#"{"max_turns": 6, "tool_call_policy": "all"}"#).unwrap();

        let config = ForecastConfig::load_from(&global, Some(&local)).unwrap();
        assert_eq!(config.max_turns, 6);
        assert_eq!(config.tool_call_policy, ToolCallPolicy::All);
        assert_eq!(config.api_key, "sk-global");
        assert_eq!(config.server.command, "node");
        assert_eq!(config.server.args, vec!["index.js"]);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = ForecastConfig {
            request_timeout_ms: 0,
            ..ForecastConfig::default()
        };
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.client_options().request_timeout, None);
    }

    #[test]
    fn rejects_zero_turns() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("config.json");
        fs::write(&global, r#"{"max_turns": 0}"#).unwrap();
        assert!(matches!(
            ForecastConfig::load_from(&global, None),
            Err(ForecastError::Config(_))
        ));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("config.json");
        fs::write(&global, "{ nope").unwrap();
        assert!(matches!(
            ForecastConfig::load_from(&global, None),
            Err(ForecastError::Config(_))
        ));
    }
}
