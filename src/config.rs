use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::message::MAX_FILE_SIZE;
use crate::packager::{Fernet, CHUNK_SIZE};

const ENV_SOURCE_TOKEN: &str = "RELAY_SOURCE_TOKEN";
const ENV_DESTINATION_TOKEN: &str = "RELAY_DESTINATION_TOKEN";
const ENV_FERNET_KEY: &str = "RELAY_FERNET_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Numeric chat ids or `@usernames`; empty accepts every chat
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DestinationConfig {
    #[serde(default)]
    pub bot_token: String,
    pub chat_id: i64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

#[derive(Deserialize, Clone)]
pub struct CryptoConfig {
    #[serde(default)]
    pub fernet_key: String,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoConfig { fernet_key: <redacted> }")
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    #[default]
    None,
    Fixed,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: RetryStrategy,
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::None,
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Replace the source username with look-alike characters before sending
    #[serde(default)]
    pub obfuscate_username: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            send_timeout_secs: default_send_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            obfuscate_username: false,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_cron")]
    pub cron: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            cron: default_heartbeat_cron(),
        }
    }
}

fn default_api_url() -> String {
    "https://tapi.bale.ai".to_string()
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_download_timeout_secs() -> u64 {
    120
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML configuration")
    }

    /// Secrets may come from the environment instead of the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(token) = non_empty(ENV_SOURCE_TOKEN) {
            self.source.bot_token = token;
        }
        if let Some(token) = non_empty(ENV_DESTINATION_TOKEN) {
            self.destination.bot_token = token;
        }
        if let Some(key) = non_empty(ENV_FERNET_KEY) {
            self.crypto.fernet_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.bot_token.trim().is_empty() {
            anyhow::bail!("source.bot_token is not set (or {})", ENV_SOURCE_TOKEN);
        }
        if self.destination.bot_token.trim().is_empty() {
            anyhow::bail!(
                "destination.bot_token is not set (or {})",
                ENV_DESTINATION_TOKEN
            );
        }
        if self.delivery.chunk_size == 0 {
            anyhow::bail!("delivery.chunk_size must be greater than zero");
        }
        self.fernet()?;
        Ok(())
    }

    pub fn fernet(&self) -> Result<Fernet> {
        Fernet::new(&self.crypto.fernet_key).context("crypto.fernet_key is not a valid Fernet key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const KEY: &str = "cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=";

    fn minimal() -> String {
        format!(
            r#"
[source]
bot_token = "src-token"
channels = ["@news", "-1001234"]

[destination]
bot_token = "dst-token"
chat_id = 4242

[crypto]
fernet_key = "{}"
"#,
            KEY
        )
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(&minimal()).unwrap();
        assert_eq!(config.destination.api_url, "https://tapi.bale.ai");
        assert_eq!(config.delivery.chunk_size, 2000);
        assert_eq!(config.delivery.max_file_size, 50 * 1024 * 1024);
        assert_eq!(config.delivery.retry.strategy, RetryStrategy::None);
        assert!(!config.delivery.obfuscate_username);
        assert_eq!(config.heartbeat.cron, "0 0 * * * *");
        assert_eq!(config.source.channels, vec!["@news", "-1001234"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_retry_section() {
        let content = format!(
            "{}\n[delivery]\nchunk_size = 500\n\n[delivery.retry]\nstrategy = \"fixed\"\nattempts = 4\n",
            minimal()
        );
        let config = Config::parse(&content).unwrap();
        assert_eq!(config.delivery.chunk_size, 500);
        assert_eq!(config.delivery.retry.strategy, RetryStrategy::Fixed);
        assert_eq!(config.delivery.retry.attempts, 4);
        assert_eq!(config.delivery.retry.delay_ms, 1000);
    }

    #[test]
    fn test_env_overrides_secrets() {
        let mut config = Config::parse(&minimal()).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_DESTINATION_TOKEN, "from-env"),
            (ENV_SOURCE_TOKEN, "  "),
        ]
        .into_iter()
        .collect();

        config.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.destination.bot_token, "from-env");
        assert_eq!(config.source.bot_token, "src-token");
    }

    #[test]
    fn test_invalid_key_rejected() {
        let content = minimal().replace(KEY, "short");
        let config = Config::parse(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let content = format!("{}\n[delivery]\nchunk_size = 0\n", minimal());
        let config = Config::parse(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_chat_id_is_parse_error() {
        let content = minimal().replace("chat_id = 4242", "");
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal().as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.destination.chat_id, 4242);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::parse(&minimal()).unwrap();
        assert!(!format!("{:?}", config).contains(KEY));
    }
}
