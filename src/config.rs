use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Page size used when none is configured
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Environment variable that overrides `base_url`
pub const BASE_URL_ENV: &str = "CHATBOX_BASE_URL";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the chat backend, e.g. `https://example.com`
    pub base_url: String,

    /// Path of the history endpoint
    pub history_path: String,

    /// Path of the send endpoint
    pub send_path: String,

    /// Timeout for history requests, in seconds
    pub request_timeout_secs: u64,

    /// Connection timeout for every request, in seconds
    pub connect_timeout_secs: u64,

    /// Number of messages per history page
    pub page_size: u32,

    /// Conversation opened when none is given on the command line
    pub default_conversation: Option<String>,

    /// Visitor email attached to every request when set
    pub visitor_email: Option<String>,

    /// Chatbox home directory
    #[serde(skip)]
    pub chatbox_home: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));

        Config {
            base_url: "http://localhost:3000".to_string(),
            history_path: "/api/getmessages".to_string(),
            send_path: "/api/message".to_string(),
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
            page_size: DEFAULT_PAGE_SIZE,
            default_conversation: None,
            visitor_email: None,
            chatbox_home: home.join(".chatbox"),
        }
    }
}

impl Config {
    /// Load configuration from `~/.chatbox/config.toml`, applying environment overrides
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        let chatbox_home = home.join(".chatbox");

        let mut config = Self::load_from(&chatbox_home.join("config.toml"))?;
        config.chatbox_home = chatbox_home;
        config.apply_overrides(std::env::var(BASE_URL_ENV).ok());

        Ok(config)
    }

    /// Load configuration from an explicit file, falling back to defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(dir) = path.parent() {
            config.chatbox_home = dir.to_path_buf();
        }

        Ok(config)
    }

    /// Save configuration to `config.toml` in the chatbox home directory
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.chatbox_home)
            .context("Failed to create .chatbox directory")?;
        self.save_to(&self.config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.chatbox_home.join("config.toml")
    }

    /// Apply values coming from the environment or the command line
    pub fn apply_overrides(&mut self, base_url: Option<String>) {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url;
        }
    }

    pub fn history_url(&self) -> String {
        join_url(&self.base_url, &self.history_path)
    }

    pub fn send_url(&self) -> String {
        join_url(&self.base_url, &self.send_path)
    }

    /// Per-session configuration for a conversation
    pub fn session(&self, conversation_id: impl Into<String>) -> SessionConfig {
        SessionConfig::new(conversation_id).with_page_size(self.page_size)
    }
}

/// Configuration injected into a conversation store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub conversation_id: String,
    pub page_size: u32,
}

impl SessionConfig {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the page size; zero is clamped to one
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.history_path, "/api/getmessages");
        assert!(config.visitor_email.is_none());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "base_url = \"https://chat.example.com/\"\npage_size = 50\ndefault_conversation = \"bot-7\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.page_size, 50);
        assert_eq!(config.default_conversation.as_deref(), Some("bot-7"));
        assert_eq!(config.send_path, "/api/message");
        assert_eq!(config.history_url(), "https://chat.example.com/api/getmessages");
        assert_eq!(config.chatbox_home, dir.path());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let config = Config {
            visitor_email: Some("visitor@example.com".to_string()),
            chatbox_home: dir.path().to_path_buf(),
            ..Config::default()
        };

        config.save().unwrap();
        let loaded = Config::load_from(&config.config_path()).unwrap();

        assert_eq!(loaded.visitor_email, config.visitor_email);
        assert_eq!(loaded.base_url, config.base_url);
    }

    #[test]
    fn blank_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(Some("   ".to_string()));
        assert_eq!(config.base_url, "http://localhost:3000");

        config.apply_overrides(Some("https://other.example".to_string()));
        assert_eq!(config.send_url(), "https://other.example/api/message");
    }

    #[test]
    fn session_page_size_is_clamped() {
        let config = Config {
            page_size: 0,
            ..Config::default()
        };
        let session = config.session("bot-1");

        assert_eq!(session.conversation_id, "bot-1");
        assert_eq!(session.page_size, 1);
        assert_eq!(SessionConfig::new("x").page_size, 20);
    }
}
