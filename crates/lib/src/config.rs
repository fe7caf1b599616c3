//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.kbchat/config.json`) and environment.
//! Covers the two backends (chat and management), the bearer token, chat defaults, and
//! where the preference store lives.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend base URLs.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bearer token settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Chat defaults (assistant id, name for new conversations).
    #[serde(default)]
    pub chat: ChatConfig,

    /// Preference store location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Base URLs of the chat backend and the management backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Chat backend (conversations, completion). Default "http://127.0.0.1:9380".
    #[serde(default = "default_chat_base_url")]
    pub chat_base_url: String,

    /// Management backend (users, LLM providers). Default "http://127.0.0.1:5000".
    #[serde(default = "default_management_base_url")]
    pub management_base_url: String,
}

fn default_chat_base_url() -> String {
    "http://127.0.0.1:9380".to_string()
}

fn default_management_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            chat_base_url: default_chat_base_url(),
            management_base_url: default_management_base_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Bearer token sent as `Authorization`. Overridden by KBCHAT_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Assistant (dialog) that new conversations are created under.
    pub dialog_id: Option<String>,

    /// Name given to conversations created on first send.
    #[serde(default = "default_conversation_name")]
    pub conversation_name: String,
}

fn default_conversation_name() -> String {
    "New conversation".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            dialog_id: None,
            conversation_name: default_conversation_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Preference file. Relative paths resolve against the config file's parent; default `prefs.json` there.
    #[serde(default)]
    pub prefs_path: Option<PathBuf>,
}

/// Resolve the bearer token: env KBCHAT_TOKEN overrides config.
pub fn resolve_token(config: &Config) -> Option<String> {
    std::env::var("KBCHAT_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .auth
                .token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("KBCHAT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".kbchat").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or KBCHAT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write a default config file if none exists. Returns the config directory.
pub fn init_config(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_dir(config_path);
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;
    if !config_path.exists() {
        let s = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, s)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }
    Ok(config_dir.to_path_buf())
}

fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the preference file: `storage.prefsPath` if set (relative paths resolved against the config file's parent), otherwise `prefs.json` next to the config.
pub fn resolve_prefs_path(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_dir(config_path);
    match &config.storage.prefs_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                parent.join(p)
            }
        }
        _ => parent.join("prefs.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_urls() {
        let s = ServerConfig::default();
        assert_eq!(s.chat_base_url, "http://127.0.0.1:9380");
        assert_eq!(s.management_base_url, "http://127.0.0.1:5000");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"chat":{"dialogId":"d1"},"server":{"chatBaseUrl":"http://x"}}"#)
                .unwrap();
        assert_eq!(config.chat.dialog_id.as_deref(), Some("d1"));
        assert_eq!(config.chat.conversation_name, "New conversation");
        assert_eq!(config.server.chat_base_url, "http://x");
        assert_eq!(config.server.management_base_url, "http://127.0.0.1:5000");
    }

    #[test]
    fn resolve_prefs_path_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.kbchat/config.json");
        assert_eq!(
            resolve_prefs_path(&config, path),
            PathBuf::from("/home/user/.kbchat/prefs.json")
        );
    }

    #[test]
    fn resolve_prefs_path_override_relative() {
        let mut config = Config::default();
        config.storage.prefs_path = Some(PathBuf::from("state/prefs.json"));
        let path = Path::new("/home/user/.kbchat/config.json");
        assert_eq!(
            resolve_prefs_path(&config, path),
            PathBuf::from("/home/user/.kbchat/state/prefs.json")
        );
    }

    #[test]
    fn resolve_prefs_path_override_absolute() {
        let mut config = Config::default();
        config.storage.prefs_path = Some(PathBuf::from("/var/lib/kbchat/prefs.json"));
        let path = Path::new("/home/user/.kbchat/config.json");
        assert_eq!(
            resolve_prefs_path(&config, path),
            PathBuf::from("/var/lib/kbchat/prefs.json")
        );
    }

    #[test]
    fn load_missing_config_is_default() {
        let path = std::env::temp_dir()
            .join(format!("kbchat-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert!(config.chat.dialog_id.is_none());
    }

    #[test]
    fn init_writes_loadable_config() {
        let dir = std::env::temp_dir().join(format!("kbchat-init-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let created = init_config(&path).unwrap();
        assert_eq!(created, dir);
        let (config, _) = load_config(Some(path)).unwrap();
        assert_eq!(config.server.chat_base_url, "http://127.0.0.1:9380");
    }
}
