//! Persistent preference store: string keys to string values, persisted as one JSON object.
//!
//! Structured values are stored JSON-encoded. A missing key means "use the default"; a value
//! that fails to decode also falls back to the default (with a warning) instead of erroring.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Selected chat model name (plain string).
pub const KEY_SELECTED_MODEL: &str = "chat_selected_model";
/// Selected knowledge-base ids (JSON array of strings).
pub const KEY_SELECTED_KBS: &str = "chat_selected_kbs";
/// Whether knowledge-base retrieval is enabled for completions (JSON bool).
pub const KEY_KNOWLEDGE_ENABLED: &str = "chat_knowledge_enabled";
/// Chat font size in pixels (JSON number).
pub const KEY_FONT_SIZE: &str = "chat_font_size_v2";
/// Bearer token, stored as-is.
pub const KEY_AUTHORIZATION: &str = "Authorization";

pub const DEFAULT_FONT_SIZE: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("preference store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("preference value could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed key/value store. Every mutation is written through to disk.
#[derive(Debug)]
pub struct PrefStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl PrefStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("prefs: ignoring malformed store {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), PrefsError> {
        self.entries.insert(key.into(), value.into());
        self.save()
    }

    pub fn remove(&mut self, key: &str) -> Result<(), PrefsError> {
        if self.entries.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Decode a JSON-encoded value. Returns None when absent or malformed.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.entries.get(key)?;
        match serde_json::from_str(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("prefs: value for {} is not valid JSON, using default: {}", key, e);
                None
            }
        }
    }

    pub fn get_json_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_json(key).unwrap_or(default)
    }

    pub fn set_json<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> Result<(), PrefsError> {
        let encoded = serde_json::to_string(value)?;
        self.set(key, encoded)
    }

    fn save(&self) -> Result<(), PrefsError> {
        let io_err = |source| PrefsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(json.as_bytes()))
            .and_then(|_| file.flush());
        if let Err(e) = file.unlock() {
            log::debug!("prefs: unlock of {} failed, released on close: {}", self.path.display(), e);
        }
        written.map_err(io_err)
    }

    // Chat selections

    pub fn selected_model(&self) -> String {
        self.get(KEY_SELECTED_MODEL).unwrap_or_default().to_string()
    }

    pub fn set_selected_model(&mut self, model: &str) -> Result<(), PrefsError> {
        self.set(KEY_SELECTED_MODEL, model)
    }

    pub fn selected_kbs(&self) -> Vec<String> {
        self.get_json_or(KEY_SELECTED_KBS, Vec::new())
    }

    pub fn set_selected_kbs(&mut self, kb_ids: &[String]) -> Result<(), PrefsError> {
        self.set_json(KEY_SELECTED_KBS, kb_ids)
    }

    /// Defaults to enabled.
    pub fn knowledge_enabled(&self) -> bool {
        self.get_json_or(KEY_KNOWLEDGE_ENABLED, true)
    }

    pub fn set_knowledge_enabled(&mut self, enabled: bool) -> Result<(), PrefsError> {
        self.set_json(KEY_KNOWLEDGE_ENABLED, &enabled)
    }

    pub fn font_size(&self) -> u32 {
        self.get_json_or(KEY_FONT_SIZE, DEFAULT_FONT_SIZE)
    }

    pub fn set_font_size(&mut self, size: u32) -> Result<(), PrefsError> {
        self.set_json(KEY_FONT_SIZE, &size)
    }
}
