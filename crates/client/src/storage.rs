//! Persistent credential storage.
//!
//! The credential store is the native counterpart of browser local storage:
//! - [`MemoryCredentialStore`]: process-local, used in tests and ephemeral sessions
//! - [`FileCredentialStore`]: a JSON file in the platform-appropriate config directory:
//!   - Linux: `~/.config/crewnexus/`
//!   - macOS: `~/Library/Application Support/crewnexus/`
//!   - Windows: `%APPDATA%\crewnexus\`

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Storage slot for the single bearer credential.
pub trait CredentialStore: Send + Sync {
    /// Read the stored credential, if any.
    fn load(&self) -> Option<String>;

    /// Persist a credential. Returns `true` if the operation succeeded.
    fn save(&self, token: &str) -> bool;

    /// Erase the credential. Returns `true` if one was present.
    fn remove(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<String> {
        self.slot.lock().clone()
    }

    fn save(&self, token: &str) -> bool {
        *self.slot.lock() = Some(token.to_string());
        true
    }

    fn remove(&self) -> bool {
        self.slot.lock().take().is_some()
    }
}

/// Credential kept as a JSON string on disk.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store under the platform config directory, keyed by `key`.
    ///
    /// Returns `None` if the config directory cannot be resolved or created.
    pub fn new(key: &str) -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let app_dir = config_dir.join("crewnexus");

        if !app_dir.exists() {
            std::fs::create_dir_all(&app_dir).ok()?;
        }

        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Some(Self::at(app_dir.join(format!("{}.json", safe_key))))
    }

    /// Store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Option<String> {
        let json = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&json).ok()
    }

    fn save(&self, token: &str) -> bool {
        match serde_json::to_string(token) {
            Ok(json) => std::fs::write(&self.path, json).is_ok(),
            Err(_) => false,
        }
    }

    fn remove(&self) -> bool {
        std::fs::remove_file(&self.path).is_ok()
    }
}
