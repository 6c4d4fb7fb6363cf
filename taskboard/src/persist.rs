//! Durable key-value storage for local mode and preferences.
//!
//! Values are strings, one per slot. [`FileStore`] keeps each slot in its own
//! file under the data directory; [`MemoryStore`] is the in-process variant
//! used by tests and throwaway sessions.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::Mutex;
use taskboard_proto::codec::{self, CodecError};
use taskboard_proto::task::Task;

/// Slot holding the local board as a JSON task array.
pub const TASKS_SLOT: &str = "tasks";
/// Slot holding the theme preference.
pub const THEME_SLOT: &str = "theme";
/// Slot holding the bearer token of the last login.
pub const AUTH_TOKEN_SLOT: &str = "auth_token";

/// Errors that can occur during key-value storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error on slot {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    /// Slot names are limited to ASCII letters, digits, `_` and `-`.
    #[error("invalid slot name: {0}")]
    InvalidKey(String),
    /// A value could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Synchronous string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Reads a slot; `None` if it was never written or was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a slot, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes a slot. Removing a missing slot succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be modified.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

/// One file per slot under a directory.
///
/// Writes go to a temporary sibling file that is then renamed over the
/// slot, so a crash never leaves a half-written value behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the slot files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.slot_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.slot_path(key)?;
        let tmp = path.with_extension("tmp");
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(value.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &path).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.slot_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Loads the local board. A missing slot is an empty board; so is a
/// corrupt one, which is logged rather than failing startup.
pub fn load_tasks(store: &dyn KeyValueStore) -> Vec<Task> {
    let raw = match store.get(TASKS_SLOT) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(err = %e, "failed to read saved tasks, starting empty");
            return Vec::new();
        }
    };
    codec::decode_snapshot(&raw).unwrap_or_else(|e| {
        tracing::warn!(err = %e, "saved tasks are corrupt, starting empty");
        Vec::new()
    })
}

/// Saves the local board.
///
/// # Errors
///
/// Returns [`StoreError`] if encoding or writing fails.
pub fn save_tasks(store: &dyn KeyValueStore, tasks: &[Task]) -> Result<(), StoreError> {
    let encoded = codec::encode_snapshot(tasks)?;
    store.set(TASKS_SLOT, &encoded)
}

/// The light/dark preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

/// Reads the theme preference, defaulting to light.
pub fn load_theme(store: &dyn KeyValueStore) -> Theme {
    match store.get(THEME_SLOT) {
        Ok(Some(raw)) => raw.parse().unwrap_or_default(),
        Ok(None) => Theme::default(),
        Err(e) => {
            tracing::warn!(err = %e, "failed to read theme preference");
            Theme::default()
        }
    }
}

/// Persists the theme preference.
///
/// # Errors
///
/// Returns [`StoreError`] if the slot cannot be written.
pub fn save_theme(store: &dyn KeyValueStore, theme: Theme) -> Result<(), StoreError> {
    store.set(THEME_SLOT, theme.as_str())
}
