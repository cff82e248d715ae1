use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use thiserror::Error;

/// Name of the single slot the vault persists into.
pub const VAULT_SLOT_NAME: &str = "visionary_studio_vault";

#[derive(Debug, Error)]
pub enum SlotWriteError {
    /// The slot cannot hold the snapshot. Nothing was written.
    #[error("vault slot capacity reached ({needed} bytes needed, limit {limit})")]
    Capacity { needed: usize, limit: usize },
    #[error("vault slot write failed: {0}")]
    Io(#[from] io::Error),
}

/// A single named storage slot holding the serialized artifact list.
pub trait VaultSlot: Send {
    fn name(&self) -> &str;
    /// Raw slot content, `None` when the slot has never been written.
    fn read(&self) -> Option<String>;
    fn write(&mut self, contents: &str) -> Result<(), SlotWriteError>;
    fn clear(&mut self);
}

/// File-backed slot. Each write goes to its own uniquely named temp file in the
/// slot's directory, is synced, then persisted over the slot, so readers and
/// concurrent writers only ever see a complete snapshot.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
    max_bytes: Option<usize>,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: Option<usize>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl VaultSlot for FileSlot {
    fn name(&self) -> &str {
        VAULT_SLOT_NAME
    }

    fn read(&self) -> Option<String> {
        std::fs::read_to_string(&self.path).ok()
    }

    fn write(&mut self, contents: &str) -> Result<(), SlotWriteError> {
        if let Some(limit) = self.max_bytes {
            if contents.len() > limit {
                return Err(SlotWriteError::Capacity {
                    needed: contents.len(),
                    limit,
                });
            }
        }
        let directory = self.directory();
        std::fs::create_dir_all(directory)?;
        let mut temp = NamedTempFile::new_in(directory)?;
        temp.write_all(contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn clear(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// In-memory slot. Clones share the same storage, which lets a test keep a handle
/// on what the vault wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot {
    contents: Arc<Mutex<Option<String>>>,
    max_bytes: Option<usize>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(contents.into()))),
            max_bytes: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().ok().and_then(|guard| guard.clone())
    }
}

impl VaultSlot for MemorySlot {
    fn name(&self) -> &str {
        VAULT_SLOT_NAME
    }

    fn read(&self) -> Option<String> {
        self.contents()
    }

    fn write(&mut self, contents: &str) -> Result<(), SlotWriteError> {
        if let Some(limit) = self.max_bytes {
            if contents.len() > limit {
                return Err(SlotWriteError::Capacity {
                    needed: contents.len(),
                    limit,
                });
            }
        }
        let mut guard = self.contents.lock().map_err(|_| {
            SlotWriteError::Io(io::Error::new(
                io::ErrorKind::Other,
                "memory slot lock poisoned",
            ))
        })?;
        *guard = Some(contents.to_string());
        Ok(())
    }

    fn clear(&mut self) {
        if let Ok(mut guard) = self.contents.lock() {
            *guard = None;
        }
    }
}
