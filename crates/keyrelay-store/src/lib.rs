//! # keyrelay-store: Persisted Credential Store
//!
//! The single file every sync operation ultimately reads from or writes to.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Atomic Replace                                   │
//! │                                                                         │
//! │  write_atomic(bytes)                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. create  .<name>.<pid>.tmp   (same directory as the store)          │
//! │  2. write_all + fsync           (data is on disk)                      │
//! │  3. rename tmp ──► <name>       (readers see old OR new, never half)   │
//! │  4. fsync directory             (rename survives power loss, unix)     │
//! │                                                                         │
//! │  On any failure the temp file is removed and the old store is intact.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keyrelay_store::CredentialStore;
//!
//! let store = CredentialStore::new("/var/lib/keyrelay/passwords.json");
//! store.write_document(&doc)?;
//! let doc = store.read_document()?;
//! ```

pub mod error;

pub use error::{StoreError, StoreResult};

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use keyrelay_core::CredentialDocument;
use tracing::{debug, warn};

/// A credential document persisted in one file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Creates a store handle. Nothing is touched on disk until the first
    /// read or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CredentialStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads the raw store bytes.
    pub fn read(&self) -> StoreResult<Vec<u8>> {
        fs::read(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                StoreError::io(format!("Failed to read '{}'", self.path.display()), e)
            }
        })
    }

    /// Reads and decodes the stored document.
    pub fn read_document(&self) -> StoreResult<CredentialDocument> {
        let bytes = self.read()?;
        CredentialDocument::decode(&bytes).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Reads the stored document, or an empty one if the file does not
    /// exist yet.
    pub fn read_document_or_empty(&self) -> StoreResult<CredentialDocument> {
        match self.read_document() {
            Err(StoreError::NotFound { .. }) => Ok(CredentialDocument::new()),
            other => other,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Encodes `doc` and replaces the store with it atomically.
    ///
    /// Returns the exact bytes that were written.
    pub fn write_document(&self, doc: &CredentialDocument) -> StoreResult<Vec<u8>> {
        let bytes = doc.encode()?;
        self.write_atomic(&bytes)?;
        Ok(bytes)
    }

    /// Replaces the store contents without ever exposing a partial file.
    pub fn write_atomic(&self, data: &[u8]) -> StoreResult<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("Failed to create '{}'", dir.display()), e))?;

        let temp_path = self.temp_path();

        let result = Self::write_and_sync(&temp_path, data).and_then(|()| {
            fs::rename(&temp_path, &self.path).map_err(|e| {
                StoreError::io(
                    format!(
                        "Failed to rename '{}' to '{}'",
                        temp_path.display(),
                        self.path.display()
                    ),
                    e,
                )
            })
        });

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temp file");
                }
            }
            return Err(e);
        }

        Self::sync_directory(&dir)?;

        debug!(path = %self.path.display(), bytes = data.len(), "Store written");
        Ok(())
    }

    fn write_and_sync(temp_path: &Path, data: &[u8]) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| {
                StoreError::io(
                    format!("Failed to create temporary file '{}'", temp_path.display()),
                    e,
                )
            })?;

        file.write_all(data).map_err(|e| {
            StoreError::io(
                format!("Failed to write temporary file '{}'", temp_path.display()),
                e,
            )
        })?;

        file.sync_all()
            .map_err(|e| StoreError::io(format!("Failed to sync '{}'", temp_path.display()), e))
    }

    #[cfg(unix)]
    fn sync_directory(dir: &Path) -> StoreResult<()> {
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| StoreError::io(format!("Failed to sync directory '{}'", dir.display()), e))
    }

    #[cfg(not(unix))]
    fn sync_directory(_dir: &Path) -> StoreResult<()> {
        Ok(())
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        self.parent_dir()
            .join(format!(".{}.{}.tmp", name, std::process::id()))
    }
}
