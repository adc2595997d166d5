use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::ErrorKind;
use tracing::{info, warn};

use crate::atomic::TEMP_MARKER;
use crate::filename::is_sanitized;

/// Flat directory holding every stored file, addressed by sanitized name.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates the storage directory (and ancestors) if absent and removes temp files
    /// left behind by an interrupted write. An existing directory is not an error.
    pub async fn ensure_ready(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} is not a directory", self.root.display()),
            ));
        }
        let removed = self.sweep_stale_temp().await?;
        if removed > 0 {
            info!(removed, "removed stale upload temp files");
        }
        Ok(())
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Path for a sanitized name. Anything the sanitizer would change is refused.
    pub fn resolve_name(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_sanitized(name) {
            return Err(StorageError::InvalidName);
        }
        Ok(self.root.join(name))
    }

    /// Resolves an existing stored file, refusing symlinks and anything that is not a
    /// regular file.
    pub async fn resolve_existing(&self, name: &str) -> Result<(PathBuf, Metadata), StorageError> {
        let target = self.resolve_name(name)?;
        let metadata = fs::symlink_metadata(&target).await?;
        if metadata.file_type().is_symlink() {
            return Err(StorageError::InvalidName);
        }
        if !metadata.is_file() {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("{name} is not a file"),
            )));
        }
        Ok((target, metadata))
    }

    pub async fn open(&self, name: &str) -> Result<(File, Metadata), StorageError> {
        let (target, metadata) = self.resolve_existing(name).await?;
        let file = File::open(&target).await?;
        Ok((file, metadata))
    }

    /// Lists stored files sorted by name; temp files and directories are skipped.
    pub async fn list(&self) -> Result<Vec<StoredEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_sanitized(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().ok().map(|ts| {
                let datetime: DateTime<Utc> = ts.into();
                datetime.to_rfc2822()
            });
            entries.push(StoredEntry {
                mime: mime_guess::from_path(&name).first_or_octet_stream().to_string(),
                name,
                size: metadata.len(),
                modified,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn sweep_stale_temp(&self) -> io::Result<u64> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') || !name.contains(TEMP_MARKER) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(name, error = %err, "failed to remove stale temp file"),
            }
        }
        Ok(removed)
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidName => f.write_str("invalid file name"),
            StorageError::Io(err) => write!(f, "storage i/o error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Debug)]
pub struct StoredEntry {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub modified: Option<String>,
}
