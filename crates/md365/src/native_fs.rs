//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use rand::Rng;
use record_fs::validate_relative_path;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use sync_core::fs::{FileEntry, FileSystem, FsError, Result};
use tokio::fs;

/// Native filesystem rooted at the data directory
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let clean = validate_relative_path(path).map_err(|e| FsError::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        if clean.is_empty() {
            Ok(self.base_path.clone())
        } else {
            Ok(self.base_path.join(clean))
        }
    }

    /// Generate a random hex string for temp file names.
    fn random_hex() -> String {
        let bytes: [u8; 8] = rand::rng().random();
        hex::encode(bytes)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(path, e))?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> FsError {
    let display = path.display().to_string();
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(display),
        _ if path.is_dir() => FsError::IsDirectory(display),
        _ => FsError::Io(format!("{}: {}", display, e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        fs::read(&full_path).await.map_err(|e| io_error(&full_path, e))
    }

    /// Atomic write using temp file + rename.
    ///
    /// The temp file lives next to the target so the rename never crosses
    /// filesystems. Its name never ends in `.md`, so scans ignore leftovers.
    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        Self::ensure_parent(&full_path).await?;

        let temp_path = full_path.with_extension(format!("{}.tmp", Self::random_hex()));

        // Write to temp file
        if let Err(e) = fs::write(&temp_path, content).await {
            // Clean up temp file if write failed
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error(&temp_path, e));
        }

        // Atomic rename to target
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            // Clean up temp file if rename failed
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error(&full_path, e));
        }

        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let full_path = self.full_path(path)?;
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| io_error(&full_path, e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error(&full_path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_error(&entry.path(), e))?;

            entries.push(FileEntry {
                name,
                is_dir: file_type.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| io_error(&full_path, e))?;

        if metadata.is_dir() {
            return Err(FsError::IsDirectory(full_path.display().to_string()));
        }
        fs::remove_file(&full_path)
            .await
            .map_err(|e| io_error(&full_path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        fs::try_exists(&full_path)
            .await
            .map_err(|e| io_error(&full_path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.full_path(from)?;
        let to_path = self.full_path(to)?;
        Self::ensure_parent(&to_path).await?;
        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| io_error(&from_path, e))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| io_error(&full_path, e))
    }
}
