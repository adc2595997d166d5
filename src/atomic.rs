//! 临时写入与原子替换的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::storage::StorageError;

/// 临时文件名中的标记，启动时据此清理残留文件。
pub const TEMP_MARKER: &str = ".tmp.";

/// 可用于原子替换的临时文件封装。
///
/// 未调用 [`AtomicFile::finalize`] 就被丢弃时（写入失败、请求被取消），
/// 临时文件会在 `Drop` 中删除。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: Option<File>,
    written: u64,
    committed: bool,
}

impl AtomicFile {
    /// 在目标路径同目录创建以 `.` 开头的临时文件。
    pub async fn new(target: &Path) -> Result<Self, StorageError> {
        let parent = target.parent().ok_or(StorageError::InvalidName)?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .ok_or(StorageError::InvalidName)?;
        let temp_name = format!(".{base}{TEMP_MARKER}{}", Uuid::new_v4());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file: Some(file),
            written: 0,
            committed: false,
        })
    }

    /// 追加一段内容。
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("temp file already closed"))?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 同步并原子替换目标文件，返回写入的字节数。失败时临时文件随 `self` 一起删除。
    pub async fn finalize(mut self) -> Result<u64, StorageError> {
        let file = self
            .file
            .take()
            .ok_or_else(|| io::Error::other("temp file already closed"))?;
        file.sync_all().await?;
        drop(file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_err() {
                    return Err(err.into());
                }
                fs::rename(&self.temp_path, &self.target).await?;
            }
            #[cfg(not(windows))]
            {
                return Err(err.into());
            }
        }
        self.committed = true;

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(self.written)
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        if let Err(err) = std::fs::remove_file(&self.temp_path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.temp_path.display(), error = %err, "failed to remove upload temp file");
        }
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finalize_replaces_target() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("note.txt");
        std::fs::write(&target, b"old contents").expect("seed");

        let mut atomic = AtomicFile::new(&target).await.expect("create");
        atomic.write(b"new").await.expect("write");
        assert_eq!(std::fs::read(&target).expect("read"), b"old contents");
        let written = atomic.finalize().await.expect("finalize");

        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&target).expect("read"), b"new");
        let leftovers = std::fs::read_dir(temp.path()).expect("read_dir").count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn dropping_without_finalize_removes_temp_file() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("note.txt");

        let mut atomic = AtomicFile::new(&target).await.expect("create");
        atomic.write(b"partial").await.expect("write");
        assert_eq!(std::fs::read_dir(temp.path()).expect("read_dir").count(), 1);
        drop(atomic);

        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(temp.path()).expect("read_dir").count(), 0);
    }
}
