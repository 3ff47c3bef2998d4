//! 临时 `.part` 文件写入与提升为最终文件。

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, ErrorKind};
use tracing::warn;

use crate::config::PART_SUFFIX;
use crate::error::UploadError;

/// 正在写入的 `<target>.part` 文件；成功前目标路径始终不存在。
pub struct PartFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
    written: u64,
}

impl PartFile {
    /// 以独占方式创建 `<target>.part`。
    pub async fn create(target: &Path) -> Result<Self, UploadError> {
        let temp_path = part_path(target);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => UploadError::TempFileExists(display_name(&temp_path)),
                _ => UploadError::Filesystem(err),
            })?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
            written: 0,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 追加一个分片，返回累计写入字节数。
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<u64, UploadError> {
        self.file.write_all(chunk).await.map_err(UploadError::Write)?;
        self.written += chunk.len() as u64;
        Ok(self.written)
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 刷盘后把临时文件提升为目标文件；任何失败都会删除临时文件。
    pub async fn finalize(mut self) -> Result<PathBuf, UploadError> {
        let synced = self.sync().await;
        if let Err(err) = synced {
            self.cleanup().await;
            return Err(UploadError::Close(err));
        }
        drop(self.file);

        if let Err(err) = promote(&self.temp_path, &self.target).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(UploadError::Rename(err));
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(self.target)
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// 硬链接会在目标已存在时失败，因此并发上传的输家不会覆盖已完成的文件。
/// 文件系统不支持硬链接时退回到 rename。
async fn promote(temp_path: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(temp_path, target).await {
        Ok(()) => {
            if let Err(err) = fs::remove_file(temp_path).await {
                warn!(path = ?temp_path, error = %err, "failed to remove promoted part file");
            }
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(err),
        Err(err) => {
            warn!(error = %err, "hard link unavailable, falling back to rename");
            fs::rename(temp_path, target).await
        }
    }
}

/// `<target>.part`
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
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
