use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

use crate::config::MAX_NAME_CANDIDATES;
use crate::error::UploadError;

/// 上传输出目录：扁平结构，只存放清洗后的文件与临时 `.part` 文件。
#[derive(Clone, Debug)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 已清洗名字在输出目录中的直接路径（不做冲突处理）。
    pub fn direct_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// 按探测顺序返回第一个尚不存在的候选路径：
    /// 先 `<root>/<name>`，再 `<root>/0.<name>` 到 `<root>/98.<name>`。
    ///
    /// 探测结果只是提示；调用方仍须独占创建文件，其间名字可能被其他上传占用。
    pub async fn resolve_available(&self, name: &str) -> Result<PathBuf, UploadError> {
        let mut candidate = self.root.join(name);
        for index in 0..MAX_NAME_CANDIDATES {
            if !entry_exists(&candidate).await? {
                return Ok(candidate);
            }
            candidate = self.root.join(format!("{index}.{name}"));
        }
        Err(UploadError::NoAvailableName(name.to_string()))
    }
}

async fn entry_exists(path: &Path) -> Result<bool, UploadError> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(UploadError::Filesystem(err)),
    }
}
