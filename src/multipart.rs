//! multipart/form-data 上传：每个部分直接写入最终文件名，不做冲突重命名。

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart};
use axum::response::Response;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, ErrorKind};
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::{ApiError, UploadError};
use crate::frontend::render_page;
use crate::sanitize::safe_file_name;
use crate::storage::OutputDir;

/// 依次写入每个文件部分；首个失败即中止，之前写入的文件保留。
pub async fn upload_multipart(
    Extension(output): Extension<Arc<OutputDir>>,
    Extension(config): Extension<Arc<UploadConfig>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut count = 0usize;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "multipart read failed");
                return Err(UploadError::Multipart(err.to_string()).into());
            }
        };
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            debug!(field = field.name().unwrap_or(""), "skipping non-file field");
            continue;
        };
        if let Err(err) = save_field(&output, &raw_name, field).await {
            warn!(name = raw_name, error = %err, "multipart upload failed");
            return Err(err.into());
        }
        count += 1;
    }

    info!(files = count, "upload complete");
    render_page("done.html", &config.prefix)
}

async fn save_field(
    output: &OutputDir,
    raw_name: &str,
    mut field: Field<'_>,
) -> Result<u64, UploadError> {
    let name = safe_file_name(raw_name)?;
    let path = output.direct_path(&name);
    info!(name, "uploading");

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|err| match err.kind() {
            ErrorKind::AlreadyExists => UploadError::FileExists(name.clone()),
            _ => UploadError::Filesystem(err),
        })?;

    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| UploadError::Multipart(err.to_string()))?
    {
        file.write_all(&chunk).await.map_err(UploadError::Write)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(UploadError::Close)?;
    file.sync_all().await.map_err(UploadError::Close)?;

    debug!(name, bytes = written, "part saved");
    Ok(written)
}
