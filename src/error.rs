//! 上传错误分类与 HTTP 错误响应。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;
use thiserror::Error;

/// 单次上传（WebSocket 会话或 multipart 请求）内可能出现的失败。
///
/// 错误只影响所属的会话/请求；`Display` 文本会原样发回客户端，
/// 因此只携带文件名，不携带服务器端的绝对路径。
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("couldn't find a name for {0:?}")]
    NoAvailableName(String),
    #[error("temp file {0:?} already exists")]
    TempFileExists(String),
    #[error("file {0:?} already exists")]
    FileExists(String),
    #[error("filesystem error: {0}")]
    Filesystem(#[source] io::Error),
    #[error("writing to file: {0}")]
    Write(#[source] io::Error),
    #[error("closing file: {0}")]
    Close(#[source] io::Error),
    #[error("rename temp file to final file: {0}")]
    Rename(#[source] io::Error),
    #[error("{0}")]
    Protocol(String),
    #[error("connection closed abnormally (code {0})")]
    AbnormalClose(u16),
    #[error("server receiving data: {0}")]
    Receive(String),
    #[error("reading multipart body: {0}")]
    Multipart(String),
}

impl UploadError {
    pub fn non_binary() -> Self {
        UploadError::Protocol("non-binary message received".into())
    }
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        let msg = error.to_string();
        match error {
            UploadError::InvalidName(_)
            | UploadError::Protocol(_)
            | UploadError::Multipart(_) => ApiError::BadRequest(msg),
            UploadError::NoAvailableName(_)
            | UploadError::TempFileExists(_)
            | UploadError::FileExists(_) => ApiError::Conflict(msg),
            UploadError::Filesystem(_)
            | UploadError::Write(_)
            | UploadError::Close(_)
            | UploadError::Rename(_)
            | UploadError::AbnormalClose(_)
            | UploadError::Receive(_) => ApiError::Internal(msg),
        }
    }
}
