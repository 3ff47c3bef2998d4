//! 嵌入式上传页面与路由前缀渲染。

use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Uri, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;
use std::sync::Arc;

use crate::config::UploadConfig;
use crate::error::ApiError;

const PREFIX_PLACEHOLDER: &str = "{{prefix}}";

#[derive(RustEmbed)]
#[folder = "assets"]
/// 上传表单与完成页模板。
pub struct PageAssets;

/// 上传表单。
pub async fn index(Extension(config): Extension<Arc<UploadConfig>>) -> Result<Response, ApiError> {
    render_page("index.html", &config.prefix)
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("not found: {}", uri.path()))
}

/// 渲染模板，将 `{{prefix}}` 替换为规范化后的路由前缀。
pub fn render_page(name: &str, prefix: &str) -> Result<Response, ApiError> {
    let asset = PageAssets::get(name).ok_or_else(|| ApiError::NotFound("not found".into()))?;
    let template = std::str::from_utf8(&asset.data)
        .map_err(|_| ApiError::Internal("invalid template encoding".into()))?;
    let body = template.replace(PREFIX_PLACEHOLDER, prefix);

    let mime = mime_guess::from_path(name).first_or_text_plain();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    Ok((headers, body).into_response())
}
