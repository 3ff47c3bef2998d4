//! 路由组装：所有端点挂载在规范化前缀下。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{any, get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::config::UploadConfig;
use crate::http::{add_security_headers, resolve_client_ip};
use crate::storage::OutputDir;
use crate::{frontend, multipart, websocket};

/// 使用输出目录与配置构建应用路由。
pub fn build_router(output: Arc<OutputDir>, config: Arc<UploadConfig>) -> Router {
    Router::new()
        .route(&config.prefix, get(frontend::index))
        .route(
            &config.route("upload"),
            post(multipart::upload_multipart).layer(DefaultBodyLimit::disable()),
        )
        .route(
            &config.route("upload-ws/{filename}"),
            any(websocket::upload_ws),
        )
        .fallback(frontend::not_found)
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(output))
        .layer(Extension(config))
}
