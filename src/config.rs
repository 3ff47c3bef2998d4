//! CLI arguments, defaults, and the upload configuration object.

use clap::Parser;
use shadow_rs::formatcp;
use std::net::SocketAddr;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

/// Unprefixed name plus `0.` through `98.`.
pub const MAX_NAME_CANDIDATES: usize = 100;
pub const PART_SUFFIX: &str = ".part";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8081";
pub const DEFAULT_ROOT: &str = "/upload";
pub const DEFAULT_OUT_DIR: &str = ".";
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-upload", version = VERSION_INFO, about = "AxoUpload server")]
pub struct Args {
    #[arg(
        short = 'l',
        long,
        env = "AXO_LISTEN",
        default_value = DEFAULT_LISTEN,
        help = "Address to listen on"
    )]
    pub listen: SocketAddr,
    #[arg(
        short = 'r',
        long,
        env = "AXO_ROOT",
        default_value = DEFAULT_ROOT,
        value_parser = parse_prefix,
        help = "Path prefix all routes are mounted under"
    )]
    pub root: String,
    #[arg(
        short = 'o',
        long,
        env = "AXO_OUT_DIR",
        default_value = DEFAULT_OUT_DIR,
        help = "Output directory for uploaded files"
    )]
    pub out: String,
    #[arg(short = 'c', long, env = "AXO_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "AXO_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "AXO_TLS_SELF_SIGNED",
        help = "Serve HTTPS with a generated self-signed certificate"
    )]
    pub tls_self_signed: bool,
    #[arg(long, env = "AXO_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "AXO_LOG_LEVEL",
        default_value = "info",
        help = "Default log filter when RUST_LOG is unset"
    )]
    pub log_level: String,
}

/// Process-wide settings handed to the router and its handlers.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Normalized route prefix, `/` or `/a/b/`.
    pub prefix: String,
}

impl UploadConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            prefix: args.root.clone(),
        }
    }

    /// `prefix` joined with a route tail such as `upload`.
    pub fn route(&self, tail: &str) -> String {
        format!("{}{}", self.prefix, tail)
    }
}

fn parse_prefix(raw: &str) -> Result<String, String> {
    normalize_prefix(raw)
}

/// Cleans the prefix like a path; yields `/` or an absolute prefix ending in `/`.
pub fn normalize_prefix(raw: &str) -> Result<String, String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            other => {
                if !other
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-'))
                {
                    return Err(format!("invalid prefix segment {other:?}"));
                }
                segments.push(other);
            }
        }
    }
    if segments.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}/", segments.join("/")))
}
