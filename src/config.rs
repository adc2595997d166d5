//! CLI arguments and server configuration defaults.

use clap::{Parser, ValueEnum};
use shadow_rs::formatcp;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

/// Extensions accepted by the upload handlers, matched case-sensitively.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["txt", "zip", "pdf", "png", "jpg", "jpeg", "gif"];
pub const DEFAULT_STORAGE_DIR_NAME: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 30;
pub const UPLOADS_ROUTE_PREFIX: &str = "/uploads";

/// Which dot-delimited segment of a submitted name is checked against the allow-list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExtensionRule {
    /// Segment after the last `.` (`a.tar.gz` is checked as `gz`).
    #[default]
    LastDot,
    /// Segment right after the first `.` (`a.tar.gz` is checked as `tar`,
    /// `../x.txt` as the empty string).
    FirstDot,
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "uploadr", version = VERSION_INFO, about = "Minimal file upload server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "UPLOADR_STORAGE_DIR",
        help = "Storage directory for uploaded files [default: uploads/ beside the executable]"
    )]
    pub storage_dir: Option<PathBuf>,
    #[arg(
        short = 'b',
        long = "bind",
        env = "UPLOADR_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "UPLOADR_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "UPLOADR_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max size in bytes of an uploaded file's content (0 to disable)"
    )]
    pub max_upload_size: u64,
    #[arg(
        long,
        env = "UPLOADR_EXTENSION_RULE",
        value_enum,
        default_value_t = ExtensionRule::LastDot,
        help = "Which dot segment of the file name is checked against the allow-list"
    )]
    pub extension_rule: ExtensionRule,
}

impl Args {
    /// Storage directory, falling back to `uploads/` next to the running executable.
    pub fn resolve_storage_dir(&self) -> io::Result<PathBuf> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        let exe = std::env::current_exe()?;
        let parent = exe
            .parent()
            .ok_or_else(|| io::Error::other("executable has no parent directory"))?;
        Ok(parent.join(DEFAULT_STORAGE_DIR_NAME))
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            extension_rule: self.extension_rule,
            max_upload_size: self.max_upload_size,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
        }
    }
}

/// Settings shared by the upload handlers.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub extension_rule: ExtensionRule,
    pub max_upload_size: u64,
    pub lock_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            extension_rule: ExtensionRule::default(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
        }
    }
}

/// Public URL of a stored file.
pub fn stored_file_location(name: &str) -> String {
    format!("{UPLOADS_ROUTE_PREFIX}/{name}")
}
