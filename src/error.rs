//! 统一的 API 错误类型与转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::io::ErrorKind;
use tracing::warn;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    PayloadTooLarge(u64),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("upload exceeds {limit} bytes"),
            )
                .into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName => ApiError::Forbidden("invalid file name".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("not found".into()),
                _ => {
                    warn!(error = %err, "storage failure");
                    ApiError::Internal(err.to_string())
                }
            },
        }
    }
}

/// 上传被拒绝的原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingFile,
    NoExtension,
    DisallowedExtension(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingFile => f.write_str("no file supplied"),
            RejectReason::NoExtension => f.write_str("file name has no extension"),
            RejectReason::DisallowedExtension(ext) => write!(f, "extension {ext:?} is not allowed"),
        }
    }
}

/// 上传流程中的错误。
#[derive(Debug)]
pub enum UploadError {
    Rejected(RejectReason),
    Body(String),
    TooLarge(u64),
    Busy,
    Storage(StorageError),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Rejected(reason) => write!(f, "upload rejected: {reason}"),
            UploadError::Body(msg) => write!(f, "failed to read upload body: {msg}"),
            UploadError::TooLarge(limit) => write!(f, "upload exceeds {limit} bytes"),
            UploadError::Busy => f.write_str("file name is locked by another upload"),
            UploadError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(error: StorageError) -> Self {
        UploadError::Storage(error)
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::Rejected(reason) => ApiError::BadRequest(reason.to_string()),
            UploadError::Body(msg) => ApiError::BadRequest(msg),
            UploadError::TooLarge(limit) => ApiError::PayloadTooLarge(limit),
            UploadError::Busy => ApiError::Conflict("file name locked".into()),
            UploadError::Storage(err) => err.into(),
        }
    }
}
