//! 上传处理：表单上传与原始请求体上传共用同一条校验、清洗、落盘流程。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::{Extension, Multipart, Path};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::config::{ExtensionRule, UploadConfig, stored_file_location};
use crate::error::{ApiError, RejectReason, UploadError};
use crate::filename::{checked_extension, is_allowed, sanitize};
use crate::form::upload_form_page;
use crate::locking::LockManager;
use crate::storage::Storage;

const FILE_FIELD: &str = "file";

/// 成功落盘的上传结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub name: String,
    pub size: u64,
    pub location: String,
}

/// 校验客户端提交的文件名并返回清洗后的名称。
pub fn accept_name(raw: Option<&str>, rule: ExtensionRule) -> Result<String, RejectReason> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(RejectReason::MissingFile),
    };
    if !is_allowed(raw, rule) {
        return Err(match checked_extension(raw, rule) {
            Some(ext) => RejectReason::DisallowedExtension(ext.to_string()),
            None => RejectReason::NoExtension,
        });
    }
    Ok(sanitize(raw))
}

/// 校验文件名、将内容写入存储目录并返回可访问的地址。
///
/// 同名文件会被覆盖。内容先写入临时文件，再在文件名锁内原子替换，
/// 并发上传同名文件时以最后完成替换者为准。任何失败或 future 被取消时
/// 临时文件都会被删除，已有文件保持不变。
pub async fn submit<S, E>(
    storage: &Storage,
    config: &UploadConfig,
    locks: &LockManager,
    raw_filename: Option<&str>,
    content: S,
) -> Result<StoredUpload, UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let name = accept_name(raw_filename, config.extension_rule).map_err(UploadError::Rejected)?;
    let target = storage.resolve_name(&name)?;

    let mut atomic = AtomicFile::new(&target).await?;
    let mut content = std::pin::pin!(content);
    while let Some(chunk) = content.next().await {
        let chunk = chunk.map_err(|err| UploadError::Body(err.to_string()))?;
        if config.max_upload_size > 0
            && atomic.written() + chunk.len() as u64 > config.max_upload_size
        {
            return Err(UploadError::TooLarge(config.max_upload_size));
        }
        if !chunk.is_empty() {
            atomic.write(&chunk).await?;
        }
    }

    let _guard = locks
        .lock_name_with_timeout(&name, config.lock_timeout)
        .await
        .map_err(|_| UploadError::Busy)?;
    let size = atomic.finalize().await?;
    info!(name, size, "stored upload");

    Ok(StoredUpload {
        location: stored_file_location(&name),
        name,
        size,
    })
}

/// 处理表单上传：成功时 302 跳转到文件地址，被拒绝时重新渲染表单。
pub async fn upload_form_submit(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    Extension(locks): Extension<Arc<LockManager>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let raw_filename = field.file_name().map(str::to_owned);
        return match submit(&storage, &upload, &locks, raw_filename.as_deref(), field).await {
            Ok(stored) => found(&stored.location),
            Err(UploadError::Rejected(reason)) => {
                debug!(filename = raw_filename.as_deref().unwrap_or(""), %reason, "upload rejected");
                Ok(upload_form_page().into_response())
            }
            Err(err) => Err(err.into()),
        };
    }

    debug!(reason = %RejectReason::MissingFile, "upload rejected");
    Ok(upload_form_page().into_response())
}

/// 以原始请求体上传，路径段即文件名。
pub async fn upload_raw(
    Path(filename): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    Extension(locks): Extension<Arc<LockManager>>,
    body: AxumBody,
) -> Result<Response, ApiError> {
    let content = body.into_data_stream();
    let stored = submit(&storage, &upload, &locks, Some(filename.as_str()), content)
        .await
        .inspect_err(|err| debug!(filename, error = %err, "raw upload failed"))?;
    let location = HeaderValue::from_str(&stored.location)
        .map_err(|_| ApiError::Internal("响应头构建失败".into()))?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        format!("Uploaded {} bytes as {}", stored.size, stored.name),
    )
        .into_response())
}

fn found(location: &str) -> Result<Response, ApiError> {
    let location =
        HeaderValue::from_str(location).map_err(|_| ApiError::Internal("响应头构建失败".into()))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}
