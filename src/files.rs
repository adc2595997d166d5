//! 已上传文件的下载与列表页面。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use httpdate::fmt_http_date;
use humansize::{BINARY, format_size};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::config::stored_file_location;
use crate::error::ApiError;
use crate::storage::{Storage, StorageError, StoredEntry};

/// 按文件名返回已存储的文件内容，Content-Type 由扩展名推断。
pub async fn download_file(
    Path(filename): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let (file, metadata) = storage.open(&filename).await.map_err(|err| {
        if matches!(err, StorageError::InvalidName) {
            warn!(filename, "refused download outside storage");
        }
        ApiError::from(err)
    })?;
    let file_size = metadata.len();
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file_size.to_string())
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }

    info!(filename, size = file_size, "download file");
    let stream = ReaderStream::new(file);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

/// 以 HTML 表格列出存储目录中的文件。
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Html<String>, ApiError> {
    let entries = storage.list().await?;
    info!(count = entries.len(), "list files");
    Ok(Html(render_listing(&entries)))
}

fn render_listing(entries: &[StoredEntry]) -> String {
    let mut html = String::from(
        r#"<!doctype html>
<title>Uploaded files</title>
<table border="1">
  <tr><th>File Name</th><th>Type</th><th>Size</th><th>Modified</th></tr>
"#,
    );
    for entry in entries {
        let _ = writeln!(
            html,
            "  <tr><td><a href=\"{}\">{}</a></td><td>{}</td><td align=\"right\">{}</td><td>{}</td></tr>",
            stored_file_location(&entry.name),
            entry.name,
            entry.mime,
            format_size(entry.size, BINARY),
            entry.modified.as_deref().unwrap_or("unknown"),
        );
    }
    html.push_str("</table>\n");
    html
}
