//! Uploadr server binary.
//!
//! A small upload service: an HTML form accepts a file, the extension is
//! checked against a fixed allow-list, the name is sanitized, and the bytes
//! are stored in a flat directory and served back under `/uploads/`.

mod atomic;
mod config;
mod error;
mod filename;
mod files;
mod form;
mod http;
mod locking;
mod logging;
mod storage;
mod upload;

use axum::Router;
use axum::body::Body as AxumBody;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::middleware;
use axum::routing::{get, post};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

use crate::config::{Args, UploadConfig};
use crate::locking::LockManager;
use crate::storage::Storage;

shadow!(build);

/// Starts the upload server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage_dir = args.resolve_storage_dir()?;
    let storage = Arc::new(Storage::new(storage_dir));
    storage.ensure_ready().await.inspect_err(|err| {
        error!(path = %storage.root_path().display(), error = %err, "cannot prepare storage directory");
    })?;
    info!(path = %storage.root_path().display(), "storage directory ready");

    let upload_config = Arc::new(args.upload_config());
    let lock_manager = Arc::new(LockManager::new());
    let app = build_router(storage, upload_config, lock_manager);

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", addr);
    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

fn build_router(
    storage: Arc<Storage>,
    upload_config: Arc<UploadConfig>,
    lock_manager: Arc<LockManager>,
) -> Router {
    Router::new()
        .route(
            "/",
            get(form::upload_form)
                .post(upload::upload_form_submit)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/list", get(files::list_files))
        .route("/uploads/{filename}", get(files::download_file))
        .route("/{filename}", post(upload::upload_raw))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<AxumBody>| http::make_request_span(request))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(upload_config))
        .layer(Extension(lock_manager))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use axum_test::multipart::{MultipartForm, Part};
    use tempfile::tempdir;

    fn make_server(config: UploadConfig) -> (tempfile::TempDir, Arc<Storage>, TestServer) {
        let temp = tempdir().expect("tempdir");
        let storage = Arc::new(Storage::new(temp.path().join("uploads")));
        std::fs::create_dir_all(storage.root_path()).expect("create storage root");
        let app = build_router(
            storage.clone(),
            Arc::new(config),
            Arc::new(LockManager::new()),
        );
        let server = TestServer::new(app).expect("test server");
        (temp, storage, server)
    }

    fn file_form(filename: &str, content: &'static [u8]) -> MultipartForm {
        MultipartForm::new().add_part("file", Part::bytes(content).file_name(filename))
    }

    fn stored_count(storage: &Storage) -> usize {
        std::fs::read_dir(storage.root_path())
            .expect("read_dir")
            .count()
    }

    #[tokio::test]
    async fn index_serves_upload_form() {
        let (_temp, _storage, server) = make_server(UploadConfig::default());

        let response = server.get("/").await;

        response.assert_status_ok();
        assert!(response.text().contains("enctype=multipart/form-data"));
        assert!(response.text().contains("name=file"));
        assert_eq!(response.header("x-content-type-options"), "nosniff");
    }

    #[tokio::test]
    async fn upload_redirects_and_round_trips() {
        let (_temp, _storage, server) = make_server(UploadConfig::default());

        let response = server.post("/").multipart(file_form("notes.txt", b"hello")).await;

        response.assert_status(StatusCode::FOUND);
        let location = response.header("location");
        assert_eq!(location, "/uploads/notes.txt");

        let fetched = server.get(location.to_str().expect("location")).await;
        fetched.assert_status_ok();
        assert_eq!(fetched.as_bytes(), &Bytes::from_static(b"hello"));
        assert_eq!(fetched.header("content-type"), "text/plain");
    }

    #[tokio::test]
    async fn uploading_twice_keeps_one_file() {
        let (_temp, storage, server) = make_server(UploadConfig::default());

        for _ in 0..2 {
            server
                .post("/")
                .multipart(file_form("pic.png", b"\x89PNG"))
                .await
                .assert_status(StatusCode::FOUND);
            let fetched = server.get("/uploads/pic.png").await;
            assert_eq!(fetched.as_bytes(), &Bytes::from_static(b"\x89PNG"));
        }
        assert_eq!(stored_count(&storage), 1);
    }

    #[tokio::test]
    async fn tar_gz_is_rejected_under_both_rules() {
        for rule in [config::ExtensionRule::LastDot, config::ExtensionRule::FirstDot] {
            let config = UploadConfig {
                extension_rule: rule,
                ..UploadConfig::default()
            };
            let (_temp, storage, server) = make_server(config);

            let response = server.post("/").multipart(file_form("a.tar.gz", b"tgz")).await;

            response.assert_status_ok();
            assert!(response.text().contains("Upload new File"));
            assert_eq!(stored_count(&storage), 0);
        }
    }

    #[tokio::test]
    async fn first_dot_rule_checks_inner_segment() {
        let config = UploadConfig {
            extension_rule: config::ExtensionRule::FirstDot,
            ..UploadConfig::default()
        };
        let (_temp, storage, server) = make_server(config);

        let response = server
            .post("/")
            .multipart(file_form("notes.txt.gz", b"gz"))
            .await;
        response.assert_status(StatusCode::FOUND);
        assert_eq!(response.header("location"), "/uploads/notes.txt.gz");

        let response = server
            .post("/")
            .multipart(file_form("../../etc/passwd.txt", b"nope"))
            .await;
        response.assert_status_ok();
        assert_eq!(stored_count(&storage), 1);
    }

    #[tokio::test]
    async fn rejected_upload_rerenders_form() {
        let (_temp, storage, server) = make_server(UploadConfig::default());

        for name in ["README", "script.sh", "IMAGE.PNG"] {
            let response = server.post("/").multipart(file_form(name, b"data")).await;
            response.assert_status_ok();
            assert!(response.text().contains("Upload new File"));
        }
        assert_eq!(stored_count(&storage), 0);
    }

    #[tokio::test]
    async fn missing_file_field_rerenders_form() {
        let (_temp, storage, server) = make_server(UploadConfig::default());

        let response = server
            .post("/")
            .multipart(MultipartForm::new().add_text("comment", "no file here"))
            .await;

        response.assert_status_ok();
        assert!(response.text().contains("Upload new File"));
        assert_eq!(stored_count(&storage), 0);
    }

    #[tokio::test]
    async fn traversal_name_is_stored_inside_storage() {
        let (temp, storage, server) = make_server(UploadConfig::default());

        let response = server
            .post("/")
            .multipart(file_form("../../etc/passwd.txt", b"nope"))
            .await;

        response.assert_status(StatusCode::FOUND);
        assert_eq!(response.header("location"), "/uploads/etc_passwd.txt");
        assert!(storage.root_path().join("etc_passwd.txt").is_file());
        assert!(!temp.path().join("etc").exists());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_temp, _storage, server) = make_server(UploadConfig::default());

        server
            .get("/uploads/nothing.txt")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn encoded_traversal_is_refused() {
        let (temp, _storage, server) = make_server(UploadConfig::default());
        std::fs::write(temp.path().join("secret.txt"), b"secret").expect("write");

        server
            .get("/uploads/..%2Fsecret.txt")
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn raw_upload_creates_file() {
        let (_temp, _storage, server) = make_server(UploadConfig::default());

        let response = server
            .post("/report.pdf")
            .bytes(Bytes::from_static(b"%PDF"))
            .await;

        response.assert_status(StatusCode::CREATED);
        assert_eq!(response.header("location"), "/uploads/report.pdf");
        assert_eq!(response.text(), "Uploaded 4 bytes as report.pdf");
        let fetched = server.get("/uploads/report.pdf").await;
        assert_eq!(fetched.as_bytes(), &Bytes::from_static(b"%PDF"));
    }

    #[tokio::test]
    async fn raw_upload_rejects_disallowed_extension() {
        let (_temp, storage, server) = make_server(UploadConfig::default());

        server
            .post("/payload.exe")
            .bytes(Bytes::from_static(b"MZ"))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(stored_count(&storage), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_payload_too_large() {
        let config = UploadConfig {
            max_upload_size: 4,
            ..UploadConfig::default()
        };
        let (_temp, storage, server) = make_server(config);

        server
            .post("/")
            .multipart(file_form("big.txt", b"0123456789"))
            .await
            .assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(stored_count(&storage), 0);
    }

    #[tokio::test]
    async fn listing_shows_uploaded_files() {
        let (_temp, _storage, server) = make_server(UploadConfig::default());
        server
            .post("/")
            .multipart(file_form("listed.gif", b"GIF89a"))
            .await
            .assert_status(StatusCode::FOUND);

        let response = server.get("/list").await;

        response.assert_status_ok();
        assert!(response.text().contains("<a href=\"/uploads/listed.gif\">listed.gif</a>"));
        assert!(response.text().contains("image/gif"));
    }
}
