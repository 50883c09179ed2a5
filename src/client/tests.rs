//! Client tests against an in-process server

use super::*;
use crate::core::ShareConfig;
use crate::core::FinalizePolicy;
use crate::server::{build_router, ShareState};
use crate::upload::{SinkError, StorageSink, UploadSessionManager};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::Router;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct Fixture {
    scratch: TempDir,
    destination: TempDir,
    state: ShareState,
}

fn fixture(pin: Option<&str>) -> Fixture {
    let scratch = TempDir::new().unwrap();
    let destination = TempDir::new().unwrap();
    let mut config = ShareConfig::default();
    config.auth.token = pin.map(|p| SecretString::new(p.to_string()));
    config.upload.scratch_dir = Some(scratch.path().to_path_buf());
    config.upload.destination_dir = destination.path().to_path_buf();
    Fixture {
        scratch,
        destination,
        state: ShareState::from_config(&config),
    }
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr, pin: Option<&str>, chunk_size: usize) -> UploadClient {
    let mut config = UploadClientConfig::new(&format!("http://{}/", addr))
        .unwrap()
        .with_token(pin.map(str::to_string))
        .with_chunk_size(chunk_size);
    config.timeout = Duration::from_secs(10);
    UploadClient::new(config).unwrap()
}

fn write_source(dir: &TempDir, name: &str, len: usize) -> (std::path::PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
    let path = dir.path().join(name);
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

#[test]
fn test_endpoint_carries_token() {
    let config = UploadClientConfig::new("http://192.168.1.20:8080/")
        .unwrap()
        .with_token(Some("1234".into()));
    let client = UploadClient::new(config).unwrap();
    assert_eq!(
        client.endpoint("upload_init").unwrap().as_str(),
        "http://192.168.1.20:8080/upload_init?t=1234"
    );

    let config = UploadClientConfig::new("http://host:9000/").unwrap();
    let client = UploadClient::new(config).unwrap();
    assert_eq!(
        client.endpoint("upload_finish").unwrap().as_str(),
        "http://host:9000/upload_finish"
    );
}

#[test]
fn test_invalid_base_url() {
    assert!(matches!(
        UploadClientConfig::new("not a url"),
        Err(ClientError::InvalidUrl(_))
    ));
}

#[tokio::test]
async fn test_upload_in_chunks_with_progress() {
    let fx = fixture(Some("1234"));
    let addr = spawn(build_router(fx.state.clone())).await;
    let source = TempDir::new().unwrap();
    let (path, data) = write_source(&source, "beach day.jpg", 10_000);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let client = client_for(addr, Some("1234"), 4096)
        .with_progress_callback(Arc::new(move |p: UploadProgress| sink.lock().push(p.sent)));

    client.upload_file(&path).await.unwrap();

    let stored = std::fs::read(fx.destination.path().join("beach day.jpg")).unwrap();
    assert_eq!(stored, data);
    assert_eq!(*seen.lock(), vec![4096, 8192, 10_000]);
    assert_eq!(fx.state.uploads.session_count(), 0);
}

#[tokio::test]
async fn test_empty_file_upload() {
    let fx = fixture(None);
    let addr = spawn(build_router(fx.state.clone())).await;
    let source = TempDir::new().unwrap();
    let (path, _) = write_source(&source, "empty.png", 0);

    client_for(addr, None, 4096).upload_file(&path).await.unwrap();
    let stored = std::fs::read(fx.destination.path().join("empty.png")).unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_failed_chunk_is_resent() {
    let fx = fixture(None);
    let failures = Arc::new(AtomicUsize::new(1));
    let remaining = failures.clone();
    let router = build_router(fx.state.clone()).layer(middleware::from_fn(
        move |request: Request, next: Next| {
            let remaining = remaining.clone();
            async move {
                let fail = request.uri().path() == "/upload_chunk"
                    && remaining
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                if fail {
                    StatusCode::SERVICE_UNAVAILABLE.into_response()
                } else {
                    next.run(request).await
                }
            }
        },
    ));
    let addr = spawn(router).await;
    let source = TempDir::new().unwrap();
    let (path, data) = write_source(&source, "clip.mp4", 3000);

    client_for(addr, None, 1024).upload_file(&path).await.unwrap();

    assert_eq!(failures.load(Ordering::SeqCst), 0);
    let stored = std::fs::read(fx.destination.path().join("clip.mp4")).unwrap();
    assert_eq!(stored, data);
}

#[tokio::test]
async fn test_rejection_not_retried() {
    let fx = fixture(Some("1234"));
    let addr = spawn(build_router(fx.state.clone())).await;
    let source = TempDir::new().unwrap();
    let (path, _) = write_source(&source, "a.jpg", 10);

    let err = client_for(addr, Some("0000"), 1024)
        .upload_file(&path)
        .await
        .unwrap_err();
    match err {
        ClientError::Rejected { path, status, .. } => {
            assert_eq!(path, "upload_init");
            assert_eq!(status, 401);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.state.uploads.session_count(), 0);
}

#[tokio::test]
async fn test_directory_is_not_a_file() {
    let dir = TempDir::new().unwrap();
    let client = client_for("127.0.0.1:9".parse().unwrap(), None, 1024);
    assert!(matches!(
        client.upload_file(dir.path()).await,
        Err(ClientError::NotAFile { .. })
    ));
}

struct RefusingSink;

#[async_trait]
impl StorageSink for RefusingSink {
    async fn store(&self, _: &Path, _: &str, _: &str) -> std::result::Result<PathBuf, SinkError> {
        Err(SinkError::Rejected {
            reason: "library unavailable".into(),
        })
    }
}

/// Router that counts requests per endpoint
fn counting(router: Router, hits: Arc<Mutex<Vec<String>>>) -> Router {
    router.layer(middleware::from_fn(move |request: Request, next: Next| {
        let hits = hits.clone();
        async move {
            hits.lock().push(request.uri().path().to_string());
            next.run(request).await
        }
    }))
}

#[tokio::test]
async fn test_sink_failure_reported_once() {
    let mut fx = fixture(None);
    fx.state.uploads = Arc::new(UploadSessionManager::new(
        fx.scratch.path(),
        Arc::new(RefusingSink),
        FinalizePolicy::RequireComplete,
        Duration::from_secs(60),
    ));
    let hits = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn(counting(build_router(fx.state.clone()), hits.clone())).await;
    let source = TempDir::new().unwrap();
    let (path, _) = write_source(&source, "party.jpg", 2048);

    let err = client_for(addr, None, 1024)
        .upload_file(&path)
        .await
        .unwrap_err();
    match err {
        ClientError::Rejected {
            path,
            status,
            message,
        } => {
            assert_eq!(path, "upload_finish");
            assert_eq!(status, 500);
            assert_eq!(message, "Saving the upload failed");
        }
        other => panic!("unexpected error: {other}"),
    }

    let finishes = hits
        .lock()
        .iter()
        .filter(|p| p.as_str() == "/upload_finish")
        .count();
    assert_eq!(finishes, 1);
    assert_eq!(fx.state.uploads.session_count(), 0);
}

#[tokio::test]
async fn test_init_server_error_not_retried() {
    let fx = fixture(None);
    let hits = Arc::new(Mutex::new(Vec::new()));
    let router = build_router(fx.state.clone()).layer(middleware::from_fn(
        |request: Request, next: Next| async move {
            if request.uri().path() == "/upload_init" {
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            } else {
                next.run(request).await
            }
        },
    ));
    let addr = spawn(counting(router, hits.clone())).await;
    let source = TempDir::new().unwrap();
    let (path, _) = write_source(&source, "a.jpg", 10);

    let err = client_for(addr, None, 1024)
        .upload_file(&path)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected { status: 503, .. }));
    assert_eq!(*hits.lock(), vec!["/upload_init".to_string()]);
}
