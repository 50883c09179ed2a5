//! Request handlers and the auth middleware

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;

use super::page::{render_page, SERVICE_WORKER};
use super::state::ShareState;
use crate::archive::{ARCHIVE_FILE_NAME, ARCHIVE_MIME};
use crate::auth::{AuthGrant, AuthRequest};
use crate::core::utils::{content_disposition, percent_decode};
use crate::core::{Result, ShareError};
use crate::thumbnail::THUMBNAIL_MIME;

/// Smallest and largest thumbnail a client may ask for
const MIN_THUMBNAIL_SIZE: u32 = 32;
const MAX_THUMBNAIL_SIZE: u32 = 1024;

/// Query for `/thumb` and `/file`. Fields stay strings so malformed values
/// become our own 400 instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ItemParams {
    pub id: Option<String>,
    pub size: Option<String>,
    pub name: Option<String>,
}

/// Gate every request except `/health`, then add security headers
pub async fn auth_middleware(
    State(state): State<ShareState>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let cookie_header = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok());
    let auth_request = AuthRequest {
        path: request.uri().path(),
        query: request.uri().query(),
        cookie_header,
    };

    let mut response = match state.gate.authorize(&auth_request) {
        Ok(AuthGrant::Pass) => next.run(request).await,
        Ok(AuthGrant::Handshake {
            set_cookie,
            location,
        }) => handshake_response(&set_cookie, &location),
        Err(e) => {
            tracing::warn!(error = %e, "Rejected unauthenticated request");
            ShareError::from(e).into_response()
        }
    };

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

fn handshake_response(set_cookie: &str, location: &str) -> Response {
    match (
        HeaderValue::from_str(set_cookie),
        HeaderValue::from_str(location),
    ) {
        (Ok(cookie), Ok(location)) => (
            StatusCode::FOUND,
            [(header::SET_COOKIE, cookie), (header::LOCATION, location)],
        )
            .into_response(),
        _ => ShareError::Internal("handshake headers not representable".into()).into_response(),
    }
}

/// GET /
pub async fn index(State(state): State<ShareState>) -> Html<String> {
    let snapshot = state.catalog.snapshot();
    Html(render_page(&snapshot, &state.page))
}

/// GET /thumb?id=N[&size=S]
pub async fn thumbnail(
    State(state): State<ShareState>,
    Query(params): Query<ItemParams>,
) -> Result<Response> {
    let id = parse_id(params.id.as_deref())?;
    let size = match params.size.as_deref() {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ShareError::validation("size must be a number"))?
            .clamp(MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE),
        None => state.thumbnail_size,
    };

    let cache = state.thumbnails.clone();
    let bytes = tokio::task::spawn_blocking(move || cache.get_or_generate(id, size)).await??;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(THUMBNAIL_MIME)),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("private, max-age=3600"),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// GET /file?id=N[&name=X]
pub async fn file(
    State(state): State<ShareState>,
    Query(params): Query<ItemParams>,
) -> Result<Response> {
    let id = parse_id(params.id.as_deref())?;
    let entry = state.catalog.get(id)?;

    let file = entry.handle().open_async().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ShareError::not_found("File no longer available")
        } else {
            ShareError::Internal(e.to_string())
        }
    })?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ShareError::Internal(e.to_string()))?
        .len();

    let name = params
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(entry.name());
    let mime = HeaderValue::from_str(entry.mime())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));

    tracing::debug!(entry_id = id, bytes = length, "Serving file");
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
            (header::CONTENT_DISPOSITION, disposition_header(name)),
        ],
        body,
    )
        .into_response())
}

/// GET /sw.js
pub async fn service_worker() -> Response {
    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/javascript; charset=utf-8"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        SERVICE_WORKER,
    )
        .into_response()
}

/// GET /zip
pub async fn archive(State(state): State<ShareState>) -> Response {
    let body = Body::from_stream(state.archive.stream_archive());
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(ARCHIVE_MIME)),
            (
                header::CONTENT_DISPOSITION,
                disposition_header(ARCHIVE_FILE_NAME),
            ),
        ],
        body,
    )
        .into_response()
}

/// POST /upload_init with `x-name`, `x-size`, `x-mime`
pub async fn upload_init(State(state): State<ShareState>, headers: HeaderMap) -> Result<String> {
    let name = percent_decode(required_header(&headers, "x-name")?);
    let size = parse_number(required_header(&headers, "x-size")?, "x-size")?;
    let mime = optional_header(&headers, "x-mime").unwrap_or("application/octet-stream");

    let uploads = state.uploads.clone();
    let mime = mime.to_string();
    let id = tokio::task::spawn_blocking(move || uploads.init(&name, &mime, size)).await??;
    Ok(id)
}

/// POST /upload_chunk with `x-id`, `x-offset`, `x-total`; body is the chunk
pub async fn upload_chunk(
    State(state): State<ShareState>,
    headers: HeaderMap,
    body: Body,
) -> Result<&'static str> {
    let id = required_header(&headers, "x-id")?;
    let offset = parse_number(required_header(&headers, "x-offset")?, "x-offset")?;
    let total = parse_number(required_header(&headers, "x-total")?, "x-total")?;
    let content_length = optional_header(&headers, header::CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<u64>().ok());

    state
        .uploads
        .chunk(id, offset, total, content_length, body.into_data_stream())
        .await?;
    Ok("ok")
}

/// POST /upload_finish with `x-id`
pub async fn upload_finish(
    State(state): State<ShareState>,
    headers: HeaderMap,
) -> Result<&'static str> {
    let id = required_header(&headers, "x-id")?;
    state.uploads.finish(id).await?;
    Ok("done")
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

pub async fn method_not_allowed() -> ShareError {
    ShareError::MethodNotAllowed
}

pub async fn not_found() -> ShareError {
    ShareError::not_found("Not found")
}

fn parse_id(raw: Option<&str>) -> Result<usize> {
    let raw = raw.ok_or_else(|| ShareError::validation("Missing id"))?;
    raw.parse()
        .map_err(|_| ShareError::validation("id must be a number"))
}

fn parse_number(raw: &str, field: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| ShareError::validation(format!("{} must be a number", field)))
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    optional_header(headers, name)
        .ok_or_else(|| ShareError::validation(format!("Missing {} header", name)))
}

fn optional_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn disposition_header(name: &str) -> HeaderValue {
    HeaderValue::from_str(&content_disposition(name))
        .unwrap_or(HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id(Some("12")).unwrap(), 12);
        assert!(parse_id(None).is_err());
        assert!(parse_id(Some("-1")).is_err());
        assert!(parse_id(Some("abc")).is_err());
    }

    #[test]
    fn test_required_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-id", HeaderValue::from_static("abc"));
        assert_eq!(required_header(&headers, "x-id").unwrap(), "abc");

        let err = required_header(&headers, "x-offset").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Missing x-offset header");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 42 ", "x-size").unwrap(), 42);
        let err = parse_number("4x", "x-size").unwrap_err();
        assert_eq!(err.to_string(), "x-size must be a number");
    }

    #[test]
    fn test_disposition_header_is_valid() {
        let value = disposition_header("日本.jpg");
        let text = value.to_str().unwrap();
        assert!(text.starts_with("attachment; filename=\"__.jpg\""));
        assert!(text.contains("filename*=UTF-8''%E6%97%A5%E6%9C%AC.jpg"));
    }
}
