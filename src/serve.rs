//! HTTP serving of originals and on-demand derivatives.
//!
//! `GET <mount>/<path>?w=<width>` returns the source image at `<path>`
//! (relative to the cache's source root), resized to `<width>` when a valid
//! width is given.
//!
//! | Request | Response |
//! |---------|----------|
//! | path escapes the root, or source missing | 404 |
//! | no `w` | original |
//! | `w` not a number, `0`, negative, or above `max_width` | original |
//! | valid `w` | derivative, or original if generation fails or times out |
//!
//! Generation runs on the blocking pool. When the optional timeout elapses
//! the request is answered with the original while generation carries on;
//! the derivative is in place for the next request.
//!
//! Only a resolved derivative is cached as immutable. An original requested
//! without `w` may be replaced under the same URL and is cached for an hour.
//! An original served in place of a derivative is `no-cache`, so the client
//! asks again and picks up the derivative once it exists.

use crate::cache::DerivativeCache;
use crate::key;
use axum::{
    Router,
    body::Body,
    extract::{
        Path as UrlPath, Query, Request, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared state for the image routes.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DerivativeCache>,
    /// Widest derivative a request may ask for.
    pub max_width: u32,
    /// How long a request waits for generation. `None` waits until it finishes.
    pub generation_timeout: Option<Duration>,
}

impl AppState {
    pub fn from_config(cache: Arc<DerivativeCache>, config: &crate::config::ServerConfig) -> Self {
        Self {
            cache,
            max_width: config.max_width,
            generation_timeout: config.generation_timeout(),
        }
    }
}

/// `Cache-Control` policy for an image response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachePolicy {
    /// A generated derivative; its bytes never change.
    Immutable,
    /// The original at its own URL.
    ShortLived,
    /// The original standing in for a derivative that could not be served.
    Revalidate,
}

impl CachePolicy {
    fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(match self {
            CachePolicy::Immutable => "public, max-age=31536000, immutable",
            CachePolicy::ShortLived => "public, max-age=3600",
            CachePolicy::Revalidate => "no-cache",
        })
    }
}

#[derive(Debug, Deserialize)]
struct WidthQuery {
    w: Option<String>,
}

/// Build the router, with image routes under `mount` (`""` or `"/"` for the root).
pub fn router(state: AppState, mount: &str) -> Router {
    let images = Router::new()
        .route("/{*path}", get(serve_image))
        .with_state(state);

    let mount = mount.trim_end_matches('/');
    let app = if mount.is_empty() {
        images
    } else {
        Router::new().nest(mount, images)
    };
    app.layer(middleware::from_fn(log_responses))
}

/// Parse the `w` query value. `None` means "serve the original".
pub fn parse_width(raw: Option<&str>, max_width: u32) -> Option<u32> {
    let width: u32 = raw?.parse().ok()?;
    (1..=max_width).contains(&width).then_some(width)
}

async fn serve_image(
    State(state): State<AppState>,
    path: Result<UrlPath<String>, PathRejection>,
    query: Result<Query<WidthQuery>, QueryRejection>,
) -> Response {
    let Ok(UrlPath(raw_path)) = path else {
        return not_found();
    };
    let Some(rel) = key::sanitize_relative(&raw_path) else {
        debug!(path = %raw_path, "rejected request path");
        return not_found();
    };

    let source = state.cache.source_root().join(&rel);
    let is_file = tokio::fs::metadata(&source)
        .await
        .is_ok_and(|meta| meta.is_file());
    if !is_file {
        return not_found();
    }

    let raw_width = query.ok().and_then(|Query(q)| q.w);
    let width = parse_width(raw_width.as_deref(), state.max_width);
    if let Some(width) = width
        && let Some(derivative) = resolve_derivative(&state, rel.clone(), width).await
    {
        match tokio::fs::read(&derivative).await {
            Ok(bytes) => return image_response(&derivative, bytes, CachePolicy::Immutable),
            Err(err) => warn!(
                path = %derivative.display(),
                error = %err,
                "cannot read derivative, serving original"
            ),
        }
    } else if raw_width.is_some() && width.is_none() {
        debug!(path = %rel.display(), w = ?raw_width, "invalid width, serving original");
    }

    // A valid width that reached this point fell back to the original.
    let policy = if width.is_some() {
        CachePolicy::Revalidate
    } else {
        CachePolicy::ShortLived
    };
    match tokio::fs::read(&source).await {
        Ok(bytes) => image_response(&source, bytes, policy),
        Err(err) if err.kind() == ErrorKind::NotFound => not_found(),
        Err(err) => {
            warn!(path = %source.display(), error = %err, "cannot read source image");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read image").into_response()
        }
    }
}

/// Resolve a derivative on the blocking pool. `None` on any failure.
async fn resolve_derivative(state: &AppState, rel: PathBuf, width: u32) -> Option<PathBuf> {
    let cache = Arc::clone(&state.cache);
    let log_path = rel.clone();
    let task = tokio::task::spawn_blocking(move || cache.resolve(&rel, width));

    let joined = match state.generation_timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    path = %log_path.display(),
                    width,
                    timeout_secs = limit.as_secs_f64(),
                    "derivative generation timed out, serving original"
                );
                return None;
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(path)) => {
            debug!(stats = %state.cache.stats(), "cache activity");
            Some(path)
        }
        Ok(Err(err)) => {
            warn!(path = %log_path.display(), width, error = %err, "serving original");
            None
        }
        Err(err) => {
            warn!(
                path = %log_path.display(),
                width,
                error = %err,
                "generation task failed, serving original"
            );
            None
        }
    }
}

fn image_response(path: &Path, bytes: Vec<u8>, policy: CachePolicy) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(CACHE_CONTROL, policy.header_value());

    response
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Image not found").into_response()
}

async fn log_responses(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();

    if status.is_success() {
        info!(
            status = status.as_u16(),
            method = %method,
            uri = %uri,
            elapsed_ms,
            "request served"
        );
    } else {
        warn!(
            status = status.as_u16(),
            method = %method,
            uri = %uri,
            elapsed_ms,
            "request failed"
        );
    }
    response
}

/// Serve `app` on `listener` until the process exits.
pub async fn run(listener: tokio::net::TcpListener, app: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, app.into_make_service()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_width_accepts_range() {
        assert_eq!(parse_width(Some("600"), 4000), Some(600));
        assert_eq!(parse_width(Some("1"), 4000), Some(1));
        assert_eq!(parse_width(Some("4000"), 4000), Some(4000));
    }

    #[test]
    fn parse_width_missing_is_none() {
        assert_eq!(parse_width(None, 4000), None);
    }

    #[test]
    fn parse_width_rejects_bad_values() {
        for raw in ["0", "-5", "abc", "5000", "", "6.5", "600px", "99999999999"] {
            assert_eq!(parse_width(Some(raw), 4000), None, "accepted {raw:?}");
        }
    }

    #[test]
    fn parse_width_respects_ceiling() {
        assert_eq!(parse_width(Some("2001"), 2000), None);
        assert_eq!(parse_width(Some("2000"), 2000), Some(2000));
    }

    #[test]
    fn image_response_sets_headers() {
        let response = image_response(
            Path::new("a/sunset_w600.jpg"),
            vec![1, 2, 3],
            CachePolicy::Immutable,
        );
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "image/jpeg");
        assert_eq!(headers[CONTENT_LENGTH], "3");
        assert_eq!(
            headers[CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
    }

    #[test]
    fn image_response_png_mime() {
        let response = image_response(Path::new("icon.PNG"), Vec::new(), CachePolicy::ShortLived);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
    }

    #[test]
    fn only_derivatives_are_immutable() {
        let cache_control = |policy| {
            let response = image_response(Path::new("a.jpg"), Vec::new(), policy);
            response.headers()[CACHE_CONTROL].clone()
        };
        assert_eq!(
            cache_control(CachePolicy::Immutable),
            "public, max-age=31536000, immutable"
        );
        assert_eq!(cache_control(CachePolicy::ShortLived), "public, max-age=3600");
        assert_eq!(cache_control(CachePolicy::Revalidate), "no-cache");
    }
}
