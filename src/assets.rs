//! Dev-mode asset serving under the asset prefix
//!
//! Everything under the configured prefix is answered locally and never
//! forwarded to the backend. Two reserved paths inside the prefix carry the
//! live-reload channel, which keeps it out of the proxy's way by
//! construction.

use crate::reload::{self, ReloadHub, RELOAD_EVENT};
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::{Response, StatusCode};
use std::path::{Path, PathBuf};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Reserved path (relative to the asset base) for the reload event stream
pub const RELOAD_STREAM_PATH: &str = "/@reload";
/// Reserved path (relative to the asset base) for the reload client script
pub const RELOAD_CLIENT_PATH: &str = "/@reload-client.js";

/// Serves files below the asset root plus the reload endpoints
pub struct AssetService {
    base: String,
    root: PathBuf,
    hub: ReloadHub,
}

impl AssetService {
    /// `base` is the asset prefix without a trailing slash, e.g. `/assets`
    pub fn new(base: &str, root: PathBuf, hub: ReloadHub) -> Self {
        Self {
            base: base.to_string(),
            root,
            hub,
        }
    }

    /// True if the request path belongs to the asset prefix
    pub fn owns(&self, path: &str) -> bool {
        path == self.base || path.starts_with(&format!("{}/", self.base))
    }

    /// Handle a request whose path is under the asset prefix
    pub async fn handle(&self, path: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
        let rel = &path[self.base.len()..];

        match rel {
            RELOAD_STREAM_PATH => self.reload_stream(),
            RELOAD_CLIENT_PATH => self.reload_client(),
            _ => self.serve_file(rel).await,
        }
    }

    /// SSE stream of reload signals. One `data: reload` event per signal;
    /// a lagged receiver still produces a reload, which is the correct
    /// degradation (reloading once covers any number of missed signals).
    fn reload_stream(&self) -> Response<BoxBody<Bytes, hyper::Error>> {
        let rx = self.hub.subscribe();

        let opening = tokio_stream::once(Ok::<_, hyper::Error>(Frame::data(Bytes::from_static(
            b": connected\n\n",
        ))));
        let signals = BroadcastStream::new(rx)
            .map(|_| Ok::<_, hyper::Error>(Frame::data(Bytes::from_static(RELOAD_EVENT.as_bytes()))));

        debug!("Reload stream session opened");

        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .body(StreamBody::new(opening.chain(signals)).boxed())
            .expect("valid response with StatusCode enum and static headers")
    }

    fn reload_client(&self) -> Response<BoxBody<Bytes, hyper::Error>> {
        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/javascript")
            .header("Cache-Control", "no-cache")
            .body(
                Full::new(Bytes::from(reload::client_script(&self.base)))
                    .map_err(|never| match never {})
                    .boxed(),
            )
            .expect("valid response with StatusCode enum and static headers")
    }

    async fn serve_file(&self, rel: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
        let file_path = match sanitize(&self.root, rel) {
            Some(p) => p,
            None => return not_found(rel),
        };

        match tokio::fs::read(&file_path).await {
            Ok(content) => {
                let mime = mime_guess::from_path(&file_path).first_or_octet_stream();
                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", mime.as_ref())
                    .header("Cache-Control", "no-cache")
                    .body(Full::new(Bytes::from(content)).map_err(|never| match never {}).boxed())
                    .expect("valid response with StatusCode enum and static headers")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(rel),
            Err(e) => {
                warn!(path = %file_path.display(), error = %e, "Failed to read asset");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header("Content-Type", "text/plain")
                    .body(
                        Full::new(Bytes::from("Failed to read asset"))
                            .map_err(|never| match never {})
                            .boxed(),
                    )
                    .expect("valid response with StatusCode enum and static headers")
            }
        }
    }
}

/// Resolve a request path below the asset root, rejecting traversal
fn sanitize(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in rel.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." || segment.contains('\\') {
            return None;
        }
        path.push(segment);
    }
    // A bare prefix request maps to the root itself; there is nothing to serve
    if path == *root {
        return None;
    }
    Some(path)
}

fn not_found(rel: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "text/plain")
        .body(
            Full::new(Bytes::from(format!("Asset not found: {}", rel)))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AssetService {
        AssetService::new("/assets", PathBuf::from("/srv/app"), ReloadHub::new())
    }

    #[test]
    fn test_owns_asset_paths_only() {
        let svc = service();
        assert!(svc.owns("/assets"));
        assert!(svc.owns("/assets/js/main.js"));
        assert!(svc.owns("/assets/@reload"));
        assert!(!svc.owns("/"));
        assert!(!svc.owns("/api/users"));
        assert!(!svc.owns("/assetstore"));
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        let root = Path::new("/srv/app");
        assert!(sanitize(root, "/../etc/passwd").is_none());
        assert!(sanitize(root, "/js/../../secret").is_none());
        assert!(sanitize(root, "/js\\main.js").is_none());
    }

    #[test]
    fn test_sanitize_resolves_inside_root() {
        let root = Path::new("/srv/app");
        assert_eq!(
            sanitize(root, "/js/main.js"),
            Some(PathBuf::from("/srv/app/js/main.js"))
        );
        assert_eq!(
            sanitize(root, "//js//main.js"),
            Some(PathBuf::from("/srv/app/js/main.js"))
        );
        assert!(sanitize(root, "/").is_none());
        assert!(sanitize(root, "").is_none());
    }

    #[tokio::test]
    async fn test_serves_file_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js/main.js"), b"console.log(1)").unwrap();

        let svc = AssetService::new("/assets", dir.path().to_path_buf(), ReloadHub::new());
        let response = svc.handle("/assets/js/main.js").await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("Content-Type").unwrap().to_str().unwrap();
        assert!(content_type.contains("javascript"));
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-cache");
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let svc = AssetService::new("/assets", dir.path().to_path_buf(), ReloadHub::new());

        let response = svc.handle("/assets/js/missing.js").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reload_client_served() {
        let svc = service();
        let response = svc.handle("/assets/@reload-client.js").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/javascript"
        );
    }

    #[tokio::test]
    async fn test_reload_stream_headers() {
        let svc = service();
        let response = svc.handle("/assets/@reload").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/event-stream"
        );
    }
}
