//! Error responses emitted by the dev proxy

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use std::time::Duration;

/// Classification of a failed forward to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    /// The backend refused the connection (typically: it is restarting)
    BackendRefused,
    /// Any other forwarding failure; not special-cased
    ForwardFailed,
}

impl ProxyErrorKind {
    /// HTTP status for this error. Both map to 502: the proxy itself is
    /// healthy, the backend is not.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_GATEWAY
    }

    /// Value for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ProxyErrorKind::BackendRefused => "BACKEND_REFUSED",
            ProxyErrorKind::ForwardFailed => "FORWARD_FAILED",
        }
    }
}

/// HTML shown while the backend is not accepting connections. The page
/// reloads itself after the given delay, turning a restart window into a
/// self-healing loop instead of a dead browser tab.
pub fn retry_page_html(delay: Duration) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Proxy error</title>
  <script>
    setTimeout(() => {{ location.reload() }}, {})
  </script>
</head>
<body>
  Backend server not accepting connections. Retrying...
</body>
</html>"#,
        delay.as_millis()
    )
}

/// 502 response with the auto-reloading retry page
pub fn retry_response(delay: Duration) -> Response<BoxBody<Bytes, hyper::Error>> {
    let kind = ProxyErrorKind::BackendRefused;
    Response::builder()
        .status(kind.status_code())
        .header("Content-Type", "text/html")
        .header("X-Proxy-Error", kind.as_header_value())
        .body(
            Full::new(Bytes::from(retry_page_html(delay)))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response with StatusCode enum and static headers")
}

/// Generic 502 for forwarding failures other than connection refusal
pub fn bad_gateway_response(message: impl Into<String>) -> Response<BoxBody<Bytes, hyper::Error>> {
    let kind = ProxyErrorKind::ForwardFailed;
    Response::builder()
        .status(kind.status_code())
        .header("Content-Type", "text/plain")
        .header("X-Proxy-Error", kind.as_header_value())
        .body(
            Full::new(Bytes::from(message.into()))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response with StatusCode enum and static headers")
}
