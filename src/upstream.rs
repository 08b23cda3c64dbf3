//! Pooled HTTP client for the backend origin
//!
//! All non-asset requests are forwarded through a single pooled client so
//! repeated requests reuse connections to the backend instead of paying the
//! connect cost every time.

use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Bytes, Incoming};
use hyper::http::uri::{Authority, Scheme};
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for forwarding a request to the backend
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Error from the HTTP client (connect failures land here)
    #[error("client error: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    /// Error rebuilding the request for the backend
    #[error("request build error: {0}")]
    RequestBuild(String),
}

impl UpstreamError {
    /// True if the failure bottoms out in a refused TCP connection.
    /// Walks the error source chain to the underlying io::Error; only this
    /// condition gets the self-reloading retry page.
    pub fn is_connection_refused(&self) -> bool {
        let UpstreamError::Client(err) = self else {
            return false;
        };
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = source {
            if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                return io_err.kind() == std::io::ErrorKind::ConnectionRefused;
            }
            source = e.source();
        }
        false
    }
}

/// Counters for forwarded traffic
#[derive(Debug, Default)]
pub struct UpstreamStats {
    /// Requests forwarded to the backend
    pub forwarded: AtomicU64,
    /// Forwards that failed
    pub failed: AtomicU64,
}

impl UpstreamStats {
    pub fn record_forward(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn get_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Pooled client pointed at the single configured backend origin
pub struct UpstreamClient {
    client: Client<HttpConnector, Incoming>,
    scheme: Scheme,
    authority: Authority,
    stats: Arc<UpstreamStats>,
}

impl UpstreamClient {
    /// Create a client for the given origin with connection pooling
    pub fn new(origin: Uri, max_idle: usize, idle_timeout: Duration) -> anyhow::Result<Self> {
        let authority = origin
            .authority()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Backend origin '{}' has no host", origin))?;
        let scheme = origin.scheme().cloned().unwrap_or(Scheme::HTTP);

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle)
            .pool_idle_timeout(idle_timeout)
            .build(connector);

        debug!(
            origin = %authority,
            max_idle,
            idle_timeout_secs = idle_timeout.as_secs(),
            "Upstream client initialized"
        );

        Ok(Self {
            client,
            scheme,
            authority,
            stats: Arc::new(UpstreamStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<UpstreamStats> {
        Arc::clone(&self.stats)
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Forward a request to the backend origin. Method, headers and body
    /// pass through untouched; only the URI is rewritten to point at the
    /// backend, keeping the original path and query.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, UpstreamError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| UpstreamError::RequestBuild(e.to_string()))?;

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(uri);

        for (key, value) in parts.headers.iter() {
            builder = builder.header(key, value);
        }

        let backend_req = builder
            .body(body)
            .map_err(|e| UpstreamError::RequestBuild(e.to_string()))?;

        self.stats.record_forward();

        let response = match self.client.request(backend_req).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_failure();
                return Err(e.into());
            }
        };

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_client_requires_host() {
        let origin: Uri = "/just/a/path".parse().unwrap();
        assert!(UpstreamClient::new(origin, 10, Duration::from_secs(90)).is_err());
    }

    #[test]
    fn test_upstream_client_records_origin() {
        let origin: Uri = "http://localhost:8081".parse().unwrap();
        let client = UpstreamClient::new(origin, 10, Duration::from_secs(90)).unwrap();
        assert_eq!(client.authority().as_str(), "localhost:8081");
        assert_eq!(client.stats().get_forwarded(), 0);
    }

    #[test]
    fn test_stats_counters() {
        let stats = UpstreamStats::default();

        stats.record_forward();
        stats.record_forward();
        stats.record_failure();

        assert_eq!(stats.get_forwarded(), 2);
        assert_eq!(stats.get_failed(), 1);
    }

    #[test]
    fn test_request_build_error_is_not_refused() {
        let err = UpstreamError::RequestBuild("bad header".to_string());
        assert!(!err.is_connection_refused());
    }
}
