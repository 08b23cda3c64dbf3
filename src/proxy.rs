//! The dev server: one listener, two request fates
//!
//! Requests under the asset prefix are served locally from the bundler's
//! asset tree; everything else is forwarded verbatim to the backend origin.
//! A refused backend connection becomes a self-reloading 502 page instead
//! of a raw browser error.

use crate::assets::AssetService;
use crate::config::Config;
use crate::error;
use crate::reload::ReloadHub;
use crate::upstream::UpstreamClient;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// The dev proxy server, not yet bound to its port
pub struct DevServer {
    bind_addr: SocketAddr,
    assets: Arc<AssetService>,
    upstream: Arc<UpstreamClient>,
    retry_delay: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl DevServer {
    pub fn new(
        config: &Config,
        hub: ReloadHub,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        Self::with_addr(config, config.server.listen_addr()?, hub, shutdown_rx)
    }

    /// Like [`DevServer::new`] but with an explicit bind address. Tests bind
    /// port 0 and read the port back from [`BoundServer::local_addr`].
    pub fn with_addr(
        config: &Config,
        bind_addr: SocketAddr,
        hub: ReloadHub,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let assets = AssetService::new(
            config.server.asset_base(),
            config.server.asset_root.clone(),
            hub,
        );
        let upstream = UpstreamClient::new(
            config.proxy.target_uri()?,
            config.proxy.pool_max_idle,
            config.proxy.pool_idle_timeout(),
        )?;

        Ok(Self {
            bind_addr,
            assets: Arc::new(assets),
            upstream: Arc::new(upstream),
            retry_delay: config.proxy.retry_delay(),
            shutdown_rx,
        })
    }

    /// Bind the listener. The port is fixed: when it is occupied this fails
    /// instead of falling back to a free port, so two dev sessions cannot
    /// silently race each other.
    pub async fn bind(self) -> anyhow::Result<BoundServer> {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to bind {}: {} (the dev server port is fixed; stop whatever holds it)",
                self.bind_addr,
                e
            )
        })?;

        Ok(BoundServer {
            listener,
            server: self,
        })
    }
}

/// A dev server with its listener bound
pub struct BoundServer {
    listener: TcpListener,
    server: DevServer,
}

impl std::fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundServer").finish_non_exhaustive()
    }
}

impl BoundServer {
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let BoundServer { listener, server } = self;
        info!(
            addr = %listener.local_addr()?,
            backend = %server.upstream.authority(),
            "Dev server listening"
        );

        let mut shutdown_rx = server.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let assets = Arc::clone(&server.assets);
                            let upstream = Arc::clone(&server.upstream);
                            let retry_delay = server.retry_delay;

                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, assets, upstream, retry_delay).await
                                {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Dev server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    assets: Arc<AssetService>,
    upstream: Arc<UpstreamClient>,
    retry_delay: Duration,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let assets = Arc::clone(&assets);
        let upstream = Arc::clone(&upstream);
        async move { handle_request(req, assets, upstream, retry_delay).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    assets: Arc<AssetService>,
    upstream: Arc<UpstreamClient>,
    retry_delay: Duration,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let path = req.uri().path().to_string();

    // The asset prefix is carved out before the proxy ever sees the request
    if assets.owns(&path) {
        debug!(path, "Serving from asset tree");
        return Ok(assets.handle(&path).await);
    }

    debug!(method = %req.method(), path, "Forwarding to backend");

    match upstream.forward(req).await {
        Ok(response) => Ok(response),
        Err(e) if e.is_connection_refused() => {
            info!(path, "Backend not accepting connections, serving retry page");
            Ok(error::retry_response(retry_delay))
        }
        Err(e) => {
            warn!(path, error = %e, "Failed to forward request");
            Ok(error::bad_gateway_response("Failed to forward request to backend"))
        }
    }
}
