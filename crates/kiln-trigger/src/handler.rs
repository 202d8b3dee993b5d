//! HTTP trigger handler.
//!
//! `HttpTrigger` manages a hyper HTTP server that forwards requests to a
//! handler callback. [`host_handler`] builds the callback that runs each
//! request through a loaded script.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use kiln_runtime::Host;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::convert::{plain, to_http_response, to_kiln_request};

/// Largest request body accepted unless configured otherwise.
pub const DEFAULT_MAX_BODY: usize = 8 * 1024 * 1024;

/// Callback type for handling HTTP requests.
pub type RequestHandler = Arc<dyn Fn(Request<Incoming>) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<Response<Full<Bytes>>>> + Send>,
>;

/// HTTP trigger server.
///
/// Binds to a TCP port and forwards incoming HTTP requests to a
/// handler callback.
pub struct HttpTrigger {
    bind_addr: SocketAddr,
    handler: RequestHandler,
}

impl HttpTrigger {
    /// Create a new HTTP trigger bound to the given address.
    pub fn new(bind_addr: SocketAddr, handler: RequestHandler) -> Self {
        Self { bind_addr, handler }
    }

    /// Bind and serve until the shutdown signal is received.
    pub async fn serve(self, shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("failed to bind HTTP trigger to {}", self.bind_addr))?;
        serve_listener(listener, self.handler, shutdown).await
    }
}

/// Serve on an already bound listener until the shutdown signal is received.
///
/// Spawns a tokio task per connection using HTTP/1.1.
pub async fn serve_listener(
    listener: TcpListener,
    handler: RequestHandler,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!(%addr, "HTTP trigger listening");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, peer_addr) = accept_result.context("accept failed")?;
                let handler = handler.clone();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let handler = handler.clone();
                        async move {
                            match handler(req).await {
                                Ok(resp) => Ok::<_, hyper::Error>(resp),
                                Err(e) => {
                                    error!(%peer_addr, error = %e, "request handler failed");
                                    Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"))
                                }
                            }
                        }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(%peer_addr, error = %e, "connection error");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("HTTP trigger shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Build a handler that runs every request through `host`.
///
/// Zero-arg modules only run at process start and are refused here.
pub fn host_handler(host: Arc<Host>, max_body: usize) -> anyhow::Result<RequestHandler> {
    anyhow::ensure!(
        host.contract().is_per_request(),
        "module `{}` uses the {} contract, which runs once at process start and cannot serve requests",
        host.module().name(),
        host.contract()
    );
    Ok(Arc::new(move |req: Request<Incoming>| {
        let host = host.clone();
        Box::pin(async move { handle(&host, max_body, req).await })
    }))
}

/// Run one HTTP request through `host`.
///
/// Bodies over `max_body` get `413`; a saturated host gets `503`. Script
/// failures are already a `500` response from the host and are not errors.
pub async fn handle<B>(
    host: &Host,
    max_body: usize,
    req: Request<B>,
) -> anyhow::Result<Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, max_body).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(method = %parts.method, uri = %parts.uri, max_body, "request body too large");
            return Ok(plain(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
        }
        Err(e) => return Err(anyhow::anyhow!(e).context("failed to read request body")),
    };

    let request = to_kiln_request(&parts, body);
    let Some(response) = host.try_invoke(request).await else {
        warn!(method = %parts.method, uri = %parts.uri, "all invocation slots busy");
        return Ok(plain(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"));
    };

    debug!(
        method = %parts.method,
        uri = %parts.uri,
        status = response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    Ok(to_http_response(response))
}
