// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP server.
//!
//! The server is a *thin* wrapper around **hyper-util**. It owns the
//! listening socket and translates between hyper's types and the
//! [`InboundRequest`] / [`ProxyResponse`] the pipeline works on.
//!
//! **Protocol support**
//! Uses `hyper_util::server::conn::auto::Builder`, so the same
//! connection transparently handles both HTTP/1.1 *and* HTTP/2.
//!
//! ## Platform metadata
//! The proxy expects to run behind an edge that reports the client's country,
//! IP and original scheme in request headers (see `proxy.metadata`). The
//! scheme header wins over the request URI; a request that names no host at
//! all is answered with `400`.
//!
//! ## Body streaming
//! Inbound bodies are streamed straight into the upstream connection and
//! upstream bodies straight back, unless the pipeline decided to rewrite them.

mod health;


pub use health::HealthServer;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderName, USER_AGENT};
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use reqwest::{Body, Url};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::config::MetadataHeaders;
use crate::core::{InboundRequest, Pipeline, ProxyError, ProxyResponse, RequestContext};
use crate::logging::structured::{RequestInfo, generate_trace_id, log_access};
use crate::{debug_fmt, error_fmt, info_fmt, trace_fmt, warn_fmt};

/// How long open connections get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Longest client-supplied trace ID that is reused as is.
const MAX_TRACE_ID_LEN: usize = 128;

/// Configuration for the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port to listen on for health/readiness checks
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_health_port() -> u16 {
    8081
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            health_port: default_health_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` as a socket address; IPv6 hosts may be bracketed or not.
    pub fn socket_addr(&self, port: u16) -> Result<SocketAddr, ProxyError> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        format!("{host}:{port}")
            .parse::<SocketAddr>()
            .or_else(|_| format!("[{host}]:{port}").parse::<SocketAddr>())
            .map_err(|e| ProxyError::Other(format!("Invalid server address {host}:{port}: {e}")))
    }
}

/// What the server needs to turn a hyper request into an [`InboundRequest`].
#[derive(Debug, Clone)]
struct RequestReader {
    metadata: MetadataHeaders,
    trace_header: Option<HeaderName>,
}

/// HTTP server for the proxy.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    reader: Arc<RequestReader>,
}

impl ProxyServer {
    /// Create a new proxy server in front of `pipeline`.
    pub fn new(config: ServerConfig, pipeline: Arc<Pipeline>) -> Self {
        let reader = RequestReader {
            metadata: pipeline.config().metadata.clone(),
            trace_header: None,
        };
        Self {
            config,
            pipeline,
            reader: Arc::new(reader),
        }
    }

    /// Reuse trace IDs the client sends in `header`.
    pub fn with_trace_header(mut self, header: &str) -> Result<Self, ProxyError> {
        let name = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| ProxyError::ConfigError(format!("invalid trace header '{header}': {e}")))?;
        let mut reader = (*self.reader).clone();
        reader.trace_header = Some(name);
        self.reader = Arc::new(reader);
        Ok(self)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured ports and serve until Ctrl-C or SIGTERM.
    pub async fn start(&self) -> Result<(), ProxyError> {
        let addr = self.config.socket_addr(self.config.port)?;
        let health_addr = self.config.socket_addr(self.config.health_port)?;

        let health_server = HealthServer::bind(health_addr)
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to bind health server: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to bind: {e}")))?;

        info_fmt!("ProxyServer", "Listening on http://{}", addr);
        health_server.set_ready();

        // On Unix, install the SIGTERM stream once and store it in a variable
        #[cfg(unix)]
        let mut term_stream = signal(SignalKind::terminate())
            .map_err(|e| ProxyError::Other(format!("Cannot install SIGTERM handler: {e}")))?;

        let shutdown = async move {
            #[cfg(unix)]
            let sigterm = term_stream.recv();
            #[cfg(not(unix))]
            let sigterm = std::future::pending::<Option<()>>();

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info_fmt!("ProxyServer", "Received Ctrl-C; initiating graceful shutdown");
                }
                _ = sigterm => {
                    info_fmt!("ProxyServer", "Received SIGTERM; initiating graceful shutdown");
                }
            }
        };

        let result = self.serve(listener, shutdown).await;
        drop(health_server);
        result
    }

    /// Accept connections on `listener` until `shutdown` completes, then
    /// drain open connections.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut join_set = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accept = listener.accept() => {
                    let (stream, peer_addr) = match accept {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error_fmt!("ProxyServer", "Accept error: {}", e);
                            continue;
                        }
                    };

                    let pipeline = self.pipeline.clone();
                    let reader = self.reader.clone();
                    let mut stop_rx = stop_rx.clone();

                    join_set.spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            handle_request(req, pipeline.clone(), reader.clone(), peer_addr)
                        });

                        let builder = AutoBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(TokioIo::new(stream), service);
                        let mut conn = std::pin::pin!(conn);

                        tokio::select! {
                            res = &mut conn => log_connection_end(res),
                            _ = stop_rx.changed() => {
                                conn.as_mut().graceful_shutdown();
                                log_connection_end(conn.await);
                            }
                        }
                    });
                }
            }
        }

        info_fmt!("ProxyServer", "Shutting down; draining {} connection(s)", join_set.len());
        let _ = stop_tx.send(true);

        let drain = async { while join_set.join_next().await.is_some() {} };
        match tokio::time::timeout(SHUTDOWN_GRACE, drain).await {
            Ok(()) => info_fmt!("ProxyServer", "All connections drained"),
            Err(_) => {
                warn_fmt!(
                    "ProxyServer",
                    "Shutdown timed out after {}s; closing remaining connections",
                    SHUTDOWN_GRACE.as_secs()
                );
                join_set.shutdown().await;
            }
        }

        info_fmt!("ProxyServer", "Shutdown complete");
        Ok(())
    }
}

fn log_connection_end(res: Result<(), Box<dyn std::error::Error + Send + Sync>>) {
    match res {
        Ok(()) => trace_fmt!("ProxyServer", "Connection closed"),
        Err(e) => debug_fmt!("ProxyServer", "Connection ended with error: {}", e),
    }
}

/// First value of `name`, trimmed, if present and non-empty.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Scheme the client used: the platform's scheme header, then the request
/// URI, then `http`.
fn client_scheme<B>(req: &Request<B>, metadata: &MetadataHeaders) -> String {
    header_str(req.headers(), &metadata.scheme)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| v == "http" || v == "https")
        .or_else(|| req.uri().scheme_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "http".to_string())
}

/// Rebuild the URL the client addressed.
fn client_url<B>(req: &Request<B>, metadata: &MetadataHeaders) -> Result<Url, ProxyError> {
    let host = req
        .uri()
        .authority()
        .map(|a| a.as_str())
        .or_else(|| header_str(req.headers(), HOST.as_str()))
        .ok_or_else(|| ProxyError::BadRequest("request names no host".to_string()))?;
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let scheme = client_scheme(req, metadata);

    Url::parse(&format!("{scheme}://{host}{path}"))
        .map_err(|e| ProxyError::BadRequest(format!("unusable request URL: {e}")))
}

/// Trace ID taken from the client when configured, else a fresh one.
fn trace_id<B>(req: &Request<B>, reader: &RequestReader) -> String {
    reader
        .trace_header
        .as_ref()
        .and_then(|name| header_str(req.headers(), name.as_str()))
        .filter(|id| id.len() <= MAX_TRACE_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_trace_id)
}

/// Convert a hyper request to an [`InboundRequest`].
fn convert_hyper_request(
    req: Request<Incoming>,
    reader: &RequestReader,
    context: RequestContext,
) -> Result<InboundRequest, ProxyError> {
    let url = client_url(&req, &reader.metadata)?;
    let headers = req.headers();
    let client_ip = header_str(headers, &reader.metadata.ip).map(str::to_string);
    let country = header_str(headers, &reader.metadata.country).map(str::to_string);
    let user_agent = header_str(headers, USER_AGENT.as_str()).map(str::to_string);

    trace_fmt!(
        "ProxyServer",
        "[{}] {} {} with {} headers",
        context.trace_id,
        req.method(),
        url,
        headers.len()
    );

    // Incoming → Stream → reqwest::Body
    let (parts, body) = req.into_parts();
    let stream = body.into_data_stream().map_ok(Bytes::from);

    Ok(InboundRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body: Body::wrap_stream(stream),
        client_ip,
        country,
        user_agent,
        context,
    })
}

/// Convert a [`ProxyResponse`] to a hyper response.
fn convert_proxy_response(resp: ProxyResponse) -> Result<Response<Body>, ProxyError> {
    let status = StatusCode::from_u16(resp.status)
        .map_err(|e| ProxyError::Other(format!("unusable status {}: {e}", resp.status)))?;
    let mut response = Response::new(resp.body.into_body());
    *response.status_mut() = status;
    *response.headers_mut() = resp.headers;
    Ok(response)
}

/// Handle an incoming HTTP request.
async fn handle_request(
    req: Request<Incoming>,
    pipeline: Arc<Pipeline>,
    reader: Arc<RequestReader>,
    peer_addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let context = RequestContext {
        peer_addr: Some(peer_addr),
        trace_id: trace_id(&req, &reader),
        start_time: Instant::now(),
    };
    let info = RequestInfo::new(
        context.trace_id.clone(),
        req.method().to_string(),
        req.uri().path().to_string(),
        header_str(req.headers(), &reader.metadata.ip)
            .map(str::to_string)
            .unwrap_or_else(|| peer_addr.ip().to_string()),
        header_str(req.headers(), USER_AGENT.as_str())
            .unwrap_or("-")
            .to_string(),
        context.start_time,
    );

    let response = match convert_hyper_request(req, &reader, context) {
        Ok(inbound) => pipeline.handle(inbound).await,
        Err(e) => {
            debug_fmt!("ProxyServer", "[{}] rejected: {}", info.trace_id, e);
            ProxyResponse::from_error(&e)
        }
    };

    let response = convert_proxy_response(response).unwrap_or_else(|e| {
        error_fmt!("ProxyServer", "[{}] {}", info.trace_id, e);
        let fallback = ProxyResponse::text(502, "Bad Gateway");
        let mut response = Response::new(fallback.body.into_body());
        *response.status_mut() = StatusCode::BAD_GATEWAY;
        *response.headers_mut() = fallback.headers;
        response
    });

    log_access(&info, response.status().as_u16());

    Ok(response)
}
