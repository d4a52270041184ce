// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Liveness and readiness probes on their own port.
//!
//! `/health` answers `200 OK` as soon as the listener is up. `/ready` answers
//! `503 NOT READY` until [`HealthServer::set_ready`] is called, which the
//! proxy does once its own listener is bound.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming as IncomingBody;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::{debug_fmt, error_fmt, info_fmt};

#[derive(Debug)]
pub struct HealthServer {
    is_ready: Arc<AtomicBool>,
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl HealthServer {
    /// Bind `addr` and start answering probes.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info_fmt!("HealthServer", "Health probes listening on http://{}", local_addr);

        let is_ready = Arc::new(AtomicBool::new(false));
        let ready_clone = is_ready.clone();

        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(e) => {
                        error_fmt!("HealthServer", "Accept failed: {}", e);
                        continue;
                    }
                };

                let ready = ready_clone.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req: Request<IncomingBody>| {
                        let ready = ready.load(Ordering::Relaxed);
                        async move { Ok::<_, Infallible>(probe_response(req.uri().path(), ready)) }
                    });

                    let builder = hyper_util::server::conn::auto::Builder::new(
                        hyper_util::rt::TokioExecutor::new(),
                    );
                    if let Err(err) = builder.serve_connection(io, service).await {
                        debug_fmt!("HealthServer", "Connection error: {}", err);
                    }
                });
            }
        });

        Ok(Self {
            is_ready,
            local_addr,
            handle,
        })
    }

    pub fn set_ready(&self) {
        self.is_ready.store(true, Ordering::Relaxed);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn probe_response(path: &str, ready: bool) -> Response<Full<Bytes>> {
    let (status, body) = match path {
        "/health" => (StatusCode::OK, "OK"),
        "/ready" if ready => (StatusCode::OK, "READY"),
        "/ready" => (StatusCode::SERVICE_UNAVAILABLE, "NOT READY"),
        _ => (StatusCode::NOT_FOUND, "Not Found"),
    };
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
