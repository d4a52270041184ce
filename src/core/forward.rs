// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The forward capability - the one place the pipeline leaves the process.

use async_trait::async_trait;
use reqwest::header::ACCEPT_ENCODING;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::{OutboundRequest, ProxyError, UpstreamResponse};
use crate::{debug_fmt, trace_fmt};

/// Sends an [`OutboundRequest`] and hands back the upstream's response.
///
/// Implementations must not buffer the response body; the pipeline decides
/// whether it needs the text. Dropping the returned future (client gone)
/// abandons the upstream call.
#[async_trait]
pub trait Forwarder: fmt::Debug + Send + Sync {
    async fn forward(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError>;
}

/// [`Forwarder`] over a shared `reqwest` client.
///
/// The timeout covers the wait for response headers only, so long bodies
/// keep streaming. Compressed upstream bodies are decoded by the client,
/// which also drops the stale `Content-Encoding`/`Content-Length` headers.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        // Upstream redirects go back to the client as they are.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .build()
            .map_err(ProxyError::ClientError)?;
        Ok(Self { client, timeout })
    }

    /// Use an existing client, e.g. one with custom TLS roots.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        trace_fmt!(
            "HttpForwarder",
            "{} {} with {} headers",
            request.method,
            request.url,
            request.headers.len()
        );

        // The client negotiates only encodings it can decode.
        let mut headers = request.headers;
        headers.remove(ACCEPT_ENCODING);

        let started = Instant::now();
        let send = self
            .client
            .request(request.method, request.url)
            .headers(headers)
            .body(request.body)
            .send();

        let resp = timeout(self.timeout, send)
            .await
            .map_err(|_| ProxyError::Timeout(self.timeout))??;

        debug_fmt!(
            "HttpForwarder",
            "Upstream answered {} after {:?}",
            resp.status(),
            started.elapsed()
        );

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = reqwest::Body::wrap_stream(resp.bytes_stream());

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
