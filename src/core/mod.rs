// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives - requests, responses, errors & the pipeline.
//!
//! Everything that physically moves through the proxy is defined here. No
//! socket handling lives in this module (that is `server`), and the
//! individual transformation steps live in `router`, `security` and
//! `filters`. The [`Pipeline`] is the only place that calls them.

mod forward;
mod pipeline;

#[cfg(test)]
mod tests;

pub use forward::{Forwarder, HttpForwarder};
pub use pipeline::{IP_DENIED_BODY, Pipeline, REGION_DENIED_BODY};

use reqwest::header::{
    CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION, TRANSFER_ENCODING,
};
use reqwest::{Method, Url};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::logging::structured::generate_trace_id;

/// Errors that can end a request early.
///
/// None of these leak into response bodies; [`ProxyError::status_code`] and
/// [`ProxyError::public_message`] decide what the client sees.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Transport failure talking to the upstream.
    #[error("HTTP client error: {0}")]
    ClientError(#[from] reqwest::Error),

    /// The upstream did not answer in time.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream body failed part-way through.
    #[error("upstream body error: {0}")]
    BodyError(String),

    /// The inbound request cannot be proxied (no host, bad URL, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A configuration problem surfaced at request time.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A rewrite rule could not be applied.
    #[error("rewrite error: {0}")]
    RewriteError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    /// Status code sent to the client.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::ClientError(e) if e.is_timeout() => 504,
            ProxyError::ClientError(_) | ProxyError::BodyError(_) => 502,
            ProxyError::Timeout(_) => 504,
            ProxyError::BadRequest(_) => 400,
            _ => 500,
        }
    }

    /// Body sent to the client. Never carries internal detail.
    pub fn public_message(&self) -> &'static str {
        match self.status_code() {
            400 => "Bad Request",
            502 => "Bad Gateway",
            504 => "Gateway Timeout",
            _ => "Internal Server Error",
        }
    }
}

/// Per-request bookkeeping that never reaches the upstream.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Socket address of the connecting peer (usually the edge, not the client).
    pub peer_addr: Option<SocketAddr>,
    /// Correlates log lines for one request.
    pub trace_id: String,
    /// When the request was accepted.
    pub start_time: Instant,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            peer_addr: None,
            trace_id: generate_trace_id(),
            start_time: Instant::now(),
        }
    }
}

/// A request as the client sent it, plus the platform metadata.
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    /// Absolute, client-visible URL (scheme as seen by the client).
    pub url: Url,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
    /// Client IP reported by the platform, if any.
    pub client_ip: Option<String>,
    /// Country code reported by the platform, if any.
    pub country: Option<String>,
    pub user_agent: Option<String>,
    pub context: RequestContext,
}

impl InboundRequest {
    /// An empty-bodied request with no metadata.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: reqwest::Body::from(""),
            client_ip: None,
            country: None,
            user_agent: None,
            context: RequestContext::default(),
        }
    }

    /// The host the client addressed, including a non-default port.
    pub fn client_visible_host(&self) -> String {
        crate::router::authority(&self.url)
    }
}

/// What actually goes to the upstream.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
}

/// The upstream's answer, body still unread.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
}

/// A response body after the stream-or-buffer decision.
///
/// Only [`ResponseBody::Materialized`] text can be rewritten.
#[derive(Debug)]
pub enum ResponseBody {
    /// Upstream bytes, relayed untouched and unbuffered.
    Streamed(reqwest::Body),
    /// Fully read (and possibly rewritten) text.
    Materialized(String),
}

impl ResponseBody {
    pub fn is_streamed(&self) -> bool {
        matches!(self, ResponseBody::Streamed(_))
    }

    pub fn into_body(self) -> reqwest::Body {
        match self {
            ResponseBody::Streamed(body) => body,
            ResponseBody::Materialized(text) => reqwest::Body::from(text),
        }
    }
}

/// The single response produced for every request.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ProxyResponse {
    /// A locally generated plain-text response.
    pub fn text(status: u16, body: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
        Self::assemble(status, headers, ResponseBody::Materialized(body.to_string()))
    }

    /// `302 Found` pointing at `location`.
    pub fn redirect(location: &Url) -> Result<Self, ProxyError> {
        let value = HeaderValue::from_str(location.as_str())
            .map_err(|e| ProxyError::BadRequest(format!("unusable redirect target: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, value);
        Ok(Self {
            status: 302,
            headers,
            body: ResponseBody::Materialized(String::new()),
        })
    }

    /// Generic error response for `err`.
    pub fn from_error(err: &ProxyError) -> Self {
        Self::text(err.status_code(), err.public_message())
    }

    /// Final response from a status, transformed headers and a body.
    ///
    /// Text bodies get a `Content-Length` matching the text actually sent;
    /// streamed bodies keep whatever the upstream declared.
    pub fn assemble(status: u16, mut headers: HeaderMap, body: ResponseBody) -> Self {
        if let ResponseBody::Materialized(text) = &body {
            headers.remove(TRANSFER_ENCODING);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(text.len()));
        }
        Self {
            status,
            headers,
            body,
        }
    }
}
