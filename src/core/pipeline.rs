// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The request pipeline.
//!
//! Steps run in a fixed order and each may end the request:
//!
//! | step           | ends with                                  |
//! |----------------|--------------------------------------------|
//! | protocol check | `302` to the `https` URL                   |
//! | classify       | -                                          |
//! | route          | `400` if the URL cannot be re-pointed      |
//! | access control | `403` region body, then `403` IP body      |
//! | forward        | `502`/`504` on transport failure           |
//! | transform      | `502` if a rewritten body fails mid-read   |
//! | respond        | the upstream status with transformed parts |
//!
//! Replies to `HEAD` and bodiless statuses (`1xx`, `204`, `304`) skip the
//! body rewrite, so their upstream `Content-Length` is relayed unchanged.

use std::sync::Arc;

use reqwest::Method;

use super::{Forwarder, InboundRequest, OutboundRequest, ProxyError, ProxyResponse, ResponseBody};
use crate::config::ProxyConfig;
use crate::filters::{build_outbound_headers, build_response_headers, maybe_rewrite};
use crate::router::{Route, classify, https_upgrade};
use crate::security::{AccessDecision, evaluate};
use crate::{debug_fmt, info_fmt, trace_fmt, warn_fmt};

/// Body of the `403` sent to blocked regions.
pub const REGION_DENIED_BODY: &str =
    "Access denied: WorkersProxy is not available in your region yet.";

/// Body of the `403` sent to blocked IPs.
pub const IP_DENIED_BODY: &str = "Access denied: Your IP address is blocked by WorkersProxy.";

/// Runs one request through every step.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<ProxyConfig>,
    forwarder: Arc<dyn Forwarder>,
}

impl Pipeline {
    pub fn new(config: Arc<ProxyConfig>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self { config, forwarder }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Always produces a response; errors become generic `4xx`/`5xx` replies.
    pub async fn handle(&self, request: InboundRequest) -> ProxyResponse {
        let trace_id = request.context.trace_id.clone();
        match self.process(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code() >= 500 {
                    warn_fmt!("Pipeline", "[{}] request failed: {}", trace_id, e);
                } else {
                    debug_fmt!("Pipeline", "[{}] request rejected: {}", trace_id, e);
                }
                ProxyResponse::from_error(&e)
            }
        }
    }

    /// The pipeline proper; `Err` only for conditions mapped by [`ProxyError::status_code`].
    pub async fn process(&self, request: InboundRequest) -> Result<ProxyResponse, ProxyError> {
        let config = self.config.as_ref();
        let trace_id = request.context.trace_id.as_str();

        /* ---------- protocol check ---------- */
        if config.force_https && request.url.scheme() == "http" {
            let location = https_upgrade(&request.url)?;
            debug_fmt!("Pipeline", "[{}] redirecting to {}", trace_id, location);
            return ProxyResponse::redirect(&location);
        }

        /* ---------- classify & route ---------- */
        let device = classify(request.user_agent.as_deref());
        let route = Route::resolve(&request.url, device, config)?;
        trace_fmt!(
            "Pipeline",
            "[{}] {:?} client routed to {}",
            trace_id,
            device,
            route.upstream
        );

        /* ---------- access control ---------- */
        match evaluate(request.country.as_deref(), request.client_ip.as_deref(), config) {
            AccessDecision::Allow => {}
            AccessDecision::DenyRegion => {
                info_fmt!(
                    "Pipeline",
                    "[{}] region {} blocked",
                    trace_id,
                    request.country.as_deref().unwrap_or("-")
                );
                return Ok(ProxyResponse::text(403, REGION_DENIED_BODY));
            }
            AccessDecision::DenyIp => {
                info_fmt!(
                    "Pipeline",
                    "[{}] ip {} blocked",
                    trace_id,
                    request.client_ip.as_deref().unwrap_or("-")
                );
                return Ok(ProxyResponse::text(403, IP_DENIED_BODY));
            }
        }

        /* ---------- forward ---------- */
        let client_host = request.client_visible_host();
        let is_head = request.method == Method::HEAD;
        let headers =
            build_outbound_headers(&request.headers, route.upstream.as_str(), &route.url)?;
        let outbound = OutboundRequest {
            method: request.method,
            url: route.url,
            headers,
            body: request.body,
        };
        let upstream = self.forwarder.forward(outbound).await?;

        /* ---------- transform ---------- */
        let headers = build_response_headers(&upstream.headers, config);
        let body = if is_head || !status_has_body(upstream.status) {
            ResponseBody::Streamed(upstream.body)
        } else {
            maybe_rewrite(
                &headers,
                upstream.body,
                route.upstream.as_str(),
                &client_host,
                &config.rewrite_rules,
            )
            .await?
        };
        trace_fmt!(
            "Pipeline",
            "[{}] upstream {} body {}",
            trace_id,
            upstream.status,
            if body.is_streamed() { "streamed" } else { "rewritten" }
        );

        /* ---------- respond ---------- */
        Ok(ProxyResponse::assemble(upstream.status, headers, body))
    }
}

/// `1xx`, `204` and `304` replies never carry a body, whatever their headers say.
fn status_has_body(status: u16) -> bool {
    !(100..200).contains(&status) && status != 204 && status != 304
}
