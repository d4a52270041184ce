// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use reqwest::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_SECURITY_POLICY,
    CONTENT_TYPE, HOST, HeaderMap, HeaderValue, LOCATION, REFERER,
};
use reqwest::{Method, Url};

use super::*;
use crate::config::{ProxyConfig, UpstreamHost};

const IPHONE_UA: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";

/// What the mock upstream saw.
#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok {
        status: u16,
        content_type: &'static str,
        body: &'static [u8],
    },
    /// HTML headers declaring `content_length` bytes, but no body.
    Bodiless {
        status: u16,
        content_length: usize,
    },
    Timeout,
    BodyFailure,
}

#[derive(Debug)]
struct MockForwarder {
    reply: Reply,
    seen: Mutex<Vec<Seen>>,
}

impl MockForwarder {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn html(body: &'static str) -> Arc<Self> {
        Self::new(Reply::Ok {
            status: 200,
            content_type: "text/html; charset=UTF-8",
            body: body.as_bytes(),
        })
    }

    fn calls(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for MockForwarder {
    async fn forward(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        self.seen.lock().unwrap().push(Seen {
            method: request.method,
            url: request.url,
            headers: request.headers,
        });

        match self.reply {
            Reply::Ok {
                status,
                content_type,
                body,
            } => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                headers.insert(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static("default-src 'self'"),
                );
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));
                headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
                Ok(UpstreamResponse {
                    status,
                    headers,
                    body: reqwest::Body::from(body),
                })
            }
            Reply::Bodiless {
                status,
                content_length,
            } => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=UTF-8"),
                );
                headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
                Ok(UpstreamResponse {
                    status,
                    headers,
                    body: reqwest::Body::from(""),
                })
            }
            Reply::Timeout => Err(ProxyError::Timeout(Duration::from_secs(30))),
            Reply::BodyFailure => Err(ProxyError::BodyError("connection reset".to_string())),
        }
    }
}

fn config() -> ProxyConfig {
    let mut config = ProxyConfig::for_upstream("www.example.com").unwrap();
    config.upstream_mobile = UpstreamHost::parse("m.example.com").unwrap();
    config.blocked_regions = ["XX".to_string()].into_iter().collect();
    config.blocked_ips = ["203.0.113.9".to_string()].into_iter().collect();
    config
}

fn pipeline(config: ProxyConfig, forwarder: Arc<MockForwarder>) -> Pipeline {
    Pipeline::new(Arc::new(config), forwarder)
}

fn request(url: &str) -> InboundRequest {
    InboundRequest::new(Method::GET, Url::parse(url).unwrap())
}

async fn text(response: ProxyResponse) -> String {
    let bytes: Bytes = response.body.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/* ---------- protocol check ---------- */

#[tokio::test]
async fn test_http_is_redirected_without_forwarding() {
    let upstream = MockForwarder::html("");
    let pipeline = pipeline(config(), upstream.clone());

    let response = pipeline.handle(request("http://proxy.test/a/b?c=d")).await;

    assert_eq!(response.status, 302);
    assert_eq!(response.headers.get(LOCATION).unwrap(), "https://proxy.test/a/b?c=d");
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_http_is_proxied_when_https_not_forced() {
    let mut config = config();
    config.force_https = false;
    let upstream = MockForwarder::html("ok");
    let pipeline = pipeline(config, upstream.clone());

    let response = pipeline.handle(request("http://proxy.test/a")).await;

    assert_eq!(response.status, 200);
    assert_eq!(upstream.calls()[0].url.as_str(), "http://www.example.com/a");
}

/* ---------- access control ---------- */

#[tokio::test]
async fn test_blocked_region_gets_403_before_egress() {
    let upstream = MockForwarder::html("");
    let pipeline = pipeline(config(), upstream.clone());
    let mut req = request("https://proxy.test/");
    req.country = Some("xx".to_string());
    req.client_ip = Some("203.0.113.9".to_string());

    let response = pipeline.handle(req).await;

    assert_eq!(response.status, 403);
    assert_eq!(
        response.headers.get(CONTENT_TYPE).unwrap(),
        "text/plain;charset=UTF-8"
    );
    assert_eq!(text(response).await, REGION_DENIED_BODY);
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_blocked_ip_gets_403_before_egress() {
    let upstream = MockForwarder::html("");
    let pipeline = pipeline(config(), upstream.clone());
    let mut req = request("https://proxy.test/");
    req.country = Some("US".to_string());
    req.client_ip = Some("203.0.113.9".to_string());

    let response = pipeline.handle(req).await;

    assert_eq!(response.status, 403);
    assert_eq!(text(response).await, IP_DENIED_BODY);
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_redirect_wins_over_blocklists() {
    let upstream = MockForwarder::html("");
    let pipeline = pipeline(config(), upstream);
    let mut req = request("http://proxy.test/");
    req.country = Some("XX".to_string());

    assert_eq!(pipeline.handle(req).await.status, 302);
}

/* ---------- routing & forwarding ---------- */

#[tokio::test]
async fn test_desktop_request_is_forwarded_with_rewritten_host() {
    let upstream = MockForwarder::html("hi");
    let pipeline = pipeline(config(), upstream.clone());
    let mut req = request("https://proxy.test/avatar/abc?s=80");
    req.method = Method::POST;
    req.headers.insert(HOST, HeaderValue::from_static("proxy.test"));
    req.headers.insert("x-custom", HeaderValue::from_static("kept"));

    pipeline.handle(req).await;

    let calls = upstream.calls();
    assert_eq!(calls.len(), 1);
    let seen = &calls[0];
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.url.as_str(), "https://www.example.com/avatar/abc?s=80");
    assert_eq!(seen.headers.get(HOST).unwrap(), "www.example.com");
    assert_eq!(
        seen.headers.get(REFERER).unwrap(),
        "https://www.example.com/avatar/abc?s=80"
    );
    assert_eq!(seen.headers.get("x-custom").unwrap(), "kept");
}

#[tokio::test]
async fn test_mobile_user_agent_routes_to_mobile_upstream() {
    let upstream = MockForwarder::html("");
    let pipeline = pipeline(config(), upstream.clone());
    let mut req = request("https://proxy.test/page");
    req.user_agent = Some(IPHONE_UA.to_string());

    pipeline.handle(req).await;

    let seen = &upstream.calls()[0];
    assert_eq!(seen.url.as_str(), "https://m.example.com/page");
    assert_eq!(seen.headers.get(HOST).unwrap(), "m.example.com");
}

/* ---------- transforms ---------- */

#[tokio::test]
async fn test_html_is_rewritten_with_matching_length() {
    let upstream = MockForwarder::html("<a href=\"https://www.example.com/x\">www.example.com</a>");
    let pipeline = pipeline(config(), upstream);

    let response = pipeline.handle(request("https://proxy.test/")).await;

    assert_eq!(response.status, 200);
    assert!(!response.body.is_streamed());
    assert_eq!(response.headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    assert_eq!(response.headers.get(CACHE_CONTROL).unwrap(), "no-store");
    assert!(response.headers.get(CONTENT_SECURITY_POLICY).is_none());

    let expected = "<a href=\"https://proxy.test/x\">proxy.test</a>";
    assert_eq!(
        response.headers.get(CONTENT_LENGTH).unwrap(),
        &expected.len().to_string()
    );
    assert_eq!(text(response).await, expected);
}

#[tokio::test]
async fn test_head_keeps_upstream_content_length() {
    let upstream = MockForwarder::new(Reply::Bodiless {
        status: 200,
        content_length: 5120,
    });
    let pipeline = pipeline(config(), upstream.clone());
    let req = InboundRequest::new(Method::HEAD, Url::parse("https://proxy.test/").unwrap());

    let response = pipeline.handle(req).await;

    assert_eq!(upstream.calls()[0].method, Method::HEAD);
    assert_eq!(response.status, 200);
    assert!(response.body.is_streamed());
    assert_eq!(response.headers.get(CONTENT_LENGTH).unwrap(), "5120");
}

#[tokio::test]
async fn test_not_modified_keeps_upstream_content_length() {
    let upstream = MockForwarder::new(Reply::Bodiless {
        status: 304,
        content_length: 5120,
    });
    let pipeline = pipeline(config(), upstream);

    let response = pipeline.handle(request("https://proxy.test/")).await;

    assert_eq!(response.status, 304);
    assert!(response.body.is_streamed());
    assert_eq!(response.headers.get(CONTENT_LENGTH).unwrap(), "5120");
}

#[tokio::test]
async fn test_no_content_is_not_rewritten() {
    let upstream = MockForwarder::new(Reply::Bodiless {
        status: 204,
        content_length: 0,
    });
    let pipeline = pipeline(config(), upstream);

    let response = pipeline.handle(request("https://proxy.test/")).await;

    assert_eq!(response.status, 204);
    assert!(response.body.is_streamed());
}

#[tokio::test]
async fn test_rewrite_uses_mobile_upstream_and_client_port() {
    let upstream = MockForwarder::html("//m.example.com/a //www.example.com/b");
    let pipeline = pipeline(config(), upstream);
    let mut req = request("https://proxy.test:8443/");
    req.user_agent = Some(IPHONE_UA.to_string());

    let response = pipeline.handle(req).await;

    assert_eq!(text(response).await, "//proxy.test:8443/a //www.example.com/b");
}

#[tokio::test]
async fn test_binary_body_streams_untouched() {
    let raw: &'static [u8] = b"\x89PNG www.example.com \xff";
    let upstream = MockForwarder::new(Reply::Ok {
        status: 200,
        content_type: "image/png",
        body: raw,
    });
    let pipeline = pipeline(config(), upstream);

    let response = pipeline.handle(request("https://proxy.test/i.png")).await;

    assert!(response.body.is_streamed());
    assert_eq!(response.headers.get(CONTENT_LENGTH).unwrap(), &raw.len().to_string());
    let bytes = response.body.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes, Bytes::from_static(raw));
}

#[tokio::test]
async fn test_upstream_status_is_relayed() {
    let upstream = MockForwarder::new(Reply::Ok {
        status: 404,
        content_type: "text/html; charset=UTF-8",
        body: b"missing on www.example.com",
    });
    let pipeline = pipeline(config(), upstream);

    let response = pipeline.handle(request("https://proxy.test/nope")).await;

    assert_eq!(response.status, 404);
    assert_eq!(text(response).await, "missing on proxy.test");
}

#[tokio::test]
async fn test_disable_cache_keeps_upstream_cache_control() {
    let mut config = config();
    config.disable_cache = true;
    let pipeline = pipeline(config, MockForwarder::html(""));

    let response = pipeline.handle(request("https://proxy.test/")).await;

    assert_eq!(response.headers.get(CACHE_CONTROL).unwrap(), "max-age=600");
}

/* ---------- failures ---------- */

#[tokio::test]
async fn test_timeout_maps_to_504() {
    let pipeline = pipeline(config(), MockForwarder::new(Reply::Timeout));

    let response = pipeline.handle(request("https://proxy.test/")).await;

    assert_eq!(response.status, 504);
    assert_eq!(text(response).await, "Gateway Timeout");
}

#[tokio::test]
async fn test_body_failure_maps_to_502() {
    let pipeline = pipeline(config(), MockForwarder::new(Reply::BodyFailure));

    let response = pipeline.handle(request("https://proxy.test/")).await;

    assert_eq!(response.status, 502);
    assert_eq!(text(response).await, "Bad Gateway");
}

/* ---------- primitives ---------- */

#[test]
fn test_error_status_codes() {
    assert_eq!(ProxyError::Timeout(Duration::from_secs(1)).status_code(), 504);
    assert_eq!(ProxyError::BodyError("x".into()).status_code(), 502);
    assert_eq!(ProxyError::BadRequest("x".into()).status_code(), 400);
    assert_eq!(ProxyError::ConfigError("x".into()).status_code(), 500);
    assert_eq!(ProxyError::RewriteError("x".into()).status_code(), 500);
    assert_eq!(ProxyError::Other("secret detail".into()).public_message(), "Internal Server Error");
}

#[test]
fn test_redirect_response_shape() {
    let response = ProxyResponse::redirect(&Url::parse("https://proxy.test/x").unwrap()).unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(response.headers.get(LOCATION).unwrap(), "https://proxy.test/x");
}

#[test]
fn test_client_visible_host() {
    assert_eq!(request("https://proxy.test/").client_visible_host(), "proxy.test");
    assert_eq!(request("http://proxy.test:8080/").client_visible_host(), "proxy.test:8080");
}

#[test]
fn test_trace_ids_are_unique() {
    assert_ne!(RequestContext::default().trace_id, RequestContext::default().trace_id);
}
