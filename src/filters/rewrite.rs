// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTML body rewriting.
//!
//! Only `text/html` responses declaring `UTF-8` are touched. Everything else
//! is passed through as the upstream byte stream.
//!
//! Patterns and replacements may contain two placeholders, resolved per
//! request before the pattern is compiled:
//!
//! * `$upstream` - the upstream host the request was routed to
//! * `$custom_domain` - the host the client used to reach the proxy
//!
//! Substituted hosts are regex-escaped, so `.` in a host name only matches a
//! literal dot. Each rule replaces every match, and rules run in order on the
//! output of the previous one.

use std::borrow::Cow;

use http_body_util::BodyExt;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::core::{ProxyError, ResponseBody};
use crate::trace_fmt;

pub const UPSTREAM_PLACEHOLDER: &str = "$upstream";
pub const CUSTOM_DOMAIN_PLACEHOLDER: &str = "$custom_domain";

/// Hosts used to check at load time that a pattern compiles once resolved.
const PROBE_UPSTREAM: &str = "upstream.invalid";
const PROBE_CUSTOM_DOMAIN: &str = "proxy.invalid";

/// One `pattern -> replacement` pair.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: String,
    replacement: String,
    /// Pattern compiled per configured upstream. Stays empty when the pattern
    /// uses `$custom_domain`, which is only known per request.
    compiled: Vec<(String, Regex)>,
}

impl PartialEq for RewriteRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.replacement == other.replacement
    }
}

impl Eq for RewriteRule {}

impl RewriteRule {
    /// Fails if `pattern` does not compile with its placeholders resolved.
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Regex::new(&resolve(
            pattern,
            &regex::escape(PROBE_UPSTREAM),
            &regex::escape(PROBE_CUSTOM_DOMAIN),
        ))?;
        Ok(Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            compiled: Vec::new(),
        })
    }

    /// Compile the pattern ahead of time for each of `upstreams`.
    pub fn with_upstreams<'a>(
        mut self,
        upstreams: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, regex::Error> {
        if self.pattern.contains(CUSTOM_DOMAIN_PLACEHOLDER) {
            return Ok(self);
        }
        for upstream in upstreams {
            if self.precompiled(upstream).is_some() {
                continue;
            }
            let regex = Regex::new(&resolve(&self.pattern, &regex::escape(upstream), ""))?;
            self.compiled.push((upstream.to_string(), regex));
        }
        Ok(self)
    }

    pub(crate) fn precompiled(&self, upstream: &str) -> Option<&Regex> {
        self.compiled
            .iter()
            .find(|(host, _)| host == upstream)
            .map(|(_, regex)| regex)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// The pattern for one request, precompiled when `upstream` is known.
    pub fn compile(&self, upstream: &str, client_host: &str) -> Result<Regex, ProxyError> {
        if let Some(regex) = self.precompiled(upstream) {
            return Ok(regex.clone());
        }
        let pattern = resolve(
            &self.pattern,
            &regex::escape(upstream),
            &regex::escape(client_host),
        );
        Regex::new(&pattern)
            .map_err(|e| ProxyError::RewriteError(format!("pattern '{}': {e}", self.pattern)))
    }

    /// The replacement for one request. `$name`/`${n}` group references left
    /// after substitution are expanded by the regex engine.
    pub fn resolved_replacement(&self, upstream: &str, client_host: &str) -> String {
        resolve(&self.replacement, upstream, client_host)
    }

    /// Replace every match in `text`.
    pub fn apply<'t>(
        &self,
        text: &'t str,
        upstream: &str,
        client_host: &str,
    ) -> Result<Cow<'t, str>, ProxyError> {
        let regex = self.compile(upstream, client_host)?;
        let replacement = self.resolved_replacement(upstream, client_host);
        Ok(regex.replace_all(text, replacement.as_str()))
    }
}

fn resolve(template: &str, upstream: &str, custom_domain: &str) -> String {
    template
        .replace(UPSTREAM_PLACEHOLDER, upstream)
        .replace(CUSTOM_DOMAIN_PLACEHOLDER, custom_domain)
}

/// `Content-Type` contains both `text/html` and `UTF-8` (exact case).
pub fn is_rewritable(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/html") && ct.contains("UTF-8"))
        .unwrap_or(false)
}

/// Read a whole body into a string. Invalid UTF-8 sequences become U+FFFD.
pub async fn materialize(body: reqwest::Body) -> Result<String, ProxyError> {
    let bytes = body
        .collect()
        .await
        .map_err(|e| ProxyError::BodyError(format!("failed to read upstream body: {e}")))?
        .to_bytes();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Apply `rules` in order.
pub fn rewrite_text(
    text: String,
    upstream: &str,
    client_host: &str,
    rules: &[RewriteRule],
) -> Result<String, ProxyError> {
    let mut text = text;
    for rule in rules {
        let rewritten = match rule.apply(&text, upstream, client_host)? {
            Cow::Owned(rewritten) => Some(rewritten),
            Cow::Borrowed(_) => None,
        };
        if let Some(rewritten) = rewritten {
            text = rewritten;
        }
    }
    Ok(text)
}

/// Rewrite `body` when `headers` mark it as UTF-8 HTML, otherwise stream it.
pub async fn maybe_rewrite(
    headers: &HeaderMap,
    body: reqwest::Body,
    upstream: &str,
    client_host: &str,
    rules: &[RewriteRule],
) -> Result<ResponseBody, ProxyError> {
    if !is_rewritable(headers) {
        return Ok(ResponseBody::Streamed(body));
    }

    let text = materialize(body).await?;
    let before = text.len();
    let text = rewrite_text(text, upstream, client_host, rules)?;
    trace_fmt!(
        "ContentRewriter",
        "Rewrote {} rule(s) over HTML body, {} -> {} bytes",
        rules.len(),
        before,
        text.len()
    );
    Ok(ResponseBody::Materialized(text))
}
