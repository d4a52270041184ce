// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Header rewriting on both legs.
//!
//! Both directions start from a full copy of the incoming map
//! (case-insensitive names, every value of a repeated header kept in order)
//! and then overwrite or delete specific names. `insert` replaces all
//! previous values of a name; `remove` of an absent name is a no-op.

use reqwest::Url;
use reqwest::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, HOST, HeaderMap,
    HeaderValue, REFERER,
};

use crate::config::ProxyConfig;
use crate::core::ProxyError;

/// Response headers removed before the response reaches the client.
pub const STRIPPED_RESPONSE_HEADERS: [&str; 3] = [
    "content-security-policy",
    "content-security-policy-report-only",
    "clear-site-data",
];

/// Inbound headers with `Host` set to `upstream` and `Referer` to `url`.
pub fn build_outbound_headers(
    inbound: &HeaderMap,
    upstream: &str,
    url: &Url,
) -> Result<HeaderMap, ProxyError> {
    let host = HeaderValue::from_str(upstream)
        .map_err(|e| ProxyError::ConfigError(format!("upstream '{upstream}' is not a valid Host: {e}")))?;
    let referer = HeaderValue::from_str(url.as_str())
        .map_err(|e| ProxyError::BadRequest(format!("'{url}' is not a valid Referer: {e}")))?;

    let mut headers = inbound.clone();
    headers.insert(HOST, host);
    headers.insert(REFERER, referer);
    Ok(headers)
}

/// Upstream headers with CORS opened up, CSP and `Clear-Site-Data` removed and,
/// unless `disable_cache` is set, `Cache-Control: no-store`.
pub fn build_response_headers(upstream: &HeaderMap, config: &ProxyConfig) -> HeaderMap {
    let mut headers = upstream.clone();

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );

    for name in STRIPPED_RESPONSE_HEADERS {
        headers.remove(name);
    }

    // `disable_cache = false` (the default) is what sends `no-store`.
    if !config.disable_cache {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    headers
}
