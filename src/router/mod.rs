// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Upstream selection.
//!
//! The proxy has exactly two candidate upstreams, picked by [`DeviceClass`]:
//!
//! | device    | configuration key        |
//! |-----------|--------------------------|
//! | `Desktop` | `proxy.upstream.desktop` |
//! | `Mobile`  | `proxy.upstream.mobile`  |
//!
//! Routing only swaps the authority of the client's URL; scheme, path,
//! query and fragment are kept.

mod device;


pub use device::{DeviceClass, MOBILE_MARKERS, classify};

use reqwest::Url;

use crate::config::{ProxyConfig, UpstreamHost};
use crate::core::ProxyError;

/// Where one request is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub device: DeviceClass,
    /// Selected upstream host.
    pub upstream: UpstreamHost,
    /// The client URL re-pointed at `upstream`.
    pub url: Url,
}

impl Route {
    pub fn resolve(url: &Url, device: DeviceClass, config: &ProxyConfig) -> Result<Self, ProxyError> {
        let upstream = select_upstream(device, config);
        let url = rewrite_url(url, upstream)?;
        log::trace!("Resolved {device} route to {url}");
        Ok(Self {
            device,
            upstream: upstream.clone(),
            url,
        })
    }
}

/// Upstream host for `device`.
pub fn select_upstream(device: DeviceClass, config: &ProxyConfig) -> &UpstreamHost {
    match device {
        DeviceClass::Desktop => &config.upstream,
        DeviceClass::Mobile => &config.upstream_mobile,
    }
}

/// Replace the authority of `original` with `upstream`.
///
/// A port in `upstream` is used as is; without one the scheme's default
/// port applies.
pub fn rewrite_url(original: &Url, upstream: &UpstreamHost) -> Result<Url, ProxyError> {
    let mut url = original.clone();
    url.set_host(Some(upstream.host()))
        .map_err(|e| ProxyError::ConfigError(format!("invalid upstream host '{upstream}': {e}")))?;
    url.set_port(upstream.port())
        .map_err(|_| ProxyError::BadRequest(format!("cannot set a port on {original}")))?;
    Ok(url)
}

/// `original` with the scheme switched to `https`.
pub fn https_upgrade(original: &Url) -> Result<Url, ProxyError> {
    let mut url = original.clone();
    url.set_scheme("https")
        .map_err(|_| ProxyError::BadRequest(format!("cannot upgrade {original} to https")))?;
    Ok(url)
}

/// `host[:port]` of `url`, the port only when it is not the scheme default.
pub fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}
