// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access control - region and IP blocklists.
//!
//! Runs before any network egress. Both checks fail open on missing
//! metadata: a request without a country header is never region-blocked and
//! one without a client IP is never IP-blocked.


use crate::config::ProxyConfig;
use crate::trace_fmt;

/// Outcome of [`evaluate`]. Region is checked before IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    DenyRegion,
    DenyIp,
}

impl AccessDecision {
    pub fn is_denied(self) -> bool {
        !matches!(self, AccessDecision::Allow)
    }
}

/// Check a request's origin metadata against both blocklists.
pub fn evaluate(country: Option<&str>, client_ip: Option<&str>, config: &ProxyConfig) -> AccessDecision {
    if region_blocked(country, config) {
        return AccessDecision::DenyRegion;
    }
    if ip_blocked(client_ip, config) {
        return AccessDecision::DenyIp;
    }
    AccessDecision::Allow
}

/// `true` when either blocklist matches.
pub fn is_blocked(country: Option<&str>, client_ip: Option<&str>, config: &ProxyConfig) -> bool {
    evaluate(country, client_ip, config).is_denied()
}

/// Case-insensitive match against `proxy.blocklist.regions`.
pub fn region_blocked(country: Option<&str>, config: &ProxyConfig) -> bool {
    let Some(country) = country.map(str::trim).filter(|c| !c.is_empty()) else {
        trace_fmt!("AccessControl", "No country metadata; region check skipped");
        return false;
    };
    config.blocked_regions.contains(&country.to_ascii_uppercase())
}

/// Exact match against `proxy.blocklist.ips`.
pub fn ip_blocked(client_ip: Option<&str>, config: &ProxyConfig) -> bool {
    match client_ip {
        Some(ip) => config.blocked_ips.contains(ip),
        None => {
            trace_fmt!("AccessControl", "No client IP metadata; IP check skipped");
            false
        }
    }
}
