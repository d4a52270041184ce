// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed, validated pipeline configuration.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use super::{Config, ConfigError};
use crate::filters::RewriteRule;

/// One `proxy.rewrite` entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRuleConfig {
    /// Regex, may contain `$upstream` and `$custom_domain`.
    pub pattern: String,
    /// Replacement text, may contain the same placeholders.
    pub replacement: String,
}

fn default_rewrite_rules() -> Vec<RewriteRuleConfig> {
    vec![RewriteRuleConfig {
        pattern: "$upstream".to_string(),
        replacement: "$custom_domain".to_string(),
    }]
}

/// Names of the headers the hosting platform fills in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeaders {
    /// Two-letter country code of the client.
    #[serde(default = "default_country_header")]
    pub country: String,
    /// Client IP as seen by the edge.
    #[serde(default = "default_ip_header")]
    pub ip: String,
    /// Scheme the client used before TLS termination.
    #[serde(default = "default_scheme_header")]
    pub scheme: String,
}

fn default_country_header() -> String {
    "cf-ipcountry".to_string()
}

fn default_ip_header() -> String {
    "cf-connecting-ip".to_string()
}

fn default_scheme_header() -> String {
    "x-forwarded-proto".to_string()
}

impl Default for MetadataHeaders {
    fn default() -> Self {
        Self {
            country: default_country_header(),
            ip: default_ip_header(),
            scheme: default_scheme_header(),
        }
    }
}

/// A validated upstream `host[:port]`, parsed once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamHost {
    host: String,
    port: Option<u16>,
    authority: String,
}

impl UpstreamHost {
    /// Accepts `host` or `host:port`, nothing else. An empty port is dropped.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.contains("://") || value.contains('/') || value.contains('@') {
            return Err(format!("expected a bare host, got '{value}'"));
        }

        let url = Url::parse(&format!("http://{value}/"))
            .map_err(|e| format!("'{value}' is not a valid host: {e}"))?;
        let host = match url.host_str() {
            Some(host) if url.query().is_none() && url.fragment().is_none() => host.to_string(),
            _ => return Err(format!("'{value}' is not a valid host")),
        };

        // `http` forgets an explicit `:80`; a scheme without a default port keeps it.
        let port = Url::parse(&format!("upstream://{value}/"))
            .map_err(|e| format!("'{value}' is not a valid host: {e}"))?
            .port();

        let authority = match port {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        Ok(Self {
            host,
            port,
            authority,
        })
    }

    /// Host name or address; IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `host[:port]`, as sent in `Host` and substituted for `$upstream`.
    pub fn as_str(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for UpstreamHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority)
    }
}

impl PartialEq<str> for UpstreamHost {
    fn eq(&self, other: &str) -> bool {
        self.authority == other
    }
}

impl PartialEq<&str> for UpstreamHost {
    fn eq(&self, other: &&str) -> bool {
        self.authority == *other
    }
}

/// Process-wide pipeline settings.
///
/// Built once by [`ProxyConfig::from_config`] and shared as `Arc<ProxyConfig>`;
/// request handling only ever reads it.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream host for desktop clients.
    pub upstream: UpstreamHost,
    /// Upstream host for mobile clients.
    pub upstream_mobile: UpstreamHost,
    /// Blocked country codes, stored upper-case.
    pub blocked_regions: HashSet<String>,
    /// Blocked client IPs, compared verbatim.
    pub blocked_ips: HashSet<String>,
    /// Redirect plain HTTP requests to HTTPS.
    pub force_https: bool,
    /// When `false`, responses get `Cache-Control: no-store`.
    ///
    /// The name reads backwards: leaving it at its default is what stops
    /// clients from caching. Setting it to `true` keeps the upstream's own
    /// `Cache-Control`.
    pub disable_cache: bool,
    /// Body rewrite rules, applied in order.
    pub rewrite_rules: Vec<RewriteRule>,
    /// Upstream request timeout.
    pub timeout: Duration,
    /// Platform metadata header names.
    pub metadata: MetadataHeaders,
}

impl ProxyConfig {
    /// Defaults around a single upstream used for every device.
    pub fn for_upstream(upstream: &str) -> Result<Self, ConfigError> {
        let upstream = validate_host("proxy.upstream.desktop", upstream)?;
        Ok(Self {
            upstream_mobile: upstream.clone(),
            blocked_regions: HashSet::new(),
            blocked_ips: HashSet::new(),
            force_https: true,
            disable_cache: false,
            rewrite_rules: compile_rules(&default_rewrite_rules(), &[upstream.as_str()])?,
            timeout: Duration::from_secs(30),
            metadata: MetadataHeaders::default(),
            upstream,
        })
    }

    /// Read and validate every `proxy.*` key.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let desktop: String = config
            .get("proxy.upstream.desktop")?
            .ok_or_else(|| ConfigError::MissingKey("proxy.upstream.desktop".to_string()))?;
        let mut proxy = Self::for_upstream(&desktop)?;

        if let Some(mobile) = config.get::<String>("proxy.upstream.mobile")? {
            proxy.upstream_mobile = validate_host("proxy.upstream.mobile", &mobile)?;
        }

        let regions: Vec<String> = config.get_or_default("proxy.blocklist.regions", Vec::new())?;
        proxy.blocked_regions = regions
            .iter()
            .map(|r| validate_region(r))
            .collect::<Result<_, _>>()?;

        let ips: Vec<String> = config.get_or_default("proxy.blocklist.ips", Vec::new())?;
        proxy.blocked_ips = ips.into_iter().map(|ip| ip.trim().to_string()).collect();

        proxy.force_https = config.get_or_default("proxy.https", true)?;
        proxy.disable_cache = config.get_or_default("proxy.cache.disable", false)?;

        let rules: Vec<RewriteRuleConfig> =
            config.get_or_default("proxy.rewrite", default_rewrite_rules())?;
        proxy.rewrite_rules = compile_rules(
            &rules,
            &[proxy.upstream.as_str(), proxy.upstream_mobile.as_str()],
        )?;

        let timeout_secs: u64 = config.get_or_default("proxy.timeout", 30)?;
        if timeout_secs == 0 {
            return Err(ConfigError::invalid_value("proxy.timeout", "must be at least 1 second"));
        }
        proxy.timeout = Duration::from_secs(timeout_secs);

        let defaults = MetadataHeaders::default();
        proxy.metadata = MetadataHeaders {
            country: config.get_or_default("proxy.metadata.country", defaults.country)?,
            ip: config.get_or_default("proxy.metadata.ip", defaults.ip)?,
            scheme: config.get_or_default("proxy.metadata.scheme", defaults.scheme)?,
        };

        Ok(proxy)
    }
}

fn compile_rules(
    rules: &[RewriteRuleConfig],
    upstreams: &[&str],
) -> Result<Vec<RewriteRule>, ConfigError> {
    rules
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            RewriteRule::new(&rule.pattern, &rule.replacement)
                .and_then(|rule| rule.with_upstreams(upstreams.iter().copied()))
                .map_err(|e| ConfigError::invalid_value(format!("proxy.rewrite[{i}].pattern"), e))
        })
        .collect()
}

fn validate_host(key: &str, value: &str) -> Result<UpstreamHost, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingKey(key.to_string()));
    }
    UpstreamHost::parse(value).map_err(|e| ConfigError::invalid_value(key, e))
}

fn validate_region(value: &str) -> Result<String, ConfigError> {
    let code = value.trim().to_ascii_uppercase();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::invalid_value(
            "proxy.blocklist.regions",
            format!("'{value}' is not a two-letter region code"),
        ));
    }
    Ok(code)
}
