// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockConfigProvider {
    name: String,
    values: HashMap<String, Value>,
}

impl MockConfigProvider {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: HashMap::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl ConfigProvider for MockConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}

fn config_with(provider: MockConfigProvider) -> Config {
    Config::builder().with_provider(provider).build()
}

#[test]
fn test_later_provider_wins() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new("low").with("server.port", json!(8080)))
        .with_provider(MockConfigProvider::new("high").with("server.port", json!(9090)))
        .build();

    assert_eq!(config.get::<u16>("server.port").unwrap(), Some(9090));
    assert_eq!(config.provider_names(), vec!["low", "high"]);
}

#[test]
fn test_lower_provider_fills_gaps() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new("low").with("server.host", json!("0.0.0.0")))
        .with_provider(MockConfigProvider::new("high").with("server.port", json!(9090)))
        .build();

    assert_eq!(config.get::<String>("server.host").unwrap().as_deref(), Some("0.0.0.0"));
    assert_eq!(config.get_or_default("server.health_port", 8081u16).unwrap(), 8081);
}

#[test]
fn test_type_mismatch_is_parse_error() {
    let config = config_with(MockConfigProvider::new("m").with("proxy.https", json!("yes please")));
    let err = config.get::<bool>("proxy.https").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
    assert!(err.to_string().contains("proxy.https"));
}

#[test]
fn test_proxy_config_defaults() {
    let config = config_with(
        MockConfigProvider::new("m").with("proxy.upstream.desktop", json!("gravatar.com")),
    );
    let proxy = ProxyConfig::from_config(&config).unwrap();

    assert_eq!(proxy.upstream, "gravatar.com");
    assert_eq!(proxy.upstream_mobile, "gravatar.com");
    assert!(proxy.blocked_regions.is_empty());
    assert!(proxy.blocked_ips.is_empty());
    assert!(proxy.force_https);
    assert!(!proxy.disable_cache);
    assert_eq!(proxy.rewrite_rules.len(), 1);
    assert_eq!(proxy.rewrite_rules[0].pattern(), "$upstream");
    assert_eq!(proxy.timeout, Duration::from_secs(30));
    assert_eq!(proxy.metadata, MetadataHeaders::default());
}

#[test]
fn test_proxy_config_full() {
    let config = config_with(
        MockConfigProvider::new("m")
            .with("proxy.upstream.desktop", json!("www.example.com"))
            .with("proxy.upstream.mobile", json!("m.example.com:8443"))
            .with("proxy.blocklist.regions", json!(["xx", "KP"]))
            .with("proxy.blocklist.ips", json!(["0.0.0.0", " 127.0.0.1 "]))
            .with("proxy.https", json!(false))
            .with("proxy.cache.disable", json!(true))
            .with(
                "proxy.rewrite",
                json!([
                    {"pattern": "$upstream", "replacement": "$custom_domain"},
                    {"pattern": "//example\\.com", "replacement": ""}
                ]),
            )
            .with("proxy.timeout", json!(5))
            .with("proxy.metadata.country", json!("x-country")),
    );
    let proxy = ProxyConfig::from_config(&config).unwrap();

    assert_eq!(proxy.upstream_mobile, "m.example.com:8443");
    assert!(proxy.blocked_regions.contains("XX"));
    assert!(proxy.blocked_regions.contains("KP"));
    assert!(proxy.blocked_ips.contains("127.0.0.1"));
    assert!(!proxy.force_https);
    assert!(proxy.disable_cache);
    assert_eq!(proxy.rewrite_rules.len(), 2);
    assert_eq!(proxy.rewrite_rules[1].replacement(), "");
    assert_eq!(proxy.timeout, Duration::from_secs(5));
    assert_eq!(proxy.metadata.country, "x-country");
    assert_eq!(proxy.metadata.ip, "cf-connecting-ip");
}

#[test]
fn test_missing_upstream_is_fatal() {
    let err = ProxyConfig::from_config(&Config::default()).unwrap_err();
    assert!(matches!(err, ConfigError::MissingKey(ref key) if key == "proxy.upstream.desktop"));
}

#[test]
fn test_blank_upstream_is_fatal() {
    let config = config_with(MockConfigProvider::new("m").with("proxy.upstream.desktop", json!("  ")));
    assert!(matches!(
        ProxyConfig::from_config(&config).unwrap_err(),
        ConfigError::MissingKey(_)
    ));
}

#[test]
fn test_upstream_with_scheme_or_path_rejected() {
    for bad in ["https://example.com", "example.com/path", "user@example.com"] {
        let config =
            config_with(MockConfigProvider::new("m").with("proxy.upstream.desktop", json!(bad)));
        let err = ProxyConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "{bad} accepted");
    }
}

#[test]
fn test_upstream_with_bad_port_rejected_at_load() {
    for bad in ["example.com:http", "example.com:70000", "example.com:1:2"] {
        let config = config_with(
            MockConfigProvider::new("m")
                .with("proxy.upstream.desktop", json!("example.com"))
                .with("proxy.upstream.mobile", json!(bad)),
        );
        let err = ProxyConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "{bad} accepted");
    }
}

#[test]
fn test_upstream_host_is_normalized_once() {
    let trailing = UpstreamHost::parse("example.com:").unwrap();
    assert_eq!(trailing.host(), "example.com");
    assert_eq!(trailing.port(), None);
    assert_eq!(trailing.as_str(), "example.com");

    let explicit = UpstreamHost::parse(" Example.COM:80 ").unwrap();
    assert_eq!(explicit.host(), "example.com");
    assert_eq!(explicit.port(), Some(80));
    assert_eq!(explicit.to_string(), "example.com:80");

    let v6 = UpstreamHost::parse("[::1]:9000").unwrap();
    assert_eq!(v6.host(), "[::1]");
    assert_eq!(v6.port(), Some(9000));
}

#[test]
fn test_rewrite_rules_precompiled_for_both_upstreams() {
    let config = config_with(
        MockConfigProvider::new("m")
            .with("proxy.upstream.desktop", json!("www.example.com"))
            .with("proxy.upstream.mobile", json!("m.example.com")),
    );
    let proxy = ProxyConfig::from_config(&config).unwrap();
    let rule = &proxy.rewrite_rules[0];
    assert!(rule.precompiled("www.example.com").is_some());
    assert!(rule.precompiled("m.example.com").is_some());
    assert!(rule.precompiled("other.example.com").is_none());
}

#[test]
fn test_malformed_rewrite_pattern_is_fatal() {
    let config = config_with(
        MockConfigProvider::new("m")
            .with("proxy.upstream.desktop", json!("example.com"))
            .with(
                "proxy.rewrite",
                json!([
                    {"pattern": "$upstream", "replacement": "$custom_domain"},
                    {"pattern": "(unclosed", "replacement": ""}
                ]),
            ),
    );
    let err = ProxyConfig::from_config(&config).unwrap_err();
    match err {
        ConfigError::InvalidValue { key, .. } => assert_eq!(key, "proxy.rewrite[1].pattern"),
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

#[test]
fn test_bad_region_code_rejected() {
    let config = config_with(
        MockConfigProvider::new("m")
            .with("proxy.upstream.desktop", json!("example.com"))
            .with("proxy.blocklist.regions", json!(["USA"])),
    );
    assert!(ProxyConfig::from_config(&config).is_err());
}

#[test]
fn test_zero_timeout_rejected() {
    let config = config_with(
        MockConfigProvider::new("m")
            .with("proxy.upstream.desktop", json!("example.com"))
            .with("proxy.timeout", json!(0)),
    );
    assert!(ProxyConfig::from_config(&config).is_err());
}
