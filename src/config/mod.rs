// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration subsystem
//!
//! Configuration is read from an ordered list of [`ConfigProvider`]s; later
//! providers override earlier ones. The usual stack is:
//!
//! 1. `FileConfigProvider` - `config.{toml,json,yaml}`
//! 2. `EnvConfigProvider`  - `WORKERS_PROXY_PROXY_UPSTREAM_DESKTOP=example.com`
//!
//! Raw lookups go through [`Config::get`]. The pipeline itself never touches
//! [`Config`]: the loader turns it into a validated, immutable
//! [`ProxyConfig`] once, before the listener is bound.
//!
//! | key | type | default | description |
//! |-----|------|---------|-------------|
//! | `server.host`              | string   | `127.0.0.1`          | Bind address                        |
//! | `server.port`              | u16      | `8080`               | Proxy port                          |
//! | `server.health_port`       | u16      | `8081`               | Health/readiness port               |
//! | `proxy.upstream.desktop`   | string   | **required**         | Upstream host for desktop clients   |
//! | `proxy.upstream.mobile`    | string   | desktop upstream     | Upstream host for mobile clients    |
//! | `proxy.blocklist.regions`  | [string] | `[]`                 | Two-letter country codes to refuse  |
//! | `proxy.blocklist.ips`      | [string] | `[]`                 | Client IPs to refuse                |
//! | `proxy.https`              | bool     | `true`               | Redirect plain HTTP to HTTPS        |
//! | `proxy.cache.disable`      | bool     | `false`              | See [`ProxyConfig::disable_cache`]  |
//! | `proxy.rewrite`            | array    | `$upstream -> $custom_domain` | Body rewrite rules         |
//! | `proxy.timeout`            | seconds  | `30`                 | Upstream timeout                    |
//! | `proxy.metadata.country`   | string   | `cf-ipcountry`       | Header carrying the country code    |
//! | `proxy.metadata.ip`        | string   | `cf-connecting-ip`   | Header carrying the client IP       |
//! | `proxy.metadata.scheme`    | string   | `x-forwarded-proto`  | Header carrying the client scheme   |
//! | `proxy.logging`            | object   | terminal, `info`     | See [`crate::logging::config`]      |

mod env;
pub mod error;
mod file;
mod proxy;

#[cfg(test)]
mod tests;

pub use env::EnvConfigProvider;
pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};
pub use proxy::{MetadataHeaders, ProxyConfig, RewriteRuleConfig, UpstreamHost};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// A source of raw configuration values.
///
/// Kept object-safe so providers can be stacked as `Arc<dyn ConfigProvider>`.
pub trait ConfigProvider: Debug + Send + Sync {
    /// Whether this provider knows `key`.
    fn has(&self, key: &str) -> bool;

    /// Name used in logs and error messages.
    fn provider_name(&self) -> &str;

    /// Raw JSON value for `key`, deserialized later by the caller.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

/// Typed access on top of [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Fetch `key` and deserialize it into `T`.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => deserialize(key, value).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

fn deserialize<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, ConfigError> {
    serde_json::from_value(value)
        .map_err(|e| ConfigError::ParseError(format!("failed to deserialize '{key}': {e}")))
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a provider; it takes precedence over everything added before it.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Push an already shared provider.
    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// Layered view over all registered providers.
#[derive(Debug, Clone, Default)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Names of the providers, lowest priority first.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider_name()).collect()
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        // Later providers win, so walk the stack from the top.
        for provider in self.providers.iter().rev() {
            if provider.has(key) {
                return provider.get_raw(key);
            }
        }
        Ok(None)
    }

    /// Look `key` up in the highest-priority provider that has it.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => deserialize(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`Config::get`] but falls back to `default` when no provider has `key`.
    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// A configuration backed by a single file.
    pub fn default_file(file_path: &str) -> Result<Self, ConfigError> {
        let provider = FileConfigProvider::new(file_path)?;
        Ok(Self::builder().with_provider(provider).build())
    }
}

/// A whole [`Config`] can be stacked under further providers.
impl ConfigProvider for Config {
    fn has(&self, key: &str) -> bool {
        self.providers.iter().any(|p| p.has(key))
    }

    fn provider_name(&self) -> &str {
        "layered"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Config::get_raw(self, key)
    }
}
