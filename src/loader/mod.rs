// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry-point - "turn the key and go".
//!
//! The [`WorkersProxyLoader`] layers configuration, initialises logging,
//! validates everything into a [`ProxyConfig`] and wires the [`Pipeline`] into
//! a [`ProxyServer`]. Any configuration problem surfaces from
//! [`WorkersProxyLoader::build`], before a socket is bound.


use log::LevelFilter;
use std::env;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider, ProxyConfig};
use crate::core::{Forwarder, HttpForwarder, Pipeline, ProxyError};
use crate::logging::config::LoggingConfig;
use crate::logging::{init_with_config, log_error, log_info};
use crate::server::{ProxyServer, ServerConfig};
use crate::info_fmt;

/// Errors that can occur during initialization.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Proxy error
    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),
}

/// Builder for initializing and configuring the proxy.
///
/// Providers are layered in this order, later ones winning: explicit
/// [`Config`], the configuration file, custom providers, environment
/// variables.
#[derive(Debug, Default)]
pub struct WorkersProxyLoader {
    config: Option<Config>,
    config_file_path: Option<String>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    forwarder: Option<Arc<dyn Forwarder>>,
}

impl WorkersProxyLoader {
    /// Create a new loader with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already built configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a configuration file to load.
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Enable environment variable configuration.
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Set a custom prefix for environment variables (default is "WORKERS_PROXY_").
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Add a custom configuration provider.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Replace the default HTTP forwarder.
    pub fn with_forwarder<F: Forwarder + 'static>(mut self, forwarder: F) -> Self {
        self.forwarder = Some(Arc::new(forwarder));
        self
    }

    fn layered_config(&self) -> Result<Config, LoaderError> {
        let mut builder = Config::builder();

        if let Some(config) = &self.config {
            builder = builder.with_shared_provider(Arc::new(config.clone()));
        }

        if let Some(file_path) = &self.config_file_path {
            builder = builder.with_provider(FileConfigProvider::new(file_path)?);
        }

        for provider in &self.providers {
            builder = builder.with_shared_provider(provider.clone());
        }

        if self.use_env_vars {
            let env_provider = match &self.env_prefix {
                Some(prefix) => EnvConfigProvider::new(prefix),
                None => EnvConfigProvider::default(),
            };
            builder = builder.with_provider(env_provider);
        }

        Ok(builder.build())
    }

    /// Build and initialize the proxy.
    pub async fn build(self) -> Result<WorkersProxy, LoaderError> {
        let config = Arc::new(self.layered_config()?);

        // Then initialize the logger
        let log_level = match env::var("RUST_LOG_LEVEL").ok().as_deref() {
            Some("trace") => LevelFilter::Trace,
            Some("debug") => LevelFilter::Debug,
            Some("info") => LevelFilter::Info,
            Some("warn") => LevelFilter::Warn,
            Some("error") => LevelFilter::Error,
            _ => LevelFilter::Info,
        };

        let logging_config = match config.get::<LoggingConfig>("proxy.logging") {
            Ok(found) => found.unwrap_or_default(),
            Err(e) => {
                log_error("Startup", format!("Failed to read logging configuration: {e}"));
                LoggingConfig::default()
            }
        };
        init_with_config(log_level, &logging_config);
        log_info("Startup", "workers-proxy starting up");

        let proxy_config = Arc::new(ProxyConfig::from_config(&config).map_err(|e| log_error("Startup", e))?);
        info_fmt!(
            "Startup",
            "Routing desktop clients to {} and mobile clients to {}",
            proxy_config.upstream,
            proxy_config.upstream_mobile
        );
        info_fmt!(
            "Startup",
            "{} blocked region(s), {} blocked IP(s), {} rewrite rule(s), https {}",
            proxy_config.blocked_regions.len(),
            proxy_config.blocked_ips.len(),
            proxy_config.rewrite_rules.len(),
            if proxy_config.force_https { "forced" } else { "optional" }
        );

        let forwarder = match self.forwarder {
            Some(forwarder) => forwarder,
            None => Arc::new(HttpForwarder::new(proxy_config.timeout)?),
        };
        let pipeline = Arc::new(Pipeline::new(proxy_config, forwarder));

        let defaults = ServerConfig::default();
        let server_config = ServerConfig {
            host: config.get_or_default("server.host", defaults.host)?,
            port: config.get_or_default("server.port", defaults.port)?,
            health_port: config.get_or_default("server.health_port", defaults.health_port)?,
        };

        let mut server = ProxyServer::new(server_config, pipeline.clone());
        if let Some(header) = logging_config.trace_header() {
            server = server.with_trace_header(header)?;
        }

        Ok(WorkersProxy {
            config,
            pipeline,
            server,
        })
    }
}

/// The initialized proxy.
#[derive(Debug, Clone)]
pub struct WorkersProxy {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    server: ProxyServer,
}

impl WorkersProxy {
    /// Create a new loader.
    pub fn loader() -> WorkersProxyLoader {
        WorkersProxyLoader::new()
    }

    /// The raw layered configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The validated pipeline configuration.
    pub fn proxy_config(&self) -> &ProxyConfig {
        self.pipeline.config()
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }

    pub fn server(&self) -> &ProxyServer {
        &self.server
    }

    /// Start the proxy server.
    pub async fn start(&self) -> Result<(), LoaderError> {
        self.server.start().await.map_err(LoaderError::ProxyError)
    }
}
