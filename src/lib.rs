// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! workers-proxy - a content-rewriting relay for the edge
//!
//! The proxy sits in front of a single third-party origin and hands its
//! content back to clients under the proxy's own domain. Every request walks
//! the same short pipeline:
//!
//! 1. **Protocol check** - plain HTTP is redirected to HTTPS when configured.
//! 2. **Classify** - the user agent picks the desktop or mobile upstream.
//! 3. **Route** - the request URL is re-pointed at that upstream.
//! 4. **Access control** - region and IP blocklists answer with `403`.
//! 5. **Forward** - the request goes upstream with `Host`/`Referer` rewritten.
//! 6. **Transform** - CORS is relaxed, CSP is stripped, caching is disabled
//!    and `text/html; charset=UTF-8` bodies have upstream host references
//!    rewritten to the client-visible host.
//!
//! # Configuration
//!
//! Configuration is layered exactly once at startup from files (JSON, TOML,
//! YAML) and environment variables, validated, and then frozen into an
//! immutable [`ProxyConfig`] shared by every request.
//!
//! ```rust,no_run
//! use workers_proxy::WorkersProxy;
//!
//! # async fn run() -> Result<(), workers_proxy::LoaderError> {
//! let proxy = WorkersProxy::loader()
//!     .with_config_file("config.toml")
//!     .with_env_vars()
//!     .build()
//!     .await?;
//! proxy.start().await
//! # }
//! ```
//!
//! # Custom transports
//!
//! The upstream call goes through the [`Forwarder`] trait. The default
//! [`HttpForwarder`] streams through `reqwest`; tests and embedders can hand
//! their own implementation to the loader.

pub mod config;
pub mod core;
pub mod filters;
pub mod loader;
pub mod logging;
pub mod router;
pub mod security;
pub mod server;

pub use config::{Config, ConfigError, ConfigProvider, ConfigProviderExt, ProxyConfig, UpstreamHost};
pub use core::{
    Forwarder, HttpForwarder, InboundRequest, OutboundRequest, Pipeline, ProxyError,
    ProxyResponse, RequestContext, ResponseBody, UpstreamResponse,
};
pub use filters::{RewriteRule, build_outbound_headers, build_response_headers, maybe_rewrite};
pub use loader::{LoaderError, WorkersProxy, WorkersProxyLoader};
pub use logging::{init as init_logging, init_with_config, log_error, log_info};
pub use router::{DeviceClass, Route, classify, rewrite_url, select_upstream};
pub use security::{AccessDecision, evaluate, is_blocked};
pub use server::{ProxyServer, ServerConfig};
