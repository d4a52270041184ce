// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-alone proxy binary.
//!
//! Reads `WORKERS_PROXY_CONFIG_FILE`, or `/etc/workers-proxy/config.toml` when
//! that is unset, then layers `WORKERS_PROXY_*` environment variables on top.

use std::env;
use std::error::Error;
use std::path::Path;

use workers_proxy::{WorkersProxy, error_fmt, info_fmt};

const CONFIG_FILE_VAR: &str = "WORKERS_PROXY_CONFIG_FILE";
const DEFAULT_CONFIG_PATH: &str = "/etc/workers-proxy/config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Starting workers-proxy");

    let mut loader = WorkersProxy::loader().with_env_vars();
    match env::var(CONFIG_FILE_VAR).ok() {
        Some(path) => {
            println!("Using configuration from {path}");
            loader = loader.with_config_file(&path);
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            println!("No {CONFIG_FILE_VAR} set, using {DEFAULT_CONFIG_PATH}");
            loader = loader.with_config_file(DEFAULT_CONFIG_PATH);
        }
        // Environment variables alone may still carry a complete configuration.
        None => {
            println!("No configuration file found, relying on environment variables");
        }
    }

    let proxy = match loader.build().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to build proxy: {e}");
            return Err(e.into());
        }
    };

    match proxy.start().await {
        Ok(()) => {
            info_fmt!("WorkersProxy", "Proxy server stopped gracefully");
        }
        Err(e) => {
            error_fmt!("WorkersProxy", "Proxy server failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
