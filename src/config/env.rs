// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable configuration provider.
//!
//! `WORKERS_PROXY_PROXY_BLOCKLIST_REGIONS='["XX"]'` becomes the key
//! `proxy.blocklist.regions` with a JSON array value. A double underscore
//! stands for a literal one: `WORKERS_PROXY_SERVER_HEALTH__PORT` is
//! `server.health_port`.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::env;

use super::ConfigError;
use super::ConfigProvider;

/// Default variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "WORKERS_PROXY_";

/// Configuration provider backed by process environment variables.
#[derive(Debug)]
pub struct EnvConfigProvider {
    prefix: String,
    cache: HashMap<String, String>,
}

impl EnvConfigProvider {
    /// Snapshot every variable that starts with `prefix`.
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            cache: HashMap::new(),
        };
        provider.refresh_cache();
        provider
    }

    /// Re-read the environment.
    pub fn refresh_cache(&mut self) {
        self.cache = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(&self.prefix)
                    .map(|rest| (env_key_to_config_key(rest), value))
            })
            .collect();
    }

    /// JSON first, then bool, then number, then plain string.
    fn parse_value(value: &str) -> Value {
        if let Ok(parsed) = serde_json::from_str(value) {
            return parsed;
        }
        if value.eq_ignore_ascii_case("true") {
            return json!(true);
        }
        if value.eq_ignore_ascii_case("false") {
            return json!(false);
        }
        if let Ok(int_val) = value.parse::<i64>() {
            return json!(int_val);
        }
        if let Ok(float_val) = value.parse::<f64>() {
            return json!(float_val);
        }
        json!(value)
    }
}

fn env_key_to_config_key(rest: &str) -> String {
    rest.to_lowercase()
        .split("__")
        .map(|segment| segment.replace('_', "."))
        .collect::<Vec<_>>()
        .join("_")
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "env"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.cache.get(key).map(|v| Self::parse_value(v)))
    }
}
