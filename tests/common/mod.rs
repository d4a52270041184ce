// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared helpers for the integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use workers_proxy::config::{ConfigError, ConfigProvider};
use workers_proxy::WorkersProxy;

/// In-memory configuration for a single test.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct TestConfigProvider {
    values: HashMap<String, Value>,
}

#[allow(dead_code)]
impl TestConfigProvider {
    /// Plain-HTTP proxy in front of `upstream`.
    pub fn new(upstream: &str) -> Self {
        let mut values = HashMap::new();
        values.insert("server.host".to_string(), Value::String("127.0.0.1".to_string()));
        values.insert(
            "proxy.upstream.desktop".to_string(),
            Value::String(upstream.to_string()),
        );
        values.insert("proxy.https".to_string(), Value::Bool(false));
        values.insert("proxy.timeout".to_string(), Value::Number(5.into()));
        Self { values }
    }

    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl ConfigProvider for TestConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}

/// A running proxy. Dropping it stops the server.
#[allow(dead_code)]
pub struct RunningProxy {
    pub addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

#[allow(dead_code)]
impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Build the proxy through the loader and serve it on an ephemeral port.
#[allow(dead_code)]
pub async fn spawn_proxy(provider: TestConfigProvider) -> RunningProxy {
    let proxy = WorkersProxy::loader()
        .with_provider(provider)
        .build()
        .await
        .expect("proxy should build");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        proxy
            .server()
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    RunningProxy {
        addr,
        _shutdown: tx,
    }
}

/// Client that reports redirects instead of following them.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
