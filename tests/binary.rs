// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `workers-proxy` binary as a process.

use std::io::Write;
use std::process::Command;

#[test]
fn test_build_failure_is_reported_on_stderr() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[proxy]\nhttps = false").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_workers-proxy"))
        .env("WORKERS_PROXY_CONFIG_FILE", file.path())
        .env_remove("WORKERS_PROXY_PROXY_UPSTREAM_DESKTOP")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("Using configuration from"), "{stdout}");
    assert!(stderr.contains("Failed to build proxy"), "{stderr}");
    assert!(stderr.contains("proxy.upstream.desktop"), "{stderr}");
    assert!(!stdout.contains("Failed to build proxy"), "{stdout}");
}
