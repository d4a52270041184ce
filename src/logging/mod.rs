// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging utilities.
//!
//! All code logs through the `log` facade, usually via the context-tagged
//! `*_fmt!` macros. The backend is chosen once at startup:
//!
//! * plain - `env_logger`, honouring `RUST_LOG`
//! * structured - `slog` (terminal or JSON) with `slog-stdlog` bridging the
//!   facade into it, enabled by `proxy.logging.structured = true`

pub mod config;
pub mod structured;
#[cfg(test)]
pub mod test_logger;
mod wrapper;


use log::{LevelFilter, error, info};
use once_cell::sync::OnceCell;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use self::config::LoggingConfig;
use self::structured::LoggerGuard;

static INIT: Once = Once::new();
static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);
static STRUCTURED_GUARD: OnceCell<LoggerGuard> = OnceCell::new();

/// Initialize `env_logger` at `level` (default `info`). Only the first call
/// has any effect.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| init_env_logger(level.unwrap_or(LevelFilter::Info)));
}

/// Initialize from `proxy.logging`. `level` is used when the configured level
/// cannot be parsed. Only the first call has any effect.
pub fn init_with_config(level: LevelFilter, config: &LoggingConfig) {
    INIT.call_once(|| {
        let level = config.level_filter().unwrap_or(level);

        if !config.structured {
            init_env_logger(level);
            return;
        }

        let guard = structured::init_global_logger(&config.to_logger_config());
        let bridged = level
            .to_level()
            .map(slog_stdlog::init_with_level)
            .unwrap_or(Ok(()));
        if let Err(e) = bridged {
            eprintln!("Failed to bridge log facade into slog: {e}");
            return;
        }
        log::set_max_level(level);
        USING_STRUCTURED.store(true, Ordering::SeqCst);
        let _ = STRUCTURED_GUARD.set(guard);

        info!("Structured logging initialized at level: {}", level);
    });
}

fn init_env_logger(level: LevelFilter) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level.as_str().to_lowercase());

    // Tests may have installed a logger already.
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(true)
        .try_init()
        .is_ok()
    {
        info!("Logging initialized at level: {}", log::max_level());
    }
}

/// `true` once the slog backend is installed.
pub fn is_structured_logging() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}

/// Log an error with context and return the error.
///
/// This is useful for logging errors in a chain of Results.
pub fn log_error<E: std::fmt::Display>(context: &str, err: E) -> E {
    error!("[{}] {}", context, err);
    err
}

/// Log an info message with context.
pub fn log_info<M: std::fmt::Display>(context: &str, msg: M) {
    info!("[{}] {}", context, msg);
}
