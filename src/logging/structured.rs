// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured logging on top of slog, plus the per-request access log.

use slog::{Drain, FnValue, Logger, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};
use std::io;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Structured logging format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable terminal output
    Terminal,
    /// JSON formatted output
    Json,
}

/// Structured logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Output format (Terminal or JSON)
    pub format: LogFormat,
    /// Log level
    pub level: slog::Level,
    /// Whether to include source code location
    pub include_location: bool,
    /// Whether to include thread ID
    pub include_thread_id: bool,
    /// Additional static key-value pairs to include in all logs
    pub static_fields: Vec<(String, String)>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            level: slog::Level::Info,
            include_location: true,
            include_thread_id: true,
            static_fields: Vec::new(),
        }
    }
}

/// Create a structured logger with the given configuration
pub fn create_logger(config: &LoggerConfig) -> Logger {
    let logger = match config.format {
        LogFormat::Terminal => create_terminal_logger(config),
        LogFormat::Json => create_json_logger(config),
    };
    with_static_fields(logger, config)
}

fn create_terminal_logger(config: &LoggerConfig) -> Logger {
    let decorator = TermDecorator::new().build();
    let mut format = FullFormat::new(decorator);
    if config.include_location {
        format = format.use_file_location();
    }
    let drain = format.build().fuse();
    let drain = drain.filter_level(config.level).fuse();
    let drain = Async::new(drain).build().fuse();

    Logger::root(drain, o!())
}

fn create_json_logger(config: &LoggerConfig) -> Logger {
    let drain = Json::new(io::stdout()).add_default_keys().build().fuse();
    let drain = drain.filter_level(config.level).fuse();
    let drain = Async::new(drain).build().fuse();

    if config.include_location {
        Logger::root(
            drain,
            o!("location" => FnValue(|record: &slog::Record| {
                format!("{}:{}", record.file(), record.line())
            })),
        )
    } else {
        Logger::root(drain, o!())
    }
}

fn with_static_fields(mut logger: Logger, config: &LoggerConfig) -> Logger {
    if config.include_thread_id {
        logger = logger.new(o!("thread" => FnValue(|_: &slog::Record| {
            format!("{:?}", std::thread::current().id())
        })));
    }

    for (key, value) in &config.static_fields {
        // slog keys are &'static str; these are created once at startup.
        let key_str: &'static str = Box::leak(key.clone().into_boxed_str());
        logger = logger.new(o!(key_str => value.clone()));
    }

    logger
}

/// Generate a new trace ID
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a child logger with request context
pub fn with_request_context(logger: &Logger, request_info: &RequestInfo) -> Logger {
    logger.new(o!(
        "trace_id" => request_info.trace_id.clone(),
        "method" => request_info.method.clone(),
        "path" => request_info.path.clone(),
        "remote_addr" => request_info.remote_addr.clone(),
        "user_agent" => request_info.user_agent.clone(),
    ))
}

/// Request information for the access log
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Trace ID of the request
    pub trace_id: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Client IP as reported by the platform, else the peer address
    pub remote_addr: String,
    /// User agent
    pub user_agent: String,
    /// When the request was accepted
    pub start_time: Instant,
}

impl RequestInfo {
    pub fn new(
        trace_id: String,
        method: String,
        path: String,
        remote_addr: String,
        user_agent: String,
        start_time: Instant,
    ) -> Self {
        Self {
            trace_id,
            method,
            path,
            remote_addr,
            user_agent,
            start_time,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Write the access log line for a finished request.
pub fn log_access(info: &RequestInfo, status: u16) {
    let elapsed_ms = info.elapsed().as_millis() as u64;

    if super::is_structured_logging() {
        let logger = with_request_context(&slog_scope::logger(), info);
        slog::info!(logger, "request completed"; "status" => status, "elapsed_ms" => elapsed_ms);
    } else {
        crate::info_fmt!(
            "Access",
            "[{}] {} {} {} {} {}ms \"{}\"",
            info.trace_id,
            info.remote_addr,
            info.method,
            info.path,
            status,
            elapsed_ms,
            info.user_agent
        );
    }
}

/// Global logger guard that keeps the logger alive
pub struct LoggerGuard {
    _guard: slog_scope::GlobalLoggerGuard,
}

impl std::fmt::Debug for LoggerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerGuard").finish_non_exhaustive()
    }
}

/// Initialize the global structured logger
pub fn init_global_logger(config: &LoggerConfig) -> LoggerGuard {
    let logger = create_logger(config);
    let guard = slog_scope::set_global_logger(logger);

    LoggerGuard { _guard: guard }
}
