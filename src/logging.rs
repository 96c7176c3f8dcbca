//! Logging infrastructure - structured tracing for the invocation engine
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log level, overridable through `RUST_LOG`
//! - Zero-cost when disabled
//! - Compact or JSON console output, optional daily-rotated log file
//!
//! Targets: `plan` (plan construction), `invoke` (sync/async invocation),
//! `event_loop` (background loop and handle lifecycle).

use once_cell::sync::OnceCell;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Console output format
    pub format: LogFormat,
    /// Directory for the rotated log file, if file output is enabled
    pub file_directory: Option<String>,
    /// File name prefix for the rotated log file
    pub file_prefix: String,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            file_directory: None,
            file_prefix: "fastcall.log".to_string(),
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // FASTCALL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("FASTCALL_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // FASTCALL_LOG_FILE: directory for rotated log files
        if let Ok(dir) = std::env::var("FASTCALL_LOG_FILE") {
            config.file_directory = Some(dir);
        }

        if std::env::var("FASTCALL_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }

        config.show_spans = std::env::var("FASTCALL_LOG_SPANS").is_ok();

        config
    }

    /// Verbose config for debugging the loop and handle lifecycle
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            show_spans: true,
            ..Self::default()
        }
    }
}

/// Parse a level name, case-insensitive
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration (first call wins)
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("fastcall={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let console = match config.format {
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_names(true)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_thread_names(true)
                .boxed(),
        };

        let file = config.file_directory.as_ref().map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_span_events(span_events)
                .boxed()
        });

        // Another subscriber may already be installed by the host; keep it.
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Engine-specific logging functions
// ============================================================================

/// Log a freshly built call plan
pub fn log_plan_built(function: &str, arg_count: usize, mode: &str) {
    debug!(
        target: "plan",
        function,
        args = arg_count,
        mode,
        "call plan built"
    );
}

/// Log a rejected plan
pub fn log_plan_rejected(function: &str, error: &str) {
    warn!(target: "plan", function, error, "call plan rejected");
}

/// Log a synchronous native call
#[inline]
pub fn log_sync_call(function: &str, arg_count: usize) {
    trace!(target: "invoke", function, args = arg_count, "sync call");
}

/// Log an asynchronous call entering the call queue
#[inline]
pub fn log_async_enqueue(function: &str, handle: u64) {
    trace!(target: "invoke", function, handle, "async call enqueued");
}

/// Log an argument conversion failure
pub fn log_conversion_error(function: &str, error: &str) {
    debug!(target: "invoke", function, error, "argument conversion failed");
}

/// Log completion of an asynchronous call on the loop thread
#[inline]
pub fn log_async_complete(function: &str, handle: u64, success: bool) {
    trace!(target: "event_loop", function, handle, success, "async call completed");
}

/// Log the engine dropping its strong reference to a handle
#[inline]
pub fn log_release(handle: u64) {
    trace!(target: "event_loop", handle, "async result released");
}

/// Log a synchronization barrier firing
#[inline]
pub fn log_barrier(target_calls: u64) {
    trace!(target: "event_loop", target_calls, "synchronization barrier reached");
}
