//! Engine configuration
//!
//! Loaded from TOML (the file named by `FASTCALL_CONFIG`, if any), then
//! overlaid by `FASTCALL_*` environment variables.

use crate::descriptor::CallMode;
use crate::errors::{FfiError, Result};
use crate::logging::{self, LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub event_loop: EventLoopConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Mode used by `Library::declare`
    #[serde(default)]
    pub default_call_mode: CallMode,

    /// Initial argument slot capacity of every call VM
    #[serde(default = "default_vm_capacity")]
    pub vm_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLoopConfig {
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Loop thread stack size in bytes; platform default when absent
    #[serde(default)]
    pub stack_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub json: bool,

    #[serde(default = "default_false")]
    pub spans: bool,

    #[serde(default)]
    pub file_directory: Option<String>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_call_mode: CallMode::Sync,
            vm_capacity: default_vm_capacity(),
        }
    }
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: default_thread_name_prefix(),
            stack_size: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            spans: false,
            file_directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_false() -> bool { false }
fn default_vm_capacity() -> usize { 16 }
fn default_thread_name_prefix() -> String { "fastcall-loop".to_string() }
fn default_level() -> String { "info".to_string() }
fn default_file_prefix() -> String { "fastcall.log".to_string() }

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FASTCALL_*` environment overrides on top of this config
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(mode) = std::env::var("FASTCALL_DEFAULT_CALL_MODE") {
            self.library.default_call_mode = mode.parse()?;
        }
        if let Ok(capacity) = std::env::var("FASTCALL_VM_CAPACITY") {
            self.library.vm_capacity = capacity
                .parse()
                .map_err(|_| FfiError::Config(format!("FASTCALL_VM_CAPACITY: '{}'", capacity)))?;
        }
        if let Ok(size) = std::env::var("FASTCALL_LOOP_STACK_SIZE") {
            let size = size
                .parse()
                .map_err(|_| FfiError::Config(format!("FASTCALL_LOOP_STACK_SIZE: '{}'", size)))?;
            self.event_loop.stack_size = Some(size);
        }

        // Same variables `LogConfig::from_env` reads
        if let Ok(level) = std::env::var("FASTCALL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("FASTCALL_LOG_FILE") {
            self.logging.file_directory = Some(dir);
        }
        if std::env::var("FASTCALL_LOG_JSON").is_ok() {
            self.logging.json = true;
        }
        if std::env::var("FASTCALL_LOG_SPANS").is_ok() {
            self.logging.spans = true;
        }
        self.validate()?;
        Ok(self)
    }

    /// Defaults overlaid by the environment
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// `FASTCALL_CONFIG` file if set, then the environment overlay
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("FASTCALL_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// `path` if given, then the environment overlay
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path)?.with_env(),
            None => Self::from_env(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.library.vm_capacity == 0 {
            return Err(FfiError::Config("library.vm_capacity must be positive".into()));
        }
        if logging::parse_level(&self.logging.level).is_none() {
            return Err(FfiError::Config(format!(
                "logging.level: unknown level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Logging section as a `LogConfig`
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: logging::parse_level(&self.logging.level).unwrap_or(tracing::Level::INFO),
            format: if self.logging.json { LogFormat::Json } else { LogFormat::Compact },
            file_directory: self.logging.file_directory.clone(),
            file_prefix: self.logging.file_prefix.clone(),
            show_spans: self.logging.spans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.library.default_call_mode, CallMode::Sync);
        assert_eq!(config.library.vm_capacity, 16);
        assert_eq!(config.event_loop.thread_name_prefix, "fastcall-loop");
        assert!(config.event_loop.stack_size.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [library]
            default_call_mode = "async"

            [event_loop]
            stack_size = 262144
            "#,
        )
        .unwrap();
        assert_eq!(config.library.default_call_mode, CallMode::Async);
        assert_eq!(config.library.vm_capacity, 16);
        assert_eq!(config.event_loop.stack_size, Some(262144));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = EngineConfig::from_toml_str("[library]\nvm_capacity = 0\n").unwrap_err();
        assert!(matches!(err, FfiError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = EngineConfig::from_toml_str("[library\n").unwrap_err();
        assert!(matches!(err, FfiError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\njson = true").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        let log = config.log_config();
        assert_eq!(log.level, tracing::Level::DEBUG);
        assert_eq!(log.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_applies_logging_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[library]\nvm_capacity = 4\n\n[logging]\nlevel = \"trace\"\nspans = true\nfile_prefix = \"ffi.log\""
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.library.vm_capacity, 4);

        let log = config.log_config();
        assert_eq!(log.level, tracing::Level::TRACE);
        assert!(log.show_spans);
        assert_eq!(log.file_prefix, "ffi.log");
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let err = EngineConfig::load_from(Some(Path::new("/nonexistent/fastcall.toml"))).unwrap_err();
        assert!(matches!(err, FfiError::Io(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/fastcall.toml")).unwrap_err();
        assert!(matches!(err, FfiError::Io(_)));
    }
}
