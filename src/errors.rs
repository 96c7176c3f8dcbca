//! Error taxonomy for plan construction, argument conversion and engine invariants
//!
//! Design: one error enum for the whole engine, grouped by when it can occur:
//! 1. Plan construction (before any native call, no partial state)
//! 2. Argument conversion (per call, names the offending index)
//! 3. Invariant violations (malformed descriptors, unsupported modes, shutdown)
//!
//! Precision loss on 64-bit values routed through the double channel is not an
//! error and has no variant here.

use std::io;
use thiserror::Error;

/// Engine-wide result alias
pub type Result<T> = std::result::Result<T, FfiError>;

#[derive(Debug, Error)]
pub enum FfiError {
    // ----- plan construction -----
    #[error("Invalid argument type definition at: {index} ('{name}', indirection {indirection}).")]
    InvalidArgumentType {
        index: usize,
        name: String,
        indirection: u32,
    },

    #[error("Invalid resultType '{name}' (indirection {indirection}).")]
    InvalidResultType { name: String, indirection: u32 },

    #[error("Pointee type lookup failed for '{name}': {reason}")]
    PointeeLookup { name: String, reason: String },

    #[error("Invalid type descriptor '{0}'")]
    InvalidTypeDescriptor(String),

    // ----- argument conversion -----
    #[error("Argument at index {index} is not a pointer.")]
    NotAPointer { index: usize },

    #[error("Argument at index {index} is an async result holding {found}, expected {expected}.")]
    AsyncResultMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("Invalid argument count: expected {expected}, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    // ----- invariant violations -----
    #[error("Unsupported call mode: {0}")]
    UnsupportedCallMode(u32),

    #[error("Function '{function}' is declared {declared}, cannot be invoked {requested}")]
    CallModeMismatch {
        function: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[error("Invalid async result: {0}")]
    InvalidAsyncResult(String),

    #[error("Function '{0}' has a null entry point")]
    NullEntryPoint(String),

    #[error("Library '{0}' has been released")]
    LibraryReleased(String),

    #[error("Failed to start background loop: {0}")]
    LoopStart(#[source] io::Error),

    #[error("Background loop disconnected before the call completed")]
    LoopDisconnected,

    // ----- configuration -----
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FfiError {
    /// True for errors raised while building a call plan
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgumentType { .. }
                | Self::InvalidResultType { .. }
                | Self::PointeeLookup { .. }
                | Self::InvalidTypeDescriptor(_)
        )
    }

    /// Argument index named by the error, if any
    pub fn argument_index(&self) -> Option<usize> {
        match self {
            Self::InvalidArgumentType { index, .. }
            | Self::NotAPointer { index }
            | Self::AsyncResultMismatch { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for FfiError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
