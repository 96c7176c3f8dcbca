//! fastcall - dynamic foreign-function invocation engine
//!
//! Builds a call plan once per native function signature, then runs it either
//! synchronously under the library lock or deferred to a per-library
//! background loop.

pub mod async_result;
pub mod config;
pub mod descriptor;
pub mod errors;
pub mod event_loop;
pub mod host;
pub mod interop;
pub mod invoke;
pub mod library;
pub mod logging;
pub mod plan;

// Re-export commonly used items
pub use async_result::{AsyncResult, AsyncResultHandle, CallState};
pub use config::EngineConfig;
pub use descriptor::{CallMode, FunctionDescriptor, IndirectionLookup, PointeeLookup, TypeDescriptor};
pub use errors::{FfiError, Result};
pub use event_loop::LoopStats;
pub use host::{HostBuffer, HostValue};
pub use interop::{CallVm, NativeKind, NativeValue};
pub use invoke::PendingCall;
pub use library::{Function, Library};
pub use plan::{CallPlan, PrimitiveType};

/// Engine initialization for hosts loading the shared library
///
/// Installs logging from the `[logging]` section of the engine config
/// (`FASTCALL_CONFIG` file plus `FASTCALL_*` overrides); safe to call more
/// than once.
#[no_mangle]
pub extern "C" fn fastcall_init() {
    match EngineConfig::load() {
        Ok(config) => logging::init_with_config(config.log_config()),
        Err(err) => {
            logging::init();
            logging::warn!(%err, "engine config rejected, logging from environment only");
        }
    }
}
