//! Interoperability - native values and the calling-convention machine
//!
//! Architecture:
//! - `types.rs` - slot kinds, typed native values, argument slot union
//! - `vm.rs` - `CallVm`, the libffi-backed calling-convention machine, and
//!   `CallSignature`, its prepared per-signature interface

mod types;
mod vm;

pub use types::{ArgSlot, NativeKind, NativeValue};
pub use vm::{CallSignature, CallVm};
