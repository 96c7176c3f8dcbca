//! Argument marshalers
//!
//! Capture is split from execution. `capture` turns the call-time host value
//! into either an immediate native value or a deferred read from an async
//! result's buffer; `CapturedArg::resolve` produces the value to push. The sync
//! path resolves straight away, the async path on the loop thread.

use super::dispatch::PrimitiveType;
use crate::errors::{FfiError, Result};
use crate::host::{HostBuffer, HostValue};
use crate::interop::{CallVm, NativeKind, NativeValue};

/// What a marshaler converts into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalKind {
    Primitive(PrimitiveType),
    /// Opaque pointer (indirection > 1)
    Pointer,
}

/// Converts the argument at one position
#[derive(Debug, Clone)]
pub struct ArgMarshaler {
    index: usize,
    kind: MarshalKind,
}

/// An argument captured at invocation time
#[derive(Debug, Clone)]
pub enum CapturedArg {
    Value(NativeValue),
    /// Dereference an async result's buffer when the call executes
    Deferred {
        index: usize,
        buffer: HostBuffer,
        kind: NativeKind,
    },
}

impl ArgMarshaler {
    pub fn primitive(index: usize, ty: PrimitiveType) -> Self {
        Self {
            index,
            kind: MarshalKind::Primitive(ty),
        }
    }

    pub fn pointer(index: usize) -> Self {
        Self {
            index,
            kind: MarshalKind::Pointer,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn kind(&self) -> MarshalKind {
        self.kind
    }

    /// Native slot kind this marshaler pushes
    pub fn native(&self) -> NativeKind {
        match self.kind {
            MarshalKind::Primitive(ty) => ty.native(),
            MarshalKind::Pointer => NativeKind::Pointer,
        }
    }

    /// Capture the host value at this position
    pub fn capture(&self, value: &HostValue) -> Result<CapturedArg> {
        let native = self.native();

        // Chaining: a handle holding our element kind is read, not coerced
        if let Some(handle) = value.as_async_result() {
            return match handle.element() {
                Some(kind) if kind == native => Ok(CapturedArg::Deferred {
                    index: self.index,
                    buffer: handle.buffer().clone(),
                    kind,
                }),
                found => Err(FfiError::AsyncResultMismatch {
                    index: self.index,
                    expected: native.name().to_string(),
                    found: found.map_or("void", NativeKind::name).to_string(),
                }),
            };
        }

        match self.kind {
            MarshalKind::Primitive(ty) => Ok(CapturedArg::Value(ty.coerce(value))),
            MarshalKind::Pointer => match value {
                HostValue::Buffer(buffer) => Ok(CapturedArg::Value(NativeValue::Pointer(buffer.address()))),
                HostValue::Null | HostValue::Undefined => Ok(CapturedArg::Value(NativeValue::Pointer(0))),
                _ => Err(FfiError::NotAPointer { index: self.index }),
            },
        }
    }

    /// Capture, resolve and push in one step
    pub fn marshal(&self, vm: &mut CallVm, value: &HostValue) -> Result<()> {
        let value = self.capture(value)?.resolve()?;
        vm.push(value);
        Ok(())
    }
}

impl CapturedArg {
    /// Value to push
    pub fn resolve(&self) -> Result<NativeValue> {
        match self {
            Self::Value(v) => Ok(*v),
            Self::Deferred { index, buffer, kind } => buffer.read_native(*kind).ok_or_else(|| {
                FfiError::InvalidAsyncResult(format!(
                    "argument {}: buffer at {:#x} cannot hold {}",
                    index,
                    buffer.address(),
                    kind.name()
                ))
            }),
        }
    }

    #[inline]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}
