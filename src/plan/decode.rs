//! Result decoders

use super::dispatch::PrimitiveType;
use crate::descriptor::TypeDescriptor;
use crate::host::{HostBuffer, HostValue};
use crate::interop::{NativeKind, NativeValue};

/// Turns the raw native result into a host value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultDecoder {
    Void,
    Primitive(PrimitiveType),
    /// Pointer result, annotated with the type it points to
    Pointer { pointee: TypeDescriptor },
}

impl ResultDecoder {
    /// Native result kind, `None` for void
    pub fn native(&self) -> Option<NativeKind> {
        match self {
            Self::Void => None,
            Self::Primitive(ty) => Some(ty.native()),
            Self::Pointer { .. } => Some(NativeKind::Pointer),
        }
    }

    pub fn decode(&self, raw: Option<NativeValue>) -> HostValue {
        match (self, raw) {
            (Self::Primitive(ty), Some(value)) => ty.decode(value),
            (Self::Pointer { pointee }, Some(value)) => {
                let addr = value.as_address().unwrap_or(0);
                // SAFETY: the native function handed us this address; the
                // wrap reads at most one pointee, as the host's WrapPointer does
                let buffer = unsafe { HostBuffer::from_raw(addr, pointee_size(pointee)) };
                HostValue::Buffer(buffer.with_pointee(pointee.clone()))
            }
            _ => HostValue::Undefined,
        }
    }
}

/// Bytes readable through a returned pointer, 0 when unknown
fn pointee_size(pointee: &TypeDescriptor) -> usize {
    if pointee.is_pointer() {
        return NativeKind::Pointer.size();
    }
    PrimitiveType::from_name(&pointee.name).map_or(0, |ty| ty.native().size())
}
