//! Call plans - per-signature marshal/decode sequences
//!
//! Design: a plan is built once per function from its descriptor and shared
//! (`Arc<CallPlan>`) by every invocation, sync or async. It carries no per-call
//! state; the libffi call interface is prepared here, once. Construction fails fast: an unknown type or a bad indirection level
//! rejects the whole plan before any native call or lock.
//!
//! Architecture:
//! - `dispatch.rs` - closed primitive vocabulary and its dispatch table
//! - `marshal.rs` - argument capture (coercion or handle dereference)
//! - `decode.rs` - result decoding

mod decode;
mod dispatch;
mod marshal;

pub use decode::ResultDecoder;
pub use dispatch::{DispatchEntry, PrimitiveType, DISPATCH};
pub use marshal::{ArgMarshaler, CapturedArg, MarshalKind};

use crate::descriptor::{FunctionDescriptor, PointeeLookup, TypeDescriptor};
use crate::errors::{FfiError, Result};
use crate::host::HostValue;
use crate::interop::{CallSignature, CallVm, NativeKind};
use smallvec::SmallVec;
use std::sync::Arc;

/// Captured arguments for one invocation
pub type CapturedArgs = SmallVec<[CapturedArg; 8]>;

/// Precompiled marshal/decode sequence for one function
#[derive(Debug, Clone)]
pub struct CallPlan {
    function: String,
    entry: usize,
    args: Vec<ArgMarshaler>,
    result: ResultDecoder,
    signature: Arc<CallSignature>,
}

impl CallPlan {
    /// Build the plan for `desc`
    ///
    /// The pointee lookup runs once here, for pointer results only.
    pub fn build(desc: &FunctionDescriptor, lookup: &dyn PointeeLookup) -> Result<Self> {
        let args = desc
            .args
            .iter()
            .enumerate()
            .map(|(index, ty)| arg_marshaler(index, ty))
            .collect::<Result<Vec<_>>>()?;
        let result = result_decoder(&desc.result, lookup)?;
        let signature = CallSignature::new(args.iter().map(ArgMarshaler::native), result.native());

        Ok(Self {
            function: desc.name.clone(),
            entry: desc.entry,
            args,
            result,
            signature: Arc::new(signature),
        })
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    #[inline]
    pub fn entry(&self) -> usize {
        self.entry
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn args(&self) -> &[ArgMarshaler] {
        &self.args
    }

    pub fn result(&self) -> &ResultDecoder {
        &self.result
    }

    /// Prepared call interface shared by every invocation
    pub fn signature(&self) -> &CallSignature {
        &self.signature
    }

    /// Native kinds of the arguments, in order
    pub fn arg_kinds(&self) -> impl Iterator<Item = NativeKind> + '_ {
        self.args.iter().map(ArgMarshaler::native)
    }

    pub fn check_arity(&self, args: &[HostValue]) -> Result<()> {
        if args.len() != self.args.len() {
            return Err(FfiError::ArgumentCount {
                expected: self.args.len(),
                got: args.len(),
            });
        }
        Ok(())
    }

    /// Capture every argument for later execution
    pub fn capture(&self, args: &[HostValue]) -> Result<CapturedArgs> {
        self.check_arity(args)?;
        self.args
            .iter()
            .zip(args)
            .map(|(marshaler, value)| marshaler.capture(value))
            .collect()
    }

    /// Reset `vm` and push every argument in declared order
    pub fn marshal(&self, vm: &mut CallVm, args: &[HostValue]) -> Result<()> {
        self.check_arity(args)?;
        vm.reset();
        for (marshaler, value) in self.args.iter().zip(args) {
            marshaler.marshal(vm, value)?;
        }
        Ok(())
    }
}

fn arg_marshaler(index: usize, ty: &TypeDescriptor) -> Result<ArgMarshaler> {
    let invalid = || FfiError::InvalidArgumentType {
        index,
        name: ty.name.clone(),
        indirection: ty.indirection,
    };

    match ty.indirection {
        0 => Err(invalid()),
        1 => PrimitiveType::from_name(&ty.name)
            .map(|prim| ArgMarshaler::primitive(index, prim))
            .ok_or_else(invalid),
        _ => Ok(ArgMarshaler::pointer(index)),
    }
}

fn result_decoder(ty: &TypeDescriptor, lookup: &dyn PointeeLookup) -> Result<ResultDecoder> {
    match ty.indirection {
        0 => Err(FfiError::InvalidResultType {
            name: ty.name.clone(),
            indirection: 0,
        }),
        1 if ty.name == "void" => Ok(ResultDecoder::Void),
        1 => PrimitiveType::from_name(&ty.name)
            .map(ResultDecoder::Primitive)
            .ok_or_else(|| FfiError::InvalidResultType {
                name: ty.name.clone(),
                indirection: 1,
            }),
        _ => Ok(ResultDecoder::Pointer {
            pointee: lookup.deref_type(ty)?,
        }),
    }
}
