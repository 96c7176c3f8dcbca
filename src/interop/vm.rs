//! Calling-convention machine
//!
//! Accumulates typed argument pushes, then performs the native call through
//! libffi. One instance per execution context: the library's synchronous VM
//! and the background loop's VM never share state.
//!
//! The libffi call interface is per signature, not per call: `CallSignature`
//! is prepared once when a call plan is built and only read afterwards.

use super::types::{ArgSlot, NativeKind, NativeValue};
use libffi::middle::{Cif, CodePtr, Type};
use smallvec::SmallVec;
use std::ffi::c_void;
use std::fmt;

/// Prepared libffi call interface for one function signature
pub struct CallSignature {
    cif: Cif,
    args: SmallVec<[NativeKind; 8]>,
    ret: Option<NativeKind>,
}

// SAFETY: the prepared `Cif` and its type arrays are never mutated after
// `new`; `ffi_call` only reads them.
unsafe impl Send for CallSignature {}
unsafe impl Sync for CallSignature {}

impl CallSignature {
    /// Prepare the interface; `ret` is `None` for a void function
    pub fn new(args: impl IntoIterator<Item = NativeKind>, ret: Option<NativeKind>) -> Self {
        let args: SmallVec<[NativeKind; 8]> = args.into_iter().collect();
        let cif = Cif::new(
            args.iter().map(|k| k.ffi_type()),
            ret.map_or_else(Type::void, NativeKind::ffi_type),
        );
        Self { cif, args, ret }
    }

    pub fn args(&self) -> &[NativeKind] {
        &self.args
    }

    #[inline]
    pub fn ret(&self) -> Option<NativeKind> {
        self.ret
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Debug for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSignature")
            .field("args", &self.args)
            .field("ret", &self.ret)
            .finish()
    }
}

/// Stateful native call resource
#[derive(Debug)]
pub struct CallVm {
    kinds: SmallVec<[NativeKind; 8]>,
    slots: SmallVec<[ArgSlot; 8]>,
    calls: u64,
}

impl CallVm {
    /// Create a VM with room for `capacity` arguments before reallocating
    pub fn new(capacity: usize) -> Self {
        Self {
            kinds: SmallVec::with_capacity(capacity),
            slots: SmallVec::with_capacity(capacity),
            calls: 0,
        }
    }

    /// Clear the argument state
    #[inline]
    pub fn reset(&mut self) {
        self.kinds.clear();
        self.slots.clear();
    }

    /// Append one argument
    #[inline]
    pub fn push(&mut self, value: NativeValue) {
        self.kinds.push(value.kind());
        self.slots.push(value.to_slot());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Kinds pushed since the last reset
    pub fn arg_kinds(&self) -> &[NativeKind] {
        &self.kinds
    }

    /// Native calls performed over the VM's lifetime
    pub fn calls_made(&self) -> u64 {
        self.calls
    }

    /// Call `entry` with the pushed arguments through `sig`
    ///
    /// # Safety
    /// `entry` must be the address of a C-ABI function matching `sig`, and the
    /// kinds pushed since the last reset must be exactly `sig.args()`.
    pub unsafe fn call(&mut self, sig: &CallSignature, entry: usize) -> Option<NativeValue> {
        debug_assert_eq!(self.kinds.as_slice(), sig.args());
        let code = CodePtr::from_ptr(entry as *const c_void);

        let mut arg_ptrs: SmallVec<[*mut c_void; 8]> = self
            .slots
            .iter_mut()
            .map(|slot| slot as *mut ArgSlot as *mut c_void)
            .collect();

        // Large enough for any scalar, including integers widened to ffi_arg
        let mut ret_buf = [0u64; 2];

        libffi::raw::ffi_call(
            sig.cif.as_raw_ptr(),
            Some(*code.as_fun()),
            ret_buf.as_mut_ptr() as *mut c_void,
            arg_ptrs.as_mut_ptr(),
        );
        self.calls += 1;

        sig.ret.map(|kind| decode_return(kind, &ret_buf))
    }
}

impl Default for CallVm {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Integral results narrower than a register come back widened to `ffi_arg`
fn decode_return(kind: NativeKind, buf: &[u64; 2]) -> NativeValue {
    // SAFETY: buf is 16 bytes, 8-aligned; ffi_arg is at most 8 bytes
    let word = unsafe { std::ptr::read(buf.as_ptr() as *const libffi::raw::ffi_arg) };
    match kind {
        NativeKind::I8 => NativeValue::I8(word as i8),
        NativeKind::U8 => NativeValue::U8(word as u8),
        NativeKind::I16 => NativeValue::I16(word as i16),
        NativeKind::U16 => NativeValue::U16(word as u16),
        NativeKind::I32 => NativeValue::I32(word as i32),
        NativeKind::U32 => NativeValue::U32(word as u32),
        // SAFETY: buf holds at least 8 bytes
        _ => unsafe { NativeValue::read_from(kind, buf.as_ptr() as *const u8) },
    }
}
