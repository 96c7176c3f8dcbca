//! Native value representations
//!
//! `NativeKind` is the closed set of slot kinds the call VM understands; every
//! C spelling in the dispatch table lowers to one of them.

use libffi::middle::Type;
use std::ffi::{c_char, c_long, c_ulong};
use std::mem;

/// Native argument/result slot kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NativeKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl NativeKind {
    /// Get size of type in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Pointer => mem::size_of::<usize>(),
        }
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Pointer => "pointer",
        }
    }

    /// Kind of the platform's `char`
    pub const fn c_char() -> Self {
        if c_char::MIN == 0 {
            Self::U8
        } else {
            Self::I8
        }
    }

    /// Kind of the platform's `long`
    pub const fn c_long() -> Self {
        if mem::size_of::<c_long>() == 8 {
            Self::I64
        } else {
            Self::I32
        }
    }

    /// Kind of the platform's `unsigned long`
    pub const fn c_ulong() -> Self {
        if mem::size_of::<c_ulong>() == 8 {
            Self::U64
        } else {
            Self::U32
        }
    }

    /// Kind of `size_t`
    pub const fn size_t() -> Self {
        if mem::size_of::<usize>() == 8 {
            Self::U64
        } else {
            Self::U32
        }
    }

    /// libffi type descriptor for this kind
    pub fn ffi_type(self) -> Type {
        match self {
            Self::I8 => Type::i8(),
            Self::U8 => Type::u8(),
            Self::I16 => Type::i16(),
            Self::U16 => Type::u16(),
            Self::I32 => Type::i32(),
            Self::U32 => Type::u32(),
            Self::I64 => Type::i64(),
            Self::U64 => Type::u64(),
            Self::F32 => Type::f32(),
            Self::F64 => Type::f64(),
            Self::Pointer => Type::pointer(),
        }
    }
}

/// A typed native value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Pointer(usize),
}

impl NativeValue {
    #[inline]
    pub const fn kind(self) -> NativeKind {
        match self {
            Self::I8(_) => NativeKind::I8,
            Self::U8(_) => NativeKind::U8,
            Self::I16(_) => NativeKind::I16,
            Self::U16(_) => NativeKind::U16,
            Self::I32(_) => NativeKind::I32,
            Self::U32(_) => NativeKind::U32,
            Self::I64(_) => NativeKind::I64,
            Self::U64(_) => NativeKind::U64,
            Self::F32(_) => NativeKind::F32,
            Self::F64(_) => NativeKind::F64,
            Self::Pointer(_) => NativeKind::Pointer,
        }
    }

    /// Numeric view through the double channel
    ///
    /// 64-bit integers above 2^53 lose precision here.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::I8(v) => f64::from(v),
            Self::U8(v) => f64::from(v),
            Self::I16(v) => f64::from(v),
            Self::U16(v) => f64::from(v),
            Self::I32(v) => f64::from(v),
            Self::U32(v) => f64::from(v),
            Self::I64(v) => v as f64,
            Self::U64(v) => v as f64,
            Self::F32(v) => f64::from(v),
            Self::F64(v) => v,
            Self::Pointer(v) => v as f64,
        }
    }

    /// Address carried by a pointer value
    pub fn as_address(self) -> Option<usize> {
        match self {
            Self::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Argument slot holding this value
    #[inline]
    pub fn to_slot(self) -> ArgSlot {
        match self {
            Self::I8(v) => ArgSlot { i8: v },
            Self::U8(v) => ArgSlot { u8: v },
            Self::I16(v) => ArgSlot { i16: v },
            Self::U16(v) => ArgSlot { u16: v },
            Self::I32(v) => ArgSlot { i32: v },
            Self::U32(v) => ArgSlot { u32: v },
            Self::I64(v) => ArgSlot { i64: v },
            Self::U64(v) => ArgSlot { u64: v },
            Self::F32(v) => ArgSlot { f32: v },
            Self::F64(v) => ArgSlot { f64: v },
            Self::Pointer(v) => ArgSlot { ptr: v },
        }
    }

    /// Read a value of `kind` from raw memory
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `kind.size()` bytes.
    pub unsafe fn read_from(kind: NativeKind, ptr: *const u8) -> Self {
        use std::ptr::read_unaligned as rd;
        match kind {
            NativeKind::I8 => Self::I8(rd(ptr as *const i8)),
            NativeKind::U8 => Self::U8(rd(ptr)),
            NativeKind::I16 => Self::I16(rd(ptr as *const i16)),
            NativeKind::U16 => Self::U16(rd(ptr as *const u16)),
            NativeKind::I32 => Self::I32(rd(ptr as *const i32)),
            NativeKind::U32 => Self::U32(rd(ptr as *const u32)),
            NativeKind::I64 => Self::I64(rd(ptr as *const i64)),
            NativeKind::U64 => Self::U64(rd(ptr as *const u64)),
            NativeKind::F32 => Self::F32(rd(ptr as *const f32)),
            NativeKind::F64 => Self::F64(rd(ptr as *const f64)),
            NativeKind::Pointer => Self::Pointer(rd(ptr as *const usize)),
        }
    }

    /// Write this value to raw memory
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `self.kind().size()` bytes.
    pub unsafe fn write_to(self, ptr: *mut u8) {
        use std::ptr::write_unaligned as wr;
        match self {
            Self::I8(v) => wr(ptr as *mut i8, v),
            Self::U8(v) => wr(ptr, v),
            Self::I16(v) => wr(ptr as *mut i16, v),
            Self::U16(v) => wr(ptr as *mut u16, v),
            Self::I32(v) => wr(ptr as *mut i32, v),
            Self::U32(v) => wr(ptr as *mut u32, v),
            Self::I64(v) => wr(ptr as *mut i64, v),
            Self::U64(v) => wr(ptr as *mut u64, v),
            Self::F32(v) => wr(ptr as *mut f32, v),
            Self::F64(v) => wr(ptr as *mut f64, v),
            Self::Pointer(v) => wr(ptr as *mut usize, v),
        }
    }
}

/// Argument storage handed to libffi (untagged union)
///
/// Every field starts at offset 0, so a pointer to the slot is a pointer to
/// whichever value was stored.
#[repr(C)]
pub union ArgSlot {
    pub i8: i8,
    pub u8: u8,
    pub i16: i16,
    pub u16: u16,
    pub i32: i32,
    pub u32: u32,
    pub i64: i64,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    pub ptr: usize,
}

impl ArgSlot {
    #[inline]
    pub const fn zeroed() -> Self {
        Self { u64: 0 }
    }
}

impl Default for ArgSlot {
    #[inline]
    fn default() -> Self {
        Self::zeroed()
    }
}

// Manual implementations for Copy, Clone, and Debug since union doesn't auto-derive
impl Copy for ArgSlot {}
impl Clone for ArgSlot {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl std::fmt::Debug for ArgSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArgSlot {{ ... }}")
    }
}
