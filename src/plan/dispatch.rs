//! Type dispatch table
//!
//! Type names are resolved once, at plan construction, into `PrimitiveType`.
//! `DISPATCH` is indexed by that enum; nothing matches names per call.

use crate::host::HostValue;
use crate::interop::{NativeKind, NativeValue};
use std::ffi::{c_char, c_long, c_ulong};

/// Closed vocabulary of value types accepted at indirection 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimitiveType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Char,
    Byte,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Bool,
    SizeT,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 23] = [
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float,
        Self::Double,
        Self::Char,
        Self::Byte,
        Self::UChar,
        Self::Short,
        Self::UShort,
        Self::Int,
        Self::UInt,
        Self::Long,
        Self::ULong,
        Self::LongLong,
        Self::ULongLong,
        Self::Bool,
        Self::SizeT,
    ];

    /// Exact-match lookup; `void` is not a primitive
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "int8" => Self::Int8,
            "uint8" => Self::UInt8,
            "int16" => Self::Int16,
            "uint16" => Self::UInt16,
            "int32" => Self::Int32,
            "uint32" => Self::UInt32,
            "int64" => Self::Int64,
            "uint64" => Self::UInt64,
            "float" => Self::Float,
            "double" => Self::Double,
            "char" => Self::Char,
            "byte" => Self::Byte,
            "uchar" => Self::UChar,
            "short" => Self::Short,
            "ushort" => Self::UShort,
            "int" => Self::Int,
            "uint" => Self::UInt,
            "long" => Self::Long,
            "ulong" => Self::ULong,
            "longlong" => Self::LongLong,
            "ulonglong" => Self::ULongLong,
            "bool" => Self::Bool,
            "size_t" => Self::SizeT,
            _ => return None,
        })
    }

    #[inline]
    pub fn entry(self) -> &'static DispatchEntry {
        &DISPATCH[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.entry().name
    }

    #[inline]
    pub fn native(self) -> NativeKind {
        self.entry().native
    }

    /// Host to native, using the runtime's standard coercion for this type
    #[inline]
    pub fn coerce(self, value: &HostValue) -> NativeValue {
        (self.entry().coerce)(value)
    }

    /// Native to host
    #[inline]
    pub fn decode(self, value: NativeValue) -> HostValue {
        (self.entry().decode)(value)
    }
}

/// One row of the dispatch table
pub struct DispatchEntry {
    pub name: &'static str,
    pub native: NativeKind,
    pub coerce: fn(&HostValue) -> NativeValue,
    pub decode: fn(NativeValue) -> HostValue,
}

impl std::fmt::Debug for DispatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("name", &self.name)
            .field("native", &self.native)
            .finish()
    }
}

macro_rules! row {
    ($name:literal, $native:expr, $coerce:path) => {
        DispatchEntry {
            name: $name,
            native: $native,
            coerce: $coerce,
            decode: decode_number,
        }
    };
}

/// Indexed by `PrimitiveType as usize`
pub static DISPATCH: [DispatchEntry; 23] = [
    row!("int8", NativeKind::I8, coerce_i8),
    row!("uint8", NativeKind::U8, coerce_u8),
    row!("int16", NativeKind::I16, coerce_i16),
    row!("uint16", NativeKind::U16, coerce_u16),
    row!("int32", NativeKind::I32, coerce_i32),
    row!("uint32", NativeKind::U32, coerce_u32),
    row!("int64", NativeKind::I64, coerce_i64),
    row!("uint64", NativeKind::U64, coerce_u64),
    row!("float", NativeKind::F32, coerce_f32),
    row!("double", NativeKind::F64, coerce_f64),
    row!("char", NativeKind::c_char(), coerce_char),
    row!("byte", NativeKind::U8, coerce_u8),
    row!("uchar", NativeKind::U8, coerce_uchar),
    row!("short", NativeKind::I16, coerce_i16),
    row!("ushort", NativeKind::U16, coerce_u16),
    row!("int", NativeKind::I32, coerce_i32),
    row!("uint", NativeKind::U32, coerce_u32),
    row!("long", NativeKind::c_long(), coerce_long),
    row!("ulong", NativeKind::c_ulong(), coerce_ulong),
    row!("longlong", NativeKind::I64, coerce_i64),
    row!("ulonglong", NativeKind::U64, coerce_u64),
    DispatchEntry {
        name: "bool",
        native: NativeKind::U8,
        coerce: coerce_bool,
        decode: decode_bool,
    },
    row!("size_t", NativeKind::size_t(), coerce_size_t),
];

// ----- coercions -----

fn coerce_i8(v: &HostValue) -> NativeValue {
    NativeValue::I8(v.to_int32() as i8)
}

fn coerce_u8(v: &HostValue) -> NativeValue {
    NativeValue::U8(v.to_uint32() as u8)
}

fn coerce_i16(v: &HostValue) -> NativeValue {
    NativeValue::I16(v.to_int32() as i16)
}

fn coerce_u16(v: &HostValue) -> NativeValue {
    NativeValue::U16(v.to_uint32() as u16)
}

fn coerce_i32(v: &HostValue) -> NativeValue {
    NativeValue::I32(v.to_int32())
}

fn coerce_u32(v: &HostValue) -> NativeValue {
    NativeValue::U32(v.to_uint32())
}

// 64-bit kinds go through the double channel; `as` saturates out-of-range values
fn coerce_i64(v: &HostValue) -> NativeValue {
    NativeValue::I64(v.to_number() as i64)
}

fn coerce_u64(v: &HostValue) -> NativeValue {
    NativeValue::U64(v.to_number() as u64)
}

fn coerce_f32(v: &HostValue) -> NativeValue {
    NativeValue::F32(v.to_number() as f32)
}

fn coerce_f64(v: &HostValue) -> NativeValue {
    NativeValue::F64(v.to_number())
}

fn coerce_char(v: &HostValue) -> NativeValue {
    let c = v.to_int32() as i16 as c_char;
    match NativeKind::c_char() {
        NativeKind::U8 => NativeValue::U8(c as u8),
        _ => NativeValue::I8(c as i8),
    }
}

fn coerce_uchar(v: &HostValue) -> NativeValue {
    NativeValue::U8(v.to_uint32() as u16 as u8)
}

fn coerce_long(v: &HostValue) -> NativeValue {
    let n = v.to_number() as i64 as c_long;
    match NativeKind::c_long() {
        NativeKind::I64 => NativeValue::I64(n as i64),
        _ => NativeValue::I32(n as i32),
    }
}

fn coerce_ulong(v: &HostValue) -> NativeValue {
    let n = v.to_number() as u64 as c_ulong;
    match NativeKind::c_ulong() {
        NativeKind::U64 => NativeValue::U64(n as u64),
        _ => NativeValue::U32(n as u32),
    }
}

fn coerce_size_t(v: &HostValue) -> NativeValue {
    let n = v.to_number() as u64 as usize;
    match NativeKind::size_t() {
        NativeKind::U64 => NativeValue::U64(n as u64),
        _ => NativeValue::U32(n as u32),
    }
}

fn coerce_bool(v: &HostValue) -> NativeValue {
    NativeValue::U8(u8::from(v.to_boolean()))
}

// ----- decoders -----

fn decode_number(v: NativeValue) -> HostValue {
    HostValue::Number(v.as_f64())
}

fn decode_bool(v: NativeValue) -> HostValue {
    HostValue::Bool(v.as_f64() != 0.0)
}
