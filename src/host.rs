//! Host boundary: values crossing between the managed runtime and the engine
//!
//! `HostValue` is a closed sum type, so identifying an async result handle is
//! a match on the discriminant, never a downcast. Coercions follow the
//! runtime's standard ToNumber / ToInt32 / ToUint32 / ToBoolean rules.

use crate::async_result::AsyncResultHandle;
use crate::descriptor::TypeDescriptor;
use crate::interop::{NativeKind, NativeValue};
use crate::library::Function;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem;
use std::sync::Arc;

const TWO_POW_32: f64 = 4_294_967_296.0;
const TWO_POW_31: f64 = 2_147_483_648.0;

/// A value owned by the managed runtime
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Buffer(HostBuffer),
    Function(Function),
    AsyncResult(AsyncResultHandle),
}

impl HostValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Buffer(_) => "buffer",
            Self::Function(_) => "function",
            Self::AsyncResult(_) => "async result",
        }
    }

    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// ToNumber
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Buffer(_) | Self::Function(_) | Self::AsyncResult(_) => f64::NAN,
        }
    }

    /// ToInt32: modulo 2^32 into the signed range, non-finite values are 0
    pub fn to_int32(&self) -> i32 {
        let m = modulo_two_pow_32(self.to_number());
        if m >= TWO_POW_31 {
            (m - TWO_POW_32) as i32
        } else {
            m as i32
        }
    }

    /// ToUint32: modulo 2^32, non-finite values are 0
    pub fn to_uint32(&self) -> u32 {
        modulo_two_pow_32(self.to_number()) as u32
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Buffer(_) | Self::Function(_) | Self::AsyncResult(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&HostBuffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Identity probe for async result handles
    pub fn as_async_result(&self) -> Option<&AsyncResultHandle> {
        match self {
            Self::AsyncResult(h) => Some(h),
            _ => None,
        }
    }
}

fn modulo_two_pow_32(n: f64) -> f64 {
    if !n.is_finite() {
        return 0.0;
    }
    n.trunc().rem_euclid(TWO_POW_32)
}

fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    let (digits, radix) = match t.get(..2) {
        Some("0x") | Some("0X") => (&t[2..], 16),
        Some("0o") | Some("0O") => (&t[2..], 8),
        Some("0b") | Some("0B") => (&t[2..], 2),
        _ => {
            return match t {
                "Infinity" | "+Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                _ if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
                _ => t.parse().unwrap_or(f64::NAN),
            }
        }
    };
    u64::from_str_radix(digits, radix).map_or(f64::NAN, |v| v as f64)
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "Undefined"),
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Number(n) => write!(f, "Number({})", n),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::Buffer(b) => write!(f, "{:?}", b),
            Self::Function(func) => write!(f, "Function({})", func.name()),
            Self::AsyncResult(h) => write!(f, "{:?}", h),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a.address() == b.address(),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::AsyncResult(a), Self::AsyncResult(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for HostValue {
                #[inline]
                fn from(v: $t) -> Self {
                    Self::Number(v as f64)
                }
            }
        )*
    };
}

// 64-bit integers enter through the double channel and round above 2^53
impl_from_number!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64);

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<HostBuffer> for HostValue {
    fn from(v: HostBuffer) -> Self {
        Self::Buffer(v)
    }
}

impl From<Function> for HostValue {
    fn from(v: Function) -> Self {
        Self::Function(v)
    }
}

impl From<AsyncResultHandle> for HostValue {
    fn from(v: AsyncResultHandle) -> Self {
        Self::AsyncResult(v)
    }
}

// ============================================================================
// Buffers
// ============================================================================

/// Zeroed, 8-byte aligned backing store shared by buffer clones
struct BufferStorage(Box<[UnsafeCell<u64>]>);

// SAFETY: the storage is plain bytes; callers serialize access through the
// call queue or their own synchronization, the same contract native memory has.
unsafe impl Send for BufferStorage {}
unsafe impl Sync for BufferStorage {}

/// Buffer-like host value over a native address
///
/// Either owns zeroed storage (`alloc`), wraps a native address without
/// owning it (`from_raw`), or is null. May carry the type it points to.
#[derive(Clone)]
pub struct HostBuffer {
    addr: usize,
    len: usize,
    storage: Option<Arc<BufferStorage>>,
    pointee: Option<TypeDescriptor>,
}

impl HostBuffer {
    /// Allocate `len` zeroed bytes
    pub fn alloc(len: usize) -> Self {
        let words = len.div_ceil(mem::size_of::<u64>()).max(1);
        let storage: Box<[UnsafeCell<u64>]> = (0..words).map(|_| UnsafeCell::new(0)).collect();
        let addr = storage.as_ptr() as usize;
        Self {
            addr,
            len,
            storage: Some(Arc::new(BufferStorage(storage))),
            pointee: None,
        }
    }

    /// Storage large enough for one value of `kind`
    pub fn for_kind(kind: NativeKind) -> Self {
        Self::alloc(kind.size())
    }

    /// Wrap a native address without taking ownership
    ///
    /// # Safety
    /// `addr` must stay valid for `len` bytes for as long as this buffer or any
    /// of its clones is read or written.
    pub unsafe fn from_raw(addr: usize, len: usize) -> Self {
        Self {
            addr,
            len: if addr == 0 { 0 } else { len },
            storage: None,
            pointee: None,
        }
    }

    /// The null pointer
    pub const fn null() -> Self {
        Self {
            addr: 0,
            len: 0,
            storage: None,
            pointee: None,
        }
    }

    /// Annotate with the dereferenced type
    pub fn with_pointee(mut self, pointee: TypeDescriptor) -> Self {
        self.pointee = Some(pointee);
        self
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.addr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        self.storage.is_some()
    }

    pub fn pointee(&self) -> Option<&TypeDescriptor> {
        self.pointee.as_ref()
    }

    /// Read a `T` from the start of the buffer
    pub fn read<T: Copy>(&self) -> Option<T> {
        if self.is_null() || mem::size_of::<T>() > self.len {
            return None;
        }
        // SAFETY: non-null and at least size_of::<T>() bytes long
        Some(unsafe { std::ptr::read_unaligned(self.addr as *const T) })
    }

    /// Write a `T` to the start of the buffer, false if it does not fit
    pub fn write<T: Copy>(&self, value: T) -> bool {
        if self.is_null() || mem::size_of::<T>() > self.len {
            return false;
        }
        // SAFETY: non-null and at least size_of::<T>() bytes long
        unsafe { std::ptr::write_unaligned(self.addr as *mut T, value) };
        true
    }

    /// Read a native value of the given kind
    pub fn read_native(&self, kind: NativeKind) -> Option<NativeValue> {
        if self.is_null() || kind.size() > self.len {
            return None;
        }
        // SAFETY: bounds checked above
        Some(unsafe { NativeValue::read_from(kind, self.addr as *const u8) })
    }

    /// Store a native value, false if it does not fit
    pub fn write_native(&self, value: NativeValue) -> bool {
        if self.is_null() || value.kind().size() > self.len {
            return false;
        }
        // SAFETY: bounds checked above
        unsafe { value.write_to(self.addr as *mut u8) };
        true
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("len", &self.len)
            .field("owned", &self.is_owned())
            .field("pointee", &self.pointee)
            .finish()
    }
}
