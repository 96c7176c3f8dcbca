//! Native functions and helpers shared by the integration tests

#![allow(dead_code)]

use fastcall::{CallMode, EngineConfig, Function, HostValue, Library};
use std::ffi::{c_char, c_int, c_long, c_longlong, c_short, c_uint, c_ulong, c_ulonglong, c_ushort, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

macro_rules! identity {
    ($($name:ident: $t:ty),* $(,)?) => {
        $(
            pub extern "C" fn $name(v: $t) -> $t {
                v
            }
        )*
    };
}

identity!(
    id_int8: i8,
    id_uint8: u8,
    id_int16: i16,
    id_uint16: u16,
    id_int32: i32,
    id_uint32: u32,
    id_int64: i64,
    id_uint64: u64,
    id_float: f32,
    id_double: f64,
    id_char: c_char,
    id_byte: u8,
    id_uchar: u8,
    id_short: c_short,
    id_ushort: c_ushort,
    id_int: c_int,
    id_uint: c_uint,
    id_long: c_long,
    id_ulong: c_ulong,
    id_longlong: c_longlong,
    id_ulonglong: c_ulonglong,
    id_bool: bool,
    id_size_t: usize,
);

/// (type name, identity entry point, sample values within range)
pub fn identity_table() -> Vec<(&'static str, usize, Vec<HostValue>)> {
    let n = |values: &[f64]| values.iter().map(|v| HostValue::Number(*v)).collect::<Vec<_>>();
    vec![
        ("int8", id_int8 as usize, n(&[-128.0, 0.0, 127.0])),
        ("uint8", id_uint8 as usize, n(&[0.0, 255.0])),
        ("int16", id_int16 as usize, n(&[-32768.0, 32767.0])),
        ("uint16", id_uint16 as usize, n(&[0.0, 65535.0])),
        ("int32", id_int32 as usize, n(&[i32::MIN as f64, -1.0, i32::MAX as f64])),
        ("uint32", id_uint32 as usize, n(&[0.0, u32::MAX as f64])),
        ("int64", id_int64 as usize, n(&[-9_007_199_254_740_992.0, 0.0, 9_007_199_254_740_992.0])),
        ("uint64", id_uint64 as usize, n(&[0.0, 9_007_199_254_740_992.0])),
        ("float", id_float as usize, n(&[1.5, -0.25, 0.0])),
        ("double", id_double as usize, n(&[1e300, -3.25, f64::MIN_POSITIVE])),
        ("char", id_char as usize, n(&[0.0, 65.0, 127.0])),
        ("byte", id_byte as usize, n(&[0.0, 255.0])),
        ("uchar", id_uchar as usize, n(&[200.0, 255.0])),
        ("short", id_short as usize, n(&[-300.0, 32767.0])),
        ("ushort", id_ushort as usize, n(&[60000.0])),
        ("int", id_int as usize, n(&[-7.0, 2_000_000_000.0])),
        ("uint", id_uint as usize, n(&[4_000_000_000.0])),
        ("long", id_long as usize, n(&[-2_147_483_648.0, 2_147_483_647.0])),
        ("ulong", id_ulong as usize, n(&[4_294_967_295.0])),
        ("longlong", id_longlong as usize, n(&[-9_007_199_254_740_992.0])),
        ("ulonglong", id_ulonglong as usize, n(&[9_007_199_254_740_992.0])),
        ("bool", id_bool as usize, vec![HostValue::Bool(true), HostValue::Bool(false)]),
        ("size_t", id_size_t as usize, n(&[4_294_967_295.0, 0.0])),
    ]
}

pub extern "C" fn add(a: i32, b: i32) -> i32 {
    a + b
}

pub extern "C" fn add_ten(x: f64) -> f64 {
    x + 10.0
}

/// Writes `a + b` through `out`, returns whether `out` was non-null
pub extern "C" fn sum_into(a: i32, b: i32, out: *mut i32) -> bool {
    if out.is_null() {
        return false;
    }
    unsafe { *out = a + b };
    true
}

pub static ANSWER: i32 = 42;

pub extern "C" fn answer_ptr() -> *const i32 {
    &ANSWER
}

pub extern "C" fn ptr_to_size(p: *const c_void) -> usize {
    p as usize
}

pub extern "C" fn read_int(p: *const i32) -> i32 {
    unsafe { *p }
}

pub extern "C" fn noop() {}

/// Concurrency probe: tracks how many calls overlap
pub struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Probe {
    pub const fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_micros(200));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn library(name: &str) -> Library {
    Library::new(name)
}

/// Library whose `declare` produces asynchronous functions
pub fn async_library(name: &str) -> Library {
    let mut config = EngineConfig::default();
    config.library.default_call_mode = CallMode::Async;
    Library::with_config(name, config)
}

pub fn num(v: f64) -> HostValue {
    HostValue::Number(v)
}

pub fn declare(lib: &Library, name: &str, entry: usize, result: &str, args: &[&str]) -> Function {
    lib.declare(name, entry, result, args)
        .unwrap_or_else(|e| panic!("declare {name}: {e}"))
}

/// Returns 42 after a delay long enough to still be running when a
/// consumer is issued
pub extern "C" fn slow_answer() -> c_int {
    std::thread::sleep(Duration::from_millis(200));
    42
}
