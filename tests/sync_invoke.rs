//! Synchronous invocation through a library

mod common;

use common::*;
use fastcall::{FfiError, HostBuffer, HostValue};
use std::sync::Arc;

#[test]
fn test_identity_round_trip_all_types() {
    let lib = library("identity");
    for (ty, entry, samples) in identity_table() {
        let f = declare(&lib, ty, entry, ty, &[ty]);
        for sample in samples {
            let out = f.invoke(std::slice::from_ref(&sample)).unwrap();
            assert_eq!(out, sample, "round trip through {ty}");
        }
    }
}

#[test]
fn test_add() {
    let lib = library("math");
    let f = declare(&lib, "add", add as usize, "int", &["int", "int"]);
    assert_eq!(f.invoke(&[num(2.0), num(3.0)]).unwrap(), num(5.0));
    // Standard int32 coercion on the way in
    assert_eq!(f.invoke(&["40".into(), HostValue::Bool(true)]).unwrap(), num(41.0));
    assert_eq!(f.invoke(&[num(4294967297.0), num(0.0)]).unwrap(), num(1.0));
}

#[test]
fn test_narrowing_wraps() {
    let lib = library("wrap");
    let f = declare(&lib, "id_uint8", id_uint8 as usize, "uint8", &["uint8"]);
    assert_eq!(f.invoke(&[num(257.0)]).unwrap(), num(1.0));
    assert_eq!(f.invoke(&[num(-1.0)]).unwrap(), num(255.0));

    let f = declare(&lib, "id_int8", id_int8 as usize, "int8", &["int8"]);
    assert_eq!(f.invoke(&[num(200.0)]).unwrap(), num(-56.0));
}

#[test]
fn test_void_result_is_undefined() {
    let lib = library("void");
    let f = declare(&lib, "noop", noop as usize, "void", &[]);
    assert_eq!(f.invoke(&[]).unwrap(), HostValue::Undefined);
}

#[test]
fn test_unknown_type_rejected_before_any_call() {
    let lib = library("bad");
    let err = lib
        .declare("add", add as usize, "int", &["int", "quad"])
        .unwrap_err();
    assert!(matches!(err, FfiError::InvalidArgumentType { index: 1, .. }));
    assert!(err.to_string().starts_with("Invalid argument type definition at: 1"));

    let err = lib.declare("add", add as usize, "quad", &["int"]).unwrap_err();
    assert!(matches!(err, FfiError::InvalidResultType { .. }));

    // Nothing was locked or called
    assert!(lib.try_acquire_lock().is_some());
    assert_eq!(lib.acquire_lock().calls_made(), 0);
}

#[test]
fn test_argument_count_checked() {
    let lib = library("count");
    let f = declare(&lib, "add", add as usize, "int", &["int", "int"]);
    let err = f.invoke(&[num(1.0)]).unwrap_err();
    assert!(matches!(err, FfiError::ArgumentCount { expected: 2, got: 1 }));
}

#[test]
fn test_non_pointer_argument_rejected() {
    let lib = library("pointers");
    let f = declare(&lib, "sum_into", sum_into as usize, "bool", &["int", "int", "int*"]);
    let err = f.invoke(&[num(1.0), num(2.0), num(3.0)]).unwrap_err();
    assert!(matches!(err, FfiError::NotAPointer { index: 2 }));
    assert_eq!(err.to_string(), "Argument at index 2 is not a pointer.");
    assert_eq!(err.argument_index(), Some(2));

    // The lock is not left held after a conversion failure
    assert!(lib.try_acquire_lock().is_some());
}

#[test]
fn test_pointer_arguments() {
    let lib = library("pointers");
    let f = declare(&lib, "sum_into", sum_into as usize, "bool", &["int", "int", "int*"]);

    let out = HostBuffer::alloc(4);
    let ok = f.invoke(&[num(20.0), num(22.0), out.clone().into()]).unwrap();
    assert_eq!(ok, HostValue::Bool(true));
    assert_eq!(out.read::<i32>(), Some(42));

    assert_eq!(f.invoke(&[num(1.0), num(1.0), HostValue::Null]).unwrap(), HostValue::Bool(false));
    assert_eq!(
        f.invoke(&[num(1.0), num(1.0), HostValue::Undefined]).unwrap(),
        HostValue::Bool(false)
    );
}

#[test]
fn test_buffer_address_passed_through() {
    let lib = library("pointers");
    let f = declare(&lib, "ptr_to_size", ptr_to_size as usize, "size_t", &["void*"]);
    let buffer = HostBuffer::alloc(16);
    let out = f.invoke(&[buffer.clone().into()]).unwrap();
    assert_eq!(out, num(buffer.address() as f64));
}

#[test]
fn test_pointer_result_carries_pointee() {
    let lib = library("pointers");
    let f = declare(&lib, "answer_ptr", answer_ptr as usize, "int*", &[]);
    let out = f.invoke(&[]).unwrap();

    let buffer = out.as_buffer().expect("pointer result is a buffer");
    assert_eq!(buffer.address(), &ANSWER as *const i32 as usize);
    assert_eq!(buffer.len(), 4);
    assert!(!buffer.is_owned());
    assert_eq!(buffer.pointee().map(|p| p.to_string()).as_deref(), Some("int"));
    assert_eq!(buffer.read::<i32>(), Some(42));

    // Feed it back in as an argument
    let read = declare(&lib, "read_int", read_int as usize, "int", &["int*"]);
    assert_eq!(read.invoke(&[out]).unwrap(), num(42.0));
}

#[test]
fn test_int64_precision_follows_double() {
    let lib = library("precision");
    let f = declare(&lib, "id_int64", id_int64 as usize, "int64", &["int64"]);

    let exact = 9_007_199_254_740_993i64;
    let out = f.invoke(&[exact.into()]).unwrap();
    assert_eq!(out, num(9_007_199_254_740_992.0));
}

static SYNC_PROBE: Probe = Probe::new();

extern "C" fn probed_sync(x: i32) -> i32 {
    SYNC_PROBE.enter();
    x
}

#[test]
fn test_sync_calls_serialize_per_library() {
    let lib = library("serial");
    let f = declare(&lib, "probed", probed_sync as usize, "int", &["int"]);

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let f = f.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    let v = f64::from(t * 100 + i);
                    assert_eq!(f.invoke(&[num(v)]).unwrap(), num(v));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(SYNC_PROBE.calls(), 200);
    assert_eq!(SYNC_PROBE.peak(), 1);
}

#[test]
fn test_acquire_lock_blocks_sync_calls() {
    let lib = library("locked");
    let f = declare(&lib, "add", add as usize, "int", &["int", "int"]);
    let (tx, rx) = flume::bounded(1);

    let guard = lib.acquire_lock();
    let caller = {
        let f = f.clone();
        std::thread::spawn(move || {
            let out = f.invoke(&[num(1.0), num(2.0)]);
            let _ = tx.send(());
            out
        })
    };

    assert!(rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());
    drop(guard);
    assert_eq!(caller.join().unwrap().unwrap(), num(3.0));
}

#[test]
fn test_functions_share_library() {
    let lib = library("shared");
    let a = declare(&lib, "add", add as usize, "int", &["int", "int"]);
    let b = declare(&lib, "add_ten", add_ten as usize, "double", &["double"]);
    assert!(a.library().ptr_eq(b.library()));
    assert!(Arc::ptr_eq(a.plan(), a.clone().plan()));
}
