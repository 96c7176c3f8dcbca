//! Test suite for async result handles

use super::*;
use crate::library::Library;

extern "C" fn returns_int() -> i32 {
    7
}

extern "C" fn returns_nothing() {}

fn source(lib: &Library) -> Function {
    lib.declare("seven", returns_int as usize, "int", &[]).unwrap()
}

// ===== Lifecycle Tests =====

#[test]
fn test_state_order() {
    let mut state = CallState::Created;
    let mut seen = vec![state];
    while let Some(next) = state.next() {
        seen.push(next);
        state = next;
    }
    assert_eq!(
        seen,
        vec![
            CallState::Created,
            CallState::Enqueued,
            CallState::Executing,
            CallState::CompletedPendingDelivery,
            CallState::Delivered,
            CallState::DestroyQueued,
            CallState::Released,
        ]
    );
    assert!(CallState::Released.is_terminal());
    assert!(CallState::DestroyQueued.is_delivered());
    assert!(!CallState::CompletedPendingDelivery.is_delivered());
}

#[test]
fn test_lifecycle_cannot_skip() {
    let lifecycle = Lifecycle::new();
    assert_eq!(lifecycle.advance(CallState::Created).unwrap(), CallState::Enqueued);

    // Not in Executing yet
    assert!(lifecycle.advance(CallState::Executing).is_err());
    assert_eq!(lifecycle.get(), CallState::Enqueued);

    // Same transition twice fails the second time
    assert!(lifecycle.advance(CallState::Enqueued).is_ok());
    assert!(lifecycle.advance(CallState::Enqueued).is_err());
}

#[test]
fn test_released_is_terminal() {
    let lifecycle = Lifecycle::new();
    let mut state = CallState::Created;
    while let Some(next) = state.next() {
        lifecycle.advance(state).unwrap();
        state = next;
    }
    assert_eq!(lifecycle.get(), CallState::Released);
    assert!(lifecycle.advance(CallState::Released).is_err());
}

// ===== Construction Tests =====

#[test]
fn test_from_host_pairs_function_and_buffer() {
    let lib = Library::new("handles");
    let func = source(&lib);
    let buffer = HostBuffer::alloc(4);

    let handle = AsyncResult::from_host(&func.clone().into(), &buffer.clone().into()).unwrap();
    assert_eq!(handle.element(), Some(NativeKind::I32));
    assert_eq!(handle.state(), CallState::Created);
    assert!(handle.source().ptr_eq(&func));
    assert_eq!(handle.get_ptr::<i32>() as usize, buffer.address());
    assert_eq!(lib.pinned_count(), 1);

    buffer.write(-12i32);
    assert_eq!(handle.read::<i32>(), Some(-12));
    assert_eq!(handle.value(), HostValue::Number(-12.0));
}

#[test]
fn test_from_host_rejects_non_function() {
    let err = AsyncResult::from_host(&42.into(), &HostBuffer::alloc(4).into()).unwrap_err();
    assert!(matches!(err, FfiError::InvalidAsyncResult(_)));
}

#[test]
fn test_from_host_rejects_null_and_non_buffer() {
    let lib = Library::new("handles");
    let func: HostValue = source(&lib).into();

    let err = AsyncResult::from_host(&func, &HostBuffer::null().into()).unwrap_err();
    assert!(matches!(err, FfiError::InvalidAsyncResult(_)));

    let err = AsyncResult::from_host(&func, &HostValue::Null).unwrap_err();
    assert!(matches!(err, FfiError::InvalidAsyncResult(_)));

    let err = AsyncResult::from_host(&func, &HostBuffer::alloc(2).into()).unwrap_err();
    assert!(err.to_string().contains("cannot hold i32"));
    assert_eq!(lib.pinned_count(), 0);
}

#[test]
fn test_void_source_has_no_element() {
    let lib = Library::new("handles");
    let func = lib.declare("nothing", returns_nothing as usize, "void", &[]).unwrap();
    let handle = AsyncResult::from_host(&func.into(), &HostBuffer::alloc(0).into()).unwrap();
    assert_eq!(handle.element(), None);
    assert_eq!(handle.value(), HostValue::Undefined);
}

// ===== Identity Tests =====

#[test]
fn test_probe() {
    let lib = Library::new("handles");
    let handle = AsyncResult::from_host(&source(&lib).into(), &HostBuffer::alloc(4).into()).unwrap();
    let value = HostValue::from(handle.clone());

    assert_eq!(AsyncResultHandle::probe(&value).map(|h| h.id()), Some(handle.id()));
    assert!(AsyncResultHandle::probe(&HostBuffer::alloc(4).into()).is_none());
    assert!(AsyncResultHandle::probe(&7.into()).is_none());
}

#[test]
fn test_handle_is_weak() {
    let lib = Library::new("handles");
    let handle = AsyncResult::from_host(&source(&lib).into(), &HostBuffer::alloc(4).into()).unwrap();
    assert!(handle.record().is_some());

    // Releasing the library drops the pinned record; the handle does not keep it
    lib.release();
    assert!(handle.record().is_none());
    assert!(handle.is_released());

    // The buffer outlives the record
    assert!(handle.buffer().write(3i32));
    assert_eq!(handle.read::<i32>(), Some(3));
}

#[test]
fn test_ids_are_unique() {
    let lib = Library::new("handles");
    let a = AsyncResult::from_host(&source(&lib).into(), &HostBuffer::alloc(4).into()).unwrap();
    let b = AsyncResult::from_host(&source(&lib).into(), &HostBuffer::alloc(4).into()).unwrap();
    assert_ne!(a.id(), b.id());
}

// ===== Pinning Tests =====

#[test]
fn test_last_handle_drop_unpins() {
    let lib = Library::new("handles");
    let handle = AsyncResult::from_host(&source(&lib).into(), &HostBuffer::alloc(4).into()).unwrap();
    let record = handle.record().unwrap();
    let copy = handle.clone();
    let as_value = HostValue::from(handle.clone());
    assert_eq!(lib.pinned_count(), 1);

    drop(handle);
    drop(as_value);
    assert_eq!(lib.pinned_count(), 1);

    drop(copy);
    assert_eq!(lib.pinned_count(), 0);
    // Only our local reference is left
    assert_eq!(Arc::strong_count(&record), 1);
    assert_eq!(record.state(), CallState::Created);
}

#[test]
fn test_engine_handles_do_not_pin() {
    let lib = Library::new("handles");
    let record = AsyncResult::new(source(&lib), HostBuffer::alloc(4)).unwrap();
    drop(record.handle());
    assert_eq!(lib.pinned_count(), 0);
    assert_eq!(Arc::strong_count(&record), 1);
}
