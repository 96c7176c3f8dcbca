//! Asynchronous result handles
//!
//! Design: explicit ownership instead of manual reference counting.
//! - `AsyncResult` is the engine-side record. The engine holds the only
//!   strong reference while the call is in flight: the library's pinned set
//!   (caller-constructed handles), then the queued callable, then the delivery
//!   receipt, then the destroy queue. Dropping it from the destroy queue is
//!   the release.
//! - `AsyncResultHandle` is what the caller sees. It keeps a `Weak` to the
//!   record for identity and state, plus a clone of the result buffer for
//!   reads. It never extends the record's lifetime, and stays readable after
//!   release because it owns its buffer.
//! - A caller-constructed record stays pinned by its library only while some
//!   clone of its handle is alive; the last one dropped unpins it.
//!
//! Identity is the `HostValue::AsyncResult` discriminant; there is no tag to
//! probe and nothing to downcast.

mod lifecycle;

pub use lifecycle::{CallState, Lifecycle};

use crate::errors::{FfiError, Result};
use crate::host::{HostBuffer, HostValue};
use crate::interop::NativeKind;
use crate::library::{Function, Library};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Engine-side record of one asynchronous result
pub struct AsyncResult {
    id: u64,
    source: Function,
    ptr: HostBuffer,
    element: Option<NativeKind>,
    lifecycle: Lifecycle,
    delivered_seq: AtomicU64,
    released_seq: AtomicU64,
}

impl AsyncResult {
    /// Pair a source function with the buffer its result lands in
    pub(crate) fn new(source: Function, ptr: HostBuffer) -> Result<Arc<Self>> {
        if ptr.is_null() {
            return Err(FfiError::InvalidAsyncResult("pointer is null".into()));
        }
        let element = source.plan().result().native();
        if let Some(kind) = element {
            if ptr.len() < kind.size() {
                return Err(FfiError::InvalidAsyncResult(format!(
                    "buffer of {} bytes cannot hold {}",
                    ptr.len(),
                    kind.name()
                )));
            }
        }

        Ok(Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            source,
            ptr,
            element,
            lifecycle: Lifecycle::new(),
            delivered_seq: AtomicU64::new(0),
            released_seq: AtomicU64::new(0),
        }))
    }

    /// Construct from host values, as the runtime does for a result container
    ///
    /// The record is pinned by the source function's library until it is
    /// enqueued with `Function::invoke_async_into`, every clone of the
    /// returned handle is dropped, or the library is released.
    pub fn from_host(func: &HostValue, ptr: &HostValue) -> Result<AsyncResultHandle> {
        let source = func
            .as_function()
            .ok_or_else(|| {
                FfiError::InvalidAsyncResult(format!("source is a {}, not a function", func.type_name()))
            })?
            .clone();
        let buffer = ptr
            .as_buffer()
            .ok_or_else(|| {
                FfiError::InvalidAsyncResult(format!("pointer is a {}, not a buffer", ptr.type_name()))
            })?
            .clone();

        let record = Self::new(source.clone(), buffer)?;
        source.library().pin(Arc::clone(&record))?;

        let mut handle = record.handle();
        handle.pin = Some(Arc::new(PinRelease {
            id: record.id,
            library: source.library().clone(),
        }));
        Ok(handle)
    }

    /// Caller-side view of this record
    pub fn handle(self: &Arc<Self>) -> AsyncResultHandle {
        AsyncResultHandle {
            id: self.id,
            record: Arc::downgrade(self),
            ptr: self.ptr.clone(),
            element: self.element,
            source: self.source.clone(),
            pin: None,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &Function {
        &self.source
    }

    pub fn buffer(&self) -> &HostBuffer {
        &self.ptr
    }

    #[inline]
    pub fn element(&self) -> Option<NativeKind> {
        self.element
    }

    #[inline]
    pub fn state(&self) -> CallState {
        self.lifecycle.get()
    }

    /// Event sequence number at delivery, 0 until delivered
    pub fn delivered_seq(&self) -> u64 {
        self.delivered_seq.load(Ordering::Acquire)
    }

    /// Event sequence number at release, 0 until released
    pub fn released_seq(&self) -> u64 {
        self.released_seq.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&self, from: CallState) -> Result<CallState> {
        self.lifecycle.advance(from)
    }

    pub(crate) fn mark_delivered(&self, seq: u64) -> Result<()> {
        self.advance(CallState::CompletedPendingDelivery)?;
        self.delivered_seq.store(seq, Ordering::Release);
        Ok(())
    }

    pub(crate) fn mark_released(&self, seq: u64) -> Result<()> {
        self.advance(CallState::DestroyQueued)?;
        self.released_seq.store(seq, Ordering::Release);
        Ok(())
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("id", &self.id)
            .field("source", &self.source.name())
            .field("element", &self.element)
            .field("state", &self.state())
            .finish()
    }
}

/// Caller-side handle to an asynchronous result
#[derive(Clone)]
pub struct AsyncResultHandle {
    id: u64,
    record: Weak<AsyncResult>,
    ptr: HostBuffer,
    element: Option<NativeKind>,
    source: Function,
    /// Shared by clones of a caller-constructed handle
    pin: Option<Arc<PinRelease>>,
}

/// Unpins a caller-constructed record when its last handle goes away
struct PinRelease {
    id: u64,
    library: Library,
}

impl Drop for PinRelease {
    fn drop(&mut self) {
        // No-op once enqueued or after library release
        self.library.unpin(self.id);
    }
}

impl AsyncResultHandle {
    /// Identity probe: is `value` one of our handles?
    pub fn probe(value: &HostValue) -> Option<&AsyncResultHandle> {
        value.as_async_result()
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn buffer(&self) -> &HostBuffer {
        &self.ptr
    }

    /// Native kind stored in the buffer, `None` for void results
    #[inline]
    pub fn element(&self) -> Option<NativeKind> {
        self.element
    }

    pub fn source(&self) -> &Function {
        &self.source
    }

    /// Stored pointer reinterpreted as `*mut T`
    #[inline]
    pub fn get_ptr<T>(&self) -> *mut T {
        self.ptr.address() as *mut T
    }

    /// Read the stored value as a `T`
    pub fn read<T: Copy>(&self) -> Option<T> {
        self.ptr.read::<T>()
    }

    /// Stored value decoded as the source function's result
    pub fn value(&self) -> HostValue {
        let raw = self.element.and_then(|kind| self.ptr.read_native(kind));
        self.source.plan().result().decode(raw)
    }

    /// Current state; a dropped record reads as Released
    pub fn state(&self) -> CallState {
        self.record
            .upgrade()
            .map_or(CallState::Released, |record| record.state())
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.state().is_terminal()
    }

    /// The engine record, while it is still alive
    pub fn record(&self) -> Option<Arc<AsyncResult>> {
        self.record.upgrade()
    }
}

impl fmt::Debug for AsyncResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResultHandle")
            .field("id", &self.id)
            .field("source", &self.source.name())
            .field("element", &self.element)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests;
