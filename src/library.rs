//! Library and function handles
//!
//! A `Library` owns two independent mutual-exclusion domains:
//! - the synchronous domain: one `CallVm` behind a mutex, held by whichever
//!   caller thread is executing a sync call, for that call's full duration
//! - the asynchronous domain: the background loop and its own `CallVm`,
//!   started lazily by the first asynchronous call
//!
//! The sync lock is never held across an asynchronous operation.

use crate::async_result::{AsyncResult, AsyncResultHandle};
use crate::config::EngineConfig;
use crate::descriptor::{CallMode, FunctionDescriptor, IndirectionLookup, PointeeLookup};
use crate::errors::{FfiError, Result};
use crate::event_loop::{CompletionSink, Loop, LoopStats};
use crate::host::{HostBuffer, HostValue};
use crate::interop::CallVm;
use crate::invoke::{self, PendingCall};
use crate::logging::{debug, log_plan_built, log_plan_rejected};
use crate::plan::CallPlan;
use dashmap::DashMap;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct LibraryInner {
    name: String,
    config: EngineConfig,
    sync_vm: Mutex<CallVm>,
    event_loop: Mutex<Option<Loop>>,
    released: AtomicBool,
    /// Caller-constructed result records not yet enqueued
    pinned: DashMap<u64, Arc<AsyncResult>>,
    pointee: Arc<dyn PointeeLookup>,
}

/// A native library as seen by the engine
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, EngineConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: EngineConfig) -> Self {
        Self::with_lookup(name, config, Arc::new(IndirectionLookup))
    }

    /// Library with a custom pointee-type lookup service
    pub fn with_lookup(
        name: impl Into<String>,
        config: EngineConfig,
        pointee: Arc<dyn PointeeLookup>,
    ) -> Self {
        let vm = CallVm::new(config.library.vm_capacity);
        Self {
            inner: Arc::new(LibraryInner {
                name: name.into(),
                config,
                sync_vm: Mutex::new(vm),
                event_loop: Mutex::new(None),
                released: AtomicBool::new(false),
                pinned: DashMap::new(),
                pointee,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Build the call plan for `desc` and bind it to this library
    pub fn define(&self, desc: FunctionDescriptor) -> Result<Function> {
        self.ensure_live()?;
        if desc.entry == 0 {
            return Err(FfiError::NullEntryPoint(desc.name));
        }

        let plan = match CallPlan::build(&desc, self.inner.pointee.as_ref()) {
            Ok(plan) => plan,
            Err(err) => {
                log_plan_rejected(&desc.name, &err.to_string());
                return Err(err);
            }
        };
        log_plan_built(&desc.name, plan.arity(), desc.mode.as_str());

        Ok(Function {
            inner: Arc::new(FunctionInner {
                descriptor: desc,
                plan: Arc::new(plan),
                library: self.clone(),
            }),
        })
    }

    /// Define from ffi-style type strings, in the configured default mode
    ///
    /// ```ignore
    /// let mul = lib.declare("mul", mul as usize, "int", &["int", "int"])?;
    /// ```
    pub fn declare(&self, name: &str, entry: usize, result: &str, args: &[&str]) -> Result<Function> {
        let mode = self.inner.config.library.default_call_mode;
        self.define(FunctionDescriptor::parse(name, entry, result, args, mode)?)
    }

    /// Exclusive access to the synchronous call VM
    ///
    /// Every synchronous call on this library waits while the guard lives.
    pub fn acquire_lock(&self) -> MutexGuard<'_, CallVm> {
        self.inner.sync_vm.lock()
    }

    /// Non-blocking variant of `acquire_lock`
    pub fn try_acquire_lock(&self) -> Option<MutexGuard<'_, CallVm>> {
        self.inner.sync_vm.try_lock()
    }

    /// Run `callback` on the loop thread once every call enqueued so far has
    /// executed. Starts the loop if needed.
    pub fn synchronize<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.event_loop()?.synchronize(callback)
    }

    /// Block until every asynchronous call enqueued so far has executed
    ///
    /// Must not be called from the loop thread.
    pub fn wait_idle(&self) -> Result<()> {
        if self.inner.event_loop.lock().is_none() {
            return Ok(());
        }
        let (tx, rx) = flume::bounded(1);
        self.synchronize(move || {
            let _ = tx.send(());
        })?;
        rx.recv().map_err(|_| FfiError::LoopDisconnected)
    }

    /// Stop the background loop after it drains, and refuse further calls
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.pinned.clear();

        // Taken out first so the join below runs without the lock
        let event_loop = self.inner.event_loop.lock().take();
        if let Some(mut event_loop) = event_loop {
            event_loop.shutdown();
        }
        debug!(target: "event_loop", library = %self.inner.name, "library released");
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Loop counters; all zero before the first asynchronous call
    pub fn stats(&self) -> LoopStats {
        self.inner
            .event_loop
            .lock()
            .as_ref()
            .map(Loop::stats)
            .unwrap_or_default()
    }

    /// Number of caller-constructed handles waiting to be enqueued
    pub fn pinned_count(&self) -> usize {
        self.inner.pinned.len()
    }

    pub fn ptr_eq(&self, other: &Library) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the current thread is this library's loop thread
    pub(crate) fn on_loop_thread(&self) -> bool {
        self.inner
            .event_loop
            .lock()
            .as_ref()
            .map_or(false, Loop::is_loop_thread)
    }

    pub(crate) fn sync_vm(&self) -> &Mutex<CallVm> {
        &self.inner.sync_vm
    }

    /// The background loop, started on first use
    pub(crate) fn event_loop(&self) -> Result<MappedMutexGuard<'_, Loop>> {
        self.ensure_live()?;
        let mut slot = self.inner.event_loop.lock();
        if slot.is_none() {
            let config = &self.inner.config;
            *slot = Some(Loop::start(
                &self.inner.name,
                &config.event_loop,
                config.library.vm_capacity,
            )?);
        }
        MutexGuard::try_map(slot, Option::as_mut)
            .map_err(|_| FfiError::LibraryReleased(self.inner.name.clone()))
    }

    pub(crate) fn pin(&self, record: Arc<AsyncResult>) -> Result<()> {
        self.ensure_live()?;
        self.inner.pinned.insert(record.id(), record);
        Ok(())
    }

    pub(crate) fn unpin(&self, id: u64) -> Option<Arc<AsyncResult>> {
        self.inner.pinned.remove(&id).map(|(_, record)| record)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            return Err(FfiError::LibraryReleased(self.inner.name.clone()));
        }
        Ok(())
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.inner.name)
            .field("released", &self.is_released())
            .field("pinned", &self.inner.pinned.len())
            .finish()
    }
}

struct FunctionInner {
    descriptor: FunctionDescriptor,
    plan: Arc<CallPlan>,
    library: Library,
}

/// A native function bound to its library, with its cached call plan
#[derive(Clone)]
pub struct Function {
    inner: Arc<FunctionInner>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.inner.descriptor
    }

    pub fn mode(&self) -> CallMode {
        self.inner.descriptor.mode
    }

    pub fn plan(&self) -> &Arc<CallPlan> {
        &self.inner.plan
    }

    pub fn library(&self) -> &Library {
        &self.inner.library
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Call synchronously on this thread
    pub fn invoke(&self, args: &[HostValue]) -> Result<HostValue> {
        self.require_mode(CallMode::Sync)?;
        self.inner.library.ensure_live()?;
        invoke::invoke_sync(&self.inner.plan, self.inner.library.sync_vm(), args)
    }

    /// Enqueue on the background loop; returns immediately
    pub fn invoke_async(&self, args: &[HostValue]) -> Result<PendingCall> {
        self.require_mode(CallMode::Async)?;
        let record = AsyncResult::new(self.clone(), self.result_buffer())?;
        self.enqueue_pending(record, args)
    }

    /// Enqueue and deliver the outcome to `callback` on the loop thread
    pub fn invoke_async_with<F>(&self, args: &[HostValue], callback: F) -> Result<AsyncResultHandle>
    where
        F: FnOnce(Result<HostValue>) + Send + 'static,
    {
        self.require_mode(CallMode::Async)?;
        let record = AsyncResult::new(self.clone(), self.result_buffer())?;
        let handle = record.handle();

        let event_loop = self.inner.library.event_loop()?;
        invoke::submit(
            &event_loop,
            &self.inner.plan,
            record,
            args,
            CompletionSink::Callback(Box::new(callback)),
        )?;
        Ok(handle)
    }

    /// Enqueue using a caller-constructed handle as the result container
    ///
    /// The handle must come from `AsyncResult::from_host`, hold this function's
    /// result kind and not have been enqueued before.
    pub fn invoke_async_into(&self, args: &[HostValue], handle: &AsyncResultHandle) -> Result<PendingCall> {
        self.require_mode(CallMode::Async)?;

        let expected = self.inner.plan.result().native();
        if handle.element() != expected {
            return Err(FfiError::InvalidAsyncResult(format!(
                "handle holds {}, '{}' returns {}",
                handle.element().map_or("void", |k| k.name()),
                self.name(),
                expected.map_or("void", |k| k.name()),
            )));
        }

        let record = self.inner.library.unpin(handle.id()).ok_or_else(|| {
            FfiError::InvalidAsyncResult(format!(
                "handle {} is not pinned by library '{}'",
                handle.id(),
                self.inner.library.name()
            ))
        })?;
        self.enqueue_pending(record, args)
    }

    /// Asynchronous variant of this function, sharing its plan
    pub fn to_async(&self) -> Function {
        Function {
            inner: Arc::new(FunctionInner {
                descriptor: self.inner.descriptor.with_mode(CallMode::Async),
                plan: Arc::clone(&self.inner.plan),
                library: self.inner.library.clone(),
            }),
        }
    }

    fn enqueue_pending(&self, record: Arc<AsyncResult>, args: &[HostValue]) -> Result<PendingCall> {
        let handle = record.handle();
        let (tx, rx) = flume::bounded(1);

        let event_loop = self.inner.library.event_loop()?;
        invoke::submit(&event_loop, &self.inner.plan, record, args, CompletionSink::Channel(tx))?;
        Ok(PendingCall::new(handle, rx))
    }

    fn result_buffer(&self) -> HostBuffer {
        HostBuffer::alloc(self.inner.plan.result().native().map_or(0, |k| k.size()))
    }

    fn require_mode(&self, requested: CallMode) -> Result<()> {
        let declared = self.mode();
        if declared != requested {
            return Err(FfiError::CallModeMismatch {
                function: self.name().to_string(),
                declared: declared.as_str(),
                requested: requested.as_str(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name())
            .field("mode", &self.mode())
            .field("library", &self.inner.library.name())
            .finish()
    }
}
