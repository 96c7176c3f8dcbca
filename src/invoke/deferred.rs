//! Asynchronous invoker: capture now, execute on the loop thread

use crate::async_result::{AsyncResult, AsyncResultHandle};
use crate::errors::{FfiError, Result};
use crate::event_loop::{Callable, Completion, CompletionSink, DeferredInvoker, Loop};
use crate::host::{HostBuffer, HostValue};
use crate::interop::CallVm;
use crate::logging::{log_async_enqueue, log_conversion_error};
use crate::plan::{CallPlan, CapturedArgs};
use std::sync::Arc;

/// Build the deferred closure for one invocation
///
/// Arguments are captured here, on the caller's thread. A capture error does
/// not escape: the closure returns it when it runs, so it reaches the caller
/// through the completion channel in queue order.
pub fn prepare(plan: &Arc<CallPlan>, args: &[HostValue], out: HostBuffer) -> DeferredInvoker {
    match plan.capture(args) {
        Ok(captured) => {
            let plan = Arc::clone(plan);
            Box::new(move |vm: &mut CallVm| execute(&plan, &captured, &out, vm))
        }
        Err(err) => {
            log_conversion_error(plan.function_name(), &err.to_string());
            Box::new(move |_: &mut CallVm| Err(err))
        }
    }
}

/// Runs on the loop thread with the loop's VM locked
fn execute(plan: &CallPlan, captured: &CapturedArgs, out: &HostBuffer, vm: &mut CallVm) -> Result<HostValue> {
    vm.reset();
    for arg in captured {
        vm.push(arg.resolve()?);
    }

    // SAFETY: the plan's entry point was resolved for exactly this signature
    let raw = unsafe { vm.call(plan.signature(), plan.entry()) };
    if let Some(value) = raw {
        out.write_native(value);
    }
    Ok(plan.result().decode(raw))
}

/// Enqueue one call on `event_loop`
pub fn submit(
    event_loop: &Loop,
    plan: &Arc<CallPlan>,
    record: Arc<AsyncResult>,
    args: &[HostValue],
    sink: CompletionSink,
) -> Result<()> {
    let invoker = prepare(plan, args, record.buffer().clone());
    let id = record.id();
    event_loop.push(Callable::new(record, invoker, sink))?;
    log_async_enqueue(plan.function_name(), id);
    Ok(())
}

/// An asynchronous call in flight
///
/// Holds the caller-side result handle and the completion channel. Taking the
/// outcome marks the result delivered; dropping an unobserved `PendingCall`
/// abandons delivery, which also lets the record be released.
#[derive(Debug)]
pub struct PendingCall {
    handle: AsyncResultHandle,
    rx: flume::Receiver<Completion>,
}

impl PendingCall {
    pub(crate) fn new(handle: AsyncResultHandle, rx: flume::Receiver<Completion>) -> Self {
        Self { handle, rx }
    }

    /// Handle to the result buffer, usable as an argument to later calls
    pub fn handle(&self) -> &AsyncResultHandle {
        &self.handle
    }

    /// Block until the call completes
    pub fn wait(self) -> Result<HostValue> {
        self.rx
            .recv()
            .map_err(|_| FfiError::LoopDisconnected)?
            .into_outcome()
    }

    /// Await the call's completion
    pub async fn result(self) -> Result<HostValue> {
        self.rx
            .recv_async()
            .await
            .map_err(|_| FfiError::LoopDisconnected)?
            .into_outcome()
    }

    /// Outcome if the call has already completed
    pub fn try_wait(&self) -> Option<Result<HostValue>> {
        self.rx.try_recv().ok().map(Completion::into_outcome)
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("outcome", &self.outcome).finish()
    }
}
