//! Synchronous invoker

use crate::errors::{FfiError, Result};
use crate::host::HostValue;
use crate::interop::CallVm;
use crate::logging::{debug, log_conversion_error, log_sync_call};
use crate::plan::CallPlan;
use parking_lot::Mutex;
use std::thread;

/// Execute `plan` on the calling thread under `vm`'s lock
///
/// The lock is held from reset to decode and released on every exit path.
/// A marshaling error aborts before the native call; the VM is reset again
/// on its next use.
pub fn invoke(plan: &CallPlan, vm: &Mutex<CallVm>, args: &[HostValue]) -> Result<HostValue> {
    // Before the lock: the sync lock is never held while waiting on a loop
    if let Err(err) = settle_handles(args) {
        log_conversion_error(plan.function_name(), &err.to_string());
        return Err(err);
    }

    let mut vm = vm.lock();

    if let Err(err) = plan.marshal(&mut vm, args) {
        log_conversion_error(plan.function_name(), &err.to_string());
        return Err(err);
    }

    log_sync_call(plan.function_name(), vm.len());
    // SAFETY: the plan's signature was prepared for exactly this entry point
    let raw = unsafe { vm.call(plan.signature(), plan.entry()) };

    Ok(plan.result().decode(raw))
}

/// Block until every async result passed as an argument has been written
///
/// A handle whose call is still queued or running is waited on through its
/// producer's loop. Waiting from that loop's own thread could never finish
/// and is an error instead.
fn settle_handles(args: &[HostValue]) -> Result<()> {
    for (index, value) in args.iter().enumerate() {
        let Some(handle) = value.as_async_result() else {
            continue;
        };
        if !handle.state().is_pending() {
            continue;
        }

        let library = handle.source().library();
        if library.on_loop_thread() {
            return Err(FfiError::InvalidAsyncResult(format!(
                "argument {}: result {} is still pending on its own loop thread",
                index,
                handle.id()
            )));
        }

        debug!(target: "invoke", handle = handle.id(), index, "waiting for pending async result");
        match library.wait_idle() {
            Ok(()) | Err(FfiError::LibraryReleased(_)) => {}
            Err(err) => return Err(err),
        }
        // A concurrent release drains the loop after detaching it from the library
        while handle.state().is_pending() {
            thread::yield_now();
        }
    }
    Ok(())
}
