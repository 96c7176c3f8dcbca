//! Messages carried by the loop's three queues

use super::Shared;
use crate::async_result::{AsyncResult, CallState};
use crate::errors::Result;
use crate::host::HostValue;
use crate::interop::CallVm;
use crate::logging::{error, log_release};
use std::sync::Arc;

/// Self-contained deferred call; needs only the loop's VM
pub type DeferredInvoker = Box<dyn FnOnce(&mut CallVm) -> Result<HostValue> + Send>;

/// Call queue entry: the deferred call, its result record and where to deliver
pub struct Callable {
    pub(crate) result: Arc<AsyncResult>,
    pub(crate) invoker: DeferredInvoker,
    pub(crate) sink: CompletionSink,
}

impl Callable {
    pub fn new(result: Arc<AsyncResult>, invoker: DeferredInvoker, sink: CompletionSink) -> Self {
        Self {
            result,
            invoker,
            sink,
        }
    }

    pub fn result(&self) -> &Arc<AsyncResult> {
        &self.result
    }
}

/// Where a completed call's outcome goes
pub enum CompletionSink {
    /// Sent to a waiting `PendingCall`
    Channel(flume::Sender<Completion>),
    /// Invoked on the loop thread
    Callback(Box<dyn FnOnce(Result<HostValue>) + Send>),
}

/// Outcome of one asynchronous call plus its delivery receipt
///
/// Taking `outcome` and dropping the receipt is what marks delivery.
pub struct Completion {
    pub outcome: Result<HostValue>,
    pub(crate) receipt: DeliveryReceipt,
}

impl Completion {
    /// Take the outcome, marking the result delivered
    pub fn into_outcome(self) -> Result<HostValue> {
        let Completion { outcome, receipt } = self;
        drop(receipt);
        outcome
    }
}

/// Synchronization-barrier queue entry
pub(crate) struct Barrier {
    /// `enqueued` count at submission
    pub(crate) target: u64,
    pub(crate) callback: Box<dyn FnOnce() + Send>,
}

/// Moves a record from delivery to the destroy queue when dropped
///
/// Dropping happens only after the outcome was observed: received, handled
/// by the callback, or abandoned with its receiver.
pub(crate) struct DeliveryReceipt {
    record: Option<Arc<AsyncResult>>,
    destroy: flume::Sender<Arc<AsyncResult>>,
    shared: Arc<Shared>,
}

impl DeliveryReceipt {
    pub(crate) fn new(
        record: Arc<AsyncResult>,
        destroy: flume::Sender<Arc<AsyncResult>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            record: Some(record),
            destroy,
            shared,
        }
    }
}

impl Drop for DeliveryReceipt {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };

        let seq = self.shared.next_seq();
        if let Err(err) = record.mark_delivered(seq) {
            error!(target: "event_loop", handle = record.id(), %err, "delivery out of order");
        }
        self.shared.stats.delivered.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if let Err(err) = record.advance(CallState::Delivered) {
            error!(target: "event_loop", handle = record.id(), %err, "destroy queue out of order");
        }
        if let Err(flume::SendError(record)) = self.destroy.send(record) {
            // Loop already gone; release here
            release(&self.shared, record);
        }
    }
}

/// Drop the engine's strong reference
pub(crate) fn release(shared: &Shared, record: Arc<AsyncResult>) {
    let seq = shared.next_seq();
    if let Err(err) = record.mark_released(seq) {
        error!(target: "event_loop", handle = record.id(), %err, "release out of order");
    }
    shared.stats.released.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    log_release(record.id());
    drop(record);
}
