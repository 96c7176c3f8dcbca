//! Background execution loop - one worker thread per library
//!
//! Design: the loop owns a `CallVm` distinct from the library's synchronous
//! one and three unbounded flume queues, each its own wake-able signal:
//! - call queue: deferred callables, executed strictly FIFO, one at a time
//! - destroy queue: delivered records; draining one is its release
//! - barrier queue: callbacks that run once every call enqueued before them
//!   has executed
//!
//! Shutdown disconnects the call and barrier queues. The thread finishes every
//! enqueued call, runs outstanding barriers, drains the destroy queue and
//! exits. Queues are unbounded: nothing pushes back on a caller that submits
//! faster than the loop drains.

mod queues;

pub use queues::{Callable, Completion, CompletionSink, DeferredInvoker};

use crate::async_result::{AsyncResult, CallState};
use crate::config::EventLoopConfig;
use crate::errors::{FfiError, Result};
use crate::interop::CallVm;
use crate::logging::{debug, error, log_async_complete, log_barrier};
use flume::{Receiver, Selector, Sender};
use parking_lot::{Mutex, MutexGuard};
use queues::{Barrier, DeliveryReceipt};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub enqueued: u64,
    pub executed: u64,
    pub delivered: u64,
    pub released: u64,
    pub barriers_run: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) executed: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) released: AtomicU64,
    pub(crate) barriers_run: AtomicU64,
}

/// State shared between the loop thread, its owner and delivery receipts
pub(crate) struct Shared {
    vm: Mutex<CallVm>,
    pub(crate) stats: Counters,
    seq: AtomicU64,
}

impl Shared {
    /// Next event sequence number, starting at 1
    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn snapshot(&self) -> LoopStats {
        LoopStats {
            enqueued: self.stats.enqueued.load(Ordering::Acquire),
            executed: self.stats.executed.load(Ordering::Acquire),
            delivered: self.stats.delivered.load(Ordering::Acquire),
            released: self.stats.released.load(Ordering::Acquire),
            barriers_run: self.stats.barriers_run.load(Ordering::Acquire),
        }
    }
}

/// Handle to a running loop
pub struct Loop {
    name: String,
    calls: Option<Sender<Callable>>,
    barriers: Option<Sender<Barrier>>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Loop {
    /// Spawn the loop thread
    pub fn start(library: &str, config: &EventLoopConfig, vm_capacity: usize) -> Result<Self> {
        let (call_tx, call_rx) = flume::unbounded();
        let (destroy_tx, destroy_rx) = flume::unbounded();
        let (barrier_tx, barrier_rx) = flume::unbounded();

        let shared = Arc::new(Shared {
            vm: Mutex::new(CallVm::new(vm_capacity)),
            stats: Counters::default(),
            seq: AtomicU64::new(0),
        });

        let name = format!("{}-{}", config.thread_name_prefix, library);
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let worker = Worker {
            shared: Arc::clone(&shared),
            calls: call_rx,
            destroys: destroy_rx,
            destroy_tx,
            barriers: barrier_rx,
            pending_barriers: VecDeque::new(),
        };
        let thread = builder.spawn(move || worker.run()).map_err(FfiError::LoopStart)?;

        debug!(target: "event_loop", loop_name = %name, "background loop started");

        Ok(Self {
            name,
            calls: Some(call_tx),
            barriers: Some(barrier_tx),
            shared,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exclusive access to the loop's call VM
    ///
    /// Blocks while the loop is executing a call.
    pub fn acquire_lock(&self) -> MutexGuard<'_, CallVm> {
        self.shared.vm.lock()
    }

    /// Append a callable to the call queue
    pub fn push(&self, callable: Callable) -> Result<()> {
        let calls = self.calls.as_ref().ok_or(FfiError::LoopDisconnected)?;

        callable.result.advance(CallState::Created)?;
        // Counted before sending so barriers submitted after this call wait for it
        self.shared.stats.enqueued.fetch_add(1, Ordering::AcqRel);

        if calls.send(callable).is_err() {
            self.shared.stats.enqueued.fetch_sub(1, Ordering::AcqRel);
            return Err(FfiError::LoopDisconnected);
        }
        Ok(())
    }

    /// Run `callback` on the loop thread after every call enqueued so far
    pub fn synchronize<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let barriers = self.barriers.as_ref().ok_or(FfiError::LoopDisconnected)?;
        let barrier = Barrier {
            target: self.shared.stats.enqueued.load(Ordering::Acquire),
            callback: Box::new(callback),
        };
        barriers.send(barrier).map_err(|_| FfiError::LoopDisconnected)
    }

    pub fn stats(&self) -> LoopStats {
        self.shared.snapshot()
    }

    /// True when called from the loop thread itself
    pub fn is_loop_thread(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|t| t.thread().id() == thread::current().id())
    }

    /// Stop accepting work and wait for the thread to drain and exit
    ///
    /// Never joins itself: from the loop thread the worker is detached and
    /// exits on its own once the queues are empty.
    pub fn shutdown(&mut self) {
        self.calls.take();
        self.barriers.take();

        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!(target: "event_loop", loop_name = %self.name, "shutdown from loop thread, detaching");
            return;
        }
        if handle.join().is_err() {
            error!(target: "event_loop", loop_name = %self.name, "loop thread panicked");
        }
        debug!(target: "event_loop", loop_name = %self.name, "background loop stopped");
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("name", &self.name)
            .field("running", &self.thread.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

enum Event {
    Call(Callable),
    Destroy(Arc<AsyncResult>),
    Barrier(Barrier),
    CallsClosed,
    BarriersClosed,
    // The worker holds a destroy sender, so this cannot close while it runs
    DestroysClosed,
}

/// Loop thread state
struct Worker {
    shared: Arc<Shared>,
    calls: Receiver<Callable>,
    destroys: Receiver<Arc<AsyncResult>>,
    destroy_tx: Sender<Arc<AsyncResult>>,
    barriers: Receiver<Barrier>,
    pending_barriers: VecDeque<Barrier>,
}

impl Worker {
    fn run(mut self) {
        let mut calls_open = true;
        let mut barriers_open = true;

        while calls_open || barriers_open {
            let event = {
                let mut selector = Selector::new()
                    .recv(&self.destroys, |r| r.map_or(Event::DestroysClosed, Event::Destroy));
                if calls_open {
                    selector = selector.recv(&self.calls, |r| r.map_or(Event::CallsClosed, Event::Call));
                }
                if barriers_open {
                    selector =
                        selector.recv(&self.barriers, |r| r.map_or(Event::BarriersClosed, Event::Barrier));
                }
                selector.wait()
            };

            match event {
                Event::Call(callable) => self.execute(callable),
                Event::Destroy(record) => queues::release(&self.shared, record),
                Event::Barrier(barrier) => self.pending_barriers.push_back(barrier),
                Event::CallsClosed => calls_open = false,
                Event::BarriersClosed => barriers_open = false,
                Event::DestroysClosed => {}
            }

            self.drain_destroys();
            self.run_ready_barriers();
        }

        // Every call has executed; whatever barriers remain are due
        for barrier in std::mem::take(&mut self.pending_barriers) {
            self.run_barrier(barrier);
        }
        self.drain_destroys();
        debug!(target: "event_loop", "loop thread exiting");
    }

    fn execute(&mut self, callable: Callable) {
        let Callable {
            result,
            invoker,
            sink,
        } = callable;

        if let Err(err) = result.advance(CallState::Enqueued) {
            error!(target: "event_loop", handle = result.id(), %err, "call dequeued out of order");
        }

        let outcome = {
            let mut vm = self.shared.vm.lock();
            invoker(&mut vm)
        };
        self.shared.stats.executed.fetch_add(1, Ordering::AcqRel);

        if let Err(err) = result.advance(CallState::Executing) {
            error!(target: "event_loop", handle = result.id(), %err, "completion out of order");
        }
        log_async_complete(result.source().name(), result.id(), outcome.is_ok());

        let receipt = DeliveryReceipt::new(result, self.destroy_tx.clone(), Arc::clone(&self.shared));
        match sink {
            CompletionSink::Channel(tx) => {
                // A dropped receiver returns the completion, dropping its receipt
                let _ = tx.send(Completion { outcome, receipt });
            }
            CompletionSink::Callback(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
                    error!(target: "event_loop", "completion callback panicked");
                }
                drop(receipt);
            }
        }
    }

    fn drain_destroys(&self) {
        for record in self.destroys.try_iter() {
            queues::release(&self.shared, record);
        }
    }

    fn run_ready_barriers(&mut self) {
        if self.pending_barriers.is_empty() {
            return;
        }
        let executed = self.shared.stats.executed.load(Ordering::Acquire);
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.pending_barriers)
            .into_iter()
            .partition(|b| b.target <= executed);
        self.pending_barriers = waiting;

        for barrier in ready {
            self.run_barrier(barrier);
        }
    }

    fn run_barrier(&self, barrier: Barrier) {
        log_barrier(barrier.target);
        if panic::catch_unwind(AssertUnwindSafe(barrier.callback)).is_err() {
            error!(target: "event_loop", "synchronization callback panicked");
        }
        self.shared.stats.barriers_run.fetch_add(1, Ordering::AcqRel);
    }
}
