use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{Reference, Runtime};

/// The channel from the host into a running interpreter: an interrupt flag
/// polled between bytecodes and a bounded FIFO of blocks waiting to run.
///
/// The queue holds plain references without counts. Whoever queues a block
/// keeps it alive until it has run.
pub struct EventQueue {
    interrupt: AtomicBool,
    blocks: Mutex<VecDeque<Reference>>,
    ready: Condvar,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            interrupt: AtomicBool::new(false),
            blocks: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Asks the interpreter to stop before its next bytecode. Answers false
    /// when an interrupt is already pending.
    pub fn interrupt_interpreter(&self) -> bool {
        !self.interrupt.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub(crate) fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }

    /// Answers false when the queue is full.
    pub fn queue_block_to_run(&self, block: Reference) -> bool {
        {
            let mut blocks = self.blocks.lock();
            if blocks.len() >= self.capacity {
                return false;
            }
            blocks.push_back(block);
        }
        self.ready.notify_one();
        true
    }

    /// Oldest queued block, nil when there is none.
    pub fn next_queued_block(&self) -> Reference {
        self.blocks.lock().pop_front().unwrap_or(Reference::NIL)
    }

    /// Like [`Self::next_queued_block`] but waits up to `timeout` for a block
    /// to arrive.
    pub fn wait_for_block(&self, timeout: Duration) -> Reference {
        let deadline = Instant::now() + timeout;
        let mut blocks = self.blocks.lock();
        while blocks.is_empty() {
            if self.ready.wait_until(&mut blocks, deadline).timed_out() {
                break;
            }
        }
        blocks.pop_front().unwrap_or(Reference::NIL)
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}

impl Runtime {
    /// Runs `target` in a fresh process until it returns, `slice` bytecodes
    /// at a time.
    pub fn run_block(&mut self, target: Reference, slice: usize) {
        if self.class_of(target) != self.special.block_class {
            log::warn!("queued object {target:?} is not a block");
            return;
        }
        let process = self.new_block_process(target);
        while self.execute(process, slice) {}
        self.memory.decr(process);
    }
}

/// Host side driver. Owns the runtime behind a lock, so event producers on
/// other threads only ever touch the [`EventQueue`].
pub struct Scheduler {
    runtime: Arc<Mutex<Runtime>>,
    events: Arc<EventQueue>,
    slice: usize,
}

impl Scheduler {
    pub fn new(runtime: Runtime) -> Self {
        let events = runtime.events();
        let slice = runtime.settings().time_slice;
        Self {
            runtime: Arc::new(Mutex::new(runtime)),
            events,
            slice,
        }
    }

    pub fn with_slice(mut self, slice: usize) -> Self {
        self.slice = slice.max(1);
        self
    }

    pub fn runtime(&self) -> Arc<Mutex<Runtime>> {
        self.runtime.clone()
    }

    pub fn events(&self) -> Arc<EventQueue> {
        self.events.clone()
    }

    /// Time-slices `process` until it terminates, running queued blocks to
    /// completion between slices. Answers the number of slices.
    pub fn run(&self, process: Reference) -> usize {
        let mut slices = 0;
        loop {
            let resume = self.runtime.lock().execute(process, self.slice);
            slices += 1;
            self.run_queued_blocks();
            if !resume {
                break;
            }
        }
        log::debug!("process {process:?} finished after {slices} slices");
        slices
    }

    /// Runs every block currently queued. Answers how many ran.
    pub fn run_queued_blocks(&self) -> usize {
        let mut ran = 0;
        loop {
            let block = self.events.next_queued_block();
            if block.is_nil() {
                return ran;
            }
            self.runtime.lock().run_block(block, self.slice);
            ran += 1;
        }
    }

    /// Waits up to `timeout` for one block and runs it. Answers false on
    /// timeout.
    pub fn wait_and_run(&self, timeout: Duration) -> bool {
        let block = self.events.wait_for_block(timeout);
        if block.is_nil() {
            return false;
        }
        self.runtime.lock().run_block(block, self.slice);
        true
    }
}
