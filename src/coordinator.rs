//! Multiplexes a stream of incoming requests onto a fixed pool of worker
//! threads: one producer (the caller driving [`Coordinator::enqueue`] and
//! [`Coordinator::mark_done`]), N workers draining
//! [`Coordinator::worker_loop`] in a separate thread each.
//!
//! The coordinator's own mutex and condition variable are distinct from
//! the [`RwLock`](crate::rwlock::RwLock) guarding the feed: they exist
//! purely to park idle workers and to publish the shutdown flag, never to
//! guard feed data directly.

use crate::feed::Feed;
use crate::protocol;
use crate::queue::Queue;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};

struct State {
    done: bool,
}

/// Shared state between the producer and the worker pool.
///
/// `task_count` is the producer's view of logically-enqueued-but-not-yet-
/// dequeued work: incremented on enqueue, decremented by whichever worker
/// successfully dequeues the item. It is authoritative for the shutdown
/// predicate `done && task_count == 0`, not for the queue's own internal
/// bookkeeping.
pub struct Coordinator {
    queue: Queue,
    task_count: AtomicI64,
    state: Mutex<State>,
    cv: Condvar,
    block_size: usize,
}

impl Coordinator {
    pub fn new(block_size: usize) -> Self {
        Self {
            queue: Queue::new(),
            task_count: AtomicI64::new(0),
            state: Mutex::new(State { done: false }),
            cv: Condvar::new(),
            block_size: block_size.max(1),
        }
    }

    /// Producer-side: enqueues one raw request line and wakes one idle
    /// worker.
    pub fn enqueue(&self, payload: Vec<u8>) {
        self.queue.enqueue(payload);
        self.task_count.fetch_add(1, Ordering::SeqCst);
        self.cv.notify_one();
    }

    /// Producer-side: signals shutdown. Safe to call more than once.
    ///
    /// Holds the coordinator mutex while flipping `done` and broadcasting,
    /// so no worker can be caught between "checked the predicate" and
    /// "started waiting" without observing the new value.
    pub fn mark_done(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.done = true;
        self.cv.notify_all();
        drop(state);
    }

    fn wait_for_work(&self) {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.task_count.load(Ordering::SeqCst) == 0 && !guard.done {
            let _guard = self.cv.wait(guard);
        }
    }

    /// Drains up to `block_size` items from the queue, decrementing
    /// `task_count` for each one actually taken.
    fn drain_block(&self) -> Vec<Vec<u8>> {
        let mut block = Vec::with_capacity(self.block_size);
        while block.len() < self.block_size {
            match self.queue.dequeue() {
                None => break,
                Some(payload) => {
                    self.task_count.fetch_sub(1, Ordering::SeqCst);
                    block.push(payload);
                }
            }
        }
        block
    }

    fn should_exit(&self) -> bool {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.done && self.task_count.load(Ordering::SeqCst) == 0
    }

    /// Worker-side main loop: wait, drain a block, run it against `feed`,
    /// repeat until shutdown has been observed and the queue is drained.
    ///
    /// Each item is decoded and run against `feed` before `output` is ever
    /// locked, so it is the feed's own RW-mutex, not the output stream,
    /// that lets workers overlap on reads: only the already-rendered line
    /// is written under `output`'s lock, and only for as long as that one
    /// `write_all` takes. Items within one drained block run in FIFO
    /// order, but blocks from different workers may interleave on `output`
    /// arbitrarily, as the protocol allows.
    pub fn worker_loop(&self, feed: &Feed, output: &Mutex<Box<dyn Write + Send>>) {
        loop {
            self.wait_for_work();
            let block = self.drain_block();
            let exit = self.should_exit();

            for payload in &block {
                let line = match protocol::decode_request(payload) {
                    Ok(None) => None,
                    Err(e) => {
                        log::warn!("skipping malformed request: {e}");
                        None
                    }
                    Ok(Some(command)) => {
                        let response = protocol::apply(feed, command);
                        match protocol::render(&response) {
                            Ok(line) => Some(line),
                            Err(e) => {
                                log::error!("failed to serialize response: {e}");
                                None
                            }
                        }
                    }
                };

                if let Some(line) = line {
                    let mut out = output.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(e) = out.write_all(&line) {
                        log::error!("fatal error writing response: {e}");
                    }
                }
            }

            if exit {
                break;
            }
        }
    }
}
