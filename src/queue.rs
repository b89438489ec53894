//! An unbounded, lock-free FIFO queue of opaque byte payloads.
//!
//! This is the classic two-lock-free Michael & Scott queue: a singly-linked
//! list with atomic `head`/`tail` pointers, where both `enqueue` and
//! `dequeue` are CAS-loops that never block and never fail. `tail` is
//! allowed to lag one node behind the true end of the list; any thread that
//! notices the lag helps advance it before retrying its own operation.
//!
//! Memory reclamation is the one degree of freedom the algorithm leaves
//! open: a node unlinked by a winning CAS may still be observed by a
//! losing, concurrently-running thread that read the old pointer a moment
//! earlier. This implementation resolves it with a small epoch-style
//! scheme rather than leaking: every `enqueue`/`dequeue` call is wrapped in
//! a [`Pin`] that counts itself into `active_ops` for its duration, and
//! unlinked nodes are stashed in a retire list instead of freed
//! immediately. The node is actually deallocated only once some `Pin`
//! observes `active_ops` drop back to zero, at which point no thread can
//! still be holding a stale reference into the list.

use static_assertions::assert_impl_all;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

struct Node {
    /// Ignored for the sentinel node. Cloned rather than moved out on
    /// dequeue, because multiple threads may race to read the same node's
    /// payload before one of them wins the `head` CAS; the losers simply
    /// discard their clone.
    payload: Vec<u8>,
    next: AtomicPtr<Node>,
}

impl Node {
    fn sentinel() -> *mut Node {
        Box::into_raw(Box::new(Node {
            payload: Vec::new(),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    fn new(payload: Vec<u8>) -> *mut Node {
        Box::into_raw(Box::new(Node {
            payload,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// A Michael-Scott lock-free FIFO queue of byte payloads.
pub struct Queue {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    active_ops: AtomicUsize,
    retired: Mutex<Vec<usize>>,
}

// SAFETY: all access to the linked nodes goes through atomic operations or
// happens while `active_ops` guarantees exclusivity (see module docs); the
// raw pointers never escape the queue's own methods.
unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

assert_impl_all!(Queue: Send, Sync);

/// RAII marker for "this thread is currently traversing the list".
struct Pin<'a> {
    queue: &'a Queue,
}

impl<'a> Pin<'a> {
    fn enter(queue: &'a Queue) -> Self {
        queue.active_ops.fetch_add(1, Ordering::AcqRel);
        Pin { queue }
    }
}

impl<'a> Drop for Pin<'a> {
    fn drop(&mut self) {
        if self.queue.active_ops.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.reclaim();
        }
    }
}

impl Queue {
    /// Builds an empty queue.
    pub fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            active_ops: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }

    fn retire(&self, node: *mut Node) {
        self.retired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(node as usize);
    }

    /// Frees every retired node. Only called the instant `active_ops`
    /// returns to zero, which means no thread is mid-traversal and could
    /// still be holding a pointer to one of them.
    fn reclaim(&self) {
        let mut bin = self.retired.lock().unwrap_or_else(|e| e.into_inner());
        for addr in bin.drain(..) {
            // SAFETY: addr was unlinked before being retired and no thread
            // is currently pinned, so this is the sole remaining reference.
            unsafe { drop(Box::from_raw(addr as *mut Node)) };
        }
    }

    /// Appends `payload` to the tail of the queue. Never blocks, never
    /// fails.
    pub fn enqueue(&self, payload: Vec<u8>) {
        let _pin = Pin::enter(self);
        let new_node = Node::new(payload);

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `tail` always points to a node that is either still
            // linked or retired-but-not-yet-freed; we are pinned, so it
            // cannot have been freed out from under us.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }

            if !next.is_null() {
                // tail is lagging; help advance it and retry.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                continue;
            }

            // SAFETY: see above.
            let linked = unsafe {
                (*tail)
                    .next
                    .compare_exchange(
                        ptr::null_mut(),
                        new_node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            };

            if linked {
                // Best-effort: if this fails, the next enqueue or dequeue
                // will notice the lag and advance it for us.
                let _ = self.tail.compare_exchange(
                    tail,
                    new_node,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                return;
            }
        }
    }

    /// Removes and returns the oldest payload, or `None` if the queue was
    /// empty at the linearization point. Never blocks.
    ///
    /// This is the out-of-band equivalent of the in-band empty-queue
    /// sentinel described for the wire protocol: an absent return instead
    /// of a distinguished payload value.
    pub fn dequeue(&self) -> Option<Vec<u8>> {
        let _pin = Pin::enter(self);

        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: pinned, see above.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };

            if head != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head == tail {
                if next.is_null() {
                    return None;
                }
                // tail is lagging; help advance it and retry.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                continue;
            }

            // SAFETY: `next` is non-null and still linked, since `head`
            // has not yet advanced past it.
            let payload = unsafe { (*next).payload.clone() };

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.retire(head);
                return Some(payload);
            }
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no concurrent access.
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let next = unsafe { *(*curr).next.get_mut() };
            unsafe { drop(Box::from_raw(curr)) };
            curr = next;
        }

        let retired = self.retired.get_mut().unwrap_or_else(|e| e.into_inner());
        for addr in retired.drain(..) {
            unsafe { drop(Box::from_raw(addr as *mut Node)) };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn dequeue_on_empty_returns_none() {
        let q = Queue::new();
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn fifo_single_threaded() {
        let q = Queue::new();
        q.enqueue(b"a".to_vec());
        q.enqueue(b"b".to_vec());
        q.enqueue(b"c".to_vec());

        assert_eq!(q.dequeue(), Some(b"a".to_vec()));
        assert_eq!(q.dequeue(), Some(b"b".to_vec()));
        assert_eq!(q.dequeue(), Some(b"c".to_vec()));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn single_producer_multi_consumer_preserves_multiset() {
        const N: usize = 2000;
        const CONSUMERS: usize = 8;

        let q = Arc::new(Queue::new());
        for i in 0..N {
            q.enqueue(i.to_be_bytes().to_vec());
        }

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || {
                    let mut out = Vec::new();
                    while let Some(payload) = q.dequeue() {
                        out.push(usize::from_be_bytes(payload.try_into().unwrap()));
                    }
                    out
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(seen.insert(v), "value {v} dequeued twice");
            }
        }

        assert_eq!(seen.len(), N);
        assert_eq!(seen, (0..N).collect());
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_count() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;
        const CONSUMERS: usize = 4;

        let q = Arc::new(Queue::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.enqueue(format!("{p}-{i}").into_bytes());
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let total = Arc::new(AtomicUsize::new(0));
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let q = q.clone();
                let total = total.clone();
                thread::spawn(move || {
                    let mut count = 0;
                    while q.dequeue().is_some() {
                        count += 1;
                    }
                    total.fetch_add(count, Ordering::SeqCst);
                })
            })
            .collect();
        for c in consumers {
            c.join().unwrap();
        }

        assert_eq!(total.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
    }
}
