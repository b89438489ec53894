//! A timestamp-sorted singly-linked list of posts, guarded by a
//! [`RwLock`](crate::rwlock::RwLock).
//!
//! The list always contains two sentinel posts: one with timestamp
//! `-infinity` at the head and one with timestamp `+infinity` at the tail.
//! Every real post sits strictly between them. Keeping the sentinels alive
//! for the lifetime of the feed removes every `None`/boundary check from the
//! walk loop used by all four operations below: a search always terminates,
//! at the latest, at the `+infinity` sentinel.

use crate::rwlock::RwLock;

struct Node {
    body: String,
    timestamp: f64,
    next: Option<Box<Node>>,
}

/// One entry of a [`Feed::snapshot`] result.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub body: String,
    pub timestamp: f64,
}

/// A sorted feed of posts, safe to share across threads.
///
/// `Add`, `Remove`, and `Contains` are O(n) walks from the head; this
/// matches the specification's walk-based description and keeps the
/// structure a plain singly-linked list rather than something
/// skip-list-shaped, which the target data volumes do not warrant.
pub struct Feed {
    head: RwLock<Node>,
}

impl Feed {
    /// Builds an empty feed: just the two sentinels.
    pub fn new() -> Self {
        let tail = Node {
            body: String::new(),
            timestamp: f64::INFINITY,
            next: None,
        };
        let head = Node {
            body: String::new(),
            timestamp: f64::NEG_INFINITY,
            next: Some(Box::new(tail)),
        };
        Self {
            head: RwLock::new(head),
        }
    }

    /// Inserts `body` at `timestamp`, keeping the list sorted ascending.
    ///
    /// Returns `false` without modifying the feed if a post with the exact
    /// same `timestamp` already exists. The specification leaves the
    /// duplicate-timestamp behavior to the implementer (see `DESIGN.md`);
    /// rejecting the duplicate as a no-op is what this crate chose, because
    /// it keeps the strict-inequality invariant unconditional rather than
    /// making it a caller obligation.
    pub fn add(&self, body: String, timestamp: f64) -> bool {
        debug_assert!(timestamp.is_finite());
        let mut head = self.head.write();

        let mut pred: &mut Node = &mut head;
        while pred.next.as_ref().unwrap().timestamp < timestamp {
            pred = &mut **pred.next.as_mut().unwrap();
        }

        if pred.next.as_ref().unwrap().timestamp == timestamp {
            return false;
        }

        let new_node = Box::new(Node {
            body,
            timestamp,
            next: pred.next.take(),
        });
        pred.next = Some(new_node);
        true
    }

    /// Removes the post with the given `timestamp`, if present.
    ///
    /// Returns whether a post was actually removed.
    pub fn remove(&self, timestamp: f64) -> bool {
        let mut head = self.head.write();

        let mut pred: &mut Node = &mut head;
        while pred.next.as_ref().unwrap().timestamp < timestamp {
            pred = &mut **pred.next.as_mut().unwrap();
        }

        if pred.next.as_ref().unwrap().timestamp != timestamp {
            return false;
        }

        let removed = pred.next.take().unwrap();
        pred.next = removed.next;
        true
    }

    /// Returns whether a post with the given `timestamp` is currently
    /// present.
    pub fn contains(&self, timestamp: f64) -> bool {
        let head = self.head.read();

        let mut curr: &Node = &head;
        while curr.next.as_ref().unwrap().timestamp < timestamp {
            curr = &**curr.next.as_ref().unwrap();
        }

        curr.next.as_ref().unwrap().timestamp == timestamp
    }

    /// Returns every post currently in the feed, newest first.
    pub fn snapshot(&self) -> Vec<Post> {
        let head = self.head.read();

        let mut out = Vec::new();
        let mut curr: &Node = &head;
        while let Some(next) = curr.next.as_ref() {
            if next.timestamp.is_finite() {
                out.push(Post {
                    body: next.body.clone(),
                    timestamp: next.timestamp,
                });
            }
            curr = &**next;
        }
        out.reverse();
        out
    }
}

impl Default for Feed {
    fn default() -> Self {
        Self::new()
    }
}
