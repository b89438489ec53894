//! A single-user "feed" server: reads one JSON request per line from an
//! input stream and writes one JSON response per line to an output
//! stream. The surface protocol is thin; the engineering is in four
//! composed concurrency primitives:
//!
//! - [`rwlock`] — a bounded reader/writer mutex built from one
//!   [`Mutex`](std::sync::Mutex) and one
//!   [`Condvar`](std::sync::Condvar).
//! - [`feed`] — a timestamp-sorted linked list of posts, guarded by
//!   [`rwlock::RwLock`].
//! - [`queue`] — an unbounded, lock-free Michael-Scott FIFO queue of
//!   pending request payloads.
//! - [`coordinator`] — the producer/worker-pool protocol that drains
//!   [`queue::Queue`] in bounded blocks and shuts down cleanly on `DONE`.
//!
//! [`protocol`] and [`error`] are the thin JSON/error glue connecting
//! those four pieces to the outside world.

pub mod coordinator;
pub mod error;
pub mod feed;
pub mod protocol;
pub mod queue;
pub mod rwlock;

use crate::coordinator::Coordinator;
use crate::feed::Feed;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;

/// Runs the sequential driver: a single thread processes each request
/// inline as it is read, with no queue and no worker threads. Feed
/// operations still go through the feed's [`rwlock::RwLock`] for
/// uniformity with the concurrent path, even though there is never any
/// contention on it in this mode.
pub fn run_sequential<R: BufRead, W: Write>(
    feed: &Feed,
    input: R,
    mut output: W,
) -> std::io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match protocol::peek_command(line.as_bytes()) {
            Ok(command) if command == "DONE" => break,
            Ok(_) => protocol::dispatch(feed, line.as_bytes(), &mut output)?,
            Err(e) => log::warn!("skipping malformed request: {e}"),
        }
    }
    Ok(())
}

/// Runs the concurrent driver: the calling thread acts as the producer,
/// `workers` worker threads are spawned up front, and `block_size` caps how
/// many items a worker drains from the queue per wakeup.
///
/// `input` is read to completion or until a `DONE` line is seen, whichever
/// comes first; either way, shutdown is then signaled and every worker is
/// joined before returning.
pub fn run_concurrent<R: BufRead, W: Write + Send + 'static>(
    feed: Arc<Feed>,
    workers: usize,
    block_size: usize,
    input: R,
    output: W,
) -> std::io::Result<()> {
    let coordinator = Arc::new(Coordinator::new(block_size));
    let output: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(output)));

    let handles: Vec<_> = (0..workers.max(1))
        .map(|_| {
            let coordinator = coordinator.clone();
            let feed = feed.clone();
            let output = output.clone();
            thread::spawn(move || coordinator.worker_loop(&feed, &output))
        })
        .collect();

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match protocol::peek_command(line.as_bytes()) {
            Ok(command) if command == "DONE" => break,
            Ok(_) => coordinator.enqueue(line.into_bytes()),
            Err(e) => log::warn!("skipping malformed request: {e}"),
        }
    }

    // Covers both an explicit DONE and stdin closing without one: either
    // way, every worker must be released from its wait.
    coordinator.mark_done();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{self, Cursor};

    #[derive(Clone)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap_or_else(|e| e.into_inner()).write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sequential_end_to_end_scenario() {
        let feed = Feed::new();
        let input = b"{\"command\":\"ADD\",\"id\":1,\"body\":\"hi\",\"timestamp\":10}\n\
                      {\"command\":\"FEED\",\"id\":2}\n\
                      {\"command\":\"DONE\"}\n"
            .to_vec();
        let mut output = Vec::new();

        run_sequential(&feed, Cursor::new(input), &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), r#"{"success":true,"id":1}"#);
        assert_eq!(
            lines.next().unwrap(),
            r#"{"id":2,"feed":[{"body":"hi","timestamp":10.0}]}"#
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn sequential_add_remove_contains_scenario() {
        let feed = Feed::new();
        let input = concat!(
            "{\"command\":\"ADD\",\"id\":1,\"body\":\"a\",\"timestamp\":5}\n",
            "{\"command\":\"ADD\",\"id\":2,\"body\":\"b\",\"timestamp\":7}\n",
            "{\"command\":\"REMOVE\",\"id\":3,\"timestamp\":5}\n",
            "{\"command\":\"CONTAINS\",\"id\":4,\"timestamp\":5}\n",
            "{\"command\":\"CONTAINS\",\"id\":5,\"timestamp\":7}\n",
            "{\"command\":\"DONE\"}\n",
        );
        let mut output = Vec::new();

        run_sequential(&feed, Cursor::new(input.as_bytes().to_vec()), &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"success":true,"id":1}"#,
                r#"{"success":true,"id":2}"#,
                r#"{"success":true,"id":3}"#,
                r#"{"success":false,"id":4}"#,
                r#"{"success":true,"id":5}"#,
            ]
        );
    }

    #[test]
    fn sequential_remove_of_missing_post() {
        let feed = Feed::new();
        let input = "{\"command\":\"REMOVE\",\"id\":9,\"timestamp\":42}\n{\"command\":\"DONE\"}\n";
        let mut output = Vec::new();

        run_sequential(&feed, Cursor::new(input.as_bytes().to_vec()), &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().next().unwrap(), r#"{"success":false,"id":9}"#);
    }

    #[test]
    fn feed_ordering_is_newest_first() {
        let feed = Feed::new();
        let input = concat!(
            "{\"command\":\"ADD\",\"id\":1,\"body\":\"a\",\"timestamp\":1}\n",
            "{\"command\":\"ADD\",\"id\":2,\"body\":\"b\",\"timestamp\":3}\n",
            "{\"command\":\"ADD\",\"id\":3,\"body\":\"c\",\"timestamp\":2}\n",
            "{\"command\":\"FEED\",\"id\":99}\n",
            "{\"command\":\"DONE\"}\n",
        );
        let mut output = Vec::new();

        run_sequential(&feed, Cursor::new(input.as_bytes().to_vec()), &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        let feed_line = text.lines().last().unwrap();
        let value: serde_json::Value = serde_json::from_str(feed_line).unwrap();
        let timestamps: Vec<f64> = value["feed"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["timestamp"].as_f64().unwrap())
            .collect();
        assert_eq!(timestamps, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let feed = Feed::new();
        let input = "not json at all\n{\"command\":\"DONE\"}\n";
        let mut output = Vec::new();

        run_sequential(&feed, Cursor::new(input.as_bytes().to_vec()), &mut output).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn concurrent_end_to_end_scenario() {
        let feed = Arc::new(Feed::new());
        let input = concat!(
            "{\"command\":\"ADD\",\"id\":1,\"body\":\"a\",\"timestamp\":5}\n",
            "{\"command\":\"ADD\",\"id\":2,\"body\":\"b\",\"timestamp\":7}\n",
            "{\"command\":\"REMOVE\",\"id\":3,\"timestamp\":5}\n",
            "{\"command\":\"CONTAINS\",\"id\":4,\"timestamp\":5}\n",
            "{\"command\":\"CONTAINS\",\"id\":5,\"timestamp\":7}\n",
            "{\"command\":\"DONE\"}\n",
        );
        let buffer = Arc::new(Mutex::new(Vec::new()));

        run_concurrent(
            feed,
            4,
            2,
            Cursor::new(input.as_bytes().to_vec()),
            SharedBuffer(buffer.clone()),
        )
        .unwrap();

        let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 5);
        for line in text.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            let id = value["id"].as_i64().unwrap();
            let success = value["success"].as_bool().unwrap();
            match id {
                4 => assert!(!success),
                1 | 2 | 3 | 5 => assert!(success),
                other => panic!("unexpected id {other}"),
            }
        }
    }
}
