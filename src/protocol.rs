//! The JSON request/response schema and the glue that turns a decoded
//! [`Command`] into a [`Feed`](crate::feed::Feed) operation.
//!
//! Decoding is split in two: [`peek_command`] extracts only the `command`
//! field (what the producer needs to decide whether a line is `DONE`), and
//! [`decode_request`] does the full decode (what a worker needs to actually
//! run the command). This mirrors the specification's division of labor
//! between the producer and the workers.

use crate::error::RequestError;
use crate::feed::{Feed, Post};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// A fully decoded, ready-to-run request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    ADD { id: i64, body: String, timestamp: f64 },
    REMOVE { id: i64, timestamp: f64 },
    CONTAINS { id: i64, timestamp: f64 },
    FEED { id: i64 },
}

/// Mirrors [`Command`]'s tag dispatch with a unit fallback for any
/// `command` value that isn't one of the four known ones, so a worker can
/// decode a whole line in a single `serde_json` pass instead of parsing
/// once to inspect the tag and again to fill in the matched variant.
/// [`Command`] itself stays free of the fallback case, since it documents
/// only ever holding a request that is actually ready to run.
#[derive(Deserialize)]
#[serde(tag = "command")]
enum Decoded {
    ADD { id: i64, body: String, timestamp: f64 },
    REMOVE { id: i64, timestamp: f64 },
    CONTAINS { id: i64, timestamp: f64 },
    FEED { id: i64 },
    #[serde(other)]
    Unknown,
}

impl From<Decoded> for Option<Command> {
    fn from(decoded: Decoded) -> Self {
        Some(match decoded {
            Decoded::ADD {
                id,
                body,
                timestamp,
            } => Command::ADD {
                id,
                body,
                timestamp,
            },
            Decoded::REMOVE { id, timestamp } => Command::REMOVE { id, timestamp },
            Decoded::CONTAINS { id, timestamp } => Command::CONTAINS { id, timestamp },
            Decoded::FEED { id } => Command::FEED { id },
            Decoded::Unknown => return None,
        })
    }
}

/// One post as rendered in a `FEED` response.
#[derive(Debug, Serialize)]
pub struct PostView {
    pub body: String,
    pub timestamp: f64,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        PostView {
            body: post.body,
            timestamp: post.timestamp,
        }
    }
}

/// A completed response, ready to serialize as one JSON line.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success { success: bool, id: i64 },
    Feed { id: i64, feed: Vec<PostView> },
}

/// Extracts just the `command` field of a raw input line.
///
/// This is all the producer needs: enough to tell `DONE` apart from
/// everything else. Fields required only by specific commands are left
/// unparsed, to be decoded later by whichever worker drains this line.
pub fn peek_command(line: &[u8]) -> Result<String, RequestError> {
    #[derive(Deserialize)]
    struct Envelope {
        command: String,
    }

    let envelope: Envelope = serde_json::from_slice(line)?;
    Ok(envelope.command)
}

/// Decodes a raw input line into a dispatchable [`Command`].
///
/// Returns `Ok(None)` for a well-formed line whose `command` is not one of
/// `ADD`/`REMOVE`/`CONTAINS`/`FEED` — the protocol's "unknown command is
/// silently ignored" rule. Returns `Err` for anything that fails to parse
/// as JSON, is missing the `command` field, or fails to decode against the
/// schema of a recognized command (including a non-finite `timestamp`).
pub fn decode_request(line: &[u8]) -> Result<Option<Command>, RequestError> {
    let decoded: Decoded = serde_json::from_slice(line)?;
    let command = match Option::<Command>::from(decoded) {
        Some(command) => command,
        None => return Ok(None),
    };
    check_timestamp(&command)?;
    Ok(Some(command))
}

fn check_timestamp(command: &Command) -> Result<(), RequestError> {
    let timestamp = match command {
        Command::ADD { timestamp, .. }
        | Command::REMOVE { timestamp, .. }
        | Command::CONTAINS { timestamp, .. } => Some(*timestamp),
        Command::FEED { .. } => None,
    };

    match timestamp {
        Some(ts) if !ts.is_finite() => Err(RequestError::NonFiniteTimestamp),
        _ => Ok(()),
    }
}

/// Runs a decoded command against `feed`, producing its response.
pub fn apply(feed: &Feed, command: Command) -> Response {
    match command {
        Command::ADD {
            id,
            body,
            timestamp,
        } => Response::Success {
            success: feed.add(body, timestamp),
            id,
        },
        Command::REMOVE { id, timestamp } => Response::Success {
            success: feed.remove(timestamp),
            id,
        },
        Command::CONTAINS { id, timestamp } => Response::Success {
            success: feed.contains(timestamp),
            id,
        },
        Command::FEED { id } => Response::Feed {
            id,
            feed: feed.snapshot().into_iter().map(PostView::from).collect(),
        },
    }
}

/// Serializes `response` as one newline-terminated JSON line, ready to
/// hand to a writer under whatever lock that writer needs.
pub fn render(response: &Response) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    Ok(line)
}

/// Decodes one raw input line and, if it produces a response, writes it to
/// `out` as a single JSON line. Malformed lines are logged and skipped;
/// unknown commands are skipped without comment, per the protocol.
///
/// For the sequential driver only: the concurrent driver's workers run
/// [`decode_request`]/[`apply`]/[`render`] as separate steps so that the
/// feed operation itself runs outside of whatever lock serializes the
/// final write.
pub fn dispatch(feed: &Feed, payload: &[u8], out: &mut dyn Write) -> io::Result<()> {
    match decode_request(payload) {
        Ok(None) => {}
        Err(e) => log::warn!("skipping malformed request: {e}"),
        Ok(Some(command)) => {
            let response = apply(feed, command);
            out.write_all(&render(&response)?)?;
        }
    }
    Ok(())
}
