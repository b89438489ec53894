//! Error types for the request protocol and the command-line driver.

use thiserror::Error;

/// Everything that can go wrong while turning one input line into a
/// dispatchable [`crate::protocol::Command`].
///
/// An unrecognized `command` value is deliberately *not* a variant here:
/// per the protocol, an unknown command is silently ignored rather than
/// reported, so [`crate::protocol::decode_request`] represents it as
/// `Ok(None)` instead of an error.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("timestamp must be finite")]
    NonFiniteTimestamp,
}

/// Top-level failure of the `twitter` binary.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("usage: twitter [ <workers:int> <block:int> ]")]
    Usage,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
