//! Error classification (spec §7).
//!
//! The four kinds named in spec §7 are represented here; callers mostly see
//! `std::io::Error` (for transport-fatal and generic protocol failures,
//! following the teacher's `io::Error::other(..)` convention) or
//! [`DecodeError`], which is the one place the spec requires a caller to
//! tell "bad message" apart from "out of memory" (§4.4 step 4, §7).

use std::fmt;

/// Why [`BufferedSocket::recv_message`](crate::wire::BufferedSocket::recv_message)
/// failed to decode a frame.
#[derive(Debug)]
pub enum DecodeError {
    /// The frame violates the wire format: bad alignment, a string missing
    /// its NUL terminator, an array length that doesn't fit, an unknown
    /// object id, and so on.
    Invalid(&'static str),
    /// Decoding would require an allocation that failed, or (server side)
    /// a resource table is exhausted.
    NoMemory,
    /// The underlying socket returned an IO error.
    Io(std::io::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(why) => write!(f, "invalid message: {why}"),
            Self::NoMemory => write!(f, "out of memory while decoding message"),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for std::io::Error {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Io(e) => e,
            other => std::io::Error::other(other.to_string()),
        }
    }
}

/// Returned alongside the un-sent message when `write_message` fails, so
/// the caller can retry instead of losing the request (spec §4.1 `write`).
#[derive(Debug)]
pub struct SendError {
    pub message: crate::message::Message,
    pub error: std::io::Error,
}

/// The four logical error kinds named in spec §7. Used internally to pick
/// which event to reply with server-side (`invalid_object`/
/// `invalid_method`/`no_memory`) and whether a client-side failure is
/// fatal to the whole display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportFatal,
    ProtocolInvalid,
    OutOfMemory,
    UserProgramming,
}
