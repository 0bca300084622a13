//! Client-side connection, object table and dispatch loop for a
//! display-server object protocol (spec §4.6, C6).
//!
//! [`Display<D>`] is the whole public surface: connect, bind globals, send
//! requests, receive and dispatch events, roundtrip. The object table
//! (`object` module) and the wire/marshaller (`wl-core`) are internal
//! plumbing it builds on.

mod connection;
mod object;

pub use connection::{ConnectError, Display, GlobalEntry, GlobalEvent};
