//! Shared wire format, object table and marshaller for a display-server
//! object protocol.
//!
//! This crate has no notion of "client" or "server" on its own: it only
//! knows how to frame messages on a Unix stream socket with passed file
//! descriptors ([`wire`]), how object ids are partitioned and tracked
//! ([`object`]), how interfaces describe their messages ([`interface`]),
//! how arguments are packed/unpacked according to those descriptions
//! ([`message`]), and how to multiplex readiness on a handful of file
//! descriptors ([`event_loop`]). `wl-client` and `wl-server` build the
//! actual connection/dispatch semantics on top.

pub mod debug;
pub mod error;
pub mod event_loop;
pub mod interface;
pub mod message;
pub mod object;
pub mod protocol;
#[cfg(feature = "test-util")]
pub mod protocol_test_iface;
pub mod wire;

pub use error::{DecodeError, SendError};
pub use interface::{ArgType, Interface, MessageDesc};
pub use message::{ArgValue, Fixed, Message, MessageHeader};
pub use object::ObjectId;
pub use wire::{BufferedSocket, IoMode};
