//! Typed argument values and the message envelope.

use std::ffi::CString;
use std::fmt::{self, Debug, Formatter};
use std::os::fd::OwnedFd;

use crate::object::ObjectId;

/// Header of a wire frame: `[object_id: u32][size<<16 | opcode: u32]`.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub object_id: ObjectId,
    pub size: u16,
    pub opcode: u16,
}

impl MessageHeader {
    pub const WIRE_SIZE: u16 = 8;
}

/// A fully decoded (or not-yet-sent) message: its header and its typed
/// argument list, in signature order.
#[derive(Debug)]
pub struct Message {
    pub header: MessageHeader,
    pub args: Vec<ArgValue>,
}

/// Signed 24.8 fixed-point number (spec §6 `f`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fixed(pub i32);

impl From<i32> for Fixed {
    fn from(value: i32) -> Self {
        Self(value * 256)
    }
}

impl From<f64> for Fixed {
    fn from(value: f64) -> Self {
        Self((value * 256.0).round() as i32)
    }
}

impl Fixed {
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 256.0
    }

    pub fn as_int(self) -> i32 {
        self.0 / 256
    }
}

impl Debug for Fixed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.as_f64().fmt(f)
    }
}

/// A decoded/to-be-encoded argument value, one variant per [`ArgType`](crate::ArgType).
#[derive(Debug)]
pub enum ArgValue {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),

    Object(ObjectId),
    OptObject(Option<ObjectId>),
    NewId(ObjectId),
    /// Generic `new_id`, used only by `wl_display.bind`: the interface is
    /// carried inline on the wire as a name + version instead of being
    /// known from the signature.
    AnyNewId {
        interface: CString,
        version: u32,
        id: ObjectId,
    },

    String(CString),
    OptString(Option<CString>),
    Array(Vec<u8>),
    Fd(OwnedFd),
}

fn len_with_padding(len: usize) -> u16 {
    let padding = (4 - (len % 4)) % 4;
    (4 + len + padding) as u16
}

impl ArgValue {
    /// Size in bytes this argument contributes to the frame, including its
    /// own length prefix and padding (spec §4.1 "size counts the whole
    /// frame ... padded to a multiple of 4").
    pub fn wire_size(&self) -> u16 {
        match self {
            Self::Int(_)
            | Self::Uint(_)
            | Self::Fixed(_)
            | Self::Object(_)
            | Self::OptObject(_)
            | Self::NewId(_)
            | Self::OptString(None) => 4,
            Self::AnyNewId { interface, .. } => {
                len_with_padding(interface.to_bytes_with_nul().len()) + 8
            }
            Self::String(s) | Self::OptString(Some(s)) => {
                len_with_padding(s.to_bytes_with_nul().len())
            }
            Self::Array(a) => len_with_padding(a.len()),
            Self::Fd(_) => 0,
        }
    }
}
