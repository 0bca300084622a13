//! Static interface descriptions: name, version and the request/event
//! signature tables used to look up a message's argument layout by opcode.

use std::ffi::CStr;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};

/// One argument's wire type, as it appears in a message signature.
///
/// `NewId(iface)` is a statically-typed `new_id`, used by every request and
/// event except `wl_display.bind`, whose target interface is only known
/// at run time, carried inline on the wire (see [`AnyNewId`](ArgType::AnyNewId)).
#[derive(Debug, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Uint,
    Fixed,

    Object,
    OptObject,
    NewId(&'static Interface),
    /// Generic `new_id`: the wire carries `[name][version][id]` instead of
    /// just `[id]`, because the callee doesn't statically know which
    /// interface is being requested (`wl_display.bind`).
    AnyNewId,

    String,
    OptString,
    Array,
    Fd,
}

/// Describes one message (request or event): its name, whether receiving
/// it destroys the target object, and its argument signature.
#[derive(Debug, Clone, Copy)]
pub struct MessageDesc {
    pub name: &'static str,
    pub is_destructor: bool,
    pub signature: &'static [ArgType],
}

/// An immutable interface description: name, version, and the ordered
/// requests/events tables used to look up signatures by opcode.
pub struct Interface {
    pub name: &'static CStr,
    pub version: u32,
    pub requests: &'static [MessageDesc],
    pub events: &'static [MessageDesc],
}

impl PartialEq for &'static Interface {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for &'static Interface {}

impl Hash for &'static Interface {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Debug for Interface {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}
