//! A minimal extra interface used only by integration tests (spec §6.1).
//!
//! `wl_spawner` has one request, `announce`, and one event, `spawned`, that
//! carries a server-allocated `new_id`. Binding it and calling `announce`
//! exercises the path spec §4.6 calls "new_id on client-received events":
//! the server introduces an object the client never asked to allocate, at
//! an id out of its own (server) segment, and the client must create a
//! proxy for it purely from the event's `new_id` argument.
//!
//! Gated behind the `test-util` feature so it never ships as part of the
//! public protocol surface.

use crate::interface::{ArgType, Interface, MessageDesc};

pub mod wl_spawner {
    use super::*;

    pub mod request {
        pub const ANNOUNCE: u16 = 0;
    }

    pub mod event {
        pub const SPAWNED: u16 = 0;
    }

    pub static INTERFACE: Interface = Interface {
        name: c"wl_spawner",
        version: 1,
        requests: &[MessageDesc { name: "announce", is_destructor: false, signature: &[] }],
        events: &[MessageDesc {
            name: "spawned",
            is_destructor: false,
            signature: &[ArgType::NewId(&super::wl_spawned::INTERFACE)],
        }],
    };
}

pub mod wl_spawned {
    use super::*;

    pub static INTERFACE: Interface =
        Interface { name: c"wl_spawned", version: 1, requests: &[], events: &[] };
}
