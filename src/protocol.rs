//! The hand-authored core protocol description (spec §6): `wl_display`
//! (id 1, always alive) and `wl_callback` (the `new_id` type of `sync` and
//! `frame`).
//!
//! The interface-description schema and its code generator are explicitly
//! out of scope (spec §1); a real deployment of this runtime would get this
//! file, and every extension interface beside it, from such a generator (as
//! `ewc-wayland-scanner` does for the teacher). Hand-authoring just the core
//! interface here keeps the crate buildable and testable without depending
//! on that external tool.

use crate::interface::{ArgType, Interface, MessageDesc};

pub mod wl_display {
    use super::*;

    pub mod request {
        pub const SYNC: u16 = 0;
        pub const BIND: u16 = 1;
        pub const FRAME: u16 = 2;
    }

    pub mod event {
        pub const ERROR: u16 = 0;
        pub const GLOBAL: u16 = 1;
        pub const GLOBAL_REMOVE: u16 = 2;
        pub const DELETE_ID: u16 = 3;
        pub const RANGE: u16 = 4;
        pub const KEY: u16 = 5;
        pub const INVALID_OBJECT: u16 = 6;
        pub const INVALID_METHOD: u16 = 7;
        pub const NO_MEMORY: u16 = 8;
    }

    pub static INTERFACE: Interface = Interface {
        name: c"wl_display",
        version: 1,
        requests: &[
            MessageDesc {
                name: "sync",
                is_destructor: false,
                signature: &[ArgType::NewId(&super::wl_callback::INTERFACE)],
            },
            MessageDesc {
                name: "bind",
                is_destructor: false,
                signature: &[ArgType::Uint, ArgType::String, ArgType::Uint, ArgType::AnyNewId],
            },
            MessageDesc {
                name: "frame",
                is_destructor: false,
                signature: &[ArgType::NewId(&super::wl_callback::INTERFACE)],
            },
        ],
        events: &[
            MessageDesc {
                name: "error",
                is_destructor: false,
                signature: &[ArgType::Object, ArgType::Uint, ArgType::String],
            },
            MessageDesc {
                name: "global",
                is_destructor: false,
                signature: &[ArgType::Uint, ArgType::String, ArgType::Uint],
            },
            MessageDesc { name: "global_remove", is_destructor: false, signature: &[ArgType::Uint] },
            MessageDesc { name: "delete_id", is_destructor: false, signature: &[ArgType::Uint] },
            MessageDesc { name: "range", is_destructor: false, signature: &[ArgType::Uint] },
            MessageDesc {
                name: "key",
                is_destructor: false,
                signature: &[ArgType::Uint, ArgType::Uint],
            },
            MessageDesc { name: "invalid_object", is_destructor: false, signature: &[ArgType::Uint] },
            MessageDesc {
                name: "invalid_method",
                is_destructor: false,
                signature: &[ArgType::Uint, ArgType::Uint],
            },
            MessageDesc { name: "no_memory", is_destructor: false, signature: &[] },
        ],
    };
}

/// Pure marker interface: the `new_id` type of `wl_display.sync`/`.frame`.
///
/// It carries no messages of its own -- completion is reported through the
/// display's own `key` event (spec §4.7 "frame list", scenario S3), keyed by
/// the callback's id, rather than through a message addressed to the
/// callback object itself.
pub mod wl_callback {
    use super::*;

    pub static INTERFACE: Interface =
        Interface { name: c"wl_callback", version: 1, requests: &[], events: &[] };
}
