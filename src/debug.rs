//! `WAYLAND_DEBUG`-gated wire tracing (spec §4.1 "debug logging").
//!
//! Grounded in the teacher's ad hoc `eprintln!`-based tracing (the teacher
//! has no `log`/`tracing` dependency either); the only generalization is
//! gating it behind the env var once, in a `OnceLock`, instead of re-reading
//! the environment on every message.

use std::ffi::CStr;
use std::sync::OnceLock;

use crate::message::Message;
use crate::object::ObjectId;

fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("WAYLAND_DEBUG").is_some())
}

/// Side: which direction a traced message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// A request, travelling client -> server.
    Request,
    /// An event, travelling server -> client.
    Event,
}

impl Side {
    fn arrow(self) -> &'static str {
        match self {
            Side::Request => "->",
            Side::Event => "<-",
        }
    }
}

/// Log one decoded message if `WAYLAND_DEBUG` is set in the environment.
///
/// `interface` and `message_name` are resolved by the caller (the
/// dispatcher, which has the interface table in hand); this module knows
/// nothing about interfaces itself, it just formats.
pub fn trace(side: Side, interface: &CStr, message_name: &str, target: ObjectId, msg: &Message) {
    if !enabled() {
        return;
    }
    eprintln!(
        "[wl] {} {}@{}.{}({} args)",
        side.arrow(),
        interface.to_string_lossy(),
        target,
        message_name,
        msg.args.len(),
    );
}

/// Log a free-form protocol diagnostic (errors, zombie warnings, etc.).
pub fn log(args: std::fmt::Arguments<'_>) {
    if enabled() {
        eprintln!("[wl] {args}");
    }
}

#[macro_export]
macro_rules! wl_debug {
    ($($arg:tt)*) => {
        $crate::debug::log(format_args!($($arg)*))
    };
}
