//! A minimal client that connects, binds nothing, and dumps every global it
//! sees to stdout when `$WAYLAND_DEBUG` is set (spec §2 "C6 ... demonstrates
//! a minimal client... the way a real consumer would").
//!
//! Grounded in the teacher's `ewcdbg`: that binary binds a compositor's
//! custom debug extension and prints its events; this one has no such
//! extension to bind, so it just tracks the global list, which is the one
//! thing every client can observe without binding anything at all. Setting
//! `WAYLAND_DEBUG` also turns on `wl-core`'s own wire tracing to stderr, so
//! running this alongside a real display dumps the full message stream.

use wl_client::{Display, GlobalEvent};
use wl_core::wire::IoMode;

fn main() {
    let print_globals = std::env::var_os("WAYLAND_DEBUG").is_some();

    let mut display = match Display::<()>::connect() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("wl-debug: could not connect: {e}");
            std::process::exit(1);
        }
    };

    display.on_global(&mut (), move |_display, _data, event| {
        if !print_globals {
            return;
        }
        match event {
            GlobalEvent::Added(g) => {
                println!("global {:>3}: {} v{}", g.name, g.interface.to_string_lossy(), g.version);
            }
            GlobalEvent::Removed(name) => println!("global {name:>3}: removed"),
        }
    });

    loop {
        if let Err(e) = display.flush(IoMode::Blocking) {
            eprintln!("wl-debug: flush failed: {e}");
            break;
        }
        if let Err(e) = display.recv_events(IoMode::Blocking) {
            eprintln!("wl-debug: connection closed: {e}");
            break;
        }
        display.dispatch_events(&mut ());
    }
}
