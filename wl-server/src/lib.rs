//! Listening socket, per-client resource table and dispatch loop for a
//! display-server object protocol (spec §4.7).
//!
//! Mirrors `wl-client`'s split (connection/object table) from the other
//! side of the wire: [`Server<D>`] owns the listening socket(s), the
//! globals registry and every connected client's [`object::ResourceTable`];
//! the embedder supplies `D` (arbitrary per-server state) and the
//! interfaces it wants to serve via [`Server::add_global`].

mod client;
mod display;
mod object;

pub use client::ClientId;
pub use display::Server;
