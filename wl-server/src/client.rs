//! Per-client connection state (spec §3 "Client (server-side view)", §4.7).
//!
//! Grounded in `original_source/wayland-server.c`'s `struct wl_client`
//! (`id_count`, `resource_list`, `connection`) and in the teacher's
//! `client::Connection` for the Rust shape (buffered socket + outgoing
//! event queue + resource table), adapted to own its resources directly
//! instead of through `Rc<RefCell<_>>` (spec §9 "model as arena+index").

use std::collections::VecDeque;
use std::io;
use std::num::NonZeroU64;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use wl_core::interface::ArgType;
use wl_core::message::ArgValue;
use wl_core::object::ObjectId;
use wl_core::protocol::wl_display;
use wl_core::wire::{BufferedSocket, IoMode};
use wl_core::{wl_debug, DecodeError, Message, MessageHeader};

use crate::object::ResourceTable;

/// Identifies one connected client for the lifetime of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub(crate) NonZeroU64);

/// Block size and low-water mark for server-segment id range grants (spec
/// §4.7 "grant another 256", §6 "256 additional ids at a time", §9 open
/// question (c) "low-water of 64... must be >=1 and <grant size").
const GRANT_SIZE: u32 = 256;
const LOW_WATER: u32 = 64;

/// Outcome of decoding the next frame on a client's socket: either a fully
/// typed request, or one of the three protocol-violation replies spec
/// §4.7 "Incoming request handling" requires.
pub(crate) enum RecvOutcome {
    Message(Message),
    InvalidObject(ObjectId),
    InvalidMethod(ObjectId, u16),
    NoMemory(ObjectId),
}

pub(crate) struct ClientConnection<D> {
    socket: BufferedSocket,
    pub(crate) resources: ResourceTable<D>,
    events_queue: VecDeque<Message>,
    granted: u32,
    ids_used: u32,
}

impl<D> AsRawFd for ClientConnection<D> {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl<D> ClientConnection<D> {
    pub(crate) fn new(stream: UnixStream) -> Self {
        Self {
            socket: BufferedSocket::from(stream),
            resources: ResourceTable::new(),
            events_queue: VecDeque::new(),
            granted: 0,
            ids_used: 0,
        }
    }

    pub(crate) fn queue_event(&mut self, target: ObjectId, opcode: u16, args: Vec<ArgValue>) {
        let interface = if target == ObjectId::DISPLAY {
            Some(&wl_display::INTERFACE)
        } else {
            self.resources.get(target).map(|r| r.interface)
        };
        let msg = Message { header: MessageHeader { object_id: target, size: 0, opcode }, args };
        if let Some(interface) = interface {
            let name = interface.events.get(opcode as usize).map(|d| d.name).unwrap_or("?");
            wl_core::debug::trace(wl_core::debug::Side::Event, interface.name, name, target, &msg);
        }
        self.events_queue.push_back(msg);
    }

    pub(crate) fn flush(&mut self, mode: IoMode) -> io::Result<()> {
        while let Some(msg) = self.events_queue.pop_front() {
            if let Err(e) = self.socket.write_message(msg, mode) {
                self.events_queue.push_front(e.message);
                return Err(e.error);
            }
        }
        self.socket.flush(mode)
    }

    fn grant_range(&mut self) {
        self.granted += GRANT_SIZE;
        self.queue_event(ObjectId::DISPLAY, wl_display::event::RANGE, vec![ArgValue::Uint(self.granted)]);
    }

    /// Spec §4.7 "Client creation... grant the first 256 ids by emitting a
    /// `range` event and bumping the client's granted counter".
    pub(crate) fn initial_grant(&mut self) {
        self.grant_range();
    }

    /// Spec §4.7 "Resource add... when the client's granted id count drops
    /// below a low-water (64), grant another 256". Tracked as
    /// `granted - ids_used` rather than the original's post-decrement
    /// counter, which is equivalent but easier to reason about; see
    /// DESIGN.md for the exact numbers this reproduces (scenario S6).
    pub(crate) fn note_resource_added(&mut self) {
        self.ids_used += 1;
        if self.granted - self.ids_used <= LOW_WATER {
            self.grant_range();
        }
    }

    /// Decode the next frame (spec §4.7 "Incoming request handling").
    pub(crate) fn recv_request(&mut self, mode: IoMode) -> io::Result<RecvOutcome> {
        let header = self.socket.peek_message_header(mode).map_err(io::Error::from)?;
        let target = header.object_id;

        let (interface, _version) = if target == ObjectId::DISPLAY {
            (&wl_display::INTERFACE, 1)
        } else {
            match self.resources.get(target) {
                Some(res) => (res.interface, res.version),
                None => {
                    self.socket.consume_frame(header, mode).map_err(io::Error::from)?;
                    return Ok(RecvOutcome::InvalidObject(target));
                }
            }
        };

        let Some(desc) = interface.requests.get(header.opcode as usize) else {
            self.socket.consume_frame(header, mode).map_err(io::Error::from)?;
            return Ok(RecvOutcome::InvalidMethod(target, header.opcode));
        };

        match self.socket.recv_message(header, desc.signature, mode) {
            Ok(msg) => {
                wl_core::debug::trace(wl_core::debug::Side::Request, interface.name, desc.name, target, &msg);
                Ok(RecvOutcome::Message(msg))
            }
            Err(DecodeError::Invalid(reason)) => {
                wl_debug!("client sent an invalid request: {reason}");
                Ok(RecvOutcome::InvalidMethod(target, header.opcode))
            }
            Err(DecodeError::NoMemory) => Ok(RecvOutcome::NoMemory(target)),
            Err(e @ DecodeError::Io(_)) => Err(e.into()),
        }
    }

    /// Second decode pass over a request's arguments (spec §4.6/§4.7
    /// "new_id... allocate a proxy/resource at the already-assigned id"):
    /// registers every statically-typed `new_id` argument as a resource.
    /// `bind`'s generic `AnyNewId` is handled separately by the caller,
    /// since it needs the named global's interface, not the signature's.
    pub(crate) fn register_new_ids(
        &mut self,
        msg: &Message,
        signature: &[ArgType],
        target_version: u32,
    ) -> Result<usize, DecodeError> {
        let mut n = 0;
        for (arg, ty) in msg.args.iter().zip(signature) {
            if let (ArgValue::NewId(id), ArgType::NewId(iface)) = (arg, ty) {
                self.resources.insert_client_provided(*id, iface, target_version)?;
                n += 1;
            }
        }
        Ok(n)
    }
}
