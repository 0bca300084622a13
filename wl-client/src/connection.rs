//! The client-side runtime (spec §4.6, C6): connect, request send, event
//! receive, dispatch, and the `sync` roundtrip primitive.
//!
//! Grounded in `wayrs-client::connection::Connection<D>` for the overall
//! shape (generic over a user `D`ata type, `recv_events`/`dispatch_events`
//! split, take-out/put-back callback dance) and in
//! `original_source/wayland-client.c` (`wl_display_connect`,
//! `wl_display_iterate`, `wl_display_roundtrip`) for exact connect-time and
//! roundtrip semantics. Differs from both in one load-bearing way: this
//! protocol's `wl_callback` carries no event of its own, so roundtrip/frame
//! completion is detected by matching the *display's* `key` event against
//! the callback's id (spec §4.7 "frame list", scenario S3) rather than by
//! an event addressed to the callback object.

use std::collections::VecDeque;
use std::env;
use std::ffi::CString;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use wl_core::message::ArgValue;
use wl_core::object::ObjectId;
use wl_core::protocol::{wl_callback, wl_display};
use wl_core::wire::{BufferedSocket, IoMode};
use wl_core::{wl_debug, Interface, Message, MessageHeader};

use crate::object::{ClientObjectTable, GenericCallback};

/// An error that can occur while connecting (spec scenario S1).
#[derive(Debug)]
pub enum ConnectError {
    /// Neither `$WAYLAND_SOCKET` nor (`$XDG_RUNTIME_DIR` and `$WAYLAND_DISPLAY`) named a socket.
    NotEnoughEnvVars,
    Io(io::Error),
}

impl std::error::Error for ConnectError {}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnoughEnvVars => f.write_str("neither $WAYLAND_SOCKET nor $XDG_RUNTIME_DIR/$WAYLAND_DISPLAY are set"),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl From<io::Error> for ConnectError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// One entry of the global list (spec §3 "Global").
#[derive(Debug, Clone)]
pub struct GlobalEntry {
    pub name: u32,
    pub interface: CString,
    pub version: u32,
}

/// A notification passed to global listeners. Owns its payload (rather than
/// borrowing the list entry) so it can be replayed to a freshly-registered
/// listener and broadcast to every listener without fighting the borrow
/// checker over `&mut Display`.
#[derive(Debug, Clone)]
pub enum GlobalEvent {
    Added(GlobalEntry),
    Removed(u32),
}

type GlobalListener<D> = Box<dyn FnMut(&mut Display<D>, &mut D, GlobalEvent)>;

/// A client-side connection: the buffered socket, the object table, queued
/// but not-yet-dispatched events, and the tracked global list.
///
/// Set `WAYLAND_DEBUG` in the environment to trace every marshalled/
/// demarshalled message to stderr.
pub struct Display<D> {
    socket: BufferedSocket,
    objects: ClientObjectTable<D>,
    event_queue: VecDeque<Message>,
    requests_queue: VecDeque<Message>,
    globals: Vec<GlobalEntry>,
    global_listeners: Vec<GlobalListener<D>>,
    break_dispatch: bool,
    fatal: Option<String>,
}

impl<D> AsRawFd for Display<D> {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn connect_stream() -> Result<UnixStream, ConnectError> {
    if let Some(fd_str) = env::var_os("WAYLAND_SOCKET") {
        let raw: RawFd = fd_str
            .to_str()
            .and_then(|s| s.parse().ok())
            .ok_or(ConnectError::NotEnoughEnvVars)?;
        set_cloexec(raw)?;
        return Ok(UnixStream::from(unsafe { OwnedFd::from_raw_fd(raw) }));
    }

    let runtime_dir = env::var_os("XDG_RUNTIME_DIR").ok_or(ConnectError::NotEnoughEnvVars)?;
    let display = env::var_os("WAYLAND_DISPLAY").unwrap_or_else(|| "wayland-0".into());
    let mut path = PathBuf::from(runtime_dir);
    path.push(display);
    let stream = UnixStream::connect(&path).map_err(ConnectError::Io)?;
    set_cloexec(stream.as_raw_fd())?;
    Ok(stream)
}

impl<D> Display<D> {
    /// Connect per spec §4.6/§6: adopt `$WAYLAND_SOCKET` if set, otherwise
    /// dial `$XDG_RUNTIME_DIR/$WAYLAND_DISPLAY` (default `wayland-0`).
    pub fn connect() -> Result<Self, ConnectError> {
        Ok(Self::from_stream(connect_stream()?))
    }

    /// Wrap an already-connected stream directly, skipping environment
    /// resolution -- used by tests to fake a server with `UnixStream::pair`.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            socket: BufferedSocket::from(stream),
            objects: ClientObjectTable::new(&wl_display::INTERFACE),
            event_queue: VecDeque::new(),
            requests_queue: VecDeque::new(),
            globals: Vec::new(),
            global_listeners: Vec::new(),
            break_dispatch: false,
            fatal: None,
        }
    }

    pub fn globals(&self) -> &[GlobalEntry] {
        &self.globals
    }

    /// Register a global listener, immediately replaying every
    /// already-known global to it in announcement order (spec §4.6 "notify
    /// new listeners retroactively with the current list, preserving
    /// announcement order").
    pub fn on_global<F>(&mut self, data: &mut D, mut cb: F)
    where
        F: FnMut(&mut Display<D>, &mut D, GlobalEvent) + 'static,
    {
        for g in self.globals.clone() {
            cb(self, data, GlobalEvent::Added(g));
        }
        self.global_listeners.push(Box::new(cb));
    }

    /// Broadcast one event to every registered global listener. Listeners
    /// are taken out of `self` for the duration of the call (the same
    /// take/invoke/put-back dance used for per-object callbacks below) so
    /// that a listener can itself touch `self` without a borrow conflict.
    fn fire_global_event(&mut self, data: &mut D, event: GlobalEvent) {
        let mut listeners = std::mem::take(&mut self.global_listeners);
        for cb in &mut listeners {
            cb(self, data, event.clone());
        }
        self.global_listeners = listeners;
    }

    /// Allocate a new client-segment object of `interface`/`version` and
    /// register `cb` to run for every event addressed to it.
    pub fn new_object<F>(&mut self, interface: &'static Interface, version: u32, cb: F) -> io::Result<ObjectId>
    where
        F: FnMut(&mut Display<D>, &mut D, ObjectId, Message) + 'static,
    {
        let id = self.objects.alloc_client_id(interface, version)?;
        self.objects.set_callback(id, Box::new(cb));
        Ok(id)
    }

    /// Allocate a new client-segment object without a callback.
    pub fn new_object_silent(&mut self, interface: &'static Interface, version: u32) -> io::Result<ObjectId> {
        self.objects.alloc_client_id(interface, version)
    }

    /// (Re)set the callback for an already-allocated object.
    pub fn set_callback<F>(&mut self, id: ObjectId, cb: F) -> bool
    where
        F: FnMut(&mut Display<D>, &mut D, ObjectId, Message) + 'static,
    {
        self.objects.set_callback(id, Box::new(cb))
    }

    /// Queue a request for `target`, marking it a destructor (and
    /// zombifying/freeing `target` immediately) if `interface` says so for
    /// `opcode` (spec §4.6 "Request send").
    pub fn request(&mut self, target: ObjectId, interface: &'static Interface, opcode: u16, args: Vec<ArgValue>) {
        let desc = interface.requests.get(opcode as usize);
        let is_destructor = desc.map(|m| m.is_destructor).unwrap_or(false);

        let msg = Message { header: MessageHeader { object_id: target, size: 0, opcode }, args };
        wl_core::debug::trace(
            wl_core::debug::Side::Request,
            interface.name,
            desc.map(|d| d.name).unwrap_or("?"),
            target,
            &msg,
        );
        self.requests_queue.push_back(msg);

        if is_destructor {
            self.objects.destroy_local(target);
        }
    }

    /// Explicitly destroy a proxy without a wire destructor request (used
    /// for the one-shot callbacks created by `sync`/`frame`, which have no
    /// request of their own to destroy them -- they're destroyed when the
    /// `key` event matching their id fires).
    pub fn destroy_local(&mut self, id: ObjectId) {
        self.objects.destroy_local(id);
    }

    /// Issue `wl_display.bind` for the global named `name`, of the given
    /// `interface`/`version` (spec §6 `bind(name:u, interface:s, version:u, new_id)`).
    pub fn bind(&mut self, name: u32, interface: &'static Interface, version: u32) -> io::Result<ObjectId> {
        let id = self.objects.alloc_client_id(interface, version)?;
        let msg = Message {
            header: MessageHeader { object_id: ObjectId::DISPLAY, size: 0, opcode: wl_display::request::BIND },
            args: vec![
                ArgValue::Uint(name),
                ArgValue::AnyNewId {
                    interface: interface.name.to_owned(),
                    version,
                    id,
                },
            ],
        };
        let desc = wl_display::INTERFACE.requests[wl_display::request::BIND as usize];
        wl_core::debug::trace(wl_core::debug::Side::Request, wl_display::INTERFACE.name, desc.name, ObjectId::DISPLAY, &msg);
        self.requests_queue.push_back(msg);
        Ok(id)
    }

    /// Convenience over `bind`: find the first global whose interface name
    /// matches (mirrors `wayrs-client`'s `bind_singleton`).
    pub fn bind_singleton(&mut self, interface: &'static Interface, version: u32) -> io::Result<ObjectId> {
        let name = self
            .globals
            .iter()
            .find(|g| g.interface.as_c_str() == interface.name)
            .map(|g| g.name)
            .ok_or_else(|| io::Error::other(format!("no global advertised for {:?}", interface.name)))?;
        self.bind(name, interface, version)
    }

    /// Issue `sync` (spec §4.6 "Roundtrip", §6 `sync(new_id<callback>)`).
    /// `cb` runs once, with the server's `key` timestamp, when the matching
    /// `key` event arrives; the callback object is then destroyed.
    pub fn sync<F>(&mut self, cb: F) -> io::Result<ObjectId>
    where
        F: FnMut(&mut Display<D>, &mut D, u32) + 'static,
    {
        self.frame_like(wl_display::request::SYNC, cb)
    }

    /// Issue `frame` (spec §6 `frame(new_id<callback>)`): same completion
    /// mechanism as `sync`, conventionally used to wait for the next
    /// `post_frame(time)` from the server rather than "caught up".
    pub fn frame<F>(&mut self, cb: F) -> io::Result<ObjectId>
    where
        F: FnMut(&mut Display<D>, &mut D, u32) + 'static,
    {
        self.frame_like(wl_display::request::FRAME, cb)
    }

    fn frame_like<F>(&mut self, opcode: u16, cb: F) -> io::Result<ObjectId>
    where
        F: FnMut(&mut Display<D>, &mut D, u32) + 'static,
    {
        let id = self.objects.alloc_client_id(&wl_callback::INTERFACE, 1)?;
        self.objects.set_callback(
            id,
            Box::new(move |display, data, _target, msg| {
                if let [ArgValue::Uint(_key), ArgValue::Uint(time)] = msg.args.as_slice() {
                    cb(display, data, *time);
                }
            }),
        );
        let msg = Message {
            header: MessageHeader { object_id: ObjectId::DISPLAY, size: 0, opcode },
            args: vec![ArgValue::NewId(id)],
        };
        let desc = wl_display::INTERFACE.requests[opcode as usize];
        wl_core::debug::trace(wl_core::debug::Side::Request, wl_display::INTERFACE.name, desc.name, ObjectId::DISPLAY, &msg);
        self.requests_queue.push_back(msg);
        Ok(id)
    }

    /// Flush queued requests to the socket (spec §5 "Backpressure").
    pub fn flush(&mut self, mode: IoMode) -> io::Result<()> {
        while let Some(msg) = self.requests_queue.pop_front() {
            if let Err(e) = self.socket.write_message(msg, mode) {
                self.requests_queue.push_front(e.message);
                return Err(e.error);
            }
        }
        self.socket.flush(mode)
    }

    /// Spec §4.6 "further `iterate` calls return `EPROTO`" /
    /// §7/scenario S5 ("`errno=EPROTO`").
    fn check_fatal(&self) -> io::Result<()> {
        if let Some(reason) = &self.fatal {
            wl_debug!("display fatal, refusing further iterate: {reason}");
            return Err(io::Error::from_raw_os_error(libc::EPROTO));
        }
        Ok(())
    }

    /// Decode exactly one incoming message (spec §4.6 `iterate`), registering
    /// any `new_id` arguments it carries as new server-allocated proxies.
    ///
    /// Loops (rather than recursing) over zombie/unknown targets so that a
    /// long run of drained frames for a destroyed object can't blow the
    /// stack (spec §3 "messages targeting ZOMBIE are silently drained").
    fn recv_one(&mut self, mode: IoMode) -> io::Result<Message> {
        loop {
            self.check_fatal()?;
            let header = self.socket.peek_message_header(mode)?;

            let (interface, version) = if header.object_id == ObjectId::DISPLAY {
                (&wl_display::INTERFACE, 1)
            } else {
                match self.objects.get(header.object_id) {
                    Some(obj) => (obj.interface, obj.version),
                    None => {
                        self.socket.consume_frame(header, mode)?;
                        wl_debug!("event for unknown/zombie object {} drained", header.object_id);
                        continue;
                    }
                }
            };

            let desc = match interface.events.get(header.opcode as usize) {
                Some(desc) => desc,
                None => {
                    self.socket.consume_frame(header, mode)?;
                    self.fatal = Some(format!(
                        "event opcode {} out of range for {:?}",
                        header.opcode, interface.name
                    ));
                    return Err(io::Error::from_raw_os_error(libc::EPROTO));
                }
            };
            let signature = desc.signature;

            let msg = self.socket.recv_message(header, signature, mode)?;

            for (arg, ty) in msg.args.iter().zip(signature) {
                if let (ArgValue::NewId(id), wl_core::ArgType::NewId(target_iface)) = (arg, ty) {
                    self.objects.register_server_object(*id, target_iface, version);
                }
            }

            wl_core::debug::trace(wl_core::debug::Side::Event, interface.name, desc.name, header.object_id, &msg);

            return Ok(msg);
        }
    }

    /// Receive events from the socket into the queue (spec §4.6 `iterate`).
    /// Blocks at least once in `Blocking` mode; drains everything currently
    /// available without blocking in `NonBlocking` mode.
    pub fn recv_events(&mut self, mut mode: IoMode) -> io::Result<()> {
        let mut at_least_one = false;
        loop {
            let msg = match self.recv_one(mode) {
                Ok(msg) => msg,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && at_least_one => return Ok(()),
                Err(e) => return Err(e),
            };
            at_least_one = true;
            mode = IoMode::NonBlocking;
            self.event_queue.push_back(msg);
        }
    }

    /// Drain and invoke callbacks for every queued event (spec §4.5
    /// "handlers run to completion in wire order").
    pub fn dispatch_events(&mut self, data: &mut D) {
        self.break_dispatch = false;

        while let Some(msg) = self.event_queue.pop_front() {
            if msg.header.object_id == ObjectId::DISPLAY {
                self.dispatch_display_event(msg, data);
            } else {
                self.dispatch_object_event(msg, data);
            }
            if self.break_dispatch {
                break;
            }
        }
    }

    /// Handle one event addressed to the display itself: the core protocol
    /// events of spec §6 (`error`, `global`, `global_remove`, `delete_id`,
    /// `range`, `key`, `invalid_object`, `invalid_method`, `no_memory`).
    fn dispatch_display_event(&mut self, msg: Message, data: &mut D) {
        use wl_display::event;
        match msg.header.opcode {
            event::ERROR => {
                if let [ArgValue::Object(obj), ArgValue::Uint(code), ArgValue::String(m)] = &msg.args[..] {
                    self.fatal = Some(format!("object {obj} error {code}: {}", m.to_string_lossy()));
                }
            }
            event::GLOBAL => {
                if let [ArgValue::Uint(name), ArgValue::String(interface), ArgValue::Uint(version)] = &msg.args[..] {
                    let entry = GlobalEntry { name: *name, interface: interface.clone(), version: *version };
                    self.globals.push(entry.clone());
                    self.fire_global_event(data, GlobalEvent::Added(entry));
                }
            }
            event::GLOBAL_REMOVE => {
                if let [ArgValue::Uint(name)] = &msg.args[..] {
                    let name = *name;
                    self.globals.retain(|g| g.name != name);
                    self.fire_global_event(data, GlobalEvent::Removed(name));
                }
            }
            event::DELETE_ID => {
                if let [ArgValue::Uint(id)] = &msg.args[..] {
                    if let Some(id) = ObjectId::new(*id) {
                        self.objects.handle_delete_id(id);
                    }
                }
            }
            event::RANGE => {
                if let [ArgValue::Uint(base)] = &msg.args[..] {
                    wl_debug!("server granted server-id range base {base}");
                }
            }
            event::KEY => {
                // `key`'s first argument is the id of the `sync`/`frame`
                // callback it completes, not a real object id of its own
                // (spec §4.7 "frame list", scenario S3) -- the callback's
                // handler was stashed under that id when `sync`/`frame`
                // was issued (see `frame_like` below).
                let key_and_time = match &msg.args[..] {
                    [ArgValue::Uint(key), ArgValue::Uint(time)] => Some((*key, *time)),
                    _ => None,
                };
                if let Some((key, _time)) = key_and_time {
                    if let Some(id) = ObjectId::new(key) {
                        if let Some(mut cb) = self.objects.take_callback(id) {
                            cb(self, data, id, msg);
                            self.objects.destroy_local(id);
                        }
                    }
                }
            }
            event::INVALID_OBJECT | event::INVALID_METHOD | event::NO_MEMORY => {
                wl_debug!("server reported a protocol violation by us: {msg:?}");
            }
            _ => wl_debug!("unhandled display event opcode {}", msg.header.opcode),
        }
    }

    fn dispatch_object_event(&mut self, msg: Message, data: &mut D) {
        let target = msg.header.object_id;
        let Some(obj) = self.objects.get(target) else { return };
        let interface = obj.interface;
        let opcode = msg.header.opcode;
        let is_destructor = interface.events.get(opcode as usize).map(|m| m.is_destructor).unwrap_or(false);

        let mut cb = self.objects.take_callback(target);
        if let Some(cb) = &mut cb {
            cb(self, data, target, msg);
        }

        if is_destructor {
            self.objects.destroy_local(target);
        } else if self.objects.get(target).is_some() {
            if let Some(cb) = cb {
                self.objects.put_callback(target, cb);
            }
        }
    }

    /// Perform a blocking roundtrip: issue `sync`, flush, and keep receiving
    /// (queueing everything else for a later `dispatch_events`) until the
    /// matching `key` event arrives (spec §4.6 "Roundtrip", scenario S3).
    pub fn blocking_roundtrip(&mut self, data: &mut D) -> io::Result<()> {
        let sync_id = self.objects.alloc_client_id(&wl_callback::INTERFACE, 1)?;
        let msg = Message {
            header: MessageHeader { object_id: ObjectId::DISPLAY, size: 0, opcode: wl_display::request::SYNC },
            args: vec![ArgValue::NewId(sync_id)],
        };
        let desc = wl_display::INTERFACE.requests[wl_display::request::SYNC as usize];
        wl_core::debug::trace(wl_core::debug::Side::Request, wl_display::INTERFACE.name, desc.name, ObjectId::DISPLAY, &msg);
        self.requests_queue.push_back(msg);
        self.flush(IoMode::Blocking)?;

        loop {
            let msg = self.recv_one(IoMode::Blocking)?;
            if msg.header.object_id == ObjectId::DISPLAY && msg.header.opcode == wl_display::event::KEY {
                if let [ArgValue::Uint(key), ArgValue::Uint(_)] = msg.args.as_slice() {
                    if ObjectId::new(*key) == Some(sync_id) {
                        self.objects.destroy_local(sync_id);
                        return Ok(());
                    }
                }
            }
            if msg.header.object_id == ObjectId::DISPLAY {
                self.dispatch_display_event(msg, data);
            } else {
                self.event_queue.push_back(msg);
            }
        }
    }

    pub fn break_dispatch_loop(&mut self) {
        self.break_dispatch = true;
    }
}
