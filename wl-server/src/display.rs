//! The listening server: accepts clients, announces globals, and drives
//! request dispatch (spec §4.7 "Server runtime").
//!
//! Grounded in `original_source/wayland-server.c`'s `wl_display` (the
//! `socket_list`/`global_list`/`client_list`/`frame_list` fields and
//! `wl_client_connection_data`'s generic dispatch loop) and in the
//! teacher's `Server`/`State` split for the Rust shape -- generalized so
//! this crate carries no compositor-specific globals of its own; the
//! embedder supplies interfaces and callbacks through [`Server::add_global`].

use std::collections::{HashMap, VecDeque};
use std::env;
use std::ffi::CString;
use std::io;
use std::num::NonZeroU64;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use wl_core::event_loop::{EventLoop, Interest};
use wl_core::message::ArgValue;
use wl_core::object::ObjectId;
use wl_core::protocol::{wl_callback, wl_display};
use wl_core::wire::IoMode;
use wl_core::{wl_debug, Interface, Message};

use crate::client::{ClientConnection, ClientId, RecvOutcome};
use crate::object::ResourceCallback;

fn set_cloexec(fd: std::os::fd::RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

type BindCallback<D> = Rc<dyn Fn(&mut Server<D>, &mut D, ClientId, ObjectId)>;
type ConnectCallback<D> = Rc<dyn Fn(&mut Server<D>, &mut D, ClientId)>;

struct GlobalRecord<D> {
    name: u32,
    interface: &'static Interface,
    version: u32,
    on_bind: BindCallback<D>,
    on_connect: Option<ConnectCallback<D>>,
}

struct Listener {
    socket: UnixListener,
    path: PathBuf,
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Listener(usize),
    Client(ClientId),
}

/// The server half of the runtime: owns the listening socket(s), every
/// connected client's resource table, and the shared frame list (spec
/// §4.7 "post_frame... walks the list... in registration order").
pub struct Server<D> {
    event_loop: EventLoop<Token>,
    listeners: Vec<Listener>,
    clients: HashMap<ClientId, ClientConnection<D>>,
    next_client_raw: u64,
    globals: Vec<GlobalRecord<D>>,
    next_global_name: u32,
    frame_list: VecDeque<(ClientId, ObjectId)>,
    to_destroy: Vec<ClientId>,
}

impl<D> Server<D> {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            event_loop: EventLoop::new()?,
            listeners: Vec::new(),
            clients: HashMap::new(),
            next_client_raw: 1,
            globals: Vec::new(),
            next_global_name: 0,
            frame_list: VecDeque::new(),
            to_destroy: Vec::new(),
        })
    }

    /// Bind and listen on `$XDG_RUNTIME_DIR/<name>`, removing any stale
    /// socket file first (spec §4.7 "Create one or more Unix sockets").
    pub fn listen(&mut self, name: &str) -> io::Result<()> {
        let runtime_dir = env::var_os("XDG_RUNTIME_DIR").unwrap_or_else(|| {
            wl_debug!("$XDG_RUNTIME_DIR unset, falling back to the current directory");
            ".".into()
        });
        let mut path = PathBuf::from(runtime_dir);
        path.push(name);
        let _ = std::fs::remove_file(&path);

        let socket = UnixListener::bind(&path)?;
        socket.set_nonblocking(true)?;
        set_cloexec(socket.as_raw_fd())?;

        let idx = self.listeners.len();
        self.event_loop.add(socket.as_raw_fd(), Interest::READABLE, Token::Listener(idx))?;
        self.listeners.push(Listener { socket, path });
        Ok(())
    }

    /// Register a global (spec §4.7 "Global: name, interface, version,
    /// bind callback"), announcing it to every already-connected client.
    /// Returns the global's assigned name.
    pub fn add_global<F>(&mut self, interface: &'static Interface, version: u32, on_bind: F) -> u32
    where
        F: Fn(&mut Server<D>, &mut D, ClientId, ObjectId) + 'static,
    {
        self.add_global_impl(interface, version, Rc::new(on_bind), None)
    }

    /// Like [`add_global`](Self::add_global), with a callback invoked for
    /// every client present or future connection (spec §9 open question
    /// (a): a global with no notifier is just `on_connect: None`, never
    /// rejected).
    pub fn add_global_with_connect_notify<F, C>(
        &mut self,
        interface: &'static Interface,
        version: u32,
        on_bind: F,
        on_connect: C,
    ) -> u32
    where
        F: Fn(&mut Server<D>, &mut D, ClientId, ObjectId) + 'static,
        C: Fn(&mut Server<D>, &mut D, ClientId) + 'static,
    {
        self.add_global_impl(interface, version, Rc::new(on_bind), Some(Rc::new(on_connect)))
    }

    fn add_global_impl(
        &mut self,
        interface: &'static Interface,
        version: u32,
        on_bind: BindCallback<D>,
        on_connect: Option<ConnectCallback<D>>,
    ) -> u32 {
        self.next_global_name += 1;
        let name = self.next_global_name;
        self.globals.push(GlobalRecord { name, interface, version, on_bind, on_connect });
        for conn in self.clients.values_mut() {
            conn.queue_event(
                ObjectId::DISPLAY,
                wl_display::event::GLOBAL,
                vec![ArgValue::Uint(name), ArgValue::String(interface.name.to_owned()), ArgValue::Uint(version)],
            );
        }
        name
    }

    /// Withdraw a global (spec §4.7 "global_remove"); already-bound
    /// resources are unaffected, only future `bind`s are rejected.
    pub fn remove_global(&mut self, name: u32) {
        self.globals.retain(|g| g.name != name);
        for conn in self.clients.values_mut() {
            conn.queue_event(ObjectId::DISPLAY, wl_display::event::GLOBAL_REMOVE, vec![ArgValue::Uint(name)]);
        }
    }

    /// Send an event on `target` to `client` (for use from `on_bind`/
    /// `on_connect` callbacks and resource request callbacks).
    pub fn send_event(&mut self, client: ClientId, target: ObjectId, opcode: u16, args: Vec<ArgValue>) {
        if let Some(conn) = self.clients.get_mut(&client) {
            conn.queue_event(target, opcode, args);
        }
    }

    /// Install the request-handling callback for an existing resource.
    pub fn set_resource_callback<F>(&mut self, client: ClientId, id: ObjectId, cb: F) -> bool
    where
        F: FnMut(&mut Server<D>, &mut D, ClientId, ObjectId, Message) + 'static,
    {
        match self.clients.get_mut(&client) {
            Some(conn) => conn.resources.set_callback(id, Box::new(cb) as ResourceCallback<D>),
            None => false,
        }
    }

    /// Allocate a server-segment object and register it in `client`'s
    /// resource table (spec §4.6 "new_id on client-received events").
    pub fn new_server_object(
        &mut self,
        client: ClientId,
        interface: &'static Interface,
        version: u32,
    ) -> Option<ObjectId> {
        self.clients.get_mut(&client).map(|c| c.resources.alloc_server_id(interface, version))
    }

    /// Destroy a resource, emitting `delete_id` if it lived in the client
    /// segment (spec §4.7/§6: only client-allocated ids need that so the
    /// peer can free its own bookkeeping).
    pub fn destroy_resource(&mut self, client: ClientId, id: ObjectId) {
        let Some(conn) = self.clients.get_mut(&client) else { return };
        if conn.resources.destroy(id) {
            conn.queue_event(ObjectId::DISPLAY, wl_display::event::DELETE_ID, vec![ArgValue::Uint(id.as_u32())]);
        }
    }

    /// Forcibly drop a client's connection on the next `dispatch`.
    pub fn disconnect_client(&mut self, client: ClientId) {
        self.mark_dead(client);
    }

    pub fn client_ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    /// Broadcast "frame done" to every listener registered since the last
    /// call, in registration order, and destroy their callback objects
    /// (spec §4.7 "frame list", testable property #4).
    pub fn post_frame(&mut self, time: u32) {
        let pending = std::mem::take(&mut self.frame_list);
        for (client_id, id) in pending {
            if let Some(conn) = self.clients.get_mut(&client_id) {
                conn.queue_event(ObjectId::DISPLAY, wl_display::event::KEY, vec![ArgValue::Uint(id.as_u32()), ArgValue::Uint(time)]);
            }
            self.destroy_resource(client_id, id);
        }
    }

    /// Flush every client's outgoing queue. Request-triggered replies are
    /// flushed automatically after the request that generated them; events
    /// queued from outside request handling (`add_global`, `post_frame`,
    /// an `on_connect` callback) need an explicit call, mirroring the
    /// caller-driven `Display::flush` on the client side.
    pub fn flush(&mut self) -> io::Result<()> {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.try_flush_client(id);
        }
        Ok(())
    }

    /// One iteration of the server's event loop: accept new connections,
    /// service every client that became ready, then reap any that died
    /// (spec §4.8 "dispatch... the caller drives handling of each
    /// readiness in turn").
    pub fn dispatch(&mut self, data: &mut D, timeout: Option<Duration>) -> io::Result<()> {
        let ready = self.event_loop.dispatch(timeout)?;
        for r in ready {
            match r.token {
                Token::Listener(idx) => {
                    if let Err(e) = self.accept(idx, data) {
                        wl_debug!("accept error: {e}");
                    }
                }
                Token::Client(id) => self.service_client(id, data),
            }
        }
        self.reap_dead_clients();
        Ok(())
    }

    fn accept(&mut self, idx: usize, data: &mut D) -> io::Result<()> {
        loop {
            match self.listeners[idx].socket.accept() {
                Ok((stream, _addr)) => {
                    self.add_client(stream, data)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Adopt an already-connected stream as a client (spec §4.7 "Client
    /// creation: grant the first 256 ids, announce every current global,
    /// then invoke each global's connect notifier"). Public so embedders
    /// using systemd-style socket activation (or tests, via
    /// `UnixStream::pair`) can hand over a stream without going through
    /// [`listen`](Self::listen)'s own accept loop.
    pub fn add_client(&mut self, stream: UnixStream, data: &mut D) -> io::Result<ClientId> {
        stream.set_nonblocking(true)?;
        set_cloexec(stream.as_raw_fd())?;
        let fd = stream.as_raw_fd();

        let id = ClientId(NonZeroU64::new(self.next_client_raw).expect("nonzero by construction"));
        self.next_client_raw += 1;

        let mut conn = ClientConnection::new(stream);
        conn.initial_grant();
        for g in &self.globals {
            conn.queue_event(
                ObjectId::DISPLAY,
                wl_display::event::GLOBAL,
                vec![ArgValue::Uint(g.name), ArgValue::String(g.interface.name.to_owned()), ArgValue::Uint(g.version)],
            );
        }
        self.clients.insert(id, conn);
        self.event_loop.add(fd, Interest::READABLE, Token::Client(id))?;

        let notifiers: Vec<ConnectCallback<D>> = self.globals.iter().filter_map(|g| g.on_connect.clone()).collect();
        for notify in notifiers {
            notify(self, data, id);
        }
        self.try_flush_client(id);
        Ok(id)
    }

    fn service_client(&mut self, id: ClientId, data: &mut D) {
        loop {
            match self.handle_one_request(id, data) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    wl_debug!("client connection error: {e}");
                    self.mark_dead(id);
                    return;
                }
            }
        }
        self.try_flush_client(id);
    }

    /// Returns `Ok(true)` if a request was consumed (more may be pending),
    /// `Ok(false)` if the socket has nothing more to read right now.
    fn handle_one_request(&mut self, client_id: ClientId, data: &mut D) -> io::Result<bool> {
        let outcome = {
            let Some(conn) = self.clients.get_mut(&client_id) else { return Ok(false) };
            match conn.recv_request(IoMode::NonBlocking) {
                Ok(o) => o,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        };

        match outcome {
            RecvOutcome::InvalidObject(id) => self.post_invalid_object(client_id, id),
            RecvOutcome::InvalidMethod(id, opcode) => self.post_invalid_method(client_id, id, opcode),
            RecvOutcome::NoMemory(_id) => {
                if let Some(conn) = self.clients.get_mut(&client_id) {
                    conn.queue_event(ObjectId::DISPLAY, wl_display::event::NO_MEMORY, vec![]);
                }
            }
            RecvOutcome::Message(msg) => {
                if msg.header.object_id == ObjectId::DISPLAY {
                    self.dispatch_display_request(client_id, msg, data);
                } else {
                    self.dispatch_resource_request(client_id, msg, data);
                }
            }
        }
        Ok(true)
    }

    fn dispatch_display_request(&mut self, client_id: ClientId, msg: Message, data: &mut D) {
        match msg.header.opcode {
            wl_display::request::SYNC => {
                let [ArgValue::NewId(id)] = msg.args.as_slice() else { return };
                let id = *id;
                let ok = self.clients.get_mut(&client_id).is_some_and(|conn| {
                    if conn.resources.insert_client_provided(id, &wl_callback::INTERFACE, 1).is_err() {
                        return false;
                    }
                    conn.note_resource_added();
                    conn.queue_event(ObjectId::DISPLAY, wl_display::event::KEY, vec![ArgValue::Uint(id.as_u32()), ArgValue::Uint(0)]);
                    true
                });
                if ok {
                    self.destroy_resource(client_id, id);
                } else {
                    self.post_invalid_method(client_id, ObjectId::DISPLAY, wl_display::request::SYNC);
                }
            }
            wl_display::request::FRAME => {
                let [ArgValue::NewId(id)] = msg.args.as_slice() else { return };
                let id = *id;
                let ok = self.clients.get_mut(&client_id).is_some_and(|conn| {
                    if conn.resources.insert_client_provided(id, &wl_callback::INTERFACE, 1).is_err() {
                        return false;
                    }
                    conn.note_resource_added();
                    true
                });
                if ok {
                    self.frame_list.push_back((client_id, id));
                } else {
                    self.post_invalid_method(client_id, ObjectId::DISPLAY, wl_display::request::FRAME);
                }
            }
            wl_display::request::BIND => {
                let [ArgValue::Uint(name), ArgValue::AnyNewId { interface, version, id }] = msg.args.as_slice() else {
                    return;
                };
                self.handle_bind(client_id, *name, interface, *version, *id, data);
            }
            other => wl_debug!("unhandled display request opcode {other}"),
        }
    }

    /// Spec §4.7 "bind... validate the requested interface/version against
    /// the global record". There is no dedicated "bad bind" event in the
    /// protocol table, so a name/interface/version mismatch is reported as
    /// `invalid_method(DISPLAY, BIND)`, same as any other malformed request.
    fn handle_bind(
        &mut self,
        client_id: ClientId,
        name: u32,
        interface_name: &CString,
        version: u32,
        id: ObjectId,
        data: &mut D,
    ) {
        let Some(gidx) = self.globals.iter().position(|g| g.name == name) else {
            self.post_invalid_method(client_id, ObjectId::DISPLAY, wl_display::request::BIND);
            return;
        };
        let global_interface = self.globals[gidx].interface;
        let global_version = self.globals[gidx].version;
        if global_interface.name != interface_name.as_c_str() || version == 0 || version > global_version {
            self.post_invalid_method(client_id, ObjectId::DISPLAY, wl_display::request::BIND);
            return;
        }

        let registered = self.clients.get_mut(&client_id).is_some_and(|conn| {
            if conn.resources.insert_client_provided(id, global_interface, version).is_err() {
                false
            } else {
                conn.note_resource_added();
                true
            }
        });
        if !registered {
            self.post_invalid_object(client_id, id);
            return;
        }

        let on_bind = Rc::clone(&self.globals[gidx].on_bind);
        on_bind(self, data, client_id, id);
    }

    fn dispatch_resource_request(&mut self, client_id: ClientId, msg: Message, data: &mut D) {
        let target = msg.header.object_id;
        let opcode = msg.header.opcode;

        let Some((interface, version)) = self
            .clients
            .get(&client_id)
            .and_then(|c| c.resources.get(target))
            .map(|r| (r.interface, r.version))
        else {
            self.post_invalid_object(client_id, target);
            return;
        };
        let Some(desc) = interface.requests.get(opcode as usize) else {
            self.post_invalid_method(client_id, target, opcode);
            return;
        };
        let is_destructor = desc.is_destructor;
        let signature = desc.signature;

        if let Some(conn) = self.clients.get_mut(&client_id) {
            match conn.register_new_ids(&msg, signature, version) {
                Ok(n) => {
                    for _ in 0..n {
                        conn.note_resource_added();
                    }
                }
                Err(e) => wl_debug!("bad new_id in request: {e}"),
            }
        }

        let mut cb = self.clients.get_mut(&client_id).and_then(|c| c.resources.take_callback(target));
        if let Some(cb) = &mut cb {
            cb(self, data, client_id, target, msg);
        }

        if is_destructor {
            self.destroy_resource(client_id, target);
        } else if let Some(cb) = cb {
            if let Some(conn) = self.clients.get_mut(&client_id) {
                conn.resources.put_callback(target, cb);
            }
        }
    }

    fn post_invalid_object(&mut self, client_id: ClientId, id: ObjectId) {
        if let Some(conn) = self.clients.get_mut(&client_id) {
            conn.queue_event(ObjectId::DISPLAY, wl_display::event::INVALID_OBJECT, vec![ArgValue::Uint(id.as_u32())]);
        }
    }

    fn post_invalid_method(&mut self, client_id: ClientId, id: ObjectId, opcode: u16) {
        if let Some(conn) = self.clients.get_mut(&client_id) {
            conn.queue_event(
                ObjectId::DISPLAY,
                wl_display::event::INVALID_METHOD,
                vec![ArgValue::Uint(id.as_u32()), ArgValue::Uint(opcode as u32)],
            );
        }
    }

    fn try_flush_client(&mut self, id: ClientId) {
        let Some(conn) = self.clients.get_mut(&id) else { return };
        let fd = conn.as_raw_fd();
        match conn.flush(IoMode::NonBlocking) {
            Ok(()) => {
                let _ = self.event_loop.modify(fd, Interest::READABLE);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let _ = self.event_loop.modify(fd, Interest::READABLE | Interest::WRITABLE);
            }
            Err(e) => {
                wl_debug!("client flush error: {e}");
                self.mark_dead(id);
            }
        }
    }

    fn mark_dead(&mut self, id: ClientId) {
        if !self.to_destroy.contains(&id) {
            self.to_destroy.push(id);
        }
    }

    /// Spec §4.7 "On client destroy: remove the event-loop source, destroy
    /// the connection, free the client". This workspace's resources carry
    /// only a request-dispatch callback, not a separate destroy notifier
    /// (no interface defined here needs one; see DESIGN.md), so dropping
    /// the resource table is all teardown requires beyond that.
    fn reap_dead_clients(&mut self) {
        let dead = std::mem::take(&mut self.to_destroy);
        for id in dead {
            if let Some(conn) = self.clients.remove(&id) {
                let _ = self.event_loop.remove(conn.as_raw_fd());
            }
            self.frame_list.retain(|(cid, _)| *cid != id);
        }
    }
}
