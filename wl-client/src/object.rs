//! The client-side object table (spec §4.2, §4.6).
//!
//! Unlike the server's table (`wl-server::object_table`), this one has to
//! track both segments: ids the client itself allocates out of
//! `[1, 0xFF000000)`, and ids the server allocates and hands to the client
//! inline in an event's `new_id` argument, out of `[0xFF000000, 2^32)`. The
//! client-allocated half is dense and reuses a free list (mirroring the
//! teacher's `ObjectStorage::create_servers`); the server-allocated half is
//! small and sparse in practice (extension globals, at most a handful per
//! client), so it is kept in a map instead of growing a second dense vector
//! per client connection.

use std::collections::HashMap;
use std::io;

use wl_core::{wl_debug, Interface, ObjectId};

pub(crate) type GenericCallback<D> = Box<dyn FnMut(&mut crate::Display<D>, &mut D, ObjectId, wl_core::Message)>;

pub(crate) struct ClientObject<D> {
    pub interface: &'static Interface,
    pub version: u32,
    pub cb: Option<GenericCallback<D>>,
}

enum Slot<D> {
    Live(ClientObject<D>),
    /// Destroyed by the client, awaiting the server's `delete_id` (spec §3
    /// "ZOMBIE is reachable only on the client side").
    Zombie,
    Empty,
}

pub(crate) struct ClientObjectTable<D> {
    /// Index `i` holds id `i + 1`.
    client_slots: Vec<Slot<D>>,
    free_client_ids: Vec<u32>,
    next_client_id: u32,
    server_objects: HashMap<ObjectId, ClientObject<D>>,
}

impl<D> ClientObjectTable<D> {
    pub fn new(display_interface: &'static Interface) -> Self {
        Self {
            client_slots: vec![Slot::Live(ClientObject { interface: display_interface, version: 1, cb: None })],
            free_client_ids: Vec::new(),
            next_client_id: 2,
            server_objects: HashMap::new(),
        }
    }

    /// Allocate a new client-segment id for `interface` (spec §4.4 step 2,
    /// "for new_id arguments whose interface is statically known, allocate
    /// a client ... id").
    pub fn alloc_client_id(&mut self, interface: &'static Interface, version: u32) -> io::Result<ObjectId> {
        let raw = match self.free_client_ids.pop() {
            Some(raw) => raw,
            None => {
                let raw = self.next_client_id;
                self.next_client_id = self
                    .next_client_id
                    .checked_add(1)
                    .ok_or_else(|| io::Error::other("client object id space exhausted"))?;
                if raw >= ObjectId::MIN_SERVER_RAW {
                    return Err(io::Error::other("client object id space exhausted"));
                }
                raw
            }
        };
        let id = ObjectId::new(raw).expect("nonzero by construction");
        let idx = id.as_index();
        if idx >= self.client_slots.len() {
            self.client_slots.resize_with(idx + 1, || Slot::Empty);
        }
        self.client_slots[idx] = Slot::Live(ClientObject { interface, version, cb: None });
        Ok(id)
    }

    /// Register an object the server introduced via an event's `new_id`
    /// argument (spec §4.6 "create_proxies... allocates a proxy at the
    /// already-assigned id").
    pub fn register_server_object(&mut self, id: ObjectId, interface: &'static Interface, version: u32) {
        self.server_objects
            .insert(id, ClientObject { interface, version, cb: None });
    }

    pub fn get(&self, id: ObjectId) -> Option<&ClientObject<D>> {
        if id.created_by_client() {
            match self.client_slots.get(id.as_index()) {
                Some(Slot::Live(obj)) => Some(obj),
                _ => None,
            }
        } else {
            self.server_objects.get(&id)
        }
    }

    pub fn set_callback(&mut self, id: ObjectId, cb: GenericCallback<D>) -> bool {
        if id.created_by_client() {
            if let Some(Slot::Live(obj)) = self.client_slots.get_mut(id.as_index()) {
                obj.cb = Some(cb);
                return true;
            }
            false
        } else if let Some(obj) = self.server_objects.get_mut(&id) {
            obj.cb = Some(cb);
            true
        } else {
            false
        }
    }

    pub fn take_callback(&mut self, id: ObjectId) -> Option<GenericCallback<D>> {
        if id.created_by_client() {
            if let Some(Slot::Live(obj)) = self.client_slots.get_mut(id.as_index()) {
                obj.cb.take()
            } else {
                None
            }
        } else {
            self.server_objects.get_mut(&id).and_then(|obj| obj.cb.take())
        }
    }

    pub fn put_callback(&mut self, id: ObjectId, cb: GenericCallback<D>) {
        self.set_callback(id, cb);
    }

    /// Destroy a proxy locally (spec §4.6 "Proxy destroy"): client-allocated
    /// ids go ZOMBIE awaiting `delete_id`; server-allocated ids are freed
    /// immediately.
    pub fn destroy_local(&mut self, id: ObjectId) {
        if id.created_by_client() {
            if let Some(slot) = self.client_slots.get_mut(id.as_index()) {
                *slot = Slot::Zombie;
            }
        } else {
            self.server_objects.remove(&id);
        }
    }

    /// Handle a `delete_id` event: free the slot only if it is ZOMBIE (spec
    /// §7 "delete_id on a live object is logged but recovered; the slot is
    /// not freed").
    pub fn handle_delete_id(&mut self, id: ObjectId) {
        if !id.created_by_client() {
            wl_debug!("delete_id for a server-allocated id {id} (ignored)");
            return;
        }
        match self.client_slots.get_mut(id.as_index()) {
            Some(slot @ Slot::Zombie) => {
                *slot = Slot::Empty;
                self.free_client_ids.push(id.as_u32());
            }
            Some(Slot::Live(_)) => wl_debug!("server sent delete_id for live object {id}"),
            _ => wl_debug!("delete_id for an already-free id {id}"),
        }
    }
}
