//! Object ID allocation and the client-side object table.
//!
//! Grounded on `wayland-backend/src/rs/map.rs` for the overall shape of a
//! client object table (a slot-indexed vector, ID 1 reserved for the
//! display), but diverges from it in one important way: the teacher's
//! `ObjectMap` simply fills the first free `Option::None` slot, while the
//! spec requires a FIFO reuse pool gated on the server's `delete_id`
//! acknowledgement (`original_source/wl_framework/network/connection.py`'s
//! `_obj_id_generator`/`free_obj_id`). That FIFO behavior is implemented
//! here instead.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use downcast_rs::{impl_downcast, DowncastSync};

use crate::error::{Error, Result};

/// The null object ID. Never assigned to a live object.
pub const NULL_ID: u32 = 0;
/// `wl_display`'s fixed object ID.
pub const DISPLAY_ID: u32 = 1;
/// The first ID a client may allocate for itself.
const FIRST_CLIENT_ID: u32 = 2;

/// Implemented by every generated proxy type so the object table can hold
/// them behind a single trait object and downcast back to the concrete type
/// on demand, matching `wayland-backend`'s `ObjectData: DowncastSync` split.
pub trait AnyProxy: DowncastSync {
    /// The interface name this proxy implements, e.g. `"wl_registry"`.
    fn interface_name(&self) -> &'static str;

    /// Dispatch a raw inbound event to this proxy's event handler.
    fn dispatch_event(&self, opcode: u16, args: &mut crate::wire::Reader<'_>, extra_fds: &mut dyn FnMut() -> Result<std::os::fd::OwnedFd>) -> Result<()>;

    /// Called once the server has acknowledged destruction of this object.
    fn on_destroyed(&self) {}
}
impl_downcast!(sync AnyProxy);

/// A one-shot callback, e.g. the Display's `sync` barrier object or a
/// `new_id` callback in a request that has no dedicated proxy type.
pub type OneShotCallback = Box<dyn FnOnce(&mut crate::wire::Reader<'_>) -> Result<()>>;

/// What a live object ID refers to in the table.
enum Slot {
    Proxy(Rc<dyn AnyProxy>),
    Callback(RefCell<Option<OneShotCallback>>),
}

/// A dispatch target extracted from the table, ready to invoke outside any
/// borrow of the table itself. See [`ObjectTable::take_dispatch_target`].
pub enum DispatchTarget {
    Proxy(Rc<dyn AnyProxy>),
    Callback(OneShotCallback),
}

/// The client-side object table: ID allocation with FIFO reuse, and
/// dispatch-target lookup.
pub struct ObjectTable {
    slots: Vec<Option<Slot>>,
    /// IDs freed by a `delete_id` event, awaiting reuse, oldest first.
    reuse_pool: VecDeque<u32>,
    /// One past the highest ID ever allocated (before reuse).
    next_fresh: u32,
}

impl ObjectTable {
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.resize_with(FIRST_CLIENT_ID as usize, || None);
        Self {
            slots,
            reuse_pool: VecDeque::new(),
            next_fresh: FIRST_CLIENT_ID,
        }
    }

    /// Allocate a new client object ID: the oldest entry in the reuse pool,
    /// if any, else the next never-used ID. The slot is left empty; a proxy
    /// needs its own ID to construct itself before it can be placed in the
    /// table, so allocation and placement are two steps (see
    /// [`Self::place_proxy`]).
    pub fn reserve_id(&mut self) -> u32 {
        if let Some(id) = self.reuse_pool.pop_front() {
            return id;
        }
        let id = self.next_fresh;
        self.next_fresh += 1;
        self.slots.push(None);
        id
    }

    /// Place a proxy into a slot previously reserved with [`Self::reserve_id`].
    pub fn place_proxy(&mut self, id: u32, proxy: Rc<dyn AnyProxy>) {
        self.slots[id as usize] = Some(Slot::Proxy(proxy));
    }

    /// Place a one-shot callback into a slot previously reserved with
    /// [`Self::reserve_id`].
    pub fn place_callback(&mut self, id: u32, cb: OneShotCallback) {
        self.slots[id as usize] = Some(Slot::Callback(RefCell::new(Some(cb))));
    }

    /// Convenience for the common case: reserve and place in one call.
    pub fn insert_proxy(&mut self, proxy: Rc<dyn AnyProxy>) -> u32 {
        let id = self.reserve_id();
        self.place_proxy(id, proxy);
        id
    }

    /// Convenience for the common case: reserve and place in one call.
    pub fn insert_callback(&mut self, cb: OneShotCallback) -> u32 {
        let id = self.reserve_id();
        self.place_callback(id, cb);
        id
    }

    /// Register the display object at its fixed well-known ID.
    pub fn insert_display(&mut self, proxy: Rc<dyn AnyProxy>) {
        self.slots[DISPLAY_ID as usize] = Some(Slot::Proxy(proxy));
    }

    pub fn get_proxy(&self, id: u32) -> Option<Rc<dyn AnyProxy>> {
        match self.slots.get(id as usize)? {
            Some(Slot::Proxy(p)) => Some(p.clone()),
            _ => None,
        }
    }

    /// Dispatch an inbound event to whatever is registered at `id`.
    ///
    /// Callers that hold this table behind a `RefCell` (i.e.
    /// `Connection`) must *not* call this directly while holding a borrow:
    /// an event handler that re-enters the connection (e.g. `place_proxy`
    /// for a newly bound global) would then hit a `BorrowMutError`. Use
    /// [`Self::take_dispatch_target`] to extract the target and invoke it
    /// after releasing the borrow instead; this method remains for callers
    /// (and tests) that own the table outright.
    pub fn dispatch(&self, id: u32, opcode: u16, args: &mut crate::wire::Reader<'_>, extra_fds: &mut dyn FnMut() -> Result<std::os::fd::OwnedFd>) -> Result<()> {
        match self.slots.get(id as usize).and_then(|s| s.as_ref()) {
            Some(Slot::Proxy(p)) => p.dispatch_event(opcode, args, extra_fds),
            Some(Slot::Callback(cb)) => {
                let taken = cb.borrow_mut().take();
                match taken {
                    Some(f) => f(args),
                    None => Err(Error::ProgrammerError(format!(
                        "object {id} callback already fired"
                    ))),
                }
            }
            None => Err(Error::ProgrammerError(format!(
                "event for unknown or destroyed object {id}"
            ))),
        }
    }

    /// Extract the dispatch target for `id` without invoking it: a cloned
    /// proxy handle (proxies may receive more than one event, so they're
    /// never removed from the table here) or the one-shot callback itself
    /// (taken out of its slot, since it can only fire once). The caller is
    /// expected to invoke the returned target after releasing any borrow on
    /// the table, so that re-entrant calls back into the connection from
    /// within the event handler don't panic.
    pub fn take_dispatch_target(&mut self, id: u32) -> Result<DispatchTarget> {
        match self.slots.get_mut(id as usize).and_then(|s| s.as_mut()) {
            Some(Slot::Proxy(p)) => Ok(DispatchTarget::Proxy(p.clone())),
            Some(Slot::Callback(cb)) => {
                let taken = cb.get_mut().take();
                match taken {
                    Some(f) => Ok(DispatchTarget::Callback(f)),
                    None => Err(Error::ProgrammerError(format!(
                        "object {id} callback already fired"
                    ))),
                }
            }
            None => Err(Error::ProgrammerError(format!(
                "event for unknown or destroyed object {id}"
            ))),
        }
    }

    /// Handle the server's `delete_id` acknowledgement: the object's slot is
    /// cleared and the ID becomes eligible for reuse. This is the point at
    /// which the FIFO reuse pool, not the teacher's map, diverges: the ID is
    /// *not* available for reuse until the server confirms it, even though
    /// the client may have already requested destruction earlier.
    pub fn handle_delete_id(&mut self, id: u32) -> Result<()> {
        if id == NULL_ID || id == DISPLAY_ID {
            return Err(Error::ProgrammerError(format!(
                "server attempted to delete reserved object id {id}"
            )));
        }
        match self.slots.get_mut(id as usize) {
            Some(slot @ Some(_)) => {
                if let Some(Slot::Proxy(p)) = slot.take() {
                    p.on_destroyed();
                }
            }
            Some(None) => {}
            None => return Err(Error::ProgrammerError(format!("delete_id for never-allocated object {id}"))),
        }
        self.reuse_pool.push_back(id);
        Ok(())
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Reader;

    struct NullProxy;
    impl AnyProxy for NullProxy {
        fn interface_name(&self) -> &'static str {
            "test_proxy"
        }
        fn dispatch_event(&self, _opcode: u16, _args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<std::os::fd::OwnedFd>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ids_allocate_monotonically_from_two() {
        let mut table = ObjectTable::new();
        let a = table.insert_proxy(Rc::new(NullProxy));
        let b = table.insert_proxy(Rc::new(NullProxy));
        assert_eq!(a, 2);
        assert_eq!(b, 3);
    }

    #[test]
    fn deleted_ids_are_reused_fifo() {
        let mut table = ObjectTable::new();
        let a = table.insert_proxy(Rc::new(NullProxy));
        let b = table.insert_proxy(Rc::new(NullProxy));
        let _c = table.insert_proxy(Rc::new(NullProxy));

        table.handle_delete_id(a).unwrap();
        table.handle_delete_id(b).unwrap();

        let reused_first = table.insert_proxy(Rc::new(NullProxy));
        let reused_second = table.insert_proxy(Rc::new(NullProxy));
        assert_eq!(reused_first, a);
        assert_eq!(reused_second, b);
    }

    #[test]
    fn reserved_ids_cannot_be_deleted() {
        let mut table = ObjectTable::new();
        assert!(table.handle_delete_id(NULL_ID).is_err());
        assert!(table.handle_delete_id(DISPLAY_ID).is_err());
    }

    #[test]
    fn dispatch_to_unknown_object_is_an_error() {
        let table = ObjectTable::new();
        let payload = Vec::new();
        let mut reader = Reader::new(&payload);
        let mut no_fds = || -> Result<std::os::fd::OwnedFd> { unreachable!() };
        assert!(table.dispatch(99, 0, &mut reader, &mut no_fds).is_err());
    }
}
