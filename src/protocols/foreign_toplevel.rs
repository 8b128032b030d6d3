//! `zwlr_foreign_toplevel_management_v1`: enumerate and control other
//! clients' toplevel windows.
//!
//! Grounded on `original_source/wl_framework/protocols/foreign_toplevel.py`'s
//! `ForeignTopLevel`/`TopLevel` classes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::interface::ProxyCore;
use crate::object::AnyProxy;
use crate::wire::{Reader, Writer};

/// `zwlr_foreign_toplevel_handle_v1` state bits, matching `TopLevel.STATES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToplevelState {
    Maximized,
    Minimized,
    Activated,
    Fullscreen,
}

impl ToplevelState {
    fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Maximized),
            1 => Some(Self::Minimized),
            2 => Some(Self::Activated),
            3 => Some(Self::Fullscreen),
            _ => None,
        }
    }
}

/// The manager global. Tracks every live toplevel by object ID, matching
/// `ForeignTopLevel.windows`.
pub struct ForeignToplevelManager {
    core: ProxyCore,
    windows: Rc<RefCell<HashMap<u32, Rc<Toplevel>>>>,
    on_new_toplevel: RefCell<Option<Box<dyn FnMut(Rc<Toplevel>)>>>,
    on_finished: RefCell<Option<Box<dyn FnMut()>>>,
}

impl ForeignToplevelManager {
    pub fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            windows: Rc::new(RefCell::new(HashMap::new())),
            on_new_toplevel: RefCell::new(None),
            on_finished: RefCell::new(None),
        }
    }

    pub fn on_new_toplevel(&self, f: impl FnMut(Rc<Toplevel>) + 'static) {
        *self.on_new_toplevel.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_finished(&self, f: impl FnMut() + 'static) {
        *self.on_finished.borrow_mut() = Some(Box::new(f));
    }

    pub fn windows(&self) -> Vec<Rc<Toplevel>> {
        self.windows.borrow().values().cloned().collect()
    }

    /// `zwlr_foreign_toplevel_management_v1.stop` — opcode 0.
    pub fn stop(&self) -> Result<()> {
        self.core.send(0, Writer::new(), vec![])
    }
}

impl AnyProxy for ForeignToplevelManager {
    fn interface_name(&self) -> &'static str {
        "zwlr_foreign_toplevel_manager_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            // toplevel(new_id handle) — the server allocates the handle's ID
            // implicitly in the client's ID space, as a `new_id` argument.
            0 => {
                let id = args.get_u32()?;
                let toplevel = Rc::new(Toplevel::new(id, self.core.version, self.core.conn.clone(), self.windows.clone()));
                self.core.conn.place_proxy(id, toplevel.clone());
                self.windows.borrow_mut().insert(id, toplevel.clone());
                if let Some(f) = self.on_new_toplevel.borrow_mut().as_mut() {
                    f(toplevel);
                }
                Ok(())
            }
            1 => {
                if let Some(f) = self.on_finished.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown foreign_toplevel_manager event opcode {opcode}"))),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ToplevelInfo {
    pub title: String,
    pub app_id: String,
    pub states: Vec<ToplevelState>,
    pub parent: Option<u32>,
}

/// `zwlr_foreign_toplevel_handle_v1`.
pub struct Toplevel {
    core: ProxyCore,
    info: RefCell<ToplevelInfo>,
    /// Object IDs of the outputs this toplevel is currently displayed on,
    /// maintained by `output_enter`/`output_leave`, matching `TopLevel.outputs`.
    outputs: RefCell<HashSet<u32>>,
    /// Shared with the owning [`ForeignToplevelManager`] so `closed` can
    /// remove this toplevel from the map itself, matching
    /// `_on_toplevel_closed`'s `del self.windows[toplevel.obj_id]`.
    windows: Rc<RefCell<HashMap<u32, Rc<Toplevel>>>>,
    on_done: RefCell<Option<Box<dyn FnMut(&ToplevelInfo)>>>,
    on_closed: RefCell<Option<Box<dyn FnMut()>>>,
    on_output_change: RefCell<Option<Box<dyn FnMut(&Toplevel)>>>,
}

impl Toplevel {
    fn new(id: u32, version: u32, conn: Connection, windows: Rc<RefCell<HashMap<u32, Rc<Toplevel>>>>) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            info: RefCell::new(ToplevelInfo::default()),
            outputs: RefCell::new(HashSet::new()),
            windows,
            on_done: RefCell::new(None),
            on_closed: RefCell::new(None),
            on_output_change: RefCell::new(None),
        }
    }

    pub fn info(&self) -> ToplevelInfo {
        self.info.borrow().clone()
    }

    /// Object IDs of the outputs this toplevel currently occupies.
    pub fn outputs(&self) -> Vec<u32> {
        self.outputs.borrow().iter().copied().collect()
    }

    /// Fires after `outputs` changes, matching `on_toplevel_output_change`.
    pub fn on_output_change(&self, f: impl FnMut(&Toplevel) + 'static) {
        *self.on_output_change.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_done(&self, f: impl FnMut(&ToplevelInfo) + 'static) {
        *self.on_done.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_closed(&self, f: impl FnMut() + 'static) {
        *self.on_closed.borrow_mut() = Some(Box::new(f));
    }

    /// `set_maximized` — opcode 0.
    pub fn set_maximized(&self) -> Result<()> {
        self.core.send(0, Writer::new(), vec![])
    }

    /// `unset_maximized` — opcode 1.
    pub fn unset_maximized(&self) -> Result<()> {
        self.core.send(1, Writer::new(), vec![])
    }

    /// `set_minimized` — opcode 2.
    pub fn set_minimized(&self) -> Result<()> {
        self.core.send(2, Writer::new(), vec![])
    }

    /// `unset_minimized` — opcode 3.
    pub fn unset_minimized(&self) -> Result<()> {
        self.core.send(3, Writer::new(), vec![])
    }

    /// `activate` — opcode 4. Takes the requesting seat's object ID.
    pub fn activate(&self, seat_id: u32) -> Result<()> {
        let mut w = Writer::new();
        w.put_u32(seat_id);
        self.core.send(4, w, vec![])
    }

    /// `close` — opcode 5.
    pub fn close(&self) -> Result<()> {
        self.core.send(5, Writer::new(), vec![])
    }

    // opcode 6 is `set_rectangle`; left unimplemented, matching the
    // original's own `# request 6 == set_rectangle` gap.

    /// `destroy` — opcode 7.
    pub fn destroy(&self) -> Result<()> {
        self.core.send(7, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }

    /// `set_fullscreen` — opcode 8. `output` is `0` for "no preference".
    pub fn set_fullscreen(&self, output: u32) -> Result<()> {
        let mut w = Writer::new();
        w.put_u32(output);
        self.core.send(8, w, vec![])
    }

    /// `unset_fullscreen` — opcode 9.
    pub fn unset_fullscreen(&self) -> Result<()> {
        self.core.send(9, Writer::new(), vec![])
    }
}

impl AnyProxy for Toplevel {
    fn interface_name(&self) -> &'static str {
        "zwlr_foreign_toplevel_handle_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                self.info.borrow_mut().title = args.get_string()?;
                Ok(())
            }
            1 => {
                self.info.borrow_mut().app_id = args.get_string()?;
                Ok(())
            }
            2 => {
                let output = args.get_u32()?;
                self.outputs.borrow_mut().insert(output);
                if let Some(f) = self.on_output_change.borrow_mut().as_mut() {
                    f(self);
                }
                Ok(())
            }
            3 => {
                let output = args.get_u32()?;
                self.outputs.borrow_mut().remove(&output);
                if let Some(f) = self.on_output_change.borrow_mut().as_mut() {
                    f(self);
                }
                Ok(())
            }
            4 => {
                let raw = args.get_array()?;
                let states = raw
                    .chunks_exact(4)
                    .filter_map(|c| ToplevelState::from_wire(u32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
                    .collect();
                self.info.borrow_mut().states = states;
                Ok(())
            }
            5 => {
                let info = self.info.borrow().clone();
                if let Some(f) = self.on_done.borrow_mut().as_mut() {
                    f(&info);
                }
                Ok(())
            }
            6 => {
                // Matches `on_closed`: acknowledge destruction on the wire,
                // then remove ourselves from the manager's map before
                // notifying the caller, mirroring `_on_toplevel_closed`'s
                // `del self.windows[toplevel.obj_id]`.
                self.destroy()?;
                self.windows.borrow_mut().remove(&self.core.id);
                if let Some(f) = self.on_closed.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            7 => {
                let parent = args.get_u32()?;
                self.info.borrow_mut().parent = if parent == 0 { None } else { Some(parent) };
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown foreign_toplevel_handle event opcode {opcode}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn manager_creates_toplevel_on_new_toplevel_event() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let mgr = ForeignToplevelManager::new(2, 3, conn);

        let seen = Rc::new(RefCell::new(false));
        let seen2 = seen.clone();
        mgr.on_new_toplevel(move |_t| *seen2.borrow_mut() = true);

        let mut w = Writer::new();
        w.put_u32(100);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        mgr.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();

        assert!(*seen.borrow());
        assert_eq!(mgr.windows().len(), 1);
    }

    #[test]
    fn toplevel_state_array_decodes() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let windows = Rc::new(RefCell::new(HashMap::new()));
        let tl = Toplevel::new(5, 3, conn, windows);

        let mut w = Writer::new();
        let mut raw = Vec::new();
        raw.extend_from_slice(&2u32.to_ne_bytes()); // Activated
        raw.extend_from_slice(&0u32.to_ne_bytes()); // Maximized
        w.put_array(&raw);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        tl.dispatch_event(4, &mut r, &mut || unreachable!()).unwrap();

        assert_eq!(tl.info().states, vec![ToplevelState::Activated, ToplevelState::Maximized]);
    }

    #[test]
    fn output_enter_and_leave_track_membership() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let windows = Rc::new(RefCell::new(HashMap::new()));
        let tl = Toplevel::new(5, 3, conn, windows);

        let mut w = Writer::new();
        w.put_u32(42);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        tl.dispatch_event(2, &mut r, &mut || unreachable!()).unwrap(); // output_enter

        assert_eq!(tl.outputs(), vec![42]);

        let mut w = Writer::new();
        w.put_u32(42);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        tl.dispatch_event(3, &mut r, &mut || unreachable!()).unwrap(); // output_leave

        assert!(tl.outputs().is_empty());
    }

    #[test]
    fn closed_removes_toplevel_from_manager_map() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let mgr = ForeignToplevelManager::new(2, 3, conn);

        let mut w = Writer::new();
        w.put_u32(100);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        mgr.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();
        assert_eq!(mgr.windows().len(), 1);

        let tl = mgr.windows().into_iter().next().unwrap();
        let closed = Rc::new(RefCell::new(false));
        let closed2 = closed.clone();
        tl.on_closed(move || *closed2.borrow_mut() = true);

        let empty = Vec::new();
        let mut r = Reader::new(&empty);
        tl.dispatch_event(6, &mut r, &mut || unreachable!()).unwrap(); // closed

        assert!(*closed.borrow());
        assert!(mgr.windows().is_empty());
    }
}
