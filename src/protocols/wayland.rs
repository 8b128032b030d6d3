//! The core protocol: `wl_display`, `wl_registry`, `wl_seat`, `wl_output`,
//! `wl_shm`.
//!
//! Grounded on `original_source/wl_framework/protocols/wayland.py`'s
//! `Display`/`Registry`/`Seat` classes for request/event shape, and on
//! `wayland-client`'s core protocol bootstrap sequence (`get_registry` right
//! after connect, then a `sync` barrier) for the Rust-side bootstrap
//! ordering.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::interface::ProxyCore;
use crate::object::AnyProxy;
use crate::wire::{Reader, Writer};

/// `wl_display`. Object ID 1. Error and `delete_id` events are intercepted
/// by [`crate::connection::Connection::dispatch_pending`] before general
/// dispatch ever reaches this proxy, matching `protocols/wayland.py`'s
/// `Display.on_error`/`on_delete_id` special-casing at the connection level.
pub struct Display {
    core: ProxyCore,
    /// Every auto-bound `wl_output`, keyed by object ID, matching "the
    /// Display keeps the list of outputs and exposes lookup by object ID".
    outputs: RefCell<HashMap<u32, Rc<Output>>>,
}

impl Display {
    pub fn bootstrap(conn: Connection) -> Rc<Self> {
        let display = Rc::new(Self {
            core: ProxyCore::new(crate::object::DISPLAY_ID, 1, conn.clone()),
            outputs: RefCell::new(HashMap::new()),
        });
        conn.register_display(display.clone());
        display
    }

    /// `wl_display.get_registry` — opcode 1.
    pub fn get_registry(&self) -> Result<Rc<Registry>> {
        let id = self.core.reserve_id();
        let mut w = Writer::new();
        w.put_u32(id);
        self.core.send(1, w, vec![])?;
        let registry = Rc::new(Registry::new(id, self.core.conn.clone()));
        self.core.conn.place_proxy(id, registry.clone());
        Ok(registry)
    }

    fn register_output(&self, output: Rc<Output>) {
        self.outputs.borrow_mut().insert(output.core.id, output);
    }

    pub fn get_output_by_id(&self, id: u32) -> Option<Rc<Output>> {
        self.outputs.borrow().get(&id).cloned()
    }

    pub fn outputs(&self) -> Vec<Rc<Output>> {
        self.outputs.borrow().values().cloned().collect()
    }
}

impl AnyProxy for Display {
    fn interface_name(&self) -> &'static str {
        "wl_display"
    }

    fn dispatch_event(&self, opcode: u16, _args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        Err(Error::ProgrammerError(format!(
            "unexpected wl_display event opcode {opcode} reached general dispatch"
        )))
    }
}

/// A single advertised global, as tracked by [`Registry`].
#[derive(Debug, Clone)]
pub struct Global {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

/// `wl_registry`. Tracks every currently-advertised global by name and by
/// interface, matching `Registry._registry`/`_interfaces` in the teacher
/// source. Binding a global is a two-step reserve/place sequence (see
/// [`crate::interface::ProxyCore::reserve_id`]) because the new proxy needs
/// its own ID before it can be constructed.
pub struct Registry {
    core: ProxyCore,
    by_name: RefCell<HashMap<u32, Global>>,
    by_interface: RefCell<HashMap<String, Vec<u32>>>,
    on_global: RefCell<Option<Box<dyn FnMut(&Global)>>>,
    on_global_remove: RefCell<Option<Box<dyn FnMut(u32)>>>,
    /// Set once the first `sync` after construction completes. `bind`
    /// refuses before this (except the internal auto-bind of outputs),
    /// matching `do_bind`'s "Bind without waiting for full sync" guard.
    initial_synced: RefCell<bool>,
}

impl Registry {
    fn new(id: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, 1, conn),
            by_name: RefCell::new(HashMap::new()),
            by_interface: RefCell::new(HashMap::new()),
            on_global: RefCell::new(None),
            on_global_remove: RefCell::new(None),
            initial_synced: RefCell::new(false),
        }
    }

    /// Called once the initial `sync` barrier completes, unblocking `bind`.
    /// Matches `Registry.on_initial_sync` setting `self._initial_sync = True`.
    pub fn mark_initial_sync(&self) {
        *self.initial_synced.borrow_mut() = true;
    }

    pub fn is_initial_synced(&self) -> bool {
        *self.initial_synced.borrow()
    }

    /// Run the initial `sync` barrier, mark the registry ready for `bind`,
    /// then invoke `on_initial_sync` — matching the host API's "override
    /// `on_initial_sync` to bind interface proxies" (`wl_output` excepted,
    /// since it auto-binds the moment its global appears).
    pub fn initial_sync(&self, on_initial_sync: impl FnOnce(&Registry)) -> Result<()> {
        self.core.conn.sync()?;
        self.mark_initial_sync();
        on_initial_sync(self);
        Ok(())
    }

    pub fn on_global(&self, f: impl FnMut(&Global) + 'static) {
        *self.on_global.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_global_remove(&self, f: impl FnMut(u32) + 'static) {
        *self.on_global_remove.borrow_mut() = Some(Box::new(f));
    }

    /// The first global currently advertised for `interface`, if any,
    /// capped to at most `max_version`.
    pub fn find(&self, interface: &str, max_version: u32) -> Option<(u32, u32)> {
        let by_name = self.by_name.borrow();
        self.by_interface
            .borrow()
            .get(interface)
            .and_then(|names| names.first())
            .and_then(|name| by_name.get(name))
            .map(|g| (g.name, g.version.min(max_version)))
    }

    pub fn all_with_interface(&self, interface: &str) -> Vec<u32> {
        self.by_interface.borrow().get(interface).cloned().unwrap_or_default()
    }

    /// `wl_registry.bind` — opcode 0. `T::new` constructs the concrete proxy
    /// type once its object ID is known; version negotiated as
    /// `min(client_max, server_adv)`.
    pub fn bind<T: AnyProxy>(
        &self,
        name: u32,
        interface: &str,
        client_max_version: u32,
        new: impl FnOnce(u32, u32, Connection) -> T,
    ) -> Result<Rc<T>> {
        if !*self.initial_synced.borrow() {
            return Err(Error::ProgrammerError(
                "bind without waiting for full sync; bind in on_initial_sync() instead".into(),
            ));
        }
        self.bind_unchecked(name, interface, client_max_version, new)
    }

    /// The actual bind sequence, without the initial-sync guard: used both
    /// by [`Self::bind`] (after checking) and by the `wl_output` auto-bind
    /// path in `handle_global`, which bypasses the guard entirely.
    fn bind_unchecked<T: AnyProxy>(
        &self,
        name: u32,
        interface: &str,
        client_max_version: u32,
        new: impl FnOnce(u32, u32, Connection) -> T,
    ) -> Result<Rc<T>> {
        let global = self
            .by_name
            .borrow()
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::ProgrammerError(format!("no such global: name {name}")))?;
        if global.interface != interface {
            return Err(Error::ProgrammerError(format!(
                "global {name} is {} not {interface}",
                global.interface
            )));
        }
        let version = global.version.min(client_max_version);
        let id = self.core.reserve_id();

        let mut w = Writer::new();
        w.put_u32(name);
        w.put_string(interface);
        w.put_u32(version);
        w.put_u32(id);
        self.core.send(0, w, vec![])?;

        let proxy = Rc::new(new(id, version, self.core.conn.clone()));
        self.core.conn.place_proxy(id, proxy.clone());
        Ok(proxy)
    }

    fn handle_global(&self, name: u32, interface: String, version: u32) {
        if self.by_name.borrow().contains_key(&name) {
            log::warn!("got multiple globals for the same id {name}: {interface} v{version}");
            return;
        }
        let global = Global { name, interface: interface.clone(), version };
        self.by_name.borrow_mut().insert(name, global.clone());
        self.by_interface.borrow_mut().entry(interface.clone()).or_default().push(name);
        if let Some(f) = self.on_global.borrow_mut().as_mut() {
            f(&global);
        }

        // Outputs are bound the moment their global appears, ahead of the
        // initial-sync barrier, so toplevel/workspace output-membership
        // events can resolve an output ID as soon as they arrive.
        if interface == "wl_output" {
            match self.bind_unchecked(name, "wl_output", version, Output::new) {
                Ok(output) => {
                    if let Some(display) = self.core.conn.get_proxy(crate::object::DISPLAY_ID).and_then(|p| p.downcast_rc::<Display>().ok()) {
                        display.register_output(output);
                    }
                }
                Err(e) => log::error!("failed to auto-bind wl_output (name {name}): {e}"),
            }
        }
    }

    /// See SPEC_FULL.md §9: currently-bound instances of a removed global
    /// are left live; only the registry's own bookkeeping is cleared.
    fn handle_global_remove(&self, name: u32) {
        if let Some(global) = self.by_name.borrow_mut().remove(&name) {
            if let Some(names) = self.by_interface.borrow_mut().get_mut(&global.interface) {
                names.retain(|&n| n != name);
            }
        }
        if let Some(f) = self.on_global_remove.borrow_mut().as_mut() {
            f(name);
        }
    }
}

impl AnyProxy for Registry {
    fn interface_name(&self) -> &'static str {
        "wl_registry"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                let name = args.get_u32()?;
                let interface = args.get_string()?;
                let version = args.get_u32()?;
                self.handle_global(name, interface, version);
                Ok(())
            }
            1 => {
                let name = args.get_u32()?;
                self.handle_global_remove(name);
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown wl_registry event opcode {opcode}"))),
        }
    }
}

bitflags::bitflags! {
    /// `wl_seat` capability bits, matching the teacher's own use of
    /// `bitflags` (`wayland-client`'s `Cargo.toml`) for protocol flag
    /// enums.
    #[derive(Default)]
    pub struct SeatCapability: u32 {
        const POINTER = 1;
        const KEYBOARD = 2;
        const TOUCH = 4;
    }
}

/// `wl_seat`. Matches `protocols/wayland.py`'s `Seat`: capability/name
/// events, `get_keyboard`/`get_touch`/`release` requests. (`get_pointer` is
/// not exposed, matching the original, which never binds a pointer.)
pub struct Seat {
    core: ProxyCore,
    capabilities: RefCell<SeatCapability>,
    name: RefCell<Option<String>>,
}

impl Seat {
    pub fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            capabilities: RefCell::new(SeatCapability::empty()),
            name: RefCell::new(None),
        }
    }

    pub fn capabilities(&self) -> SeatCapability {
        *self.capabilities.borrow()
    }

    /// This seat's object ID, needed by protocols (idle-notify,
    /// virtual-keyboard) that take a seat as a request argument.
    pub fn core_id(&self) -> u32 {
        self.core.id
    }

    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }

    /// `wl_seat.get_keyboard` — opcode 1.
    pub fn get_keyboard(&self) -> Result<u32> {
        let id = self.core.reserve_id();
        let mut w = Writer::new();
        w.put_u32(id);
        self.core.send(1, w, vec![])?;
        Ok(id)
    }

    /// `wl_seat.get_touch` — opcode 2.
    pub fn get_touch(&self) -> Result<u32> {
        let id = self.core.reserve_id();
        let mut w = Writer::new();
        w.put_u32(id);
        self.core.send(2, w, vec![])?;
        Ok(id)
    }

    /// `wl_seat.release` — opcode 3.
    pub fn release(&self) -> Result<()> {
        self.core.send(3, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }
}

impl AnyProxy for Seat {
    fn interface_name(&self) -> &'static str {
        "wl_seat"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                let bits = args.get_u32()?;
                *self.capabilities.borrow_mut() = SeatCapability::from_bits_truncate(bits);
                Ok(())
            }
            1 => {
                *self.name.borrow_mut() = Some(args.get_string()?);
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown wl_seat event opcode {opcode}"))),
        }
    }
}

/// `wl_output`. Auto-bound the moment its global appears (bypassing the
/// initial-sync guard other globals wait behind), matching the spec's C5
/// description of output hot-plug.
pub struct Output {
    core: ProxyCore,
    state: RefCell<OutputState>,
}

#[derive(Debug, Default, Clone)]
pub struct OutputState {
    pub make: String,
    pub model: String,
    pub scale: i32,
    pub current_mode: Option<(i32, i32, i32)>,
}

impl Output {
    pub fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            state: RefCell::new(OutputState { scale: 1, ..Default::default() }),
        }
    }

    pub fn state(&self) -> OutputState {
        self.state.borrow().clone()
    }
}

impl AnyProxy for Output {
    fn interface_name(&self) -> &'static str {
        "wl_output"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                // geometry: x, y, physical_width, physical_height, subpixel,
                // make, model, transform
                let _x = args.get_i32()?;
                let _y = args.get_i32()?;
                let _pw = args.get_i32()?;
                let _ph = args.get_i32()?;
                let _subpixel = args.get_i32()?;
                let make = args.get_string()?;
                let model = args.get_string()?;
                let _transform = args.get_i32()?;
                let mut state = self.state.borrow_mut();
                state.make = make;
                state.model = model;
                Ok(())
            }
            1 => {
                let flags = args.get_u32()?;
                let width = args.get_i32()?;
                let height = args.get_i32()?;
                let refresh = args.get_i32()?;
                const MODE_CURRENT: u32 = 0x1;
                if flags & MODE_CURRENT != 0 {
                    self.state.borrow_mut().current_mode = Some((width, height, refresh));
                }
                Ok(())
            }
            2 => Ok(()), // done
            3 => {
                self.state.borrow_mut().scale = args.get_i32()?;
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown wl_output event opcode {opcode}"))),
        }
    }
}

/// `wl_shm`. Only what this crate needs for the extension protocols'
/// supporting surfaces: tracking advertised pixel formats and creating shm
/// pools from a caller-supplied, already-sized FD.
pub struct Shm {
    core: ProxyCore,
    formats: RefCell<Vec<u32>>,
}

impl Shm {
    pub fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            formats: RefCell::new(Vec::new()),
        }
    }

    pub fn formats(&self) -> Vec<u32> {
        self.formats.borrow().clone()
    }

    /// `wl_shm.create_pool` — opcode 0.
    pub fn create_pool(&self, fd: OwnedFd, size: i32) -> Result<u32> {
        let id = self.core.reserve_id();
        let mut w = Writer::new();
        w.put_u32(id);
        w.put_i32(size);
        self.core.send(0, w, vec![fd])?;
        Ok(id)
    }
}

impl AnyProxy for Shm {
    fn interface_name(&self) -> &'static str {
        "wl_shm"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                self.formats.borrow_mut().push(args.get_u32()?);
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown wl_shm event opcode {opcode}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair() -> (Connection, Connection) {
        let (a, b) = UnixStream::pair().unwrap();
        (Connection::from_stream(a).unwrap(), Connection::from_stream(b).unwrap())
    }

    #[test]
    fn registry_tracks_globals_and_dual_binds() {
        let (client, _server) = pair();
        let display = Display::bootstrap(client.clone());
        let registry = display.get_registry().unwrap();

        let mut reader_buf = Writer::new();
        reader_buf.put_u32(10);
        reader_buf.put_string("wl_seat");
        reader_buf.put_u32(7);
        let payload = reader_buf.into_payload();
        let mut r = Reader::new(&payload);
        registry.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();

        let mut reader_buf = Writer::new();
        reader_buf.put_u32(11);
        reader_buf.put_string("wl_seat");
        reader_buf.put_u32(7);
        let payload = reader_buf.into_payload();
        let mut r = Reader::new(&payload);
        registry.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();

        let names = registry.all_with_interface("wl_seat");
        assert_eq!(names, vec![10, 11]);

        let (name, version) = registry.find("wl_seat", 5).unwrap();
        assert_eq!(name, 10);
        assert_eq!(version, 5); // min(client_max=5, server_adv=7)
    }

    #[test]
    fn wl_output_auto_binds_and_global_remove_leaves_it_live() {
        let (client, _server) = pair();
        let display = Display::bootstrap(client.clone());
        let registry = display.get_registry().unwrap();

        let mut w = Writer::new();
        w.put_u32(5);
        w.put_string("wl_output");
        w.put_u32(2);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        registry.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();

        // auto-bound the moment the global appeared, despite no initial sync yet
        assert!(!registry.is_initial_synced());
        assert_eq!(display.outputs().len(), 1);

        let mut w = Writer::new();
        w.put_u32(5);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        registry.dispatch_event(1, &mut r, &mut || unreachable!()).unwrap();

        assert!(registry.find("wl_output", 2).is_none());
        // the already-bound instance is untouched by global_remove
        assert_eq!(display.outputs().len(), 1);
    }

    #[test]
    fn bind_before_initial_sync_is_a_programmer_error() {
        let (client, _server) = pair();
        let display = Display::bootstrap(client.clone());
        let registry = display.get_registry().unwrap();

        let mut w = Writer::new();
        w.put_u32(10);
        w.put_string("wl_seat");
        w.put_u32(7);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        registry.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();

        assert!(matches!(registry.bind(10, "wl_seat", 7, Seat::new), Err(Error::ProgrammerError(_))));

        registry.mark_initial_sync();
        assert!(registry.bind(10, "wl_seat", 7, Seat::new).is_ok());
    }

    #[test]
    fn duplicate_global_id_is_logged_and_ignored() {
        let (client, _server) = pair();
        let display = Display::bootstrap(client.clone());
        let registry = display.get_registry().unwrap();

        let mut w = Writer::new();
        w.put_u32(10);
        w.put_string("wl_seat");
        w.put_u32(7);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        registry.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();

        let mut w = Writer::new();
        w.put_u32(10);
        w.put_string("wl_compositor");
        w.put_u32(1);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        registry.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();

        assert_eq!(registry.find("wl_seat", 7), Some((10, 7)));
        assert!(registry.all_with_interface("wl_compositor").is_empty());
    }

    #[test]
    fn seat_capability_bits_decode() {
        let (client, _server) = pair();
        let seat = Seat::new(5, 1, client);
        let mut w = Writer::new();
        w.put_u32(SeatCapability::KEYBOARD.bits() | SeatCapability::TOUCH.bits());
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        seat.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();
        assert!(seat.capabilities().contains(SeatCapability::KEYBOARD));
        assert!(seat.capabilities().contains(SeatCapability::TOUCH));
        assert!(!seat.capabilities().contains(SeatCapability::POINTER));
    }
}
