//! The client connection: socket ownership, object table, and the inbound
//! dispatch loop.
//!
//! Grounded on `original_source/wl_framework/network/connection.py`'s
//! `WaylandConnection` for the overall shape (env resolution, `sync`
//! barrier, `bind`, event dispatch) and on `wayland-client/src/conn.rs` for
//! the Rust-idiomatic connect sequence and `ConnectError` style. Unlike the
//! teacher's `rust_imp::connection`, state lives behind a single
//! `Rc<RefCell<..>>`, never `Arc<Mutex<..>>`: this crate is single-threaded
//! by design (see DESIGN.md).

use std::cell::RefCell;
use std::env;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::object::{AnyProxy, DispatchTarget, ObjectTable, OneShotCallback};
use crate::socket::Socket;
use crate::wire::{Reader, Writer};

/// Shared, reference-counted connection state. Every proxy holds a clone of
/// this handle so it can send requests without borrowing the whole
/// connection for its lifetime.
#[derive(Clone)]
pub struct Connection(Rc<RefCell<Inner>>);

struct Inner {
    socket: Socket,
    objects: ObjectTable,
    debug: bool,
}

impl Connection {
    /// Resolve `XDG_RUNTIME_DIR`/`WAYLAND_DISPLAY` (or `WAYLAND_SOCKET` as a
    /// pre-connected fast path) and connect to the compositor, matching
    /// `WaylandConnection.__init__`'s resolution order.
    pub fn connect_to_env() -> Result<Self> {
        if let Ok(fd_str) = env::var("WAYLAND_SOCKET") {
            let raw: RawFd = fd_str
                .parse()
                .map_err(|_| Error::EnvironmentMissing("WAYLAND_SOCKET"))?;
            let stream = unsafe { UnixStream::from_raw_fd(raw) };
            return Self::from_stream(stream);
        }

        let runtime_dir = env::var("XDG_RUNTIME_DIR").map_err(|_| Error::EnvironmentMissing("XDG_RUNTIME_DIR"))?;
        let display = env::var("WAYLAND_DISPLAY").unwrap_or_else(|_| "wayland-0".to_string());
        let mut path = PathBuf::from(runtime_dir);
        path.push(&display);
        log::debug!("connecting to wayland socket at {}", path.display());
        let stream = UnixStream::connect(&path).map_err(|e| {
            log::error!("failed to connect to {}: {e}", path.display());
            Error::ConnectFailed(e)
        })?;
        Self::from_stream(stream)
    }

    /// Wrap an already-connected stream. Exposed crate-wide so protocol
    /// modules can build a `Connection` over a `UnixStream::pair()` in
    /// their own tests without going through environment resolution.
    pub(crate) fn from_stream(stream: UnixStream) -> Result<Self> {
        let socket = Socket::new(stream)?;
        let debug = env::var("WAYLAND_DEBUG").map(|v| v == "1" || v == "client").unwrap_or(false);
        Ok(Self(Rc::new(RefCell::new(Inner {
            socket,
            objects: ObjectTable::new(),
            debug,
        }))))
    }

    pub fn raw_fd(&self) -> RawFd {
        self.0.borrow().socket.as_raw_fd()
    }

    pub fn register_display(&self, proxy: Rc<dyn AnyProxy>) {
        self.0.borrow_mut().objects.insert_display(proxy);
    }

    pub fn register_proxy(&self, proxy: Rc<dyn AnyProxy>) -> u32 {
        self.0.borrow_mut().objects.insert_proxy(proxy)
    }

    pub fn register_callback(&self, cb: OneShotCallback) -> u32 {
        self.0.borrow_mut().objects.insert_callback(cb)
    }

    /// Reserve an object ID for a proxy that needs to know its own ID before
    /// it can be constructed (every proxy, since requests are sent through
    /// `ProxyCore::id`). Pair with [`Self::place_proxy`].
    pub fn reserve_id(&self) -> u32 {
        self.0.borrow_mut().objects.reserve_id()
    }

    /// Place a proxy into a slot previously reserved with [`Self::reserve_id`].
    pub fn place_proxy(&self, id: u32, proxy: Rc<dyn AnyProxy>) {
        self.0.borrow_mut().objects.place_proxy(id, proxy);
    }

    pub fn get_proxy(&self, id: u32) -> Option<Rc<dyn AnyProxy>> {
        self.0.borrow().objects.get_proxy(id)
    }

    /// Send a request. `new_id_slot`, if present, is the freshly allocated
    /// object ID that must be written into the payload at the position the
    /// caller already encoded it (the spec requires the caller build the
    /// full payload, including the `new_id`, before calling this).
    pub fn send_request(&self, object_id: u32, opcode: u16, payload: &[u8], fds: Vec<OwnedFd>) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.debug {
            log::debug!(
                "-> object#{object_id}.request(opcode={opcode}, {} bytes, {} fds)",
                payload.len(),
                fds.len()
            );
        }
        inner.socket.queue_message(object_id, opcode, payload, fds);
        inner.socket.flush()
    }

    /// Pump the socket: read whatever is available and dispatch every
    /// complete message found. Returns `Ok(false)` if the peer disconnected.
    pub fn dispatch_pending(&self) -> Result<bool> {
        loop {
            let alive = self.0.borrow_mut().socket.fill_incoming()?;
            if !alive {
                return Ok(false);
            }
            loop {
                let msg = self.0.borrow_mut().socket.next_message()?;
                let Some(msg) = msg else { break };
                let debug = self.0.borrow().debug;
                if debug {
                    log::debug!(
                        "<- object#{}.event(opcode={}, {} bytes)",
                        msg.header.object_id,
                        msg.header.opcode,
                        msg.payload.len()
                    );
                }

                // wl_display (object 1) handles error/delete_id itself before
                // reaching general dispatch, matching
                // `WaylandConnection._handle_event`'s special-casing.
                if msg.header.object_id == crate::object::DISPLAY_ID {
                    if self.handle_display_event(&msg)? {
                        continue;
                    }
                }

                let mut reader = Reader::new(&msg.payload);
                let conn = self.clone();
                let mut take_fd = move || conn.take_fd();

                // Extract the target and release the borrow before invoking
                // it: an event handler that re-enters the connection (e.g.
                // `place_proxy` for a newly bound global, or `take_fd` for an
                // fd-carrying event) would otherwise hit a `BorrowMutError`
                // against the still-held `Ref`/`RefMut` here.
                let target = self.0.borrow_mut().objects.take_dispatch_target(msg.header.object_id);
                let result = match target {
                    Ok(DispatchTarget::Proxy(p)) => p.dispatch_event(msg.header.opcode, &mut reader, &mut take_fd),
                    Ok(DispatchTarget::Callback(cb)) => cb(&mut reader),
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    log::error!("error dispatching event: {e}");
                }
            }
        }
    }

    fn take_fd(&self) -> Result<OwnedFd> {
        self.0.borrow_mut().socket.take_fd()
    }

    /// `wl_display` opcodes: 0 = `sync` (a server-only response opcode is
    /// never sent to us), events are opcode 0 = `error`, opcode 1 =
    /// `delete_id`, matching `protocols/wayland.py`'s `Display`.
    fn handle_display_event(&self, msg: &crate::socket::RawMessage) -> Result<bool> {
        match msg.header.opcode {
            0 => {
                let mut r = Reader::new(&msg.payload);
                let object_id = r.get_u32()?;
                let code = r.get_u32()?;
                let message = r.get_string()?;
                log::error!("compositor protocol error on object {object_id}: code {code}: {message}");
                Ok(true)
            }
            1 => {
                let mut r = Reader::new(&msg.payload);
                let id = r.get_u32()?;
                self.0.borrow_mut().objects.handle_delete_id(id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Round-trip a `wl_display.sync` barrier: send the request, then pump
    /// dispatch until the callback fires. Matches
    /// `WaylandConnection.sync`/`Interface.sync`.
    pub fn sync(&self) -> Result<()> {
        let done = Rc::new(RefCell::new(false));
        let done_clone = done.clone();
        let cb_id = self.register_callback(Box::new(move |_args| {
            *done_clone.borrow_mut() = true;
            Ok(())
        }));

        let mut w = Writer::new();
        w.put_u32(cb_id);
        self.send_request(crate::object::DISPLAY_ID, 0, &w.into_payload(), vec![])?;

        while !*done.borrow() {
            if !self.dispatch_pending()? {
                return Err(Error::Disconnected);
            }
        }
        Ok(())
    }
}

#[allow(unused_imports)]
use std::os::fd::FromRawFd;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_env_requires_runtime_dir() {
        // Safety net for the resolution order; does not touch a real socket.
        let saved = env::var("XDG_RUNTIME_DIR").ok();
        env::remove_var("XDG_RUNTIME_DIR");
        env::remove_var("WAYLAND_SOCKET");
        let result = Connection::connect_to_env();
        assert!(matches!(result, Err(Error::EnvironmentMissing("XDG_RUNTIME_DIR"))));
        if let Some(v) = saved {
            env::set_var("XDG_RUNTIME_DIR", v);
        }
    }
}
