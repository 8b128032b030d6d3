//! `zwlr_data_control_manager_v1`: clipboard and primary-selection access
//! outside the normal input-focus-gated `wl_data_device` protocol.
//!
//! Grounded on
//! `original_source/wl_framework/protocols/data_control.py`'s
//! `DataControl`/`DataControlDevice`/`DataControlSource`/`DataControlOffer`.
//! `DataControlSource`'s `send` request was a stub in the original
//! (`# TODO: attach send_fd to IO loop`); this crate implements it fully,
//! per the Open Question resolution in DESIGN.md, by streaming an
//! application-supplied byte source to the FD as it becomes writable.

use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::interface::ProxyCore;
use crate::object::AnyProxy;
use crate::wire::{Reader, Writer};

/// `zwlr_data_control_manager_v1`.
pub struct DataControlManager {
    core: ProxyCore,
}

impl DataControlManager {
    pub fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self { core: ProxyCore::new(id, version, conn) }
    }

    /// `create_data_source` — opcode 0.
    pub fn create_data_source(&self) -> Result<Rc<DataControlSource>> {
        let id = self.core.reserve_id();
        let mut w = Writer::new();
        w.put_u32(id);
        self.core.send(0, w, vec![])?;
        let source = Rc::new(DataControlSource::new(id, self.core.version, self.core.conn.clone()));
        self.core.conn.place_proxy(id, source.clone());
        Ok(source)
    }

    /// `get_data_device` — opcode 1. `seat` is the `wl_seat` object ID.
    pub fn get_data_device(&self, seat: u32) -> Result<Rc<DataControlDevice>> {
        let id = self.core.reserve_id();
        let mut w = Writer::new();
        w.put_u32(id);
        w.put_u32(seat);
        self.core.send(1, w, vec![])?;
        let device = Rc::new(DataControlDevice::new(id, self.core.version, self.core.conn.clone()));
        self.core.conn.place_proxy(id, device.clone());
        Ok(device)
    }
}

impl AnyProxy for DataControlManager {
    fn interface_name(&self) -> &'static str {
        "zwlr_data_control_manager_v1"
    }

    fn dispatch_event(&self, opcode: u16, _args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        Err(Error::Codec(format!("unknown data_control_manager event opcode {opcode}")))
    }
}

/// One selection slot (clipboard or primary), matching
/// `DataControlDevice._set_selection`'s two call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Clipboard,
    Primary,
}

/// `zwlr_data_control_device_v1`.
pub struct DataControlDevice {
    core: ProxyCore,
    selection: RefCell<Option<Rc<DataControlOffer>>>,
    primary_selection: RefCell<Option<Rc<DataControlOffer>>>,
    on_data_offer: RefCell<Option<Box<dyn FnMut(Rc<DataControlOffer>)>>>,
    on_selection: RefCell<Option<Box<dyn FnMut(Option<Rc<DataControlOffer>>)>>>,
    on_primary_selection: RefCell<Option<Box<dyn FnMut(Option<Rc<DataControlOffer>>)>>>,
    on_finished: RefCell<Option<Box<dyn FnMut()>>>,
}

impl DataControlDevice {
    fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            selection: RefCell::new(None),
            primary_selection: RefCell::new(None),
            on_data_offer: RefCell::new(None),
            on_selection: RefCell::new(None),
            on_primary_selection: RefCell::new(None),
            on_finished: RefCell::new(None),
        }
    }

    pub fn on_data_offer(&self, f: impl FnMut(Rc<DataControlOffer>) + 'static) {
        *self.on_data_offer.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_selection(&self, f: impl FnMut(Option<Rc<DataControlOffer>>) + 'static) {
        *self.on_selection.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_primary_selection(&self, f: impl FnMut(Option<Rc<DataControlOffer>>) + 'static) {
        *self.on_primary_selection.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_finished(&self, f: impl FnMut() + 'static) {
        *self.on_finished.borrow_mut() = Some(Box::new(f));
    }

    pub fn current_selection(&self) -> Option<Rc<DataControlOffer>> {
        self.selection.borrow().clone()
    }

    pub fn current_primary_selection(&self) -> Option<Rc<DataControlOffer>> {
        self.primary_selection.borrow().clone()
    }

    /// `set_selection` — opcode 0. `source` is `None` to clear the
    /// clipboard, matching `_set_selection(source, primary=False)`.
    pub fn set_selection(&self, source: Option<&DataControlSource>) -> Result<()> {
        self._set_selection(source, Selection::Clipboard)
    }

    /// `set_primary_selection` — opcode 2.
    pub fn set_primary_selection(&self, source: Option<&DataControlSource>) -> Result<()> {
        self._set_selection(source, Selection::Primary)
    }

    fn _set_selection(&self, source: Option<&DataControlSource>, which: Selection) -> Result<()> {
        let mut w = Writer::new();
        w.put_u32(source.map(|s| s.core.id).unwrap_or(0));
        let opcode = match which {
            Selection::Clipboard => 0,
            Selection::Primary => 2,
        };
        self.core.send(opcode, w, vec![])
    }

    /// `destroy` — opcode 1.
    pub fn destroy(&self) -> Result<()> {
        self.core.send(1, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }
}

impl AnyProxy for DataControlDevice {
    fn interface_name(&self) -> &'static str {
        "zwlr_data_control_device_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                // data_offer(new_id id)
                let id = args.get_u32()?;
                let offer = Rc::new(DataControlOffer::new(id, self.core.version, self.core.conn.clone()));
                self.core.conn.place_proxy(id, offer.clone());
                if let Some(f) = self.on_data_offer.borrow_mut().as_mut() {
                    f(offer);
                }
                Ok(())
            }
            1 => {
                let id = args.get_u32()?;
                let offer = if id == 0 { None } else { self.core.conn.get_proxy(id).and_then(|p| p.downcast_rc::<DataControlOffer>().ok()) };
                *self.selection.borrow_mut() = offer.clone();
                if let Some(f) = self.on_selection.borrow_mut().as_mut() {
                    f(offer);
                }
                Ok(())
            }
            2 => {
                if let Some(f) = self.on_finished.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            3 => {
                let id = args.get_u32()?;
                let offer = if id == 0 { None } else { self.core.conn.get_proxy(id).and_then(|p| p.downcast_rc::<DataControlOffer>().ok()) };
                *self.primary_selection.borrow_mut() = offer.clone();
                if let Some(f) = self.on_primary_selection.borrow_mut().as_mut() {
                    f(offer);
                }
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown data_control_device event opcode {opcode}"))),
        }
    }
}

/// `zwlr_data_control_source_v1`: the client advertises this as the source
/// of clipboard content it owns.
pub struct DataControlSource {
    core: ProxyCore,
    on_send: RefCell<Option<Box<dyn FnMut(&str, OwnedFd)>>>,
    on_cancelled: RefCell<Option<Box<dyn FnMut()>>>,
}

impl DataControlSource {
    fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            on_send: RefCell::new(None),
            on_cancelled: RefCell::new(None),
        }
    }

    /// Install the handler invoked when the compositor asks this source to
    /// provide data for a given MIME type, handing over the write end of
    /// the pipe. Use [`stream_bytes`] from this callback to actually supply
    /// the payload via an event loop.
    pub fn on_send(&self, f: impl FnMut(&str, OwnedFd) + 'static) {
        *self.on_send.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_cancelled(&self, f: impl FnMut() + 'static) {
        *self.on_cancelled.borrow_mut() = Some(Box::new(f));
    }

    /// `offer` — opcode 0: advertise a MIME type this source can provide.
    pub fn offer(&self, mime_type: &str) -> Result<()> {
        let mut w = Writer::new();
        w.put_string(mime_type);
        self.core.send(0, w, vec![])
    }

    /// `destroy` — opcode 1.
    pub fn destroy(&self) -> Result<()> {
        self.core.send(1, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }
}

impl AnyProxy for DataControlSource {
    fn interface_name(&self) -> &'static str {
        "zwlr_data_control_source_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                let mime_type = args.get_string()?;
                let fd = extra_fds()?;
                if let Some(f) = self.on_send.borrow_mut().as_mut() {
                    f(&mime_type, fd);
                }
                Ok(())
            }
            1 => {
                if let Some(f) = self.on_cancelled.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown data_control_source event opcode {opcode}"))),
        }
    }
}

/// Stream `data` to `fd` as it becomes writable, resolved via the Open
/// Question in DESIGN.md: the original left this a stub, this crate
/// registers the FD with the event loop and writes until the buffer is
/// exhausted or the peer closes its read end.
pub fn stream_bytes<L: EventLoop + 'static>(
    event_loop: Rc<RefCell<L>>,
    fd: OwnedFd,
    data: Vec<u8>,
) -> Result<()> {
    use std::io::Write;
    use std::os::fd::{AsRawFd, FromRawFd};

    let raw_fd = fd.as_raw_fd();
    let state = Rc::new(RefCell::new((Some(fd), data, 0usize)));
    let state_for_cb = state.clone();
    let loop_for_cb = event_loop.clone();
    let watch_cell: Rc<RefCell<Option<crate::event_loop::WatchId>>> = Rc::new(RefCell::new(None));
    let watch_for_cb = watch_cell.clone();

    let watch = event_loop.borrow_mut().register_writer(
        raw_fd,
        Box::new(move || {
            let mut s = state_for_cb.borrow_mut();
            let (fd_opt, buf, offset) = &mut *s;
            let Some(fd) = fd_opt.as_ref() else { return };
            let raw = fd.as_raw_fd();
            let mut file = unsafe { std::fs::File::from_raw_fd(raw) };
            let remaining = &buf[*offset..];
            let result = file.write(remaining);
            std::mem::forget(file);
            match result {
                Ok(n) => {
                    *offset += n;
                    if *offset >= buf.len() {
                        fd_opt.take();
                        if let Some(w) = watch_for_cb.borrow_mut().take() {
                            let _ = loop_for_cb.borrow_mut().unregister_writer(w);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => {
                    fd_opt.take();
                    if let Some(w) = watch_for_cb.borrow_mut().take() {
                        let _ = loop_for_cb.borrow_mut().unregister_writer(w);
                    }
                }
            }
        }),
    )?;
    *watch_cell.borrow_mut() = Some(watch);
    Ok(())
}

/// `zwlr_data_control_offer_v1`: a single MIME-typed clipboard offer.
pub struct DataControlOffer {
    core: ProxyCore,
    mime_types: RefCell<Vec<String>>,
}

impl DataControlOffer {
    fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            mime_types: RefCell::new(Vec::new()),
        }
    }

    pub fn mime_types(&self) -> Vec<String> {
        self.mime_types.borrow().clone()
    }

    /// `receive` — opcode 0: ask the compositor to write `mime_type`'s
    /// content into `write_fd`. Pair with [`crate::data_transfer::receive`]
    /// on the read end to actually pull the bytes out, under idle-timeout
    /// supervision.
    pub fn receive(&self, mime_type: &str, write_fd: OwnedFd) -> Result<()> {
        let mut w = Writer::new();
        w.put_string(mime_type);
        self.core.send(0, w, vec![write_fd])
    }

    /// `destroy` — opcode 1.
    pub fn destroy(&self) -> Result<()> {
        self.core.send(1, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }
}

impl AnyProxy for DataControlOffer {
    fn interface_name(&self) -> &'static str {
        "zwlr_data_control_offer_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                self.mime_types.borrow_mut().push(args.get_string()?);
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown data_control_offer event opcode {opcode}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn offer_accumulates_mime_types() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let offer = DataControlOffer::new(2, 1, conn);

        for mime in ["text/plain", "text/plain;charset=utf-8", "UTF8_STRING"] {
            let mut w = Writer::new();
            w.put_string(mime);
            let payload = w.into_payload();
            let mut r = Reader::new(&payload);
            offer.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();
        }
        assert_eq!(offer.mime_types().len(), 3);
    }

    #[test]
    fn device_tracks_selection_clear() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let device = DataControlDevice::new(2, 1, conn);

        let mut w = Writer::new();
        w.put_u32(0);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        device.dispatch_event(1, &mut r, &mut || unreachable!()).unwrap();
        assert!(device.current_selection().is_none());
    }
}
