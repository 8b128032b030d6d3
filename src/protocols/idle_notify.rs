//! Idle notification, adaptively bound to whichever of `org_kde_kwin_idle`
//! or `ext_idle_notifier_v1` the compositor advertises.
//!
//! Grounded on
//! `original_source/wl_framework/protocols/idle_notify.py`'s
//! `IdleNotifyManager` factory function and `_IdleNotifyManager`/
//! `IdleNotifier` classes, which differ in request argument order between
//! the two variants.

use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::interface::ProxyCore;
use crate::object::AnyProxy;
use crate::protocols::wayland::{Registry, Seat};
use crate::wire::{Reader, Writer};

/// Which concrete protocol a bound manager turned out to be, since the two
/// variants order `get_idle_notification`'s arguments differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleNotifyVariant {
    /// `org_kde_kwin_idle`: `get_idle_timeout(new_id, seat, timeout_ms)`.
    Kde,
    /// `ext_idle_notifier_v1`: `get_idle_notification(new_id, timeout_ms, seat)`.
    Ext,
}

/// Picks whichever global is available, preferring `org_kde_kwin_idle` the
/// way the original `IdleNotifyManager()` factory tries it first.
pub fn bind_idle_notify_manager(registry: &Registry, client_max_version: u32) -> Result<IdleNotifyManager> {
    if let Some((name, _)) = registry.find("org_kde_kwin_idle", client_max_version) {
        let proxy = registry.bind(name, "org_kde_kwin_idle", client_max_version, |id, version, conn| {
            IdleNotifyManagerInner::new(id, version, conn, IdleNotifyVariant::Kde)
        })?;
        return Ok(IdleNotifyManager(proxy));
    }
    if let Some((name, _)) = registry.find("ext_idle_notifier_v1", client_max_version) {
        let proxy = registry.bind(name, "ext_idle_notifier_v1", client_max_version, |id, version, conn| {
            IdleNotifyManagerInner::new(id, version, conn, IdleNotifyVariant::Ext)
        })?;
        return Ok(IdleNotifyManager(proxy));
    }
    Err(Error::UnsupportedProtocol("org_kde_kwin_idle or ext_idle_notifier_v1".into()))
}

/// A bound idle-notify manager of whichever variant the compositor offered.
pub struct IdleNotifyManager(Rc<IdleNotifyManagerInner>);

impl IdleNotifyManager {
    pub fn variant(&self) -> IdleNotifyVariant {
        self.0.variant
    }

    /// Create an [`IdleNotifier`] that fires after `timeout_ms` of user
    /// inactivity on `seat`.
    pub fn get_idle_notification(&self, timeout_ms: u32, seat: &Seat) -> Result<Rc<IdleNotifier>> {
        self.0.get_idle_notification(timeout_ms, seat)
    }
}

pub struct IdleNotifyManagerInner {
    core: ProxyCore,
    variant: IdleNotifyVariant,
}

impl IdleNotifyManagerInner {
    fn new(id: u32, version: u32, conn: Connection, variant: IdleNotifyVariant) -> Self {
        Self { core: ProxyCore::new(id, version, conn), variant }
    }

    fn get_idle_notification(&self, timeout_ms: u32, seat: &Seat) -> Result<Rc<IdleNotifier>> {
        let id = self.core.reserve_id();
        let mut w = Writer::new();
        // The KDE variant uses a different argument ordering and request
        // opcode (it has no `destroy` request, so `get_idle_timeout` takes
        // opcode 0); `ext_idle_notifier_v1` reserves opcode 0 for `destroy`
        // and puts `get_idle_notification` at opcode 1.
        let opcode = match self.variant {
            IdleNotifyVariant::Kde => {
                w.put_u32(id);
                w.put_u32(seat.core_id());
                w.put_u32(timeout_ms);
                0
            }
            IdleNotifyVariant::Ext => {
                w.put_u32(id);
                w.put_u32(timeout_ms);
                w.put_u32(seat.core_id());
                1
            }
        };
        self.core.send(opcode, w, vec![])?;
        let notifier = Rc::new(IdleNotifier::new(id, self.core.version, self.core.conn.clone(), self.variant));
        self.core.conn.place_proxy(id, notifier.clone());
        Ok(notifier)
    }
}

impl AnyProxy for IdleNotifyManagerInner {
    fn interface_name(&self) -> &'static str {
        match self.variant {
            IdleNotifyVariant::Kde => "org_kde_kwin_idle",
            IdleNotifyVariant::Ext => "ext_idle_notifier_v1",
        }
    }

    fn dispatch_event(&self, opcode: u16, _args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        Err(Error::Codec(format!("unknown idle notify manager event opcode {opcode}")))
    }
}

/// `org_kde_kwin_idle_timeout` / `ext_idle_notification_v1`. Fires
/// `on_idle`/`on_resume` as the user goes idle and comes back.
pub struct IdleNotifier {
    core: ProxyCore,
    variant: IdleNotifyVariant,
    on_idle: RefCell<Option<Box<dyn FnMut()>>>,
    on_resume: RefCell<Option<Box<dyn FnMut()>>>,
}

impl IdleNotifier {
    fn new(id: u32, version: u32, conn: Connection, variant: IdleNotifyVariant) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            variant,
            on_idle: RefCell::new(None),
            on_resume: RefCell::new(None),
        }
    }

    pub fn on_idle(&self, f: impl FnMut() + 'static) {
        *self.on_idle.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_resume(&self, f: impl FnMut() + 'static) {
        *self.on_resume.borrow_mut() = Some(Box::new(f));
    }

    /// `simulate_user_activity` — KDE-only; `ext_idle_notifier_v1` has no
    /// equivalent request, matching the original's `simulate_user_activity`
    /// raising when bound to the `ext` variant.
    pub fn simulate_user_activity(&self) -> Result<()> {
        if self.variant != IdleNotifyVariant::Kde {
            return Err(Error::Unsupported("simulate_user_activity (ext_idle_notifier_v1 has no equivalent request)"));
        }
        self.core.send(1, Writer::new(), vec![])
    }

    /// `destroy`/`release` — opcode 0 on both variants.
    pub fn destroy(&self) -> Result<()> {
        self.core.send(0, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }
}

impl AnyProxy for IdleNotifier {
    fn interface_name(&self) -> &'static str {
        match self.variant {
            IdleNotifyVariant::Kde => "org_kde_kwin_idle_timeout",
            IdleNotifyVariant::Ext => "ext_idle_notification_v1",
        }
    }

    fn dispatch_event(&self, opcode: u16, _args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                if let Some(f) = self.on_idle.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            1 => {
                if let Some(f) = self.on_resume.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown idle notifier event opcode {opcode}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn ext_variant_rejects_simulate_user_activity() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let notifier = IdleNotifier::new(5, 1, conn, IdleNotifyVariant::Ext);
        assert!(matches!(notifier.simulate_user_activity(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn idle_and_resume_callbacks_fire() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let notifier = IdleNotifier::new(5, 1, conn, IdleNotifyVariant::Kde);

        let idle_count = Rc::new(RefCell::new(0));
        let idle_count2 = idle_count.clone();
        notifier.on_idle(move || *idle_count2.borrow_mut() += 1);

        let empty = Vec::new();
        let mut r = Reader::new(&empty);
        notifier.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();
        assert_eq!(*idle_count.borrow(), 1);
    }
}
