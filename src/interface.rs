//! Shared proxy plumbing: the per-object state every generated interface
//! embeds, mirroring `original_source/wl_framework/protocols/base.py`'s
//! `Interface` base class (object id, version, connection handle, event
//! handler list) translated into a composition-friendly Rust struct rather
//! than an inheritance base class.

use std::cell::RefCell;

use crate::connection::Connection;
use crate::error::Result;
use crate::wire::Writer;

/// Embedded by every proxy type (`Registry`, `Seat`, `TopLevel`, ...).
/// Provides the object ID, negotiated version, a handle back to the
/// connection for sending requests, and a destroyed flag so double-destroy
/// is caught as a programmer error rather than silently ignored.
pub struct ProxyCore {
    pub id: u32,
    pub version: u32,
    pub conn: Connection,
    destroyed: RefCell<bool>,
}

impl ProxyCore {
    pub fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            id,
            version,
            conn,
            destroyed: RefCell::new(false),
        }
    }

    /// Send a request whose payload has already been built, e.g. via
    /// [`Writer`]. `new_id` is `Some(allocated_id)` when this request
    /// creates a new object, so callers that need the ID back (to construct
    /// the new proxy) can read it from the return value.
    pub fn send(&self, opcode: u16, writer: Writer, fds: Vec<std::os::fd::OwnedFd>) -> Result<()> {
        self.conn.send_request(self.id, opcode, &writer.into_payload(), fds)
    }

    pub fn mark_destroyed(&self) {
        *self.destroyed.borrow_mut() = true;
    }

    pub fn is_destroyed(&self) -> bool {
        *self.destroyed.borrow()
    }

    /// Reserve a fresh object ID for a `new_id` argument before the proxy
    /// itself exists. The canonical sequence (see
    /// `protocols::wayland::Registry::bind`): reserve an ID, build the
    /// request payload with that ID, construct the concrete proxy with the
    /// same ID, then [`Connection::place_proxy`] it into the reserved slot.
    pub fn reserve_id(&self) -> u32 {
        self.conn.reserve_id()
    }
}
