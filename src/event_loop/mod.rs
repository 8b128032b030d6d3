//! The event-loop adapter abstraction (C2): a small trait that lets the
//! connection register its socket FD and timers with whatever loop the host
//! application runs, without depending on any one of them.
//!
//! The trait itself is dependency-free, mirroring the way
//! `wayland-backend/src/lib.rs` splits its `rs`/`sys` backends behind
//! Cargo features with no shared concrete dependency. Each concrete adapter
//! lives in its own feature-gated submodule.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::Result;

pub mod poll;

#[cfg(feature = "calloop-adapter")]
pub mod calloop_adapter;

#[cfg(feature = "tokio-adapter")]
pub mod tokio_adapter;

pub mod null;

/// An opaque handle to a registered timer, used to cancel it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// An opaque handle to a registered FD watch, used to unregister it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Integrates the connection's socket FD and protocol timers (idle-notify
/// supervision, data-control receive timeouts) with a host event loop.
pub trait EventLoop {
    /// Register `fd` for readability notifications; `callback` is invoked
    /// each time the loop observes the FD readable.
    fn register_reader(&mut self, fd: RawFd, callback: Box<dyn FnMut()>) -> Result<WatchId>;

    /// Stop watching a previously registered FD.
    fn unregister_reader(&mut self, watch: WatchId) -> Result<()>;

    /// Register `fd` for write-readiness notifications, used by the
    /// data-control `send` request to stream clipboard bytes to a pipe
    /// without blocking. Not every adapter needs this implemented with full
    /// generality; the default errors with [`crate::error::Error::Unsupported`].
    fn register_writer(&mut self, _fd: RawFd, _callback: Box<dyn FnMut()>) -> Result<WatchId> {
        Err(crate::error::Error::Unsupported("write-readiness watches"))
    }

    /// Stop watching a previously registered write-readiness watch.
    fn unregister_writer(&mut self, _watch: WatchId) -> Result<()> {
        Err(crate::error::Error::Unsupported("write-readiness watches"))
    }

    /// Schedule `callback` to run once after `delay`. If `repeat` is true,
    /// the adapter reschedules it for another `delay` after each firing
    /// until cancelled.
    fn schedule_timer(&mut self, delay: Duration, repeat: bool, callback: Box<dyn FnMut()>) -> Result<TimerId>;

    /// Cancel a previously scheduled timer. Idempotent: cancelling a timer
    /// that already fired (and was not repeating) is not an error.
    fn cancel_timer(&mut self, timer: TimerId) -> Result<()>;
}
