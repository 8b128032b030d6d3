//! The null adapter: every method is unsupported. Matches
//! `original_source/wl_framework/loop_integrations/dummy.py`, which exists
//! only so code that always expects an event loop can be unit-tested
//! without one.

use std::os::fd::RawFd;
use std::time::Duration;

use super::{EventLoop, TimerId, WatchId};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct NullEventLoop;

impl NullEventLoop {
    pub fn new() -> Self {
        Self
    }
}

impl EventLoop for NullEventLoop {
    fn register_reader(&mut self, _fd: RawFd, _callback: Box<dyn FnMut()>) -> Result<WatchId> {
        Err(Error::Unsupported("event loop integration"))
    }

    fn unregister_reader(&mut self, _watch: WatchId) -> Result<()> {
        Err(Error::Unsupported("event loop integration"))
    }

    fn schedule_timer(&mut self, _delay: Duration, _repeat: bool, _callback: Box<dyn FnMut()>) -> Result<TimerId> {
        Err(Error::Unsupported("event loop integration"))
    }

    fn cancel_timer(&mut self, _timer: TimerId) -> Result<()> {
        Err(Error::Unsupported("event loop integration"))
    }
}
