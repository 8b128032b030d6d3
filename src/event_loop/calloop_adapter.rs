//! The main-loop adapter: integrates with a caller-owned `calloop::LoopHandle`.
//!
//! Grounded directly in the teacher's own `wayland-client/src/calloop.rs`,
//! which wraps the connection FD in a `calloop::EventSource`
//! (`WaylandSource`). This generalizes that same idea to the generic
//! `EventLoop` trait: readers become `calloop::generic::Generic` sources and
//! timers become `calloop::timer::Timer` sources, both inserted into the
//! handle the caller passed in.

use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::time::Duration;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};

use super::{EventLoop, TimerId, WatchId};
use crate::error::{Error, Result};

struct OwnedRawFd(RawFd);
impl AsFd for OwnedRawFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.0) }
    }
}

/// Wraps a `calloop::LoopHandle<'static, S>` for some application state `S`.
/// `S` must be `'static` since calloop's sources are inserted for the
/// lifetime of the loop.
pub struct CalloopEventLoop<S> {
    handle: LoopHandle<'static, S>,
    next_watch: u64,
    tokens: Vec<Option<calloop::RegistrationToken>>,
    next_timer: u64,
    timer_tokens: Vec<Option<calloop::RegistrationToken>>,
}

impl<S: 'static> CalloopEventLoop<S> {
    pub fn new(handle: LoopHandle<'static, S>) -> Self {
        Self {
            handle,
            next_watch: 0,
            tokens: Vec::new(),
            next_timer: 0,
            timer_tokens: Vec::new(),
        }
    }
}

impl<S: 'static> EventLoop for CalloopEventLoop<S> {
    fn register_reader(&mut self, fd: RawFd, mut callback: Box<dyn FnMut()>) -> Result<WatchId> {
        let source = Generic::new(OwnedRawFd(fd), Interest::READ, Mode::Level);
        let token = self
            .handle
            .insert_source(source, move |_event, _metadata, _state| {
                callback();
                Ok(PostAction::Continue)
            })
            .map_err(|e| Error::ProgrammerError(format!("calloop insert_source failed: {e}")))?;
        let id = self.next_watch;
        self.next_watch += 1;
        self.tokens.push(Some(token));
        Ok(WatchId(id))
    }

    fn unregister_reader(&mut self, watch: WatchId) -> Result<()> {
        match self.tokens.get_mut(watch.0 as usize) {
            Some(slot @ Some(_)) => {
                if let Some(token) = slot.take() {
                    self.handle.remove(token);
                }
                Ok(())
            }
            _ => Err(Error::ProgrammerError(format!("unknown watch id {}", watch.0))),
        }
    }

    fn schedule_timer(&mut self, delay: Duration, repeat: bool, mut callback: Box<dyn FnMut()>) -> Result<TimerId> {
        let timer = calloop::timer::Timer::from_duration(delay);
        let token = self
            .handle
            .insert_source(timer, move |_deadline, _metadata, _state| {
                callback();
                if repeat {
                    calloop::timer::TimeoutAction::ToDuration(delay)
                } else {
                    calloop::timer::TimeoutAction::Drop
                }
            })
            .map_err(|e| Error::ProgrammerError(format!("calloop insert_source failed: {e}")))?;
        let id = self.next_timer;
        self.next_timer += 1;
        self.timer_tokens.push(Some(token));
        Ok(TimerId(id))
    }

    fn cancel_timer(&mut self, timer: TimerId) -> Result<()> {
        match self.timer_tokens.get_mut(timer.0 as usize) {
            Some(slot @ Some(_)) => {
                if let Some(token) = slot.take() {
                    self.handle.remove(token);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
