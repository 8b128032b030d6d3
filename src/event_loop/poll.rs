//! The default event-loop adapter: a plain `poll(2)` loop built directly on
//! `rustix::event::poll`, the same crate `wayland-backend`'s socket layer
//! already depends on for I/O.

use std::collections::BTreeMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use rustix::event::{poll, PollFd, PollFlags};

use super::{EventLoop, TimerId, WatchId};
use crate::error::{Error, Result};

struct Watch {
    fd: RawFd,
    interest: PollFlags,
    callback: Box<dyn FnMut()>,
}

struct Timer {
    deadline: Instant,
    delay: Duration,
    repeat: bool,
    callback: Box<dyn FnMut()>,
}

/// A single-threaded `poll(2)`-based event loop. Call [`PollEventLoop::run_once`]
/// from the host application's own loop, or [`PollEventLoop::run_forever`]
/// to block until `stop()` is called.
#[derive(Default)]
pub struct PollEventLoop {
    watches: Vec<Option<Watch>>,
    timers: BTreeMap<u64, Timer>,
    next_watch: u64,
    next_timer: u64,
    stopped: bool,
}

impl PollEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Block until the next readable FD or expiring timer, dispatching
    /// exactly the callbacks that are ready, then return.
    pub fn run_once(&mut self) -> Result<()> {
        let now = Instant::now();
        let next_deadline = self.timers.values().map(|t| t.deadline).min();
        let timeout_ms: i32 = match next_deadline {
            Some(deadline) => deadline.saturating_duration_since(now).as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let mut pollfds: Vec<PollFd<'_>> = Vec::new();
        let mut fd_to_watch: Vec<usize> = Vec::new();
        let borrows: Vec<(usize, RawFd, PollFlags)> = self
            .watches
            .iter()
            .enumerate()
            .filter_map(|(i, w)| w.as_ref().map(|w| (i, w.fd, w.interest)))
            .collect();
        let borrowed_fds: Vec<BorrowedFd<'_>> = borrows
            .iter()
            .map(|(_, fd, _)| unsafe { BorrowedFd::borrow_raw(*fd) })
            .collect();
        for (bf, (_, _, interest)) in borrowed_fds.iter().zip(borrows.iter()) {
            pollfds.push(PollFd::new(bf, *interest));
        }
        fd_to_watch.extend(borrows.iter().map(|(i, _, _)| *i));

        let n = poll(&mut pollfds, timeout_ms).map_err(|e| Error::from(std::io::Error::from(e)))?;

        if n > 0 {
            for (pfd, &watch_idx) in pollfds.iter().zip(fd_to_watch.iter()) {
                let ready = pfd.revents().contains(PollFlags::IN) || pfd.revents().contains(PollFlags::OUT);
                if ready {
                    if let Some(watch) = &mut self.watches[watch_idx] {
                        (watch.callback)();
                    }
                }
            }
        }

        let now = Instant::now();
        let expired: Vec<u64> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(timer) = self.timers.get_mut(&id) {
                (timer.callback)();
                if timer.repeat {
                    timer.deadline = Instant::now() + timer.delay;
                } else {
                    self.timers.remove(&id);
                }
            }
        }
        Ok(())
    }

    pub fn run_forever(&mut self) -> Result<()> {
        self.stopped = false;
        while !self.stopped {
            self.run_once()?;
        }
        Ok(())
    }
}

impl PollEventLoop {
    fn register_watch(&mut self, fd: RawFd, interest: PollFlags, callback: Box<dyn FnMut()>) -> Result<WatchId> {
        let id = self.next_watch;
        self.next_watch += 1;
        self.watches.push(Some(Watch { fd, interest, callback }));
        Ok(WatchId(id))
    }

    fn unregister_watch(&mut self, watch: WatchId) -> Result<()> {
        let idx = watch.0 as usize;
        match self.watches.get_mut(idx) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::ProgrammerError(format!("unknown watch id {}", watch.0))),
        }
    }
}

impl EventLoop for PollEventLoop {
    fn register_reader(&mut self, fd: RawFd, callback: Box<dyn FnMut()>) -> Result<WatchId> {
        self.register_watch(fd, PollFlags::IN, callback)
    }

    fn unregister_reader(&mut self, watch: WatchId) -> Result<()> {
        self.unregister_watch(watch)
    }

    fn register_writer(&mut self, fd: RawFd, callback: Box<dyn FnMut()>) -> Result<WatchId> {
        self.register_watch(fd, PollFlags::OUT, callback)
    }

    fn unregister_writer(&mut self, watch: WatchId) -> Result<()> {
        self.unregister_watch(watch)
    }

    fn schedule_timer(&mut self, delay: Duration, repeat: bool, callback: Box<dyn FnMut()>) -> Result<TimerId> {
        let id = self.next_timer;
        self.next_timer += 1;
        self.timers.insert(
            id,
            Timer {
                deadline: Instant::now() + delay,
                delay,
                repeat,
                callback,
            },
        );
        Ok(TimerId(id))
    }

    fn cancel_timer(&mut self, timer: TimerId) -> Result<()> {
        self.timers.remove(&timer.0);
        Ok(())
    }
}
