//! Pipe-based clipboard payload reception with idle-timeout supervision
//! (C7).
//!
//! Grounded on
//! `original_source/wl_framework/protocols/data_control.py`'s
//! `DataControlOffer._read_cb`/`_read_idle`: bytes are read off a pipe FD as
//! they arrive, and a watchdog timer is reset on every read; if no data
//! arrives for the timeout window the transfer is abandoned and the pipe
//! closed, since a wedged data source otherwise means its FD is never
//! released.

use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::io::FromRawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::error::Result;
use crate::event_loop::{EventLoop, TimerId, WatchId};

/// How long the receiver waits for more bytes before giving up, matching
/// `data_control.py`'s `IDLE_TIMEOUT_MS = 5000`.
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Drive a single clipboard receive over `fd`, calling `on_chunk` for every
/// read and `on_done` once EOF is reached or the idle timeout fires. Both
/// the FD watch and the timer are torn down from the event loop before
/// `on_done` runs, so the loop never calls back into a finished transfer.
///
/// `on_done` receives `Some(bytes)` on a normal EOF (even if that's zero
/// bytes) and `None` on idle-timeout, matching `_read_idle`'s
/// `self._transfers[mime_type] = None` before it force-closes the pipe —
/// the two cases are not distinguishable from an empty buffer alone.
pub fn receive<L: EventLoop + 'static>(
    event_loop: Rc<std::cell::RefCell<L>>,
    fd: OwnedFd,
    mut on_chunk: impl FnMut(&[u8]) + 'static,
    on_done: impl FnOnce(Option<Vec<u8>>) + 'static,
) -> Result<()> {
    let raw_fd: RawFd = fd.as_raw_fd();
    let state = Rc::new(std::cell::RefCell::new(TransferState {
        fd: Some(fd),
        buffer: Vec::new(),
        watch: None,
        timer: None,
        on_done: Some(Box::new(on_done)),
    }));

    let loop_for_timer = event_loop.clone();
    let state_for_timer = state.clone();
    let timer = event_loop.borrow_mut().schedule_timer(
        IDLE_TIMEOUT,
        false,
        Box::new(move || {
            finish(&loop_for_timer, &state_for_timer, true);
        }),
    )?;
    state.borrow_mut().timer = Some(timer);

    let loop_for_reader = event_loop.clone();
    let state_for_reader = state.clone();
    let watch = event_loop.borrow_mut().register_reader(
        raw_fd,
        Box::new(move || {
            let mut chunk = [0u8; 4096];
            let mut borrowed = state_for_reader.borrow_mut();
            let Some(fd) = borrowed.fd.as_ref() else { return };
            let raw = fd.as_raw_fd();
            let mut file = unsafe { std::fs::File::from_raw_fd(raw) };
            let read_result = file.read(&mut chunk);
            // Avoid closing the fd when `file` drops: ownership stays with
            // `borrowed.fd`.
            std::mem::forget(file);
            match read_result {
                Ok(0) => {
                    drop(borrowed);
                    finish(&loop_for_reader, &state_for_reader, false);
                }
                Ok(n) => {
                    borrowed.buffer.extend_from_slice(&chunk[..n]);
                    drop(borrowed);
                    on_chunk(&chunk[..n]);
                    // Reading reset the idle clock: reschedule the timer.
                    if let Some(old_timer) = state_for_reader.borrow_mut().timer.take() {
                        let _ = loop_for_reader.borrow_mut().cancel_timer(old_timer);
                    }
                    let state_for_next = state_for_reader.clone();
                    let loop_for_next = loop_for_reader.clone();
                    if let Ok(new_timer) = loop_for_reader.borrow_mut().schedule_timer(
                        IDLE_TIMEOUT,
                        false,
                        Box::new(move || {
                            finish(&loop_for_next, &state_for_next, true);
                        }),
                    ) {
                        state_for_reader.borrow_mut().timer = Some(new_timer);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => {
                    drop(borrowed);
                    finish(&loop_for_reader, &state_for_reader, false);
                }
            }
        }),
    )?;
    state.borrow_mut().watch = Some(watch);

    Ok(())
}

struct TransferState {
    fd: Option<OwnedFd>,
    buffer: Vec<u8>,
    watch: Option<WatchId>,
    timer: Option<TimerId>,
    on_done: Option<Box<dyn FnOnce(Option<Vec<u8>>)>>,
}

fn finish<L: EventLoop>(event_loop: &Rc<std::cell::RefCell<L>>, state: &Rc<std::cell::RefCell<TransferState>>, timed_out: bool) {
    let (watch, timer, done, buffer) = {
        let mut s = state.borrow_mut();
        s.fd.take(); // drop the pipe fd, releasing the other end
        (s.watch.take(), s.timer.take(), s.on_done.take(), std::mem::take(&mut s.buffer))
    };
    if let Some(w) = watch {
        let _ = event_loop.borrow_mut().unregister_reader(w);
    }
    if let Some(t) = timer {
        let _ = event_loop.borrow_mut().cancel_timer(t);
    }
    if let Some(done) = done {
        done(if timed_out { None } else { Some(buffer) });
    }
}
