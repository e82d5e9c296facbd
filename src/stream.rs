//! Stream abstraction (C4): a host owning a read hook and a write hook over
//! some underlying byte-oriented I/O source, plus the `attach`/`attach_pair`
//! wiring that pumps bytes between two streams with backpressure.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::buffer::Buffer;
use crate::error::Result;
use crate::hook::Hook;

/// Minimal read/write/shutdown surface a concrete transport (a TCP socket,
/// a pipe to a CGI child, a codec) provides to a [`Stream`].
pub trait IoSource {
    /// Pull up to `max` bytes into `buf`. Returns 0 on an EAGAIN-equivalent
    /// (no data ready) without it being an error.
    fn read_into(&mut self, buf: &mut Buffer, max: usize) -> Result<usize>;
    /// Push up to `max` bytes out of `buf`. Returns 0 on an EAGAIN-equivalent.
    fn write_from(&mut self, buf: &mut Buffer, max: usize) -> Result<usize>;
    /// Returns `Ok(true)` if the shutdown completed synchronously.
    fn shutdown_read(&mut self) -> Result<bool> {
        Ok(true)
    }
    fn shutdown_write(&mut self) -> Result<bool> {
        Ok(true)
    }
}

const PUMP_CHUNK: usize = 4096;

pub struct Stream {
    io: Rc<RefCell<dyn IoSource>>,
    out_buf: Buffer,
    pub read_hook: Hook<()>,
    pub write_hook: Hook<()>,
    /// Streams whose read hook should be unblocked once `out_buf` drains.
    resume_waiters: Vec<Weak<RefCell<Stream>>>,
}

impl Stream {
    pub fn new(
        io: Rc<RefCell<dyn IoSource>>,
        set_read_poll: impl FnMut(bool) + 'static,
        set_write_poll: impl FnMut(bool) + 'static,
    ) -> Rc<RefCell<Stream>> {
        Rc::new_cyclic(|weak: &Weak<RefCell<Stream>>| {
            let read_io = io.clone();
            let write_io = io.clone();
            RefCell::new(Stream {
                io,
                out_buf: Buffer::new(),
                read_hook: Hook::new(set_read_poll, move || read_io.borrow_mut().shutdown_read()),
                write_hook: Hook::new(set_write_poll, move || write_io.borrow_mut().shutdown_write()),
                resume_waiters: Vec::new(),
            })
        })
    }

    pub fn read(&mut self, buf: &mut Buffer, n: usize) -> Result<usize> {
        self.io.borrow_mut().read_into(buf, n)
    }

    pub fn read_buffer(&mut self, buf: &mut Buffer) -> Result<usize> {
        self.io.borrow_mut().read_into(buf, usize::MAX)
    }

    /// Queues `data` for write and attempts an immediate flush.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.out_buf.append(data);
        self.flush()
    }

    fn flush(&mut self) -> Result<usize> {
        if self.out_buf.is_empty() {
            return Ok(0);
        }
        let size = self.out_buf.size();
        let n = self.io.borrow_mut().write_from(&mut self.out_buf, size)?;
        if self.out_buf.is_empty() {
            self.wake_resume_waiters();
        }
        Ok(n)
    }

    pub fn is_write_blocked(&self) -> bool {
        !self.out_buf.is_empty()
    }

    /// Best-effort: a waiter currently mid-notify (its own borrow held
    /// higher on the stack) cannot have been blocked in the first place,
    /// since blocked hooks never run their callback, so skipping it here
    /// on a failed `try_borrow_mut` is always correct, not just panic-safe.
    fn wake_resume_waiters(&mut self) {
        self.resume_waiters.retain(|w| w.upgrade().is_some());
        for w in &self.resume_waiters {
            if let Some(s) = w.upgrade() {
                if let Ok(mut s) = s.try_borrow_mut() {
                    s.read_hook.unblock();
                }
            }
        }
    }

    pub fn shutdown_read(&mut self) -> Result<()> {
        self.read_hook.shutdown()
    }

    pub fn shutdown_write(&mut self) -> Result<()> {
        self.write_hook.shutdown()
    }
}

/// Installs a one-directional pump from `src`'s read hook to `dst`: reads
/// off `src`, writes into `dst`, blocking `src.read_hook` when `dst` can't
/// absorb the whole chunk and unblocking it once `dst` drains. Propagates
/// `src`'s read shutdown as a write shutdown on `dst`.
pub fn attach(src: &Rc<RefCell<Stream>>, dst: &Rc<RefCell<Stream>>) -> Result<()> {
    dst.borrow_mut().resume_waiters.push(Rc::downgrade(src));

    let src_io = src.borrow().io.clone();
    let dst_for_ready = dst.clone();
    let dst_for_shutdown = dst.clone();
    src.borrow_mut().read_hook.trap(
        move |_, ctx| {
            let mut tmp = Buffer::new();
            let pulled = src_io
                .borrow_mut()
                .read_into(&mut tmp, PUMP_CHUNK)
                .unwrap_or(0);
            if pulled == 0 {
                return true;
            }
            let chunk = tmp.read(pulled);
            match dst_for_ready.borrow_mut().write(&chunk) {
                Ok(_) if dst_for_ready.borrow().is_write_blocked() => ctx.block(),
                Ok(_) => {}
                Err(_) => ctx.untrap(),
            }
            true
        },
        Some(Box::new(move |_| {
            let _ = dst_for_shutdown.borrow_mut().shutdown_write();
            false
        })),
        (),
        None,
    )?;
    Ok(())
}

/// Connects A and B so bytes read off either side are written to the other.
pub fn attach_pair(a: &Rc<RefCell<Stream>>, b: &Rc<RefCell<Stream>>) -> Result<()> {
    attach(a, b)?;
    attach(b, a)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct MemIo {
        inbox: Buffer,
        outbox: Rc<RefCell<Vec<u8>>>,
    }

    impl IoSource for MemIo {
        fn read_into(&mut self, buf: &mut Buffer, max: usize) -> Result<usize> {
            let n = self.inbox.size().min(max);
            let bytes = self.inbox.read(n);
            buf.append(&bytes);
            Ok(n)
        }
        fn write_from(&mut self, buf: &mut Buffer, max: usize) -> Result<usize> {
            let n = buf.size().min(max);
            let bytes = buf.read(n);
            self.outbox.borrow_mut().extend_from_slice(&bytes);
            Ok(n)
        }
    }

    #[test]
    fn attach_pumps_bytes_on_notify() {
        let sunk = Rc::new(RefCell::new(Vec::new()));
        let src_io = Rc::new(RefCell::new(MemIo {
            inbox: {
                let mut b = Buffer::new();
                b.append(b"hello");
                b
            },
            outbox: Rc::new(RefCell::new(Vec::new())),
        }));
        let dst_io = Rc::new(RefCell::new(MemIo {
            inbox: Buffer::new(),
            outbox: sunk.clone(),
        }));
        let noop = Rc::new(Cell::new(0));
        let n1 = noop.clone();
        let n2 = noop.clone();
        let src = Stream::new(src_io, move |_| { n1.set(n1.get() + 1); }, |_| {});
        let dst = Stream::new(dst_io, move |_| {}, move |_| { n2.set(n2.get() + 1); });

        attach(&src, &dst).unwrap();
        src.borrow_mut().read_hook.notify();

        assert_eq!(&*sunk.borrow(), b"hello");
    }
}
