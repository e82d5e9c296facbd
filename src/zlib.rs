//! Zlib Codec Stream (C5): `Deflator` and `Inflator`, the two concrete
//! streams built from the Byte Buffer (C1) and Hook (C3) primitives.
//! Grounded on `gskzlibdeflator.c`/`gskzlibinflator.c`: windowBits 15 for
//! raw zlib, `15|16` for gzip-wrapped output on the deflator side, and
//! `15|32` (auto-detect zlib-or-gzip) on the inflator side. `flate2`'s
//! `write::*Encoder`/`write::*Decoder` wrappers around a `Vec<u8>` sink
//! stand in for the manual scratch-buffer stepping the C original does
//! against a raw `z_stream`.

use std::cell::RefCell;
use std::io::Write;
use std::rc::{Rc, Weak};

use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::hook::Hook;
use crate::main_loop::{MainLoop, SourceId};

pub const MAX_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_LEVEL: i32 = 7;
pub const DEFAULT_FLUSH_MILLIS: i64 = -1;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Active,
    Finishing,
    Drained,
    Error,
}

fn resolve_level(level: i32) -> Result<Compression> {
    let level = if level == -1 { DEFAULT_LEVEL } else { level };
    if !(0..=9).contains(&level) {
        return Err(Error::InvalidArgument(format!("zlib level {level} out of range 0..9")));
    }
    Ok(Compression::new(level as u32))
}

// ---------------------------------------------------------------- Deflator

enum DeflateBackend {
    Zlib(ZlibEncoder<Vec<u8>>),
    Gzip(GzEncoder<Vec<u8>>),
}

pub struct Deflator {
    backend: Option<DeflateBackend>,
    flush_millis: i64,
    state: State,
    out: Buffer,
    pub read_hook: Hook<()>,
    pub write_hook: Hook<()>,
    flush_timer: Option<SourceId>,
    self_weak: Weak<RefCell<Deflator>>,
    main_loop: Option<Rc<RefCell<MainLoop>>>,
}

impl Deflator {
    /// `main_loop` is the loop `raw_write` arms the sync-flush timer
    /// against; pass `None` when this deflator never flushes on a timer
    /// (`flush_millis < 0`) or runs outside a loop, e.g. in tests.
    pub fn new(
        level: i32,
        use_gzip: bool,
        flush_millis: i64,
        main_loop: Option<Rc<RefCell<MainLoop>>>,
        set_read_poll: impl FnMut(bool) + 'static,
        set_write_poll: impl FnMut(bool) + 'static,
    ) -> Result<Rc<RefCell<Deflator>>> {
        let compression = resolve_level(level)?;
        let backend = if use_gzip {
            DeflateBackend::Gzip(GzEncoder::new(Vec::new(), compression))
        } else {
            DeflateBackend::Zlib(ZlibEncoder::new(Vec::new(), compression))
        };
        let deflator = Rc::new_cyclic(|weak: &Weak<RefCell<Deflator>>| {
            let w1 = weak.clone();
            let w2 = weak.clone();
            RefCell::new(Deflator {
                backend: Some(backend),
                flush_millis,
                state: State::Active,
                out: Buffer::new(),
                read_hook: Hook::new(set_read_poll, move || {
                    w1.upgrade().map(|_| Ok(true)).unwrap_or(Ok(true))
                }),
                write_hook: Hook::new(set_write_poll, move || {
                    w2.upgrade()
                        .map(|d| d.borrow_mut().shutdown_write().map(|_| true))
                        .unwrap_or(Ok(true))
                }),
                flush_timer: None,
                self_weak: weak.clone(),
                main_loop: main_loop.clone(),
            })
        });
        if let Some(main_loop) = &deflator.borrow().main_loop {
            let r1 = Rc::downgrade(&deflator);
            let r2 = r1.clone();
            main_loop.borrow_mut().add_idle_notify(
                move || r1.upgrade().is_some_and(|d| {
                    let d = d.borrow();
                    d.read_hook.is_idle_notify() && d.read_hook.has_poll()
                }),
                move || {
                    if let Some(d) = r2.upgrade() {
                        d.borrow_mut().read_hook.notify();
                    }
                },
            );
            let w1 = Rc::downgrade(&deflator);
            let w2 = w1.clone();
            main_loop.borrow_mut().add_idle_notify(
                move || w1.upgrade().is_some_and(|d| {
                    let d = d.borrow();
                    d.write_hook.is_idle_notify() && d.write_hook.has_poll()
                }),
                move || {
                    if let Some(d) = w2.upgrade() {
                        d.borrow_mut().write_hook.notify();
                    }
                },
            );
        }
        Ok(deflator)
    }

    /// Feeds `bytes` through the encoder, appending produced output to the
    /// internal buffer. Returns the number of bytes consumed (always
    /// `bytes.len()` on success).
    pub fn raw_write(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.state != State::Active {
            return Err(Error::Shutdown);
        }
        let result = match self.backend.as_mut() {
            Some(DeflateBackend::Zlib(e)) => e.write_all(bytes).map(|_| e.get_mut()),
            Some(DeflateBackend::Gzip(e)) => e.write_all(bytes).map(|_| e.get_mut()),
            None => return Err(Error::Internal("deflator backend missing".into())),
        };
        match result {
            Ok(sink) => {
                if !sink.is_empty() {
                    let produced = std::mem::take(sink);
                    self.out.append(&produced);
                }
            }
            Err(e) => {
                self.state = State::Error;
                return Err(Error::Codec(e.to_string()));
            }
        }
        self.update_write_backpressure();
        self.arm_flush_timer_if_due();
        Ok(bytes.len())
    }

    /// Arms the periodic sync-flush timer after a write that produced no
    /// immediate flush, so buffered-but-unflushed output still reaches
    /// `raw_read` within `flush_millis` even without another write.
    ///
    /// Operates on `&mut self` directly rather than re-upgrading
    /// `self_weak` and borrowing through it — `raw_write` already holds
    /// the one mutable borrow of this `Deflator`, and re-borrowing it via
    /// an `Rc<RefCell<_>>` handle from inside that borrow would panic.
    fn arm_flush_timer_if_due(&mut self) {
        let Some(main_loop) = self.main_loop.clone() else {
            return;
        };
        self.arm_flush_timer_inner(&main_loop);
    }

    pub fn raw_read(&mut self, n: usize) -> Vec<u8> {
        let bytes = self.out.read(n);
        self.after_drain();
        bytes
    }

    pub fn raw_read_buffer(&mut self, dst: &mut Buffer) {
        dst.drain_from(&mut self.out);
        self.after_drain();
    }

    fn after_drain(&mut self) {
        if self.out.is_empty() {
            self.read_hook.clear_idle_notify();
            if self.state == State::Finishing {
                self.state = State::Drained;
                self.read_hook.notify_shutdown();
            }
        } else if self.out.size() < MAX_BUFFER_SIZE {
            self.write_hook.mark_idle_notify();
        }
    }

    fn update_write_backpressure(&mut self) {
        if self.out.size() > MAX_BUFFER_SIZE {
            self.write_hook.clear_idle_notify();
        } else {
            self.write_hook.mark_idle_notify();
        }
    }

    /// `Active → Finishing`: runs `Z_FINISH`, cancels the flush timer.
    pub fn shutdown_write(&mut self) -> Result<()> {
        if self.state != State::Active {
            return Ok(());
        }
        // Single-shot (period 0): if still pending it fires once more as a
        // harmless no-op (sync_flush short-circuits once state != Active).
        self.flush_timer = None;
        let tail = match self.backend.take() {
            Some(DeflateBackend::Zlib(e)) => e.finish(),
            Some(DeflateBackend::Gzip(e)) => e.finish(),
            None => return Err(Error::Internal("deflator backend missing".into())),
        };
        match tail {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    self.out.append(&bytes);
                }
            }
            Err(e) => {
                self.state = State::Error;
                return Err(Error::Codec(e.to_string()));
            }
        }
        self.state = State::Finishing;
        if self.out.is_empty() {
            self.state = State::Drained;
            self.read_hook.notify_shutdown();
        } else {
            self.read_hook.mark_idle_notify();
        }
        Ok(())
    }

    /// Arms (or resets) the periodic sync-flush timer after a successful
    /// write, per spec: only meaningful when `flush_millis >= 0`. Exposed
    /// for callers that hold a `Deflator` as an `Rc<RefCell<_>>` and want
    /// to force an arm from outside; `raw_write` itself calls
    /// [`Self::arm_flush_timer_inner`] directly to avoid re-borrowing.
    pub fn arm_flush_timer(this: &Rc<RefCell<Deflator>>, main_loop: &Rc<RefCell<MainLoop>>) {
        this.borrow_mut().arm_flush_timer_inner(main_loop);
    }

    fn arm_flush_timer_inner(&mut self, main_loop: &Rc<RefCell<MainLoop>>) {
        if self.flush_millis < 0 {
            return;
        }
        if let Some(id) = self.flush_timer {
            main_loop.borrow_mut().adjust_timer(id, self.flush_millis as u64, 0);
            return;
        }
        let weak = self.self_weak.clone();
        let id = main_loop.borrow_mut().add_timer(
            move || {
                if let Some(d) = weak.upgrade() {
                    let mut d = d.borrow_mut();
                    let _ = d.sync_flush();
                    d.flush_timer = None;
                }
                false // self-cancels; single-shot
            },
            None,
            self.flush_millis as u64,
            0,
        );
        self.flush_timer = Some(id);
    }

    fn sync_flush(&mut self) -> Result<()> {
        if self.state != State::Active {
            return Ok(());
        }
        let result = match self.backend.as_mut() {
            Some(DeflateBackend::Zlib(e)) => e.flush().map(|_| e.get_mut()),
            Some(DeflateBackend::Gzip(e)) => e.flush().map(|_| e.get_mut()),
            None => return Ok(()),
        };
        match result {
            Ok(sink) => {
                if !sink.is_empty() {
                    let produced = std::mem::take(sink);
                    self.out.append(&produced);
                }
            }
            Err(e) => {
                self.state = State::Error;
                return Err(Error::Codec(e.to_string()));
            }
        }
        self.update_write_backpressure();
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.out.size()
    }
}

// ----------------------------------------------------------------- Inflator

enum InflateBackend {
    Sniffing(Vec<u8>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Gzip(GzDecoder<Vec<u8>>),
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct Inflator {
    backend: InflateBackend,
    state: State,
    out: Buffer,
    write_is_open: bool,
    pub read_hook: Hook<()>,
    pub write_hook: Hook<()>,
}

impl Inflator {
    /// `main_loop`, when given, gets this inflator's hooks registered in
    /// its idle-notify list (spec §4.3) so backpressure re-enable after a
    /// drain below `MAX_BUFFER_SIZE` actually resumes progress instead of
    /// only taking effect on the next direct `raw_read`/`raw_write` call.
    pub fn new(
        main_loop: Option<Rc<RefCell<MainLoop>>>,
        set_read_poll: impl FnMut(bool) + 'static,
        set_write_poll: impl FnMut(bool) + 'static,
    ) -> Rc<RefCell<Inflator>> {
        let inflator = Rc::new_cyclic(|weak: &Weak<RefCell<Inflator>>| {
            let w1 = weak.clone();
            let w2 = weak.clone();
            RefCell::new(Inflator {
                backend: InflateBackend::Sniffing(Vec::new()),
                state: State::Active,
                out: Buffer::new(),
                write_is_open: true,
                read_hook: Hook::new(set_read_poll, move || {
                    w1.upgrade().map(|_| Ok(true)).unwrap_or(Ok(true))
                }),
                write_hook: Hook::new(set_write_poll, move || {
                    w2.upgrade()
                        .map(|i| i.borrow_mut().shutdown_write().map(|_| true))
                        .unwrap_or(Ok(true))
                }),
            })
        });
        if let Some(main_loop) = main_loop {
            let r1 = Rc::downgrade(&inflator);
            let r2 = r1.clone();
            main_loop.borrow_mut().add_idle_notify(
                move || r1.upgrade().is_some_and(|i| {
                    let i = i.borrow();
                    i.read_hook.is_idle_notify() && i.read_hook.has_poll()
                }),
                move || {
                    if let Some(i) = r2.upgrade() {
                        i.borrow_mut().read_hook.notify();
                    }
                },
            );
            let w1 = Rc::downgrade(&inflator);
            let w2 = w1.clone();
            main_loop.borrow_mut().add_idle_notify(
                move || w1.upgrade().is_some_and(|i| {
                    let i = i.borrow();
                    i.write_hook.is_idle_notify() && i.write_hook.has_poll()
                }),
                move || {
                    if let Some(i) = w2.upgrade() {
                        i.borrow_mut().write_hook.notify();
                    }
                },
            );
        }
        inflator
    }

    fn sniff(buffered: &[u8]) -> Option<InflateBackend> {
        if buffered.len() < 2 {
            return None;
        }
        if buffered[0..2] == GZIP_MAGIC {
            Some(InflateBackend::Gzip(GzDecoder::new(Vec::new())))
        } else {
            Some(InflateBackend::Zlib(ZlibDecoder::new(Vec::new())))
        }
    }

    pub fn raw_write(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.state != State::Active {
            return Err(Error::Shutdown);
        }
        if let InflateBackend::Sniffing(buf) = &mut self.backend {
            buf.extend_from_slice(bytes);
            let ready = buf.len() >= 2;
            if !ready {
                return Ok(bytes.len());
            }
            let pending = std::mem::take(buf);
            self.backend = Self::sniff(&pending).expect("checked len >= 2 above");
            let produced = write_backend(&mut self.backend, &pending).map_err(|e| Error::Codec(e.to_string()))?;
            if !produced.is_empty() {
                self.out.append(&produced);
            }
        } else {
            let produced = write_backend(&mut self.backend, bytes).map_err(|e| Error::Codec(e.to_string()))?;
            if !produced.is_empty() {
                self.out.append(&produced);
            }
        }
        self.after_write_bookkeeping();
        Ok(bytes.len())
    }

    pub fn raw_read(&mut self, n: usize) -> Vec<u8> {
        let bytes = self.out.read(n);
        self.after_drain();
        bytes
    }

    pub fn raw_read_buffer(&mut self, dst: &mut Buffer) {
        dst.drain_from(&mut self.out);
        self.after_drain();
    }

    fn after_write_bookkeeping(&mut self) {
        if self.out.size() > MAX_BUFFER_SIZE {
            self.write_hook.clear_idle_notify();
        } else {
            self.write_hook.mark_idle_notify();
        }
    }

    fn after_drain(&mut self) {
        if self.out.is_empty() {
            self.read_hook.clear_idle_notify();
            if !self.write_is_open {
                self.state = State::Drained;
                self.read_hook.notify_shutdown();
            }
        } else if self.out.size() < MAX_BUFFER_SIZE {
            self.write_hook.mark_idle_notify();
        }
    }

    /// `Active → Finishing`: runs `Z_SYNC_FLUSH`.
    pub fn shutdown_write(&mut self) -> Result<()> {
        if self.state != State::Active {
            return Ok(());
        }
        self.write_is_open = false;
        let sink = flush_backend(&mut self.backend).map_err(|e| Error::Codec(e.to_string()))?;
        if !sink.is_empty() {
            self.out.append(&sink);
        }
        self.state = State::Finishing;
        if self.out.is_empty() {
            self.state = State::Drained;
            self.read_hook.notify_shutdown();
        } else {
            self.read_hook.mark_idle_notify();
        }
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.out.size()
    }
}

fn write_backend(backend: &mut InflateBackend, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    match backend {
        InflateBackend::Zlib(d) => {
            d.write_all(bytes)?;
            Ok(std::mem::take(d.get_mut()))
        }
        InflateBackend::Gzip(d) => {
            d.write_all(bytes)?;
            Ok(std::mem::take(d.get_mut()))
        }
        InflateBackend::Sniffing(_) => Ok(Vec::new()),
    }
}

fn flush_backend(backend: &mut InflateBackend) -> std::io::Result<Vec<u8>> {
    match backend {
        InflateBackend::Zlib(d) => {
            d.flush()?;
            Ok(std::mem::take(d.get_mut()))
        }
        InflateBackend::Gzip(d) => {
            d.flush()?;
            Ok(std::mem::take(d.get_mut()))
        }
        InflateBackend::Sniffing(_) => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_out_of_range_rejected() {
        assert!(resolve_level(10).is_err());
        assert!(resolve_level(-2).is_err());
        assert!(resolve_level(-1).is_ok());
    }

    #[test]
    fn deflate_then_inflate_roundtrip() {
        let d = Deflator::new(6, false, -1, None, |_| {}, |_| {}).unwrap();
        d.borrow_mut().raw_write(b"hello hello hello").unwrap();
        d.borrow_mut().shutdown_write().unwrap();
        let compressed = d.borrow_mut().raw_read(4096);
        assert!(!compressed.is_empty());

        let i = Inflator::new(None, |_| {}, |_| {});
        i.borrow_mut().raw_write(&compressed).unwrap();
        let out = i.borrow_mut().raw_read(4096);
        assert_eq!(out, b"hello hello hello");
    }

    #[test]
    fn gzip_roundtrip_autodetected() {
        let d = Deflator::new(-1, true, -1, None, |_| {}, |_| {}).unwrap();
        d.borrow_mut().raw_write(b"gzip me").unwrap();
        d.borrow_mut().shutdown_write().unwrap();
        let compressed = d.borrow_mut().raw_read(4096);

        let i = Inflator::new(None, |_| {}, |_| {});
        i.borrow_mut().raw_write(&compressed).unwrap();
        let out = i.borrow_mut().raw_read(4096);
        assert_eq!(out, b"gzip me");
    }

    #[test]
    fn flush_timer_releases_buffered_output_without_shutdown() {
        let main_loop = Rc::new(RefCell::new(MainLoop::new().unwrap()));
        let d = Deflator::new(6, false, 0, Some(main_loop.clone()), |_| {}, |_| {}).unwrap();
        d.borrow_mut().raw_write(b"flush me before shutdown").unwrap();

        // A single small write with no explicit flush/shutdown may not hand
        // any bytes to the sink yet; the `flush_millis: 0` timer armed by
        // that write fires on this `run_once` and syncs it out.
        main_loop.borrow_mut().run_once(true);

        assert!(d.borrow().buffered() > 0);
    }
}
