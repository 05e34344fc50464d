//! Realtime-safe logging for the audio thread.
//!
//! The audio thread must never call into the `log` facade (the backend may lock
//! or allocate). Messages are formatted into a fixed stack buffer and pushed
//! into a lock-free ring; non-realtime code drains the ring into `log`.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

const LOG_CAP: usize = 128;
const LOG_MSG_MAX: usize = 256;

#[derive(Copy, Clone)]
struct LogEntry {
    len: u16,
    bytes: [u8; LOG_MSG_MAX],
}

impl Default for LogEntry {
    fn default() -> Self {
        Self {
            len: 0,
            bytes: [0; LOG_MSG_MAX],
        }
    }
}

/// Single-producer single-consumer ring. Writers are serialized by
/// `PUSH_LOCK` (losers drop their message), readers by `DRAIN_LOCK`.
struct LogRing {
    head: AtomicUsize,
    tail: AtomicUsize,
    buf: Box<[UnsafeCell<LogEntry>]>,
}

unsafe impl Sync for LogRing {}

impl LogRing {
    fn new() -> Self {
        let mut v = Vec::with_capacity(LOG_CAP);
        for _ in 0..LOG_CAP {
            v.push(UnsafeCell::new(LogEntry::default()));
        }
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            buf: v.into_boxed_slice(),
        }
    }

    fn push(&self, entry: &LogEntry) -> bool {
        let cap = self.buf.len();
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % cap;
        if next == self.tail.load(Ordering::Acquire) {
            return false;
        }
        unsafe {
            *self.buf[head].get() = *entry;
        }
        self.head.store(next, Ordering::Release);
        true
    }

    fn pop(&self) -> Option<LogEntry> {
        let cap = self.buf.len();
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let entry = unsafe { *self.buf[tail].get() };
        self.tail.store((tail + 1) % cap, Ordering::Release);
        Some(entry)
    }
}

static LOGGER: OnceLock<LogRing> = OnceLock::new();
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static DROPPED: AtomicUsize = AtomicUsize::new(0);
static DRAIN_LOCK: Mutex<()> = Mutex::new(());
static PUSH_LOCK: AtomicBool = AtomicBool::new(false);

/// Allocates the ring. Call from a non-realtime context before processing.
pub fn init_rt_log() {
    let _ = LOGGER.get_or_init(LogRing::new);
    LOG_ENABLED.store(true, Ordering::Relaxed);
}

struct FixedBuf {
    entry: LogEntry,
    len: usize,
}

impl FixedBuf {
    fn new() -> Self {
        Self {
            entry: LogEntry::default(),
            len: 0,
        }
    }

    fn finish(&mut self) -> &LogEntry {
        self.entry.len = self.len.min(LOG_MSG_MAX) as u16;
        &self.entry
    }
}

impl fmt::Write for FixedBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = LOG_MSG_MAX - self.len;
        if avail == 0 {
            return Ok(());
        }
        let mut n = s.len().min(avail);
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        self.entry.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

pub(crate) fn rt_log_inner(args: fmt::Arguments) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let Some(ring) = LOGGER.get() else {
        return;
    };

    // Several plugin instances may run on different audio threads.
    if PUSH_LOCK
        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        DROPPED.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let mut buf = FixedBuf::new();
    let _ = fmt::write(&mut buf, args);
    if !ring.push(buf.finish()) {
        DROPPED.fetch_add(1, Ordering::Relaxed);
    }
    PUSH_LOCK.store(false, Ordering::Release);
}

/// Forwards queued audio-thread messages to the `log` facade.
/// Never call this from the audio thread. Returns the number forwarded.
pub fn drain_rt_log() -> usize {
    let Some(ring) = LOGGER.get() else {
        return 0;
    };
    let Ok(_guard) = DRAIN_LOCK.try_lock() else {
        // another thread is draining
        return 0;
    };

    let mut forwarded = 0;
    while let Some(entry) = ring.pop() {
        let len = entry.len as usize;
        if len == 0 {
            continue;
        }
        let msg = std::str::from_utf8(&entry.bytes[..len]).unwrap_or("<invalid>");
        log::info!("[audio] {}", msg);
        forwarded += 1;
    }

    let dropped = DROPPED.swap(0, Ordering::Relaxed);
    if dropped > 0 {
        log::warn!("[audio] {} log messages dropped (ring full)", dropped);
    }
    forwarded
}

macro_rules! rt_log {
    ($($arg:tt)*) => {
        $crate::debug::rt_log_inner(format_args!($($arg)*))
    };
}
pub(crate) use rt_log;
