//! Lock-free counters shared between the audio thread, the link worker and
//! whoever observes them (tests, a future editor).
//!
//! Everything is `Relaxed`: the values are statistics, nothing synchronizes
//! through them.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct Meters {
    blocks_processed: AtomicU64,
    blocks_bypassed: AtomicU64,
    audio_chunks_queued: AtomicU64,
    audio_chunks_dropped: AtomicU64,
    audio_chunks_sent: AtomicU64,
    parameters_queued: AtomicU64,
    parameters_dropped: AtomicU64,
    parameters_sent: AtomicU64,
    spectrum_peak_bin: AtomicU32,
}

/// Plain copy of all counters, for logging and assertions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeterSnapshot {
    pub blocks_processed: u64,
    pub blocks_bypassed: u64,
    pub audio_chunks_queued: u64,
    pub audio_chunks_dropped: u64,
    pub audio_chunks_sent: u64,
    pub parameters_queued: u64,
    pub parameters_dropped: u64,
    pub parameters_sent: u64,
    pub spectrum_peak_bin: u32,
}

impl Meters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block_processed(&self) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_block_bypassed(&self) {
        self.blocks_bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_audio_queued(&self) {
        self.audio_chunks_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total of dropped chunks, including this one.
    pub fn add_audio_dropped(&self) -> u64 {
        self.audio_chunks_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_audio_sent(&self) {
        self.audio_chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_parameter_queued(&self) {
        self.parameters_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_parameter_dropped(&self) -> u64 {
        self.parameters_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_parameter_sent(&self) {
        self.parameters_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_spectrum_peak_bin(&self, bin: u32) {
        self.spectrum_peak_bin.store(bin, Ordering::Relaxed);
    }

    pub fn get_spectrum_peak_bin(&self) -> u32 {
        self.spectrum_peak_bin.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            blocks_bypassed: self.blocks_bypassed.load(Ordering::Relaxed),
            audio_chunks_queued: self.audio_chunks_queued.load(Ordering::Relaxed),
            audio_chunks_dropped: self.audio_chunks_dropped.load(Ordering::Relaxed),
            audio_chunks_sent: self.audio_chunks_sent.load(Ordering::Relaxed),
            parameters_queued: self.parameters_queued.load(Ordering::Relaxed),
            parameters_dropped: self.parameters_dropped.load(Ordering::Relaxed),
            parameters_sent: self.parameters_sent.load(Ordering::Relaxed),
            spectrum_peak_bin: self.get_spectrum_peak_bin(),
        }
    }
}
