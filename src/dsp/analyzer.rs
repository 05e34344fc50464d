//! Spectral Analyzer
//!
//! Keeps the most recent channel-0 samples in a fixed 2048-sample window and
//! turns them into a magnitude spectrum on demand.
//!
//! # Lifecycle
//! - `ingest()` refreshes the window from the current block.
//! - `analyze()` windows a working copy (Hann), runs a size-N forward FFT and
//!   writes N/2 magnitudes into a pre-allocated `SpectrumFrame`.
//!
//! # Window modes
//! - **Prefix** (default): each block overwrites the start of the window. When
//!   blocks are shorter than the window, the tail keeps samples from older
//!   blocks, so the spectrum mixes fresh and stale audio.
//! - **Sliding**: a circular buffer that always holds the latest N samples in
//!   arrival order. Changes the spectral output, hence opt-in.
//!
//! Nothing here allocates after construction.

use crate::dsp::utils::{argmax, make_hann_window};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FFT_SIZE: usize = 2048;
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    #[default]
    Prefix,
    Sliding,
}

/// The most recent samples drawn from channel 0.
pub struct AnalysisWindow {
    samples: Vec<f32>,
    mode: WindowMode,
    /// Next write position (sliding mode only).
    write_pos: usize,
}

impl AnalysisWindow {
    pub fn new(capacity: usize, mode: WindowMode) -> Self {
        Self {
            samples: vec![0.0; capacity],
            mode,
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    /// Returns how many samples were taken from `input`.
    pub fn write(&mut self, input: &[f32]) -> usize {
        let cap = self.samples.len();
        match self.mode {
            WindowMode::Prefix => {
                let n = input.len().min(cap);
                self.samples[..n].copy_from_slice(&input[..n]);
                n
            }
            WindowMode::Sliding => {
                // only the newest `cap` samples can survive anyway
                let start = input.len().saturating_sub(cap);
                let fresh = &input[start..];
                let mut pos = self.write_pos;
                let mut rest = fresh;
                while !rest.is_empty() {
                    let run = (cap - pos).min(rest.len());
                    self.samples[pos..pos + run].copy_from_slice(&rest[..run]);
                    pos = (pos + run) % cap;
                    rest = &rest[run..];
                }
                self.write_pos = pos;
                fresh.len()
            }
        }
    }

    /// Calls `f(i, sample)` for every slot in analysis order (oldest first in
    /// sliding mode, storage order in prefix mode).
    #[inline]
    fn for_each_ordered(&self, mut f: impl FnMut(usize, f32)) {
        let (older, newer) = match self.mode {
            WindowMode::Prefix => (&self.samples[..], &self.samples[..0]),
            WindowMode::Sliding => {
                let (head, tail) = self.samples.split_at(self.write_pos);
                (tail, head)
            }
        };
        for (i, &s) in older.iter().chain(newer.iter()).enumerate() {
            f(i, s);
        }
    }

    pub fn clear(&mut self) {
        self.samples.fill(0.0);
        self.write_pos = 0;
    }
}

/// Magnitude-only spectrum, N/2 bins. Scaling is whatever the unnormalized
/// forward FFT produces.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumFrame {
    bins: Vec<f32>,
}

impl SpectrumFrame {
    pub fn new(bin_count: usize) -> Self {
        Self {
            bins: vec![0.0; bin_count],
        }
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn peak_bin(&self) -> Option<usize> {
        argmax(&self.bins)
    }

    pub fn into_bins(self) -> Vec<f32> {
        self.bins
    }
}

pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: AnalysisWindow,
    hann: Vec<f32>,
    spec: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    frame: SpectrumFrame,
}

impl SpectralAnalyzer {
    pub fn new(mode: WindowMode) -> Self {
        Self::with_size(FFT_SIZE, mode)
    }

    /// `size` must be a power of two.
    pub fn with_size(size: usize, mode: WindowMode) -> Self {
        assert!(size.is_power_of_two(), "analysis size must be a power of two");

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch_len = fft.get_inplace_scratch_len();

        Self {
            fft,
            window: AnalysisWindow::new(size, mode),
            hann: make_hann_window(size),
            spec: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            frame: SpectrumFrame::new(size / 2),
        }
    }

    pub fn size(&self) -> usize {
        self.window.capacity()
    }

    pub fn window_mode(&self) -> WindowMode {
        self.window.mode()
    }

    pub fn ingest(&mut self, channel_samples: &[f32]) -> usize {
        self.window.write(channel_samples)
    }

    /// Pure function of the window contents: the window itself is never
    /// modified, only the working copy is.
    pub fn analyze(&mut self) -> &SpectrumFrame {
        let hann = &self.hann;
        let spec = &mut self.spec;
        self.window.for_each_ordered(|i, s| {
            spec[i] = Complex::new(s * hann[i], 0.0);
        });

        self.fft.process_with_scratch(&mut self.spec, &mut self.scratch);

        for (bin, c) in self.frame.bins.iter_mut().zip(self.spec.iter()) {
            *bin = c.norm();
        }
        &self.frame
    }

    /// Last frame produced by `analyze()`.
    pub fn last_frame(&self) -> &SpectrumFrame {
        &self.frame
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.frame.bins.fill(0.0);
    }
}

// =============================================================================
// Tests
// =============================================================================
