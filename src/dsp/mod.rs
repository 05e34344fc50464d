pub mod analyzer;
pub mod conditioner;
pub mod utils;

pub use analyzer::{AnalysisWindow, SpectralAnalyzer, SpectrumFrame, WindowMode, FFT_SIZE, SPECTRUM_BINS};
pub use conditioner::{BlockStage, InertStage, SignalConditioner};
