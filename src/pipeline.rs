//! Block Pipeline
//!
//! Drives one audio block through the fixed sequence:
//!
//! 1. zero output-only channels
//! 2. disabled -> return (full bypass: no conditioning, analysis or emission)
//! 3. connected -> send the *dry* channel 0 to the companion app
//! 4. analyze channel 0
//! 5. condition the block (stage + gain)
//!
//! After the call the host buffer holds the processed audio.

use crate::dsp::{SignalConditioner, SpectralAnalyzer, SpectrumFrame, WindowMode};
use crate::layout::{self, ChannelLayout, LayoutError};
use crate::meters::Meters;
use crate::params::{ParameterSnapshot, ParameterSource};
use crate::transport::{SendOutcome, TransportSink};
use std::fmt;
use std::sync::Arc;

const GAIN_PARAM_NAME: &str = "gain";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready,
    /// Only for the duration of one `process()` call.
    Processing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// `setup()` has not succeeded yet; the block was left untouched.
    Unconfigured,
    Bypassed,
    Processed,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub layout: ChannelLayout,
}

impl PipelineConfig {
    pub fn new(
        sample_rate: f32,
        max_block_size: usize,
        input_channels: u32,
        output_channels: u32,
    ) -> Result<Self, PipelineError> {
        let layout = layout::negotiate(input_channels, output_channels)?;
        let config = Self {
            sample_rate,
            max_block_size,
            layout,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(PipelineError::InvalidSampleRate(self.sample_rate));
        }
        if self.max_block_size == 0 {
            return Err(PipelineError::InvalidBlockSize(self.max_block_size));
        }
        layout::negotiate(
            self.layout.input_channels as u32,
            self.layout.output_channels as u32,
        )?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PipelineError {
    InvalidSampleRate(f32),
    InvalidBlockSize(usize),
    Layout(LayoutError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidSampleRate(sr) => write!(f, "invalid sample rate: {}", sr),
            PipelineError::InvalidBlockSize(n) => write!(f, "invalid block size: {}", n),
            PipelineError::Layout(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<LayoutError> for PipelineError {
    fn from(err: LayoutError) -> Self {
        PipelineError::Layout(err)
    }
}

pub struct BlockPipeline<T: TransportSink> {
    state: PipelineState,
    config: Option<PipelineConfig>,
    conditioner: SignalConditioner,
    analyzer: SpectralAnalyzer,
    transport: T,
    meters: Arc<Meters>,
    /// Connection epoch and gain of the last queued gain update.
    last_sent_gain: Option<(u64, f32)>,
}

impl<T: TransportSink> BlockPipeline<T> {
    pub fn new(transport: T, window_mode: WindowMode, meters: Arc<Meters>) -> Self {
        Self {
            state: PipelineState::Uninitialized,
            config: None,
            conditioner: SignalConditioner::default(),
            analyzer: SpectralAnalyzer::new(window_mode),
            transport,
            meters,
            last_sent_gain: None,
        }
    }

    /// Non-realtime. May be called again to reconfigure; a rejected config
    /// leaves the previous one in place.
    pub fn setup(&mut self, config: PipelineConfig) -> Result<(), PipelineError> {
        config.validate()?;
        self.config = Some(config);
        self.state = PipelineState::Ready;
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> Option<&PipelineConfig> {
        self.config.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Spectrum of the most recent analyzed block. Nothing consumes it yet.
    pub fn last_spectrum(&self) -> &SpectrumFrame {
        self.analyzer.last_frame()
    }

    pub fn reset(&mut self) {
        self.analyzer.reset();
        self.last_sent_gain = None;
    }

    /// Marks a block that unwound out of `process()` as finished.
    pub fn abandon_block(&mut self) {
        if self.state == PipelineState::Processing {
            self.state = PipelineState::Ready;
        }
    }

    /// Realtime entry point. `params` is sampled exactly once.
    pub fn process(
        &mut self,
        block: &mut [&mut [f32]],
        params: &impl ParameterSource,
    ) -> BlockOutcome {
        let Some(config) = self.config else {
            return BlockOutcome::Unconfigured;
        };

        // One block at a time; an unwound block must be closed with
        // `abandon_block()` first.
        if self.state == PipelineState::Processing {
            crate::debug::rt_log!("block started while previous block was still marked in progress");
            debug_assert!(false, "process() re-entered while a block is in progress");
        }
        self.state = PipelineState::Processing;

        let snapshot = params.snapshot();
        let outcome = self.run_block(block, snapshot, &config);

        self.state = PipelineState::Ready;
        outcome
    }

    #[inline]
    fn run_block(
        &mut self,
        block: &mut [&mut [f32]],
        params: ParameterSnapshot,
        config: &PipelineConfig,
    ) -> BlockOutcome {
        // 1. output channels without a matching input carry silence
        for channel in block.iter_mut().skip(config.layout.input_channels) {
            channel.fill(0.0);
        }

        // 2. full bypass, telemetry included
        if !params.enabled {
            self.meters.add_block_bypassed();
            return BlockOutcome::Bypassed;
        }

        // 3. dry signal out, before any gain
        if self.transport.is_connected() {
            if let Some(dry) = block.first() {
                self.transport.try_send_audio(dry, config.sample_rate);
            }
            self.forward_gain(params.gain);
        }

        // 4. analysis always runs on this path
        if let Some(ch0) = block.first() {
            self.analyzer.ingest(ch0);
        }
        let peak = self.analyzer.analyze().peak_bin().unwrap_or(0);
        self.meters.set_spectrum_peak_bin(peak as u32);

        // 5.
        self.conditioner.condition(block, params);

        self.meters.add_block_processed();
        BlockOutcome::Processed
    }

    /// Sends the gain once per connection and again whenever it changes.
    fn forward_gain(&mut self, gain: f32) {
        let epoch = self.transport.connection_epoch();
        if self.last_sent_gain == Some((epoch, gain)) {
            return;
        }
        if self.transport.try_send_parameter(GAIN_PARAM_NAME, gain) == SendOutcome::Queued {
            self.last_sent_gain = Some((epoch, gain));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::dsp::FFT_SIZE;
    use crate::params::AtomicParameters;
    use crate::transport::{self, TransportSender};

    #[derive(Default)]
    struct RecordingSink {
        connected: bool,
        epoch: u64,
        audio: Vec<Vec<f32>>,
        sample_rates: Vec<f32>,
        params: Vec<(String, f32)>,
    }

    impl RecordingSink {
        fn connected() -> Self {
            Self {
                connected: true,
                epoch: 1,
                ..Default::default()
            }
        }

        /// A fresh connection, as the link would publish it.
        fn reconnect(&mut self) {
            self.connected = true;
            self.epoch += 1;
        }
    }

    impl TransportSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn connection_epoch(&self) -> u64 {
            self.epoch
        }

        fn try_send_audio(&mut self, samples: &[f32], sample_rate: f32) -> SendOutcome {
            if !self.connected {
                return SendOutcome::NotConnected;
            }
            self.audio.push(samples.to_vec());
            self.sample_rates.push(sample_rate);
            SendOutcome::Queued
        }

        fn try_send_parameter(&mut self, name: &str, value: f32) -> SendOutcome {
            if !self.connected {
                return SendOutcome::NotConnected;
            }
            self.params.push((name.to_string(), value));
            SendOutcome::Queued
        }
    }

    /// Counts calls without allocating.
    #[derive(Default)]
    struct CountingSink {
        audio_calls: usize,
        param_calls: usize,
    }

    impl TransportSink for CountingSink {
        fn is_connected(&self) -> bool {
            true
        }

        fn connection_epoch(&self) -> u64 {
            1
        }

        fn try_send_audio(&mut self, _samples: &[f32], _sample_rate: f32) -> SendOutcome {
            self.audio_calls += 1;
            SendOutcome::Queued
        }

        fn try_send_parameter(&mut self, _name: &str, _value: f32) -> SendOutcome {
            self.param_calls += 1;
            SendOutcome::Queued
        }
    }

    fn stereo_config(sample_rate: f32) -> PipelineConfig {
        PipelineConfig::new(sample_rate, 512, 2, 2).unwrap()
    }

    fn ready_pipeline<T: TransportSink>(sink: T) -> BlockPipeline<T> {
        let mut pipeline = BlockPipeline::new(sink, WindowMode::Prefix, Arc::new(Meters::new()));
        pipeline.setup(stereo_config(48_000.0)).unwrap();
        pipeline
    }

    fn stereo_block(frames: usize) -> Vec<Vec<f32>> {
        vec![
            (0..frames)
                .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5)
                .collect(),
            (0..frames).map(|i| ((i * 7 % 13) as f32 / 13.0) - 0.5).collect(),
        ]
    }

    fn run<T: TransportSink>(
        pipeline: &mut BlockPipeline<T>,
        data: &mut [Vec<f32>],
        params: &impl ParameterSource,
    ) -> BlockOutcome {
        let mut block: Vec<&mut [f32]> = data.iter_mut().map(|c| c.as_mut_slice()).collect();
        pipeline.process(&mut block, params)
    }

    #[test]
    fn test_unconfigured_pipeline_leaves_block_alone() {
        let mut pipeline =
            BlockPipeline::new(RecordingSink::default(), WindowMode::Prefix, Arc::new(Meters::new()));
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);

        let original = stereo_block(64);
        let mut data = original.clone();
        let outcome = run(&mut pipeline, &mut data, &ParameterSnapshot::new(2.0, true));
        assert_eq!(outcome, BlockOutcome::Unconfigured);
        assert_eq!(data, original);
    }

    #[test]
    fn test_setup_rejects_invalid_config() {
        assert_eq!(
            PipelineConfig::new(0.0, 512, 2, 2),
            Err(PipelineError::InvalidSampleRate(0.0))
        );
        assert_eq!(
            PipelineConfig::new(48_000.0, 0, 2, 2),
            Err(PipelineError::InvalidBlockSize(0))
        );

        let mut pipeline = ready_pipeline(RecordingSink::default());
        let bad = PipelineConfig {
            sample_rate: f32::NAN,
            ..stereo_config(48_000.0)
        };
        assert!(pipeline.setup(bad).is_err());
        let mono = PipelineConfig {
            layout: ChannelLayout {
                input_channels: 1,
                output_channels: 2,
            },
            ..stereo_config(48_000.0)
        };
        assert!(matches!(pipeline.setup(mono), Err(PipelineError::Layout(_))));
        // previous config survives
        assert_eq!(pipeline.config().unwrap().sample_rate, 48_000.0);
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[test]
    fn test_mono_layout_is_rejected_before_processing() {
        let err = PipelineConfig::new(48_000.0, 512, 1, 2).unwrap_err();
        assert!(matches!(err, PipelineError::Layout(_)));

        let pipeline =
            BlockPipeline::new(RecordingSink::default(), WindowMode::Prefix, Arc::new(Meters::new()));
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    }

    #[test]
    fn test_unity_gain_disconnected_is_transparent() {
        let meters = Arc::new(Meters::new());
        let mut pipeline = BlockPipeline::new(RecordingSink::default(), WindowMode::Prefix, meters.clone());
        pipeline.setup(stereo_config(48_000.0)).unwrap();

        let original = stereo_block(512);
        let mut data = original.clone();
        let outcome = run(&mut pipeline, &mut data, &ParameterSnapshot::new(1.0, true));

        assert_eq!(outcome, BlockOutcome::Processed);
        assert_eq!(pipeline.state(), PipelineState::Ready);
        assert_eq!(data, original);
        assert!(pipeline.transport().audio.is_empty());
        // analyzer ran: a 440 Hz tone gives a non-silent spectrum
        assert!(pipeline.last_spectrum().bins().iter().any(|&m| m > 0.0));
        assert_eq!(meters.snapshot().blocks_processed, 1);
    }

    #[test]
    fn test_disabled_bypasses_everything() {
        let meters = Arc::new(Meters::new());
        let sink = RecordingSink::connected();
        let mut pipeline = BlockPipeline::new(sink, WindowMode::Prefix, meters.clone());
        pipeline.setup(stereo_config(48_000.0)).unwrap();

        for &gain in &[0.0f32, 0.5, 1.0, 2.0] {
            let original = stereo_block(256);
            let mut data = original.clone();
            let outcome = run(&mut pipeline, &mut data, &ParameterSnapshot::new(gain, false));
            assert_eq!(outcome, BlockOutcome::Bypassed);
            assert_eq!(data, original);
        }

        assert!(pipeline.transport().audio.is_empty());
        assert!(pipeline.transport().params.is_empty());
        // no analysis happened either
        assert!(pipeline.last_spectrum().bins().iter().all(|&m| m == 0.0));
        let snap = meters.snapshot();
        assert_eq!(snap.blocks_bypassed, 4);
        assert_eq!(snap.blocks_processed, 0);
    }

    #[test]
    fn test_connected_sends_dry_signal_and_scales_output() {
        let sink = RecordingSink::connected();
        let mut pipeline = ready_pipeline(sink);

        let original = stereo_block(512);
        let mut data = original.clone();
        run(&mut pipeline, &mut data, &ParameterSnapshot::new(0.5, true));

        let sink = pipeline.transport();
        assert_eq!(sink.audio.len(), 1);
        assert_eq!(sink.audio[0], original[0]);
        assert_eq!(sink.sample_rates, vec![48_000.0]);

        for (out_ch, in_ch) in data.iter().zip(original.iter()) {
            for (&o, &i) in out_ch.iter().zip(in_ch.iter()) {
                assert_eq!(o, i * 0.5);
            }
        }
    }

    #[test]
    fn test_gain_linearity_over_range() {
        let mut pipeline = ready_pipeline(RecordingSink::default());
        for step in 0..=8 {
            let gain = step as f32 * 0.25;
            let original = stereo_block(128);
            let mut data = original.clone();
            run(&mut pipeline, &mut data, &ParameterSnapshot::new(gain, true));
            for (out_ch, in_ch) in data.iter().zip(original.iter()) {
                for (&o, &i) in out_ch.iter().zip(in_ch.iter()) {
                    assert_eq!(o, i * gain);
                }
            }
        }
    }

    #[test]
    fn test_gain_changes_are_forwarded_once() {
        let sink = RecordingSink::connected();
        let mut pipeline = ready_pipeline(sink);
        let params = AtomicParameters::default();

        for _ in 0..3 {
            run(&mut pipeline, &mut stereo_block(32), &params);
        }
        params.set_gain(0.75);
        for _ in 0..3 {
            run(&mut pipeline, &mut stereo_block(32), &params);
        }

        assert_eq!(
            pipeline.transport().params,
            vec![("gain".to_string(), 1.0), ("gain".to_string(), 0.75)]
        );
        assert_eq!(pipeline.transport().audio.len(), 6);
    }

    #[test]
    fn test_gain_is_resent_after_reconnect() {
        let sink = RecordingSink::connected();
        let mut pipeline = ready_pipeline(sink);
        let params = ParameterSnapshot::new(1.5, true);

        run(&mut pipeline, &mut stereo_block(32), &params);
        pipeline.transport_mut().connected = false;
        run(&mut pipeline, &mut stereo_block(32), &params);
        pipeline.transport_mut().reconnect();
        run(&mut pipeline, &mut stereo_block(32), &params);

        assert_eq!(pipeline.transport().params.len(), 2);
    }

    #[test]
    fn test_gain_is_resent_when_link_cycles_between_blocks() {
        let mut pipeline = ready_pipeline(RecordingSink::connected());
        let params = ParameterSnapshot::new(0.6, true);

        run(&mut pipeline, &mut stereo_block(32), &params);
        run(&mut pipeline, &mut stereo_block(32), &params);
        // dropped and re-established with no block observing the gap
        pipeline.transport_mut().reconnect();
        run(&mut pipeline, &mut stereo_block(32), &params);
        run(&mut pipeline, &mut stereo_block(32), &params);

        assert_eq!(
            pipeline.transport().params,
            vec![("gain".to_string(), 0.6), ("gain".to_string(), 0.6)]
        );
        assert_eq!(pipeline.transport().audio.len(), 4);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "re-entered")]
    fn test_overlapping_blocks_are_rejected() {
        let mut pipeline = ready_pipeline(RecordingSink::default());
        pipeline.state = PipelineState::Processing;
        run(&mut pipeline, &mut stereo_block(32), &ParameterSnapshot::default());
    }

    #[test]
    fn test_abandoned_block_allows_next_block() {
        let mut pipeline = ready_pipeline(RecordingSink::default());
        pipeline.state = PipelineState::Processing;
        pipeline.abandon_block();
        assert_eq!(pipeline.state(), PipelineState::Ready);

        let outcome = run(&mut pipeline, &mut stereo_block(32), &ParameterSnapshot::default());
        assert_eq!(outcome, BlockOutcome::Processed);
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[test]
    fn test_extra_output_channels_are_zeroed() {
        let mut pipeline = ready_pipeline(RecordingSink::default());
        let mut data = stereo_block(64);
        data.push(vec![0.9; 64]);

        run(&mut pipeline, &mut data, &ParameterSnapshot::new(1.0, true));
        assert!(data[2].iter().all(|&s| s == 0.0));

        // zeroing happens before the bypass check
        let mut data = stereo_block(64);
        data.push(vec![0.9; 64]);
        run(&mut pipeline, &mut data, &ParameterSnapshot::new(1.0, false));
        assert!(data[2].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_spectrum_tracks_input_tone() {
        let meters = Arc::new(Meters::new());
        let mut pipeline = BlockPipeline::new(RecordingSink::default(), WindowMode::Prefix, meters.clone());
        pipeline.setup(stereo_config(48_000.0)).unwrap();

        let tone: Vec<f32> = (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * 3000.0 * i as f32 / 48_000.0).sin())
            .collect();
        let mut data = vec![tone.clone(), tone];
        run(&mut pipeline, &mut data, &ParameterSnapshot::new(1.0, true));

        let expected = 3000.0 * FFT_SIZE as f32 / 48_000.0;
        let peak = pipeline.last_spectrum().peak_bin().unwrap() as f32;
        assert!((peak - expected).abs() <= 1.0);
        assert_eq!(meters.get_spectrum_peak_bin() as f32, peak);
    }

    #[test]
    fn test_process_does_not_allocate() {
        let mut pipeline = ready_pipeline(CountingSink::default());
        let mut data = stereo_block(512);
        let mut block: Vec<&mut [f32]> = data.iter_mut().map(|c| c.as_mut_slice()).collect();
        let params = ParameterSnapshot::new(0.8, true);

        let outcome = assert_no_alloc::assert_no_alloc(|| pipeline.process(&mut block, &params));
        assert_eq!(outcome, BlockOutcome::Processed);
        assert_eq!(pipeline.transport().audio_calls, 1);
        assert_eq!(pipeline.transport().param_calls, 1);
    }

    #[test]
    fn test_real_sender_disconnected_does_not_allocate() {
        let meters = Arc::new(Meters::new());
        let (sender, _link) = transport::channel(LinkConfig::default(), meters.clone());
        let mut pipeline: BlockPipeline<TransportSender> =
            BlockPipeline::new(sender, WindowMode::Sliding, meters);
        pipeline.setup(stereo_config(44_100.0)).unwrap();

        let mut data = stereo_block(256);
        let mut block: Vec<&mut [f32]> = data.iter_mut().map(|c| c.as_mut_slice()).collect();
        let params = ParameterSnapshot::default();
        let outcome = assert_no_alloc::assert_no_alloc(|| pipeline.process(&mut block, &params));
        assert_eq!(outcome, BlockOutcome::Processed);
    }
}
