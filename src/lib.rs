mod debug;
pub mod config;
pub mod dsp;
pub mod layout;
pub mod meters;
pub mod params;
pub mod pipeline;
pub mod transport;

use crate::config::LinkConfig;
use crate::meters::Meters;
use crate::params::{ParameterSnapshot, ParameterSource, GAIN_DEFAULT, GAIN_MAX, GAIN_MIN};
use crate::pipeline::{BlockPipeline, PipelineConfig};
use crate::transport::{TransportLink, TransportSender};
use assert_no_alloc::permit_alloc;
use nih_plug::prelude::*;
use std::sync::Arc;

pub use crate::debug::{drain_rt_log, init_rt_log};

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------
#[derive(Params)]
pub struct LinkParams {
    /// Linear output gain. Read once per block, so no smoother.
    #[id = "gain"]
    pub gain: FloatParam,

    /// Off means the plugin is a wire: no analysis and nothing sent.
    #[id = "enabled"]
    pub enabled: BoolParam,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            gain: FloatParam::new(
                "Gain",
                GAIN_DEFAULT,
                FloatRange::Linear {
                    min: GAIN_MIN,
                    max: GAIN_MAX,
                },
            )
            .with_step_size(0.01),
            enabled: BoolParam::new("Enabled", params::ENABLED_DEFAULT),
        }
    }
}

impl ParameterSource for LinkParams {
    fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot::new(self.gain.value(), self.enabled.value())
    }
}

/// Work that must not run on the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTask {
    Connect,
    Disconnect,
}

// -----------------------------------------------------------------------------
// PLUGIN
// -----------------------------------------------------------------------------
pub struct StageLifeLink {
    params: Arc<LinkParams>,
    pipeline: BlockPipeline<TransportSender>,
    link: TransportLink,
    meters: Arc<Meters>,
}

impl Default for StageLifeLink {
    fn default() -> Self {
        let config = LinkConfig::from_env();
        let window_mode = config.window_mode;
        let meters = Arc::new(Meters::new());
        let (sender, link) = transport::channel(config, meters.clone());

        Self {
            params: Arc::new(LinkParams::default()),
            pipeline: BlockPipeline::new(sender, window_mode, meters.clone()),
            link,
            meters,
        }
    }
}

impl StageLifeLink {
    pub fn meters(&self) -> &Arc<Meters> {
        &self.meters
    }

    fn configure(&mut self, audio_io_layout: &AudioIOLayout, buffer_config: &BufferConfig) -> bool {
        let input = audio_io_layout.main_input_channels.map_or(0, |c| c.get());
        let output = audio_io_layout.main_output_channels.map_or(0, |c| c.get());

        let config = match PipelineConfig::new(
            buffer_config.sample_rate,
            buffer_config.max_buffer_size as usize,
            input,
            output,
        ) {
            Ok(config) => config,
            Err(e) => {
                log::error!("refusing configuration: {}", e);
                return false;
            }
        };

        match self.pipeline.setup(config) {
            Ok(()) => {
                log::info!(
                    "configured: {} Hz, max block {}, {} channels",
                    config.sample_rate,
                    config.max_block_size,
                    config.layout.output_channels
                );
                true
            }
            Err(e) => {
                log::error!("pipeline setup failed: {}", e);
                false
            }
        }
    }
}

impl Plugin for StageLifeLink {
    const NAME: &'static str = "Stage-Life Link";
    const VENDOR: &'static str = "Stage-Life";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[AudioIOLayout {
        main_input_channels: NonZeroU32::new(2),
        main_output_channels: NonZeroU32::new(2),
        ..AudioIOLayout::const_default()
    }];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = LinkTask;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        init_rt_log();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if !permit_alloc(|| self.configure(audio_io_layout, buffer_config)) {
                return false;
            }

            // Connection failure is not a configuration failure: audio keeps
            // flowing, only telemetry is skipped.
            context.execute(LinkTask::Connect);
            true
        }))
        .unwrap_or(false)
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        let link = self.link.clone();
        Box::new(move |task| {
            match task {
                LinkTask::Connect => {
                    let state = link.connect_default();
                    log::info!("link to {} is {}", link.endpoint(), state.name());
                }
                LinkTask::Disconnect => link.disconnect(),
            }
            drain_rt_log();
        })
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        _context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.pipeline.process(buffer.as_slice(), &*self.params);
        }));
        if result.is_err() {
            self.pipeline.abandon_block();
        }
        ProcessStatus::Normal
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.pipeline.reset();
        }))
        .unwrap_or(());
    }
}

impl Drop for StageLifeLink {
    fn drop(&mut self) {
        self.link.disconnect();
        drain_rt_log();
    }
}

impl ClapPlugin for StageLifeLink {
    const CLAP_ID: &'static str = "com.stagelife.link";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Streams audio and spectrum to the Stage-Life companion app");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Analyzer,
        ClapFeature::Stereo,
        ClapFeature::Utility,
    ];
}

impl Vst3Plugin for StageLifeLink {
    const VST3_CLASS_ID: [u8; 16] = *b"StageLifeLink_01";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Analyzer,
        Vst3SubCategory::Tools,
    ];
}

nih_export_clap!(StageLifeLink);
nih_export_vst3!(StageLifeLink);
