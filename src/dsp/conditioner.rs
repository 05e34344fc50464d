//! Signal Conditioner
//!
//! # Contract
//! - **Disabled**: true bypass, the block is not touched.
//! - **Enabled**: the processing stage runs, then every sample of every channel
//!   is multiplied by the same gain.
//! - **Will Not Do**: clip or limit. Gain above 1.0 can push samples past
//!   [-1, 1]; limiting is the host's business.

use crate::params::ParameterSnapshot;

/// A processing step that transforms a whole block in place.
pub trait BlockStage {
    fn process(&mut self, block: &mut [&mut [f32]]);

    /// True when the stage leaves every sample untouched.
    fn is_identity(&self) -> bool {
        false
    }
}

/// Hook point for future EQ/compression. Currently the identity transform.
#[derive(Clone, Copy, Debug, Default)]
pub struct InertStage;

impl BlockStage for InertStage {
    #[inline]
    fn process(&mut self, _block: &mut [&mut [f32]]) {}

    fn is_identity(&self) -> bool {
        true
    }
}

pub struct SignalConditioner<S: BlockStage = InertStage> {
    stage: S,
}

impl Default for SignalConditioner<InertStage> {
    fn default() -> Self {
        Self::new(InertStage)
    }
}

impl<S: BlockStage> SignalConditioner<S> {
    pub fn new(stage: S) -> Self {
        Self { stage }
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn condition(&mut self, block: &mut [&mut [f32]], params: ParameterSnapshot) {
        if !params.enabled {
            return;
        }

        self.stage.process(block);

        let gain = params.gain;
        for channel in block.iter_mut() {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }
}
