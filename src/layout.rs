//! Bus layout negotiation.
//!
//! Only stereo in / stereo out is supported. Anything else is refused before a
//! single block is processed.

use std::fmt;

pub const SUPPORTED_CHANNELS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelLayout {
    pub input_channels: usize,
    pub output_channels: usize,
}

impl ChannelLayout {
    pub const STEREO: ChannelLayout = ChannelLayout {
        input_channels: SUPPORTED_CHANNELS as usize,
        output_channels: SUPPORTED_CHANNELS as usize,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutError {
    UnsupportedOutput { channels: u32 },
    InputOutputMismatch { input: u32, output: u32 },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::UnsupportedOutput { channels } => write!(
                f,
                "unsupported output layout: {} channels (only stereo is supported)",
                channels
            ),
            LayoutError::InputOutputMismatch { input, output } => write!(
                f,
                "input layout ({} channels) does not match output layout ({} channels)",
                input, output
            ),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Accepts a layout only if the output is stereo and the input matches it.
pub fn negotiate(input_channels: u32, output_channels: u32) -> Result<ChannelLayout, LayoutError> {
    if output_channels != SUPPORTED_CHANNELS {
        return Err(LayoutError::UnsupportedOutput {
            channels: output_channels,
        });
    }
    if input_channels != output_channels {
        return Err(LayoutError::InputOutputMismatch {
            input: input_channels,
            output: output_channels,
        });
    }
    Ok(ChannelLayout {
        input_channels: input_channels as usize,
        output_channels: output_channels as usize,
    })
}
