//! Wire format for the companion app: one JSON text frame per message.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

pub const PARAM_NAME_MAX: usize = 32;

/// Outbound messages as they appear on the wire.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage<'a> {
    #[serde(rename = "audio_data", rename_all = "camelCase")]
    AudioChunk {
        samples: &'a [f32],
        sample_rate: f64,
        channels: u32,
        timestamp: u64,
    },
    #[serde(rename = "parameter")]
    ParameterUpdate {
        name: &'a str,
        value: f32,
        timestamp: u64,
    },
}

impl OutboundMessage<'_> {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Describes one audio chunk waiting in the sample queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ChunkHeader {
    pub len: usize,
    pub sample_rate: f32,
}

/// A parameter name copied into inline storage so it can be queued from the
/// audio thread without touching the heap. Longer names are truncated at a
/// char boundary.
#[derive(Clone, Copy)]
pub struct ParamName {
    bytes: [u8; PARAM_NAME_MAX],
    len: u8,
}

impl ParamName {
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(PARAM_NAME_MAX);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; PARAM_NAME_MAX];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        // constructed from a valid &str cut at a char boundary
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl std::fmt::Debug for ParamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct QueuedParameter {
    pub name: ParamName,
    pub value: f32,
}
