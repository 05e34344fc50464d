use super::message::{ChunkHeader, ParamName, QueuedParameter};
use super::Shared;
use crate::meters::Meters;
use ringbuf::Producer;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Saturation drops are reported once per this many drops.
const SATURATION_LOG_INTERVAL: u64 = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Not connected: nothing was attempted.
    NotConnected,
    Queued,
    /// Outbound path saturated: the payload was thrown away.
    Dropped,
}

/// Audio-thread half of the transport channel.
pub struct TransportSender {
    shared: Arc<Shared>,
    samples: Producer<f32>,
    chunks: Producer<ChunkHeader>,
    params: Producer<QueuedParameter>,
}

impl TransportSender {
    pub(crate) fn new(
        shared: Arc<Shared>,
        samples: Producer<f32>,
        chunks: Producer<ChunkHeader>,
        params: Producer<QueuedParameter>,
    ) -> Self {
        Self {
            shared,
            samples,
            chunks,
            params,
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.state.load() == super::ConnectionState::Connected
    }

    /// Read after `is_connected()`; identifies the connection it reported.
    #[inline]
    pub fn connection_epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::Acquire)
    }

    pub fn meters(&self) -> &Arc<Meters> {
        &self.shared.meters
    }

    /// Best effort, constant time. A chunk is queued whole or not at all.
    pub fn try_send_audio(&mut self, samples: &[f32], sample_rate: f32) -> SendOutcome {
        if !self.is_connected() {
            return SendOutcome::NotConnected;
        }

        if self.samples.remaining() < samples.len() || self.chunks.is_full() {
            let dropped = self.shared.meters.add_audio_dropped();
            if dropped % SATURATION_LOG_INTERVAL == 1 {
                crate::debug::rt_log!(
                    "outbound audio saturated, {} chunks dropped so far",
                    dropped
                );
            }
            return SendOutcome::Dropped;
        }

        // Samples first: the worker only reads samples after their header.
        let pushed = self.samples.push_slice(samples);
        debug_assert_eq!(pushed, samples.len());
        let header = ChunkHeader {
            len: pushed,
            sample_rate,
        };
        if self.chunks.push(header).is_err() {
            // unreachable with a single producer, checked above
            self.shared.meters.add_audio_dropped();
            return SendOutcome::Dropped;
        }

        self.shared.meters.add_audio_queued();
        SendOutcome::Queued
    }

    pub fn try_send_parameter(&mut self, name: &str, value: f32) -> SendOutcome {
        if !self.is_connected() {
            return SendOutcome::NotConnected;
        }

        let update = QueuedParameter {
            name: ParamName::new(name),
            value,
        };
        match self.params.push(update) {
            Ok(()) => {
                self.shared.meters.add_parameter_queued();
                SendOutcome::Queued
            }
            Err(_) => {
                let dropped = self.shared.meters.add_parameter_dropped();
                if dropped % SATURATION_LOG_INTERVAL == 1 {
                    crate::debug::rt_log!("parameter queue full, {} updates dropped so far", dropped);
                }
                SendOutcome::Dropped
            }
        }
    }
}
