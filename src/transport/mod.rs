//! Transport Channel to the companion app.
//!
//! The channel is split like an SPSC queue:
//! - [`TransportSender`] lives on the audio thread. It never blocks, never
//!   allocates and only ever enqueues into bounded, pre-allocated rings.
//! - [`TransportLink`] lives on non-realtime threads. It owns connection
//!   establishment and a worker thread that drains the rings onto the socket.
//!
//! Every transport failure ends in `ConnectionState::Disconnected`; nothing is
//! surfaced to the host and nothing is retried automatically.

mod link;
pub mod message;
mod sender;
pub mod state;

pub use link::TransportLink;
pub use message::OutboundMessage;
pub use sender::{SendOutcome, TransportSender};
pub use state::ConnectionState;

use crate::config::LinkConfig;
use crate::meters::Meters;
use message::{ChunkHeader, QueuedParameter};
use ringbuf::{Consumer, RingBuffer};
use state::StateCell;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};

/// What the block pipeline needs from an outbound transport. All methods are
/// called on the audio thread and must be wait-free.
pub trait TransportSink {
    fn is_connected(&self) -> bool;
    /// Changes every time a new connection is established.
    fn connection_epoch(&self) -> u64;
    fn try_send_audio(&mut self, samples: &[f32], sample_rate: f32) -> SendOutcome;
    fn try_send_parameter(&mut self, name: &str, value: f32) -> SendOutcome;
}

impl TransportSink for TransportSender {
    #[inline]
    fn is_connected(&self) -> bool {
        TransportSender::is_connected(self)
    }

    #[inline]
    fn connection_epoch(&self) -> u64 {
        TransportSender::connection_epoch(self)
    }

    #[inline]
    fn try_send_audio(&mut self, samples: &[f32], sample_rate: f32) -> SendOutcome {
        TransportSender::try_send_audio(self, samples, sample_rate)
    }

    #[inline]
    fn try_send_parameter(&mut self, name: &str, value: f32) -> SendOutcome {
        TransportSender::try_send_parameter(self, name, value)
    }
}

/// Consumer halves of the outbound rings. Parked in `Shared` while no worker
/// is running, owned by the worker while it is.
pub(crate) struct OutboundQueues {
    samples: Consumer<f32>,
    chunks: Consumer<ChunkHeader>,
    params: Consumer<QueuedParameter>,
}

impl OutboundQueues {
    /// Drops everything queued so far. Samples are only ever consumed per
    /// chunk header, which keeps the two rings aligned even while the
    /// producer is pushing.
    fn discard(&mut self, scratch: &mut Vec<f32>) -> usize {
        let mut dropped = 0;
        while self.params.pop().is_some() {}
        while let Some(header) = self.chunks.pop() {
            scratch.resize(header.len, 0.0);
            self.samples.pop_slice(&mut scratch[..header.len]);
            dropped += 1;
        }
        dropped
    }
}

pub(crate) struct Shared {
    state: StateCell,
    /// Bumped before each transition to `Connected`.
    epoch: AtomicU64,
    config: LinkConfig,
    meters: Arc<Meters>,
    queues: Mutex<Option<OutboundQueues>>,
}

/// Poisoning only means another thread panicked mid-update of plain data.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builds both halves of a channel. All queue memory is allocated here.
pub fn channel(config: LinkConfig, meters: Arc<Meters>) -> (TransportSender, TransportLink) {
    let (sample_prod, sample_cons) = RingBuffer::<f32>::new(config.audio_queue_samples).split();
    let (chunk_prod, chunk_cons) = RingBuffer::<ChunkHeader>::new(config.audio_queue_chunks).split();
    let (param_prod, param_cons) =
        RingBuffer::<QueuedParameter>::new(config.parameter_queue_len).split();

    let shared = Arc::new(Shared {
        state: StateCell::default(),
        epoch: AtomicU64::new(0),
        config,
        meters,
        queues: Mutex::new(Some(OutboundQueues {
            samples: sample_cons,
            chunks: chunk_cons,
            params: param_cons,
        })),
    });

    let sender = TransportSender::new(shared.clone(), sample_prod, chunk_prod, param_prod);
    let link = TransportLink::new(shared);
    (sender, link)
}
