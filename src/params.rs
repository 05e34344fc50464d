//! Parameter values as the core sees them.
//!
//! The core never holds pointers into the host's parameter table. Instead the
//! caller hands a `ParameterSource` to every `process()` call and the pipeline
//! samples it exactly once per block.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub const GAIN_MIN: f32 = 0.0;
pub const GAIN_MAX: f32 = 2.0;
pub const GAIN_DEFAULT: f32 = 1.0;
pub const ENABLED_DEFAULT: bool = true;

/// Values in effect for one whole block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterSnapshot {
    pub gain: f32,
    pub enabled: bool,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            gain: GAIN_DEFAULT,
            enabled: ENABLED_DEFAULT,
        }
    }
}

impl ParameterSnapshot {
    pub fn new(gain: f32, enabled: bool) -> Self {
        Self {
            gain: gain.clamp(GAIN_MIN, GAIN_MAX),
            enabled,
        }
    }
}

/// Read-only accessor for the current parameter values.
///
/// Implementations must read each field with a single atomic load so a
/// snapshot can never observe a half-written value.
pub trait ParameterSource {
    fn snapshot(&self) -> ParameterSnapshot;
}

impl ParameterSource for ParameterSnapshot {
    fn snapshot(&self) -> ParameterSnapshot {
        *self
    }
}

/// Atomically settable parameters for drivers that are not a plugin host
/// (offline rendering, tests).
#[derive(Debug)]
pub struct AtomicParameters {
    gain_bits: AtomicU32,
    enabled: AtomicBool,
}

impl Default for AtomicParameters {
    fn default() -> Self {
        Self::new(ParameterSnapshot::default())
    }
}

impl AtomicParameters {
    pub fn new(initial: ParameterSnapshot) -> Self {
        Self {
            gain_bits: AtomicU32::new(initial.gain.to_bits()),
            enabled: AtomicBool::new(initial.enabled),
        }
    }

    pub fn set_gain(&self, gain: f32) {
        let gain = gain.clamp(GAIN_MIN, GAIN_MAX);
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl ParameterSource for AtomicParameters {
    fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            gain: f32::from_bits(self.gain_bits.load(Ordering::Relaxed)),
            enabled: self.enabled.load(Ordering::Relaxed),
        }
    }
}
