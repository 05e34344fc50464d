use crate::dsp::WindowMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// RUNTIME CONFIGURATION
// =============================================================================

pub const CONFIG_PATH_ENV: &str = "STAGELIFE_LINK_CONFIG";
pub const ENDPOINT_ENV: &str = "STAGELIFE_ENDPOINT";
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080";

/// Settings for the companion-app link and the analyzer.
///
/// Every field has a default, so a config file only needs the keys it
/// actually changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Capacity of the outbound sample queue, in samples.
    pub audio_queue_samples: usize,
    /// Maximum number of audio chunks waiting to be sent.
    pub audio_queue_chunks: usize,
    pub parameter_queue_len: usize,
    pub window_mode: WindowMode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: 250,
            write_timeout_ms: 50,
            audio_queue_samples: 16_384,
            audio_queue_chunks: 64,
            parameter_queue_len: 32,
            window_mode: WindowMode::Prefix,
        }
    }
}

impl LinkConfig {
    /// Load from the environment. This is fallible but non-fatal: any problem
    /// is logged and the defaults are used instead.
    pub fn from_env() -> Self {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => match Self::from_file(Path::new(&path)) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring link config {:?}: {:#}", path, e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                config.endpoint = endpoint.trim().to_string();
            }
        }

        config.sanitized()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: LinkConfig = serde_json::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Queues of zero length would make every send a drop; keep them usable.
    fn sanitized(mut self) -> Self {
        self.audio_queue_samples = self.audio_queue_samples.max(1);
        self.audio_queue_chunks = self.audio_queue_chunks.max(1);
        self.parameter_queue_len = self.parameter_queue_len.max(1);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}
