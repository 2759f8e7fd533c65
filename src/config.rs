//! Configuration for a PTY session

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PtyError, PtyResult};
use crate::size::WindowSize;

/// Session configuration
///
/// Missing fields in a serialized config fall back to [`PtyConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// Maximum bytes moved from the input source per read
    pub input_chunk: usize,
    /// Maximum bytes moved from the master to the output sink per read
    pub output_chunk: usize,
    /// Sleep between empty input reads, and poll timeout of the output pump
    pub poll_interval_ms: u64,
    /// Size used when the real terminal reports none
    pub default_size: WindowSize,
    /// Size forced at startup instead of copying the real terminal's
    pub initial_size: Option<WindowSize>,
    /// Switch the real stdin into raw mode when it is the input source
    pub raw_mode: bool,
    /// Make the slave the child's controlling terminal (TIOCSCTTY)
    pub controlling_terminal: bool,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            input_chunk: 1 << 7,
            output_chunk: 1 << 10,
            poll_interval_ms: 25,
            default_size: WindowSize::default(),
            initial_size: None,
            raw_mode: true,
            controlling_terminal: false,
        }
    }
}

impl PtyConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> PtyResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall a pump
    ///
    /// A zero chunk reads nothing forever, and a zero poll interval turns
    /// the idle input pump into a busy loop.
    pub fn validate(&self) -> PtyResult<()> {
        if self.input_chunk == 0 {
            return Err(PtyError::ZeroConfigValue("input_chunk"));
        }
        if self.output_chunk == 0 {
            return Err(PtyError::ZeroConfigValue("output_chunk"));
        }
        if self.poll_interval_ms == 0 {
            return Err(PtyError::ZeroConfigValue("poll_interval_ms"));
        }
        Ok(())
    }

    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> PtyResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
