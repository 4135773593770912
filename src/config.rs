//! Engine configuration.
//!
//! Configuration can be built in code with the `with_*` builder methods or
//! loaded from TOML:
//!
//! ```
//! use ags_engine::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     bpm = 140.0
//!     super_threaded = true
//!
//!     [presets]
//!     channels = 2
//!     samplerate = 48000
//!     buffer_size = 256
//!     format = "s16"
//! "#).unwrap();
//!
//! assert_eq!(config.presets.samplerate, 48000);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::soundcard::Presets;

/// Loop region of the sequencer clock, in tics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub enabled: bool,
    pub left: u64,
    pub right: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            left: 0,
            right: 64,
        }
    }
}

/// Top-level engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub presets: Presets,
    /// Tempo in beats per minute
    pub bpm: f64,
    /// Tics per beat (4 = sixteenth notes)
    pub subdivisions: u32,
    #[serde(rename = "loop")]
    pub loop_region: LoopConfig,
    /// Run channels with a registered channel thread in parallel
    pub super_threaded: bool,
    /// Run each cycle directly on the backend callback's stack
    pub pass_through: bool,
    /// Capacity of the deferred task queue
    pub task_queue_capacity: usize,
    /// Fraction of the buffer period a cycle may take before it counts as an overrun
    pub overrun_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            presets: Presets::default(),
            bpm: 120.0,
            subdivisions: 4,
            loop_region: LoopConfig::default(),
            super_threaded: false,
            pass_through: false,
            task_queue_capacity: 256,
            overrun_tolerance: 1.0,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a TOML string and validate it.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    pub fn with_presets(mut self, presets: Presets) -> Self {
        self.presets = presets;
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_subdivisions(mut self, subdivisions: u32) -> Self {
        self.subdivisions = subdivisions;
        self
    }

    pub fn with_loop(mut self, left: u64, right: u64) -> Self {
        self.loop_region = LoopConfig {
            enabled: true,
            left,
            right,
        };
        self
    }

    pub fn with_super_threading(mut self, enabled: bool) -> Self {
        self.super_threaded = enabled;
        self
    }

    pub fn with_pass_through(mut self, enabled: bool) -> Self {
        self.pass_through = enabled;
        self
    }

    /// Reject settings the clock or the soundcard cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.presets.validate()?;

        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "bpm must be positive, got {}",
                self.bpm
            )));
        }
        if self.subdivisions == 0 {
            return Err(EngineError::InvalidConfig(
                "subdivisions must be at least 1".into(),
            ));
        }
        if self.loop_region.enabled && self.loop_region.left >= self.loop_region.right {
            return Err(EngineError::InvalidConfig(format!(
                "loop left ({}) must be before loop right ({})",
                self.loop_region.left, self.loop_region.right
            )));
        }
        if self.task_queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "task queue capacity must be at least 1".into(),
            ));
        }
        if !(self.overrun_tolerance > 0.0) {
            return Err(EngineError::InvalidConfig(
                "overrun tolerance must be positive".into(),
            ));
        }
        Ok(())
    }
}
