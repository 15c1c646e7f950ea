//! Build settings and engine options, optionally loaded from
//! ~/.cadenza/engine.yaml.

use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::vm::DEFAULT_INSTRUCTION_BUDGET;

pub const MAX_BLOCK_SIZE_LIMIT: u32 = 65536;

/// Settings a program is built against. Fixed once `load` has been called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Sample rate in Hz.
    pub frequency: f64,
    pub max_block_size: u32,
    /// Per-endpoint event capacity for one block.
    pub event_buffer_size: u32,
    pub max_state_size: u64,
    pub max_stack_size: u64,
    pub session_id: i32,
    /// 0 disables constant folding.
    pub optimisation_level: u8,
    pub ignore_warnings: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            frequency: 44100.0,
            max_block_size: 1024,
            event_buffer_size: 32,
            max_state_size: 20 * 1024 * 1024,
            max_stack_size: 5 * 1024 * 1024,
            session_id: 0,
            optimisation_level: 3,
            ignore_warnings: false,
        }
    }
}

impl BuildSettings {
    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_max_block_size(mut self, size: u32) -> Self {
        self.max_block_size = size;
        self
    }

    pub fn with_event_buffer_size(mut self, size: u32) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_max_state_size(mut self, bytes: u64) -> Self {
        self.max_state_size = bytes;
        self
    }

    pub fn with_max_stack_size(mut self, bytes: u64) -> Self {
        self.max_stack_size = bytes;
        self
    }

    pub fn with_session_id(mut self, id: i32) -> Self {
        self.session_id = id;
        self
    }

    pub fn with_optimisation_level(mut self, level: u8) -> Self {
        self.optimisation_level = level;
        self
    }

    pub fn with_ignore_warnings(mut self, ignore: bool) -> Self {
        self.ignore_warnings = ignore;
        self
    }

    /// Apply the keys present in `overrides`; absent keys keep their values.
    pub fn with_overrides(mut self, overrides: &BuildOverrides) -> Self {
        if let Some(v) = overrides.sample_rate {
            self.frequency = v;
        }
        if let Some(v) = overrides.block_size {
            self.max_block_size = v;
        }
        if let Some(v) = overrides.event_buffer_size {
            self.event_buffer_size = v;
        }
        if let Some(v) = overrides.max_state_size {
            self.max_state_size = v;
        }
        if let Some(v) = overrides.max_stack_size {
            self.max_stack_size = v;
        }
        if let Some(v) = overrides.session_id {
            self.session_id = v;
        }
        self
    }

    /// Reasons these settings cannot be used to load a program.
    pub fn validate(&self) -> Result<(), String> {
        if self.frequency.is_nan() || self.frequency <= 0.0 {
            return Err(format!("Illegal sample rate {}", self.frequency));
        }
        if self.max_block_size == 0 || self.max_block_size > MAX_BLOCK_SIZE_LIMIT {
            return Err(format!("Illegal block size {}", self.max_block_size));
        }
        if self.event_buffer_size == 0 {
            return Err("Illegal event buffer size 0".into());
        }
        Ok(())
    }
}

/// Partial settings keyed the way test scripts spell them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_buffer_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_state_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stack_size: Option<u64>,
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i32>,
}

impl BuildOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Which performer implementation `link` targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Vm,
    Wasm,
}

/// Options fixed when an engine is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub backend: Backend,
    /// Seed for session ids; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Applied on top of the defaults when the engine is created.
    #[serde(default)]
    pub overrides: BuildOverrides,
    #[serde(default = "default_instruction_budget")]
    pub instruction_budget: u64,
}

fn default_instruction_budget() -> u64 {
    DEFAULT_INSTRUCTION_BUDGET
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            backend: Backend::Vm,
            seed: None,
            overrides: BuildOverrides::default(),
            instruction_budget: default_instruction_budget(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid engine options: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineOptions {
    /// Load options from the standard path (~/.cadenza/engine.yaml).
    /// Returns None if the file doesn't exist or doesn't parse.
    pub fn load() -> Option<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path).ok()
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cadenza").join("engine.yaml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Default build settings with a fresh session id and the configured overrides.
    pub fn initial_settings(&self) -> BuildSettings {
        let mut rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        BuildSettings::default()
            .with_session_id(rng.gen_range(1..i32::MAX))
            .with_overrides(&self.overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_keep_unspecified_keys() {
        let overrides: BuildOverrides = serde_yaml::from_str("sampleRate: 48000\nblockSize: 64\n").unwrap();
        let settings = BuildSettings::default().with_overrides(&overrides);
        assert_eq!(settings.frequency, 48000.0);
        assert_eq!(settings.max_block_size, 64);
        assert_eq!(settings.event_buffer_size, 32);
    }

    #[test]
    fn session_id_key_is_spelled_like_scripts() {
        let overrides: BuildOverrides = serde_yaml::from_str("sessionID: 1234").unwrap();
        assert_eq!(overrides.session_id, Some(1234));
    }

    #[test]
    fn seeded_session_ids_are_deterministic() {
        let options = EngineOptions {
            seed: Some(42),
            ..EngineOptions::default()
        };
        assert_eq!(
            options.initial_settings().session_id,
            options.initial_settings().session_id
        );
        assert!(options.initial_settings().session_id > 0);
    }

    #[test]
    fn validation() {
        assert!(BuildSettings::default().validate().is_ok());
        assert!(BuildSettings::default().with_max_block_size(0).validate().is_err());
        assert!(BuildSettings::default()
            .with_max_block_size(MAX_BLOCK_SIZE_LIMIT + 1)
            .validate()
            .is_err());
        assert!(BuildSettings::default().with_frequency(0.0).validate().is_err());
    }

    #[test]
    fn options_yaml_round_trip() {
        let yaml = "backend: wasm\nseed: 7\noverrides:\n  eventBufferSize: 4\n";
        let options: EngineOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(options.backend, Backend::Wasm);
        assert_eq!(options.overrides.event_buffer_size, Some(4));
        assert_eq!(options.instruction_budget, DEFAULT_INSTRUCTION_BUDGET);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let _ = EngineOptions::load();
    }
}
