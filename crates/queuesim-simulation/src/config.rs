//! Configuration for Simulation
//!
//! Defines the configuration of a simulation run, loadable from TOML.

use std::path::Path;

use queuesim_core::{QueueConfig, SimTime};
use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationResult};

//-----------------------------------------------------------------------------
// Configuration Structures
//-----------------------------------------------------------------------------

/// Run parameters of a simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for RANDOM queue disciplines; drawn from entropy when absent
    pub seed: Option<u64>,
    /// Simulated time at which `run` stops, in seconds
    pub stop_at_secs: Option<f64>,
    /// Upper bound on the number of process resumptions per `run`
    pub max_steps: Option<u64>,
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Whether new resource pools check for deadlocks
    pub deadlock_check: bool,
    /// Queue configuration models use when they have no specific one
    pub default_queue: QueueConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            stop_at_secs: None,
            max_steps: None,
            log_filter: "queuesim_core=warn,queuesim_simulation=info".to_string(),
            deadlock_check: true,
            default_queue: QueueConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> SimulationResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> SimulationResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> SimulationResult<()> {
        if let Some(stop) = self.stop_at_secs {
            if !stop.is_finite() || stop < 0.0 {
                return Err(SimulationError::Configuration(format!(
                    "stop_at_secs must be a non-negative number, got {stop}"
                )));
            }
        }
        if self.max_steps == Some(0) {
            return Err(SimulationError::Configuration(
                "max_steps must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stop_at(&self) -> Option<SimTime> {
        self.stop_at_secs.map(SimTime::from_secs_f64)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
