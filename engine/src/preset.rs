//! Preset configuration
//!
//! A preset bundles the metrics, strategies, and thresholds for a run.
//! Loaded from the project's config file when present, else built-in
//! defaults.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`POLISH_TARGET`, `POLISH_MAX_ITERATIONS`)
//! 2. The first config file found in the lookup chain
//! 3. Built-in defaults

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::CapabilitySet;
use crate::error::{EngineError, EngineResult};
use crate::polish_loop::{DEFAULT_MAX_STALLED, DEFAULT_MIN_IMPROVEMENT};
use crate::score::Metric;
use crate::strategy::Strategy;

/// Config file lookup chain, relative to the project root.
pub const CONFIG_LOOKUP: &[&str] = &[
    "polish.config.json",
    ".polish.json",
    ".polish/polish.config.json",
];

const ENV_TARGET: &str = "POLISH_TARGET";
const ENV_MAX_ITERATIONS: &str = "POLISH_MAX_ITERATIONS";

fn default_target() -> f64 {
    90.0
}

fn default_max_iterations() -> u32 {
    10
}

fn default_min_improvement() -> f64 {
    DEFAULT_MIN_IMPROVEMENT
}

fn default_max_stalled() -> u32 {
    DEFAULT_MAX_STALLED
}

/// Capability sets per phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCapabilities {
    #[serde(default)]
    pub planning: CapabilitySet,
    #[serde(default)]
    pub implementation: CapabilitySet,
}

/// Named configuration bundle for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default = "default_target")]
    pub target: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Minimum score delta a commit must achieve.
    #[serde(default = "default_min_improvement")]
    pub min_improvement: f64,
    /// Consecutive stalls before the loop declares a plateau.
    #[serde(default = "default_max_stalled")]
    pub max_stalled: u32,
    #[serde(default)]
    pub capabilities: PhaseCapabilities,
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            metrics: vec![
                Metric::new("tests", "npm test"),
                Metric::new("typescript", "npx tsc --noEmit"),
                Metric::new("lint", "npx eslint ."),
            ],
            strategies: Vec::new(),
            target: default_target(),
            max_iterations: default_max_iterations(),
            min_improvement: default_min_improvement(),
            max_stalled: default_max_stalled(),
            capabilities: PhaseCapabilities::default(),
        }
    }
}

impl Preset {
    /// Validate thresholds and metric definitions.
    ///
    /// In strict mode an empty metric list is an error; otherwise it only
    /// warns (the loop will terminate immediately).
    pub fn validate(&self, strict: bool) -> EngineResult<()> {
        if self.metrics.is_empty() {
            if strict {
                return Err(EngineError::config("preset defines no metrics"));
            }
            tracing::warn!("preset defines no metrics; the loop will have nothing to improve");
        }
        for metric in &self.metrics {
            if metric.name.is_empty() || metric.command.is_empty() {
                return Err(EngineError::config(format!(
                    "metric '{}' is missing a name or command",
                    metric.name
                )));
            }
            if metric.weight < 0.0 {
                return Err(EngineError::config(format!(
                    "metric '{}' has a negative weight",
                    metric.name
                )));
            }
            if !(0.0..=100.0).contains(&metric.target) {
                return Err(EngineError::config(format!(
                    "metric '{}' target must be within 0-100",
                    metric.name
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.target) {
            return Err(EngineError::config("preset target must be within 0-100"));
        }
        for strategy in &self.strategies {
            if !self.metrics.iter().any(|m| m.name == strategy.focus) {
                tracing::warn!(
                    strategy = %strategy.name,
                    focus = %strategy.focus,
                    "strategy focus does not match any metric"
                );
            }
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(target) = std::env::var(ENV_TARGET) {
            match target.parse::<f64>() {
                Ok(value) => self.target = value,
                Err(_) => tracing::warn!(value = %target, "ignoring unparsable {ENV_TARGET}"),
            }
        }
        if let Ok(max) = std::env::var(ENV_MAX_ITERATIONS) {
            match max.parse::<u32>() {
                Ok(value) => self.max_iterations = value,
                Err(_) => tracing::warn!(value = %max, "ignoring unparsable {ENV_MAX_ITERATIONS}"),
            }
        }
    }
}

/// Load the project's preset, falling back to built-in defaults.
///
/// Configuration failures surface synchronously so a session never leaves
/// `pending` on a bad preset.
pub fn load_preset(project: &Path, strict: bool) -> EngineResult<Preset> {
    let mut preset = None;
    for candidate in CONFIG_LOOKUP {
        let path = project.join(candidate);
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let parsed: Preset = serde_json::from_str(&content).map_err(|e| {
                EngineError::config(format!("invalid preset {}: {e}", path.display()))
            })?;
            tracing::info!(path = %path.display(), "loaded preset");
            preset = Some(parsed);
            break;
        }
    }

    let mut preset = preset.unwrap_or_default();
    preset.apply_env_overrides();
    preset.validate(strict)?;
    Ok(preset)
}
