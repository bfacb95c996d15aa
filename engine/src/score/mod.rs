//! Metric scoring
//!
//! Runs a preset's metric commands sequentially, parses each output into a
//! 0-100 score, and aggregates a weighted total. Metrics run one at a time
//! to keep resource load predictable.

pub mod parsers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exec::{run_command, CommandOutcome};

/// Raw metric output kept on a [`MetricResult`].
const RAW_CAP_BYTES: usize = 16 * 1024;

/// Raw metric output forwarded to the agent inside a prompt.
const PROMPT_RAW_CAP_BYTES: usize = 4 * 1024;

/// Marker appended when raw output is cut for prompt use.
pub const RAW_TRUNCATION_MARKER: &str = "\n[truncated]";

fn default_weight() -> f64 {
    1.0
}

fn default_target() -> f64 {
    100.0
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

/// One named check. Immutable within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,
    pub command: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_target")]
    pub target: f64,
    #[serde(default = "default_true")]
    pub higher_is_better: bool,
    /// Per-metric command timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Penalty factor for count-based metrics (`higherIsBetter = false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_per_unit: Option<f64>,
}

impl Metric {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            weight: default_weight(),
            target: default_target(),
            higher_is_better: true,
            timeout_secs: default_timeout_secs(),
            penalty_per_unit: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = target;
        self
    }
}

/// Outcome of one metric on one scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub name: String,
    pub score: u32,
    pub target: f64,
    pub weight: f64,
    pub raw: String,
}

impl MetricResult {
    /// Distance from target; positive means below target.
    pub fn gap(&self) -> f64 {
        self.target - self.score as f64
    }

    /// Raw output capped for inclusion in an agent prompt.
    pub fn raw_for_prompt(&self) -> String {
        if self.raw.len() <= PROMPT_RAW_CAP_BYTES {
            return self.raw.clone();
        }
        let mut cut = PROMPT_RAW_CAP_BYTES;
        while !self.raw.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}{}", &self.raw[..cut], RAW_TRUNCATION_MARKER)
    }
}

/// Aggregate of one scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    /// Weighted mean of metric scores, rounded to one decimal.
    pub total: f64,
    pub results: Vec<MetricResult>,
}

impl Score {
    pub fn from_results(results: Vec<MetricResult>) -> Self {
        let weight_sum: f64 = results.iter().map(|r| r.weight).sum();
        let total = if weight_sum > 0.0 {
            let weighted: f64 = results.iter().map(|r| r.score as f64 * r.weight).sum();
            (weighted / weight_sum * 10.0).round() / 10.0
        } else {
            0.0
        };
        Self { total, results }
    }

    /// Whether this score improves over `previous_total` by at least
    /// `min_improvement`.
    pub fn is_improving_over(&self, previous_total: f64, min_improvement: f64) -> bool {
        self.total - previous_total >= min_improvement
    }

    /// The metric furthest below its target; ties keep the first occurrence.
    pub fn find_worst(&self) -> Option<&MetricResult> {
        let mut worst: Option<&MetricResult> = None;
        for result in &self.results {
            match worst {
                Some(current) if result.gap() <= current.gap() => {}
                _ => worst = Some(result),
            }
        }
        worst
    }
}

/// Runs metric commands and aggregates their scores.
#[derive(Debug, Clone)]
pub struct Scorer {
    cwd: PathBuf,
}

impl Scorer {
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    /// Execute every metric sequentially and aggregate a weighted total.
    ///
    /// A timed-out command scores 0. Spawn failures degrade the metric to 0
    /// rather than failing the pass.
    pub async fn calculate(&self, metrics: &[Metric]) -> Score {
        let mut results = Vec::with_capacity(metrics.len());

        for metric in metrics {
            let outcome = run_command(
                &metric.command,
                &self.cwd,
                Duration::from_secs(metric.timeout_secs),
            )
            .await;
            let score = score_outcome(metric, &outcome);
            tracing::info!(
                metric = %metric.name,
                score,
                target = metric.target,
                exit_code = outcome.exit_code,
                timed_out = outcome.timed_out,
                "metric scored"
            );
            results.push(MetricResult {
                name: metric.name.clone(),
                score,
                target: metric.target,
                weight: metric.weight,
                raw: cap_raw(outcome.combined()),
            });
        }

        Score::from_results(results)
    }
}

fn score_outcome(metric: &Metric, outcome: &CommandOutcome) -> u32 {
    if outcome.timed_out {
        return 0;
    }
    parsers::parse_metric_output(metric, outcome)
}

fn cap_raw(raw: String) -> String {
    if raw.len() <= RAW_CAP_BYTES {
        return raw;
    }
    let mut cut = RAW_CAP_BYTES;
    while !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &raw[..cut], RAW_TRUNCATION_MARKER)
}
