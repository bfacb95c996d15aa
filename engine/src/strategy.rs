//! Prompt strategies
//!
//! Each iteration the loop asks the agent to fix the worst-scoring metric.
//! The prompt comes from the preset strategy whose focus matches that
//! metric, else a built-in template for the known families, else a generic
//! one. Templates carry `{{metric}}`, `{{score}}`, `{{target}}`, and
//! `{{raw}}` placeholders.

use serde::{Deserialize, Serialize};

use crate::plan::ApprovedPlan;
use crate::score::MetricResult;

/// A prompt template keyed to one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub name: String,
    /// Metric name this strategy targets.
    pub focus: String,
    pub prompt: String,
}

const TESTS_TEMPLATE: &str = "\
The test suite for this project is failing. Current test score: {{score}}/100 \
(target {{target}}). Run the tests, read the failures below, and fix the \
underlying code or the tests so they pass. Do not delete or skip tests to \
make them pass.\n\nTest output:\n{{raw}}";

const TYPESCRIPT_TEMPLATE: &str = "\
The project has type errors. Current type-check score: {{score}}/100 \
(target {{target}}). Fix every compiler error below without weakening types \
(no `any`, no `@ts-ignore`).\n\nCompiler output:\n{{raw}}";

const LINT_TEMPLATE: &str = "\
The linter reports problems. Current lint score: {{score}}/100 (target \
{{target}}). Fix the errors first, then the warnings. Prefer real fixes over \
disable comments.\n\nLinter output:\n{{raw}}";

const COVERAGE_TEMPLATE: &str = "\
Test coverage is below target: {{score}}% covered, target {{target}}%. Add \
meaningful tests for the least-covered files shown below. Do not write \
assertion-free tests just to raise the number.\n\nCoverage report:\n{{raw}}";

const GENERIC_TEMPLATE: &str = "\
The metric \"{{metric}}\" scored {{score}}/100 (target {{target}}). Improve \
the codebase so this check scores higher. Command output:\n{{raw}}";

/// Built-in template for the known metric families.
pub fn builtin_for_family(metric_name: &str) -> Option<&'static str> {
    match metric_name.to_lowercase().as_str() {
        "tests" | "test" => Some(TESTS_TEMPLATE),
        "typescript" | "tsc" => Some(TYPESCRIPT_TEMPLATE),
        "lint" | "eslint" => Some(LINT_TEMPLATE),
        "coverage" => Some(COVERAGE_TEMPLATE),
        _ => None,
    }
}

/// Fill a template's placeholders from the worst metric's result.
pub fn render_prompt(template: &str, worst: &MetricResult) -> String {
    template
        .replace("{{metric}}", &worst.name)
        .replace("{{score}}", &worst.score.to_string())
        .replace("{{target}}", &format_number(worst.target))
        .replace("{{raw}}", &worst.raw_for_prompt())
}

/// Select and render the fix prompt for one iteration.
pub fn build_fix_prompt(strategies: &[Strategy], worst: &MetricResult) -> String {
    let template = strategies
        .iter()
        .find(|s| s.focus == worst.name)
        .map(|s| s.prompt.as_str())
        .or_else(|| builtin_for_family(&worst.name))
        .unwrap_or(GENERIC_TEMPLATE);
    render_prompt(template, worst)
}

/// Prompt for the one-shot mission turn that precedes the loop.
pub fn mission_prompt(mission: &str, plan: Option<&ApprovedPlan>) -> String {
    let mut prompt = format!(
        "Implement the following mission in this repository. Keep the change \
         focused; the quality loop will iterate afterwards.\n\nMission: {mission}\n"
    );
    if let Some(plan) = plan {
        prompt.push('\n');
        prompt.push_str(&plan.render());
    }
    prompt
}

/// Mission annotated with reviewer feedback for a retry run.
pub fn retry_mission(mission: &str, feedback: &str) -> String {
    format!("{mission}\n\nA previous run was reviewed with this feedback, address it:\n{feedback}")
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
