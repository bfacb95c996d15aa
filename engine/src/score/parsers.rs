//! Metric output parsers
//!
//! Maps captured command output to a 0-100 score, dispatched by metric name
//! (case-insensitive). Unknown families fall back to a binary exit-code
//! mapping.

use std::sync::LazyLock;

use regex::Regex;

use crate::exec::CommandOutcome;
use crate::score::Metric;

static PASS_FAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\d+)\s+pass.*?(\d+)\s+fail").unwrap());

static PASSED_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\d+)\s+passed.*?(\d+)\s+failed").unwrap());

static PASS_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s+pass(?:ed)?").unwrap());

static FAIL_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)fail").unwrap());

static TSC_ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"error TS\d+:").unwrap());

static ESLINT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+problems?\s+\((\d+)\s+errors?,\s+(\d+)\s+warnings?\)").unwrap()
});

static ESLINT_ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+:\d+\s+error").unwrap());

static COVERAGE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"All files\s*\|\s*(\d+(?:\.\d+)?)\s*%").unwrap());

static COVERAGE_PLAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)coverage[:\s]+(\d+(?:\.\d+)?)\s*%").unwrap());

static FIRST_INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());

/// Parse one metric's output into a 0-100 score.
pub fn parse_metric_output(metric: &Metric, outcome: &CommandOutcome) -> u32 {
    let output = outcome.combined();
    let family = metric.name.to_lowercase();

    let score = match family.as_str() {
        "tests" | "test" => parse_tests(&output, outcome.exit_code),
        "typescript" | "tsc" => parse_typescript(&output, outcome.exit_code),
        "lint" | "eslint" => parse_lint(&output, outcome.exit_code),
        "coverage" => parse_coverage(&output, outcome.exit_code),
        _ if !metric.higher_is_better || family == "codeduplication" => {
            parse_count(metric, &output)
        }
        _ => binary(outcome.exit_code),
    };

    score.min(100)
}

fn binary(exit_code: i32) -> u32 {
    if exit_code == 0 {
        100
    } else {
        0
    }
}

/// `N pass, M fail` ratio; "all passed" when only a pass count appears.
fn parse_tests(output: &str, exit_code: i32) -> u32 {
    let counts = PASS_FAIL
        .captures(output)
        .or_else(|| PASSED_FAILED.captures(output));

    if let Some(caps) = counts {
        let pass: u32 = caps[1].parse().unwrap_or(0);
        let fail: u32 = caps[2].parse().unwrap_or(0);
        let total = pass + fail;
        if total == 0 {
            return binary(exit_code);
        }
        return ((pass as f64 / total as f64) * 100.0).round() as u32;
    }

    if PASS_ONLY.is_match(output) && !FAIL_TOKEN.is_match(output) {
        return 100;
    }

    binary(exit_code)
}

/// Clean compile is 100; otherwise 5 points per `error TSxxxx:` line.
fn parse_typescript(output: &str, exit_code: i32) -> u32 {
    if exit_code == 0 {
        return 100;
    }
    let errors = TSC_ERROR.find_iter(output).count() as i64;
    (100 - 5 * errors).max(0) as u32
}

/// `N problems (E errors, W warnings)` summary; falls back to counting
/// `line:col  error` rows.
fn parse_lint(output: &str, exit_code: i32) -> u32 {
    if let Some(caps) = ESLINT_SUMMARY.captures(output) {
        let errors: i64 = caps[2].parse().unwrap_or(0);
        let warnings: i64 = caps[3].parse().unwrap_or(0);
        return (100 - 5 * errors - warnings).max(0) as u32;
    }

    let errors = ESLINT_ERROR_LINE.find_iter(output).count() as i64;
    if errors > 0 {
        return (100 - 5 * errors).max(0) as u32;
    }

    binary(exit_code)
}

/// Percentage from an istanbul-style table or a `coverage: NN%` line.
fn parse_coverage(output: &str, exit_code: i32) -> u32 {
    let pct = COVERAGE_TABLE
        .captures(output)
        .or_else(|| COVERAGE_PLAIN.captures(output))
        .and_then(|caps| caps[1].parse::<f64>().ok());

    match pct {
        Some(pct) => pct.round().clamp(0.0, 100.0) as u32,
        None => binary(exit_code),
    }
}

/// Inverted count metric: the command emits a count N and each unit costs
/// `penaltyPerUnit` points (default 1).
fn parse_count(metric: &Metric, output: &str) -> u32 {
    let count = FIRST_INTEGER
        .captures(output.trim())
        .and_then(|caps| caps[1].parse::<f64>().ok());

    match count {
        Some(n) => {
            let k = metric.penalty_per_unit.unwrap_or(1.0);
            (100.0 - k * n).max(0.0).round() as u32
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(output: &str, exit_code: i32) -> CommandOutcome {
        CommandOutcome {
            stdout: output.to_string(),
            stderr: String::new(),
            exit_code,
            timed_out: false,
        }
    }

    fn metric(name: &str) -> Metric {
        Metric::new(name, "true")
    }

    #[test]
    fn tests_pass_fail_ratio() {
        let m = metric("tests");
        assert_eq!(
            parse_metric_output(&m, &outcome("4 pass, 1 fail", 1)),
            80
        );
        assert_eq!(
            parse_metric_output(&m, &outcome("Tests: 9 passed, 1 failed, 10 total", 1)),
            90
        );
        // Counts spread across lines.
        assert_eq!(
            parse_metric_output(&m, &outcome("10 passing\n\n2 failing", 1)),
            83
        );
    }

    #[test]
    fn tests_all_passed_without_failure_token() {
        let m = metric("tests");
        assert_eq!(parse_metric_output(&m, &outcome("12 passed", 0)), 100);
        assert_eq!(parse_metric_output(&m, &outcome("5 pass", 1)), 100);
    }

    #[test]
    fn tests_binary_fallback() {
        let m = metric("test");
        assert_eq!(parse_metric_output(&m, &outcome("no counts here", 0)), 100);
        assert_eq!(parse_metric_output(&m, &outcome("no counts here", 1)), 0);
    }

    #[test]
    fn typescript_error_penalty() {
        let m = metric("typescript");
        assert_eq!(parse_metric_output(&m, &outcome("anything", 0)), 100);

        let errs = "src/a.ts(1,1): error TS2322: nope\nsrc/b.ts(2,2): error TS2345: nope";
        assert_eq!(parse_metric_output(&m, &outcome(errs, 2)), 90);

        let many = "error TS1:\n".repeat(25);
        assert_eq!(parse_metric_output(&metric("tsc"), &outcome(&many, 2)), 0);
    }

    #[test]
    fn lint_summary_and_fallback() {
        let m = metric("eslint");
        assert_eq!(
            parse_metric_output(&m, &outcome("12 problems (2 errors, 10 warnings)", 1)),
            80
        );
        assert_eq!(
            parse_metric_output(&m, &outcome("1 problem (1 error, 0 warnings)", 1)),
            95
        );
        assert_eq!(
            parse_metric_output(&m, &outcome("3:14  error  no-unused-vars", 1)),
            95
        );
        assert_eq!(parse_metric_output(&metric("lint"), &outcome("clean", 0)), 100);
    }

    #[test]
    fn coverage_table_and_plain() {
        let m = metric("coverage");
        assert_eq!(
            parse_metric_output(&m, &outcome("All files |  84.5 % | ...", 0)),
            85
        );
        assert_eq!(
            parse_metric_output(&m, &outcome("coverage: 72%", 0)),
            72
        );
        assert_eq!(parse_metric_output(&m, &outcome("nothing", 0)), 100);
    }

    #[test]
    fn inverted_count_metric() {
        let mut m = metric("codeDuplication");
        m.higher_is_better = false;
        assert_eq!(parse_metric_output(&m, &outcome("7\n", 0)), 93);

        m.penalty_per_unit = Some(5.0);
        assert_eq!(parse_metric_output(&m, &outcome("7", 0)), 65);
        assert_eq!(parse_metric_output(&m, &outcome("999", 0)), 0);
        assert_eq!(parse_metric_output(&m, &outcome("not a number", 0)), 0);
    }

    #[test]
    fn unknown_family_is_binary() {
        let m = metric("security-audit");
        assert_eq!(parse_metric_output(&m, &outcome("whatever", 0)), 100);
        assert_eq!(parse_metric_output(&m, &outcome("whatever", 2)), 0);
    }
}
