use crate::case::Verdict;
use crate::runner::RunResult;
use serde::Serialize;
use std::fmt::Write;

/// Aggregate of a whole invocation. Built from the per-run results; nothing
/// is counted globally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Cases whose verdict differs from the verdict they declared.
    pub unexpected: usize,
    pub results: Vec<RunResult>,
}

impl Summary {
    pub fn from_results(results: Vec<RunResult>) -> Self {
        let passed = results
            .iter()
            .filter(|r| r.verdict == Verdict::Passed)
            .count();
        let unexpected = results.iter().filter(|r| !r.as_expected()).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            unexpected,
            results,
        }
    }

    /// Every case reached its expected verdict.
    pub fn success(&self) -> bool {
        self.unexpected == 0
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            let tag = match result.verdict {
                Verdict::Passed => "PASS",
                Verdict::Failed => "FAIL",
            };
            let note = if !result.as_expected() {
                format!(" UNEXPECTED (expected {})", result.expected)
            } else if result.verdict == Verdict::Failed {
                " (expected)".to_string()
            } else {
                String::new()
            };
            let _ = writeln!(
                out,
                "[{tag}] {} ({} steps){note}",
                result.case_id,
                result.steps.len()
            );

            if let Some(err) = &result.fixture_error {
                let _ = writeln!(out, "    fixture: {err}");
            }
            for v in &result.violations {
                let _ = writeln!(
                    out,
                    "    step {} {}: expected {}, observed {} [{}]",
                    v.step,
                    v.op,
                    v.expected,
                    v.observed,
                    &v.fingerprint[..8.min(v.fingerprint.len())]
                );
            }
            if let Some(step) = result.aborted_at {
                let _ = writeln!(out, "    stopped after step {step}");
            }
            for capture in &result.captures {
                let _ = writeln!(
                    out,
                    "    captured {}: {} bytes md5 {}",
                    capture.fixture, capture.len, capture.md5
                );
            }
            for err in result.teardown.errors.iter().chain(&result.observer_errors) {
                let _ = writeln!(out, "    warning: {err}");
            }
            if !result.leaks.is_empty() {
                let _ = writeln!(out, "    LEAK: {}", result.leaks.join(", "));
            }
        }
        let _ = writeln!(
            out,
            "TOTAL: {} cases, {} passed, {} failed, {} unexpected",
            self.total, self.passed, self.failed, self.unexpected
        );
        out
    }

    pub fn render_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
