//! Report data model
//!
//! Structured results produced by the scenario runner and persisted by the
//! report sink. Human-readable output is derived from these records, never
//! the other way around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConsoleLevel, Outcome};

/// One captured browser console message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleRecord {
    pub level: ConsoleLevel,
    pub text: String,
    /// Milliseconds since evidence collection started; monotonic within a run.
    pub ts_ms: u64,
}

/// One uncaught page exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageErrorRecord {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub ts_ms: u64,
}

/// One failed network exchange (HTTP >= 400 or transport failure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// HTTP status, or 0 for a transport-level failure.
    pub status: u16,
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub ts_ms: u64,
}

/// Reference to a screenshot file written during the scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub label: String,
    pub path: String,
    pub full_page: bool,
    pub ts_ms: u64,
}

/// Accumulated observations for one scenario run.
///
/// Append-only while the scenario executes; the runner snapshots it into the
/// `ScenarioResult` when the scenario completes. Category buffers are bounded;
/// `evicted` counts records dropped once a cap was reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub console: Vec<ConsoleRecord>,
    pub page_errors: Vec<PageErrorRecord>,
    pub failed_requests: Vec<NetworkRecord>,
    pub screenshots: Vec<ScreenshotRecord>,
    /// Records evicted per category (console, page_errors, failed_requests).
    #[serde(default, skip_serializing_if = "EvictionCounts::is_zero")]
    pub evicted: EvictionCounts,
    /// Evidence-capture failures, recorded rather than swallowed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capture_failures: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvictionCounts {
    pub console: u64,
    pub page_errors: u64,
    pub failed_requests: u64,
}

impl EvictionCounts {
    pub fn is_zero(&self) -> bool {
        self.console == 0 && self.page_errors == 0 && self.failed_requests == 0
    }
}

/// Result of executing one scenario step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Human-readable step description, e.g. `click:[data-testid='rsvp']`.
    pub description: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    /// Stable error classifier (`timeout`, `assertion`, `invalid_credentials`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Value captured by the step (`evaluate` with `store_as`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured: Option<serde_json::Value>,
}

/// Outcome of one scenario execution. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub outcome: Outcome,
    pub steps: Vec<StepRecord>,
    pub evidence: EvidenceBundle,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// First distinguishing error, for the one-line CLI summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ScenarioResult {
    /// Steps that did not pass.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.outcome.is_pass())
    }
}

/// One line of the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub scenario: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated result of a whole run, persisted as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub duration_ms: u64,
    pub scenarios: Vec<SummaryLine>,
}

impl RunSummary {
    pub fn from_results(run_id: String, duration_ms: u64, results: &[ScenarioResult]) -> Self {
        let mut passed = 0;
        let mut failed = 0;
        let mut errored = 0;
        for r in results {
            match r.outcome {
                Outcome::Pass => passed += 1,
                Outcome::Fail => failed += 1,
                Outcome::Error => errored += 1,
            }
        }
        Self {
            run_id,
            total: results.len(),
            passed,
            failed,
            errored,
            duration_ms,
            scenarios: results
                .iter()
                .map(|r| SummaryLine {
                    scenario: r.scenario.clone(),
                    outcome: r.outcome,
                    duration_ms: r.duration_ms,
                    error: r.error.clone(),
                })
                .collect(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }
}
