//! Report sink
//!
//! Persists structured scenario results and screenshots under a predictable,
//! collision-free layout:
//!
//! ```text
//! test-results/<run-id>/<scenario>/report.json
//! test-results/<run-id>/<scenario>/screenshots/<label>.png
//! test-results/<run-id>/summary.json
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::info;
use webscout_common::report::{RunSummary, ScenarioResult};
use webscout_common::RunId;

use crate::error::HarnessResult;

/// Directories reserved for one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioPaths {
    pub dir: PathBuf,
    pub screenshots: PathBuf,
}

/// Append-safe sink for one run's results.
pub struct ReportSink {
    run_dir: PathBuf,
    run_id: RunId,
    reserved: Mutex<HashSet<String>>,
}

impl ReportSink {
    pub fn new(root: &Path, run_id: RunId) -> HarnessResult<Self> {
        let run_dir = root.join(run_id.as_str());
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self {
            run_dir,
            run_id,
            reserved: Mutex::new(HashSet::new()),
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Reserve a unique directory for a scenario.
    ///
    /// Two scenarios with the same name in one run get distinct suffixed
    /// directories rather than clobbering each other's evidence.
    pub fn prepare(&self, scenario_name: &str) -> HarnessResult<ScenarioPaths> {
        let base = sanitize_component(scenario_name);
        let unique = {
            let mut reserved = self.reserved.lock();
            let mut candidate = base.clone();
            let mut n = 1;
            while !reserved.insert(candidate.clone()) {
                n += 1;
                candidate = format!("{}-{}", base, n);
            }
            candidate
        };

        let dir = self.run_dir.join(unique);
        let screenshots = dir.join("screenshots");
        std::fs::create_dir_all(&screenshots)?;

        Ok(ScenarioPaths { dir, screenshots })
    }

    /// Serialize one scenario result into its reserved directory.
    pub fn write(&self, result: &ScenarioResult, paths: &ScenarioPaths) -> HarnessResult<PathBuf> {
        let path = paths.dir.join("report.json");
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Write the aggregated run summary.
    pub fn write_summary(&self, summary: &RunSummary) -> HarnessResult<PathBuf> {
        let path = self.run_dir.join("summary.json");
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(&path, json)?;
        info!("Run summary written to {}", path.display());
        Ok(path)
    }
}

fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "scenario".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use webscout_common::report::{EvidenceBundle, StepRecord};
    use webscout_common::Outcome;

    fn result(name: &str) -> ScenarioResult {
        let now = Utc::now();
        ScenarioResult {
            scenario: name.to_string(),
            outcome: Outcome::Pass,
            steps: vec![StepRecord {
                description: "navigate:/".to_string(),
                outcome: Outcome::Pass,
                duration_ms: 10,
                error_kind: None,
                error: None,
                captured: None,
            }],
            evidence: EvidenceBundle::default(),
            started_at: now,
            finished_at: now,
            duration_ms: 10,
            error: None,
            error_kind: None,
        }
    }

    #[test]
    fn writes_report_under_run_and_scenario_dirs() {
        let root = tempfile::tempdir().unwrap();
        let sink = ReportSink::new(root.path(), RunId::generate()).unwrap();

        let paths = sink.prepare("login-flow").unwrap();
        let original = result("login-flow");
        let report_path = sink.write(&original, &paths).unwrap();

        assert!(report_path.ends_with("login-flow/report.json"));
        assert!(paths.screenshots.is_dir());

        let raw = std::fs::read_to_string(&report_path).unwrap();
        let back: ScenarioResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn duplicate_names_get_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let sink = ReportSink::new(root.path(), RunId::generate()).unwrap();

        let first = sink.prepare("probe").unwrap();
        let second = sink.prepare("probe").unwrap();
        assert_ne!(first.dir, second.dir);

        sink.write(&result("probe"), &first).unwrap();
        sink.write(&result("probe"), &second).unwrap();
        assert!(first.dir.join("report.json").is_file());
        assert!(second.dir.join("report.json").is_file());
    }

    #[test]
    fn scenario_names_are_sanitized() {
        let root = tempfile::tempdir().unwrap();
        let sink = ReportSink::new(root.path(), RunId::generate()).unwrap();

        let paths = sink.prepare("ui vs api / capacity").unwrap();
        let component = paths.dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!component.contains('/'));
        assert!(!component.contains(' '));
    }

    #[test]
    fn summary_lands_at_run_root() {
        let root = tempfile::tempdir().unwrap();
        let sink = ReportSink::new(root.path(), RunId::generate()).unwrap();

        let results = vec![result("a"), result("b")];
        let summary = RunSummary::from_results(sink.run_id().to_string(), 99, &results);
        let path = sink.write_summary(&summary).unwrap();

        assert!(path.ends_with("summary.json"));
        let back: RunSummary = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back.total, 2);
        assert!(back.all_passed());
    }
}
