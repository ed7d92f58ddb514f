//! Scenario runner
//!
//! Drives one page through a scenario's steps strictly in order, halting on
//! the first failure, and always finalizes with a last screenshot plus an
//! evidence snapshot so failed runs are as diagnosable as passing ones.
//! Scenarios fan out concurrently across tabs, bounded by a semaphore and a
//! run-level deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webscout_browser::{CdpClient, CdpError, Page};
use webscout_common::report::{RunSummary, ScenarioResult, StepRecord};
use webscout_common::{HarnessConfig, Outcome, Role};

use crate::auth::SessionFixture;
use crate::error::{HarnessError, HarnessResult};
use crate::evidence::EvidenceCollector;
use crate::report::{ReportSink, ScenarioPaths};
use crate::scenario::{ApiCheck, Check, Condition, ScenarioSpec, Step, WaitState};
use crate::visual::VisualTester;
use crate::wait::{wait_for, Probe, WaitOptions};

/// Extra headroom for the outer step deadline so the richer wait-engine
/// timeout (with its last-observed state) wins the race against it.
const STEP_DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// Executes scenarios against one browser endpoint.
pub struct ScenarioRunner {
    client: Arc<CdpClient>,
    config: Arc<HarnessConfig>,
    fixture: Arc<SessionFixture>,
    visual: Option<VisualTester>,
    http: reqwest::Client,
    cancel: CancellationToken,
}

impl ScenarioRunner {
    pub fn new(client: Arc<CdpClient>, config: Arc<HarnessConfig>) -> Self {
        let cancel = CancellationToken::new();
        let fixture = Arc::new(SessionFixture::new(
            client.clone(),
            config.clone(),
            cancel.child_token(),
        ));
        Self {
            client,
            config,
            fixture,
            visual: None,
            http: reqwest::Client::new(),
            cancel,
        }
    }

    /// Enable visual baseline comparison for `capture` steps.
    pub fn with_visual(mut self, tester: VisualTester) -> Self {
        self.visual = Some(tester);
        self
    }

    /// Token that aborts every outstanding scenario when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn fixture(&self) -> &Arc<SessionFixture> {
        &self.fixture
    }

    /// Run scenarios concurrently, persisting each result as it completes so
    /// a run-level abort still leaves partial results on disk.
    pub async fn run_many(
        self: Arc<Self>,
        specs: Vec<ScenarioSpec>,
        sink: Arc<ReportSink>,
    ) -> HarnessResult<RunSummary> {
        let started = Instant::now();
        info!("Running {} scenario(s)...", specs.len());

        if let Some(run_timeout) = self.config.run_timeout {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(run_timeout).await;
                warn!("Run deadline reached, cancelling outstanding scenarios");
                cancel.cancel();
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for spec in specs {
            let runner = self.clone();
            let sink = sink.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();

                let paths = match sink.prepare(&spec.name) {
                    Ok(paths) => paths,
                    Err(e) => return infra_failure_result(&spec.name, &e),
                };

                let result = runner.run(&spec, &paths).await;
                if let Err(e) = sink.write(&result, &paths) {
                    warn!("Failed to persist result for '{}': {}", spec.name, e);
                }
                result
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    match result.outcome {
                        Outcome::Pass => {
                            info!("✓ {} ({} ms)", result.scenario, result.duration_ms)
                        }
                        _ => error!(
                            "✗ {} - {}",
                            result.scenario,
                            result.error.as_deref().unwrap_or("unknown error")
                        ),
                    }
                    results.push(result);
                }
                Err(e) => warn!("Scenario task aborted: {}", e),
            }
        }

        let summary = RunSummary::from_results(
            sink.run_id().to_string(),
            started.elapsed().as_millis() as u64,
            &results,
        );
        sink.write_summary(&summary)?;

        info!(
            "Results: {} passed, {} failed, {} errored ({} ms)",
            summary.passed, summary.failed, summary.errored, summary.duration_ms
        );
        Ok(summary)
    }

    /// Run a single scenario on a fresh page.
    pub async fn run(&self, spec: &ScenarioSpec, paths: &ScenarioPaths) -> ScenarioResult {
        let started_at = Utc::now();
        let t0 = Instant::now();
        debug!("Running scenario '{}'", spec.name);

        let page = match self.client.open_page(None).await {
            Ok(page) => page,
            Err(e) => {
                return infra_failure_result(&spec.name, &HarnessError::from(e));
            }
        };

        let collector = EvidenceCollector::new(
            self.config.evidence_cap,
            &self.config.ignore_url_patterns,
        );
        let attachment = collector.attach(&page);

        let scenario_budget = spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.scenario_timeout);
        let deadline = Instant::now() + scenario_budget;
        let cancel = self.cancel.child_token();

        let mut steps = Vec::with_capacity(spec.steps.len());
        let mut failure: Option<HarnessError> = None;
        let mut current_role: Option<Role> = None;

        for step in &spec.steps {
            let description = step.describe();

            if cancel.is_cancelled() {
                let err = HarnessError::Cancelled("run aborted".to_string());
                steps.push(step_record(&description, 0, Err(&err)));
                failure = Some(err);
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let err = HarnessError::Timeout {
                    description: format!("scenario '{}' deadline", spec.name),
                    last_observed: format!("about to run {}", description),
                };
                steps.push(step_record(&description, 0, Err(&err)));
                failure = Some(err);
                break;
            }

            let step_started = Instant::now();
            let outcome = self
                .execute_step(&page, &collector, paths, step, &mut current_role, remaining, &cancel)
                .await;
            let duration_ms = step_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(captured) => {
                    let mut record = step_record(&description, duration_ms, Ok(()));
                    record.captured = captured;
                    steps.push(record);
                }
                Err(err) => {
                    steps.push(step_record(&description, duration_ms, Err(&err)));
                    failure = Some(err);
                    break;
                }
            }
        }

        // Evidence is always finalized, pass or fail; a failing capture is
        // recorded in the bundle without masking the scenario's own error.
        if let Err(e) = collector
            .take_screenshot(&page, "final-state", false, &paths.screenshots)
            .await
        {
            warn!("Final-state capture for '{}' failed: {}", spec.name, e);
        }
        let evidence = collector.snapshot();
        drop(attachment);

        if let Err(e) = self.client.close_page(page).await {
            debug!("Failed to close page for '{}': {}", spec.name, e);
        }

        let outcome = match &failure {
            None => Outcome::Pass,
            Some(err) if err.is_expectation_failure() => Outcome::Fail,
            Some(_) => Outcome::Error,
        };

        ScenarioResult {
            scenario: spec.name.clone(),
            outcome,
            steps,
            evidence,
            started_at,
            finished_at: Utc::now(),
            duration_ms: t0.elapsed().as_millis() as u64,
            error: failure.as_ref().map(|e| e.to_string()),
            error_kind: failure.as_ref().map(|e| e.kind().to_string()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        page: &Page,
        collector: &EvidenceCollector,
        paths: &ScenarioPaths,
        step: &Step,
        current_role: &mut Option<Role>,
        remaining: Duration,
        cancel: &CancellationToken,
    ) -> HarnessResult<Option<Value>> {
        let step_budget = step_timeout(step)
            .unwrap_or(self.config.step_timeout)
            .min(remaining);

        let work = self.dispatch_step(page, collector, paths, step, current_role, step_budget, cancel);

        match tokio::time::timeout(step_budget + STEP_DEADLINE_GRACE, work).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::Timeout {
                description: step.describe(),
                last_observed: "step deadline exceeded".to_string(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_step(
        &self,
        page: &Page,
        collector: &EvidenceCollector,
        paths: &ScenarioPaths,
        step: &Step,
        current_role: &mut Option<Role>,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> HarnessResult<Option<Value>> {
        match step {
            Step::Navigate {
                url,
                wait_for_selector,
            } => {
                let target = self.config.resolve_url(url);
                page.navigate(&target).await.map_err(|e| match e {
                    CdpError::NavigationFailed(msg) => HarnessError::Navigation(msg),
                    other => HarnessError::from(other),
                })?;

                if let Some(selector) = wait_for_selector {
                    self.wait_for_visible(page, selector, budget, None, cancel)
                        .await?;
                }
                Ok(None)
            }

            Step::AuthenticateAs { role } => {
                if !role.requires_login() {
                    page.clear_cookies().await?;
                    *current_role = None;
                } else {
                    let session = self.fixture.session(*role).await?;
                    session.apply(page).await?;
                    *current_role = Some(*role);
                }

                // Reload so a page already on the target renders with the
                // new identity.
                let url = page.current_url().await?;
                if url.starts_with(&self.config.base_url) {
                    page.reload().await?;
                }
                Ok(None)
            }

            Step::Logout => {
                let role = current_role.take().ok_or_else(|| {
                    HarnessError::SpecInvalid("logout before authenticate_as".to_string())
                })?;
                self.fixture.logout(page, role).await?;
                Ok(None)
            }

            Step::Click {
                selector,
                wait_for_selector,
                timeout_ms: _,
            } => {
                page.click_selector(selector).await?;
                // An act step must not silently continue when its expected
                // post-state never appears.
                if let Some(expected) = wait_for_selector {
                    self.wait_for_visible(page, expected, budget, None, cancel)
                        .await?;
                }
                Ok(None)
            }

            Step::Fill { selector, value } => {
                page.fill(selector, value).await?;
                Ok(None)
            }

            Step::Press { key } => {
                page.press_key(key).await?;
                Ok(None)
            }

            Step::Evaluate { script, store_as } => {
                let value = page.evaluate(script).await?;
                Ok(store_as.as_ref().map(|_| value))
            }

            Step::Wait {
                condition,
                timeout_ms: _,
                stable_for_ms,
            } => {
                let opts = WaitOptions::new(condition.describe())
                    .timeout(budget)
                    .poll_interval(self.config.poll_interval)
                    .stable_for(stable_for_ms.map(Duration::from_millis));
                wait_for(&opts, cancel, || probe_condition(page, condition)).await?;
                Ok(None)
            }

            Step::Assert {
                check,
                timeout_ms: _,
                stable_for_ms,
            } => {
                self.run_assert(page, check, budget, *stable_for_ms, cancel)
                    .await
            }

            Step::Capture {
                label,
                full_page,
                baseline,
            } => {
                let shot = collector
                    .take_screenshot(page, label, *full_page, &paths.screenshots)
                    .await?;

                if *baseline {
                    match &self.visual {
                        Some(tester) => match tester.compare(&shot, label) {
                            Ok(_) => {}
                            Err(HarnessError::BaselineMissing(_)) => {
                                info!(
                                    "No baseline for '{}' yet; rerun with --update-baselines to adopt it",
                                    label
                                );
                            }
                            Err(other) => return Err(other),
                        },
                        None => debug!("Baseline requested for '{}' but no baseline dir configured", label),
                    }
                }
                Ok(None)
            }
        }
    }

    /// Assert step: wait for the checked state, mapping a timeout into an
    /// assertion failure that carries the last observation.
    async fn run_assert(
        &self,
        page: &Page,
        check: &Check,
        budget: Duration,
        stable_for_ms: Option<u64>,
        cancel: &CancellationToken,
    ) -> HarnessResult<Option<Value>> {
        let expected = describe_expectations(check);

        // DOM-vs-API cross-check: settle the element first, then compare a
        // single observation of both surfaces.
        if let Some(api) = &check.api {
            let selector = check.selector.as_deref().ok_or_else(|| {
                HarnessError::SpecInvalid("api cross-check needs a selector".to_string())
            })?;
            self.wait_for_visible(page, selector, budget, stable_for_ms, cancel)
                .await
                .map_err(|e| assertion_from_timeout(e, &expected))?;

            let api_value = self.fetch_api_value(api).await?;
            let ui_value = page
                .element_text(selector)
                .await?
                .unwrap_or_default()
                .trim()
                .to_string();

            if !values_match(&api_value, &ui_value) {
                return Err(HarnessError::Assertion {
                    description: format!("UI matches API value from {}", api.path),
                    expected: format!("api={}", api_value),
                    actual: format!("ui={}", ui_value),
                });
            }
            return Ok(Some(serde_json::json!({ "api": api_value, "ui": ui_value })));
        }

        let opts = WaitOptions::new(check.describe())
            .timeout(budget)
            .poll_interval(self.config.poll_interval)
            .stable_for(stable_for_ms.map(Duration::from_millis));

        wait_for(&opts, cancel, || probe_check(page, check))
            .await
            .map_err(|e| assertion_from_timeout(e, &expected))?;
        Ok(None)
    }

    async fn wait_for_visible(
        &self,
        page: &Page,
        selector: &str,
        budget: Duration,
        stable_for_ms: Option<u64>,
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        let condition = Condition {
            selector: Some(selector.to_string()),
            state: WaitState::Visible,
            url_contains: None,
        };
        let opts = WaitOptions::new(condition.describe())
            .timeout(budget)
            .poll_interval(self.config.poll_interval)
            .stable_for(stable_for_ms.map(Duration::from_millis));
        wait_for(&opts, cancel, || probe_condition(page, &condition)).await
    }

    /// Fetch and extract the API side of a cross-check.
    async fn fetch_api_value(&self, api: &ApiCheck) -> HarnessResult<String> {
        let url = self.config.resolve_api_url(&api.path);
        let body: Value = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match body.pointer(&api.pointer) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(HarnessError::Assertion {
                description: format!("API response from {}", api.path),
                expected: format!("value at pointer {}", api.pointer),
                actual: "pointer not present in response".to_string(),
            }),
        }
    }
}

/// JavaScript evaluation fails while a navigation tears down the execution
/// context; probes treat that as "not yet" rather than a hard failure.
macro_rules! probe_try {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(CdpError::JavaScript(_)) => {
                return Ok(Probe::NotYet("execution context unavailable".to_string()))
            }
            Err(e) => return Err(e.into()),
        }
    };
}

/// One observation of a wait condition.
async fn probe_condition(page: &Page, condition: &Condition) -> HarnessResult<Probe<()>> {
    if let Some(selector) = &condition.selector {
        let visible = probe_try!(page.is_visible(selector).await);
        let satisfied = match condition.state {
            WaitState::Visible => visible,
            WaitState::Hidden => !visible,
        };
        if !satisfied {
            return Ok(Probe::NotYet(format!(
                "{} is {}",
                selector,
                if visible { "visible" } else { "not visible" }
            )));
        }
    }

    if let Some(fragment) = &condition.url_contains {
        let url = probe_try!(page.current_url().await);
        if !url.contains(fragment) {
            return Ok(Probe::NotYet(format!("url is {}", url)));
        }
    }

    Ok(Probe::Ready(()))
}

/// One observation of an assert check (everything except the API side).
async fn probe_check(page: &Page, check: &Check) -> HarnessResult<Probe<()>> {
    if let Some(fragment) = &check.url_contains {
        let url = probe_try!(page.current_url().await);
        if !url.contains(fragment) {
            return Ok(Probe::NotYet(format!("url is {}", url)));
        }
    }

    let Some(selector) = &check.selector else {
        return Ok(Probe::Ready(()));
    };

    let mut element_checked = false;

    if let Some(expected_visible) = check.visible {
        element_checked = true;
        let visible = probe_try!(page.is_visible(selector).await);
        if visible != expected_visible {
            return Ok(Probe::NotYet(format!(
                "{} visibility is {}",
                selector, visible
            )));
        }
    }

    if let Some(expected) = &check.text {
        element_checked = true;
        match probe_try!(page.element_text(selector).await) {
            Some(text) if text.trim() == expected.trim() => {}
            Some(text) => return Ok(Probe::NotYet(format!("text is {:?}", text))),
            None => return Ok(Probe::NotYet(format!("{} not in DOM", selector))),
        }
    }

    if let Some(fragment) = &check.text_contains {
        element_checked = true;
        match probe_try!(page.element_text(selector).await) {
            Some(text) if text.contains(fragment) => {}
            Some(text) => return Ok(Probe::NotYet(format!("text is {:?}", text))),
            None => return Ok(Probe::NotYet(format!("{} not in DOM", selector))),
        }
    }

    if let Some(expected) = check.count {
        element_checked = true;
        let count = probe_try!(page.element_count(selector).await);
        if count != expected {
            return Ok(Probe::NotYet(format!("count is {}", count)));
        }
    }

    // A bare selector asserts presence.
    if !element_checked {
        let visible = probe_try!(page.is_visible(selector).await);
        if !visible {
            return Ok(Probe::NotYet(format!("{} not visible", selector)));
        }
    }

    Ok(Probe::Ready(()))
}

fn assertion_from_timeout(err: HarnessError, expected: &str) -> HarnessError {
    match err {
        HarnessError::Timeout {
            description,
            last_observed,
        } => HarnessError::Assertion {
            description,
            expected: expected.to_string(),
            actual: last_observed,
        },
        other => other,
    }
}

fn describe_expectations(check: &Check) -> String {
    let mut parts = Vec::new();
    if let Some(v) = check.visible {
        parts.push(format!("visible={}", v));
    }
    if let Some(t) = &check.text {
        parts.push(format!("text={:?}", t));
    }
    if let Some(t) = &check.text_contains {
        parts.push(format!("text~{:?}", t));
    }
    if let Some(c) = check.count {
        parts.push(format!("count={}", c));
    }
    if let Some(u) = &check.url_contains {
        parts.push(format!("url~{:?}", u));
    }
    if let Some(api) = &check.api {
        parts.push(format!("matches api {}", api.path));
    }
    if parts.is_empty() {
        parts.push("present".to_string());
    }
    parts.join(", ")
}

/// DOM text is stringly; tolerate an API number rendered with surrounding
/// text (e.g. "42 / 50 spots") by accepting containment for short values.
fn values_match(api_value: &str, ui_value: &str) -> bool {
    let api = api_value.trim();
    let ui = ui_value.trim();
    if api.is_empty() {
        return false;
    }
    api == ui || ui.contains(api)
}

fn step_timeout(step: &Step) -> Option<Duration> {
    let ms = match step {
        Step::Click { timeout_ms, .. } => *timeout_ms,
        Step::Wait { timeout_ms, .. } => *timeout_ms,
        Step::Assert { timeout_ms, .. } => *timeout_ms,
        _ => None,
    };
    ms.map(Duration::from_millis)
}

fn step_record(description: &str, duration_ms: u64, result: Result<(), &HarnessError>) -> StepRecord {
    match result {
        Ok(()) => StepRecord {
            description: description.to_string(),
            outcome: Outcome::Pass,
            duration_ms,
            error_kind: None,
            error: None,
            captured: None,
        },
        Err(err) => StepRecord {
            description: description.to_string(),
            outcome: if err.is_expectation_failure() {
                Outcome::Fail
            } else {
                Outcome::Error
            },
            duration_ms,
            error_kind: Some(err.kind().to_string()),
            error: Some(err.to_string()),
            captured: None,
        },
    }
}

/// Result shell for scenarios that failed before a page existed.
fn infra_failure_result(name: &str, err: &HarnessError) -> ScenarioResult {
    let now = Utc::now();
    ScenarioResult {
        scenario: name.to_string(),
        outcome: Outcome::Error,
        steps: Vec::new(),
        evidence: Default::default(),
        started_at: now,
        finished_at: now,
        duration_ms: 0,
        error: Some(err.to_string()),
        error_kind: Some(err.kind().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_become_assertions_with_last_observation() {
        let err = assertion_from_timeout(
            HarnessError::Timeout {
                description: "[data-testid='x']".to_string(),
                last_observed: "count is 2".to_string(),
            },
            "count=3",
        );
        match err {
            HarnessError::Assertion {
                expected, actual, ..
            } => {
                assert_eq!(expected, "count=3");
                assert_eq!(actual, "count is 2");
            }
            other => panic!("expected Assertion, got {:?}", other),
        }
        assert!(matches!(
            assertion_from_timeout(HarnessError::Cancelled("x".to_string()), "y"),
            HarnessError::Cancelled(_)
        ));
    }

    #[test]
    fn step_records_classify_fail_vs_error() {
        let assertion = HarnessError::Assertion {
            description: "x".to_string(),
            expected: "a".to_string(),
            actual: "b".to_string(),
        };
        let record = step_record("assert:x", 5, Err(&assertion));
        assert_eq!(record.outcome, Outcome::Fail);
        assert_eq!(record.error_kind.as_deref(), Some("assertion"));

        let nav = HarnessError::Navigation("unreachable".to_string());
        let record = step_record("navigate:/", 5, Err(&nav));
        assert_eq!(record.outcome, Outcome::Error);
        assert_eq!(record.error_kind.as_deref(), Some("navigation"));

        let ok = step_record("fill:#email", 2, Ok(()));
        assert_eq!(ok.outcome, Outcome::Pass);
        assert!(ok.error.is_none());
    }

    #[test]
    fn ui_values_tolerate_surrounding_text() {
        assert!(values_match("42", "42"));
        assert!(values_match("42", "42 / 50 spots"));
        assert!(!values_match("42", "41 / 50 spots"));
        assert!(!values_match("", ""));
        assert!(values_match("Rope Lab", "  Rope Lab  "));
    }

    #[test]
    fn expectation_summary_lists_requested_checks() {
        let check = Check {
            selector: Some("#cap".to_string()),
            visible: Some(true),
            count: Some(3),
            ..Default::default()
        };
        let summary = describe_expectations(&check);
        assert!(summary.contains("visible=true"));
        assert!(summary.contains("count=3"));

        let bare = Check {
            selector: Some("#cap".to_string()),
            ..Default::default()
        };
        assert_eq!(describe_expectations(&bare), "present");
    }

    #[test]
    fn scenario_deadline_is_preserved_in_records() {
        let err = HarnessError::Timeout {
            description: "scenario 'x' deadline".to_string(),
            last_observed: "about to run click:#go".to_string(),
        };
        let record = step_record("click:#go", 0, Err(&err));
        assert_eq!(record.outcome, Outcome::Fail);
        assert_eq!(record.error_kind.as_deref(), Some("timeout"));
    }
}
