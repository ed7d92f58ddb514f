//! Evidence collection
//!
//! Subscribes to a page's event stream and accumulates console messages,
//! uncaught exceptions, and failed network exchanges into bounded,
//! append-only buffers owned by one scenario run. Screenshot capture goes
//! through here too, so capture failures are recorded instead of swallowed.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};
use webscout_browser::{Page, PageEvent};
use webscout_common::report::{
    ConsoleRecord, EvictionCounts, EvidenceBundle, NetworkRecord, PageErrorRecord,
    ScreenshotRecord,
};
use webscout_common::ConsoleLevel;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Default)]
struct Buffers {
    console: VecDeque<ConsoleRecord>,
    page_errors: VecDeque<PageErrorRecord>,
    failed_requests: VecDeque<NetworkRecord>,
    screenshots: Vec<ScreenshotRecord>,
    evicted: EvictionCounts,
    capture_failures: Vec<String>,
}

/// Live subscription handle; dropping it stops the drain task.
pub struct Attachment {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Collects evidence for exactly one scenario run.
pub struct EvidenceCollector {
    buffers: Arc<Mutex<Buffers>>,
    started: Instant,
    cap: usize,
    ignore_urls: Arc<Vec<Regex>>,
}

impl EvidenceCollector {
    /// `cap` bounds each event category; `ignore_url_patterns` suppresses
    /// failed responses whose URL is expected to fail (e.g. auth probes).
    pub fn new(cap: usize, ignore_url_patterns: &[String]) -> Self {
        let ignore_urls = ignore_url_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring bad URL filter pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            buffers: Arc::new(Mutex::new(Buffers::default())),
            started: Instant::now(),
            cap,
            ignore_urls: Arc::new(ignore_urls),
        }
    }

    /// Start draining the page's event stream into this collector.
    pub fn attach(&self, page: &Page) -> Attachment {
        let mut rx = page.subscribe();
        let buffers = self.buffers.clone();
        let started = self.started;
        let cap = self.cap;
        let ignore = self.ignore_urls.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let ts_ms = started.elapsed().as_millis() as u64;
                record(&buffers, cap, &ignore, event, ts_ms);
            }
        });

        Attachment { task }
    }

    /// Capture a screenshot into `dir` and reference it in the bundle.
    ///
    /// Failure is recorded in the bundle and returned; callers decide whether
    /// it halts the scenario.
    pub async fn take_screenshot(
        &self,
        page: &Page,
        label: &str,
        full_page: bool,
        dir: &Path,
    ) -> HarnessResult<PathBuf> {
        let result = self.try_screenshot(page, label, full_page, dir).await;
        if let Err(err) = &result {
            self.buffers
                .lock()
                .capture_failures
                .push(format!("screenshot '{}': {}", label, err));
        }
        result
    }

    async fn try_screenshot(
        &self,
        page: &Page,
        label: &str,
        full_page: bool,
        dir: &Path,
    ) -> HarnessResult<PathBuf> {
        let png = page
            .screenshot(full_page)
            .await
            .map_err(|e| HarnessError::Capture(e.to_string()))?;

        std::fs::create_dir_all(dir).map_err(|e| HarnessError::Capture(e.to_string()))?;
        let path = dir.join(format!("{}.png", sanitize_label(label)));
        std::fs::write(&path, &png).map_err(|e| HarnessError::Capture(e.to_string()))?;

        debug!("Captured screenshot '{}' -> {}", label, path.display());

        self.buffers.lock().screenshots.push(ScreenshotRecord {
            label: label.to_string(),
            path: path.to_string_lossy().into_owned(),
            full_page,
            ts_ms: self.started.elapsed().as_millis() as u64,
        });

        Ok(path)
    }

    /// Read-only copy of everything collected so far.
    pub fn snapshot(&self) -> EvidenceBundle {
        let buffers = self.buffers.lock();
        EvidenceBundle {
            console: buffers.console.iter().cloned().collect(),
            page_errors: buffers.page_errors.iter().cloned().collect(),
            failed_requests: buffers.failed_requests.iter().cloned().collect(),
            screenshots: buffers.screenshots.clone(),
            evicted: buffers.evicted,
            capture_failures: buffers.capture_failures.clone(),
        }
    }

    #[cfg(test)]
    fn record_now(&self, event: PageEvent, ts_ms: u64) {
        record(&self.buffers, self.cap, &self.ignore_urls, event, ts_ms);
    }
}

fn record(
    buffers: &Mutex<Buffers>,
    cap: usize,
    ignore: &[Regex],
    event: PageEvent,
    ts_ms: u64,
) {
    let mut guard = buffers.lock();
    let b = &mut *guard;
    match event {
        PageEvent::Console { level, text } => {
            push_bounded(
                &mut b.console,
                cap,
                ConsoleRecord {
                    level: ConsoleLevel::from_cdp(&level),
                    text,
                    ts_ms,
                },
                &mut b.evicted.console,
            );
        }
        PageEvent::Exception { text, url, line } => {
            push_bounded(
                &mut b.page_errors,
                cap,
                PageErrorRecord {
                    text,
                    url,
                    line,
                    ts_ms,
                },
                &mut b.evicted.page_errors,
            );
        }
        PageEvent::FailedResponse {
            status,
            method,
            url,
        } => {
            if ignore.iter().any(|re| re.is_match(&url)) {
                return;
            }
            push_bounded(
                &mut b.failed_requests,
                cap,
                NetworkRecord {
                    status,
                    method,
                    url,
                    failure: None,
                    ts_ms,
                },
                &mut b.evicted.failed_requests,
            );
        }
        PageEvent::RequestFailed { method, url, error } => {
            if ignore.iter().any(|re| re.is_match(&url)) {
                return;
            }
            push_bounded(
                &mut b.failed_requests,
                cap,
                NetworkRecord {
                    status: 0,
                    method,
                    url,
                    failure: Some(error),
                    ts_ms,
                },
                &mut b.evicted.failed_requests,
            );
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, cap: usize, item: T, evicted: &mut u64) {
    if cap > 0 && queue.len() >= cap {
        queue.pop_front();
        *evicted += 1;
    }
    queue.push_back(item);
}

/// Screenshot labels become file names; keep them filesystem-safe.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
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
        "capture".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console(text: &str) -> PageEvent {
        PageEvent::Console {
            level: "log".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn preserves_order_within_category() {
        let collector = EvidenceCollector::new(16, &[]);
        collector.record_now(console("first"), 1);
        collector.record_now(console("second"), 2);
        collector.record_now(console("third"), 3);

        let bundle = collector.snapshot();
        let texts: Vec<_> = bundle.console.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn ring_buffer_evicts_oldest_and_counts() {
        let collector = EvidenceCollector::new(3, &[]);
        for i in 0..5 {
            collector.record_now(console(&format!("msg{}", i)), i);
        }

        let bundle = collector.snapshot();
        assert_eq!(bundle.console.len(), 3);
        assert_eq!(bundle.console[0].text, "msg2");
        assert_eq!(bundle.evicted.console, 2);
    }

    #[test]
    fn ignore_patterns_suppress_expected_failures() {
        let collector = EvidenceCollector::new(16, &["/api/auth/check".to_string()]);
        collector.record_now(
            PageEvent::FailedResponse {
                status: 401,
                method: "GET".to_string(),
                url: "http://t/api/auth/check".to_string(),
            },
            1,
        );
        collector.record_now(
            PageEvent::FailedResponse {
                status: 500,
                method: "GET".to_string(),
                url: "http://t/api/events".to_string(),
            },
            2,
        );

        let bundle = collector.snapshot();
        assert_eq!(bundle.failed_requests.len(), 1);
        assert_eq!(bundle.failed_requests[0].url, "http://t/api/events");
    }

    #[test]
    fn snapshot_is_a_point_in_time_copy() {
        let collector = EvidenceCollector::new(16, &[]);
        collector.record_now(console("before"), 1);
        let snapshot = collector.snapshot();
        collector.record_now(console("after"), 2);

        assert_eq!(snapshot.console.len(), 1);
        assert_eq!(collector.snapshot().console.len(), 2);
    }

    #[test]
    fn transport_failures_record_zero_status() {
        let collector = EvidenceCollector::new(16, &[]);
        collector.record_now(
            PageEvent::RequestFailed {
                method: "GET".to_string(),
                url: "http://t/ws".to_string(),
                error: "net::ERR_ABORTED".to_string(),
            },
            9,
        );

        let bundle = collector.snapshot();
        assert_eq!(bundle.failed_requests[0].status, 0);
        assert_eq!(
            bundle.failed_requests[0].failure.as_deref(),
            Some("net::ERR_ABORTED")
        );
    }

    #[test]
    fn labels_are_sanitized_for_the_filesystem() {
        assert_eq!(sanitize_label("final state/2"), "final-state-2");
        assert_eq!(sanitize_label("…"), "-");
        assert_eq!(sanitize_label(""), "capture");
    }
}
