//! Wait-condition engine
//!
//! The one primitive behind every state-dependent check in the harness:
//! poll a probe until it reports ready, optionally require it to stay ready
//! across a stability window, and fail with a diagnosable timeout otherwise.
//! Replaces guessed fixed-duration sleeps everywhere.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{HarnessError, HarnessResult};

/// One probe observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// The condition holds; carries the observed value.
    Ready(T),
    /// Not yet; carries a description of what was observed instead,
    /// surfaced in the timeout error.
    NotYet(String),
}

/// Parameters for one wait.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Human-readable condition description, used in failure messages.
    pub description: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// When set, the probe must stay ready on every poll across this window.
    pub stable_for: Option<Duration>,
}

impl WaitOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(150),
            stable_for: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stable_for(mut self, window: Option<Duration>) -> Self {
        self.stable_for = window;
        self
    }
}

/// Poll `probe` until it holds, the deadline passes, or the token fires.
///
/// A probe error aborts the wait immediately — probes use this to surface
/// terminal states (e.g. a login error banner) without burning the budget.
/// Cancellation surfaces as [`HarnessError::Cancelled`], never as a timeout.
pub async fn wait_for<T, F, Fut>(
    opts: &WaitOptions,
    cancel: &CancellationToken,
    mut probe: F,
) -> HarnessResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<Probe<T>>>,
{
    let deadline = Instant::now() + opts.timeout;
    let mut last_observed = "nothing observed yet".to_string();
    let mut ready_since: Option<Instant> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled(opts.description.clone()));
        }

        let observation = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HarnessError::Cancelled(opts.description.clone()));
            }
            result = probe() => result?,
        };

        let now = Instant::now();
        match observation {
            Probe::Ready(value) => match opts.stable_for {
                None => return Ok(value),
                Some(window) => {
                    let since = *ready_since.get_or_insert(now);
                    let held = now.duration_since(since);
                    if held >= window {
                        return Ok(value);
                    }
                    last_observed = format!(
                        "condition held for {}ms of required {}ms",
                        held.as_millis(),
                        window.as_millis()
                    );
                }
            },
            Probe::NotYet(observed) => {
                // Any flicker restarts the stability window.
                ready_since = None;
                last_observed = observed;
            }
        }

        if now >= deadline {
            trace!("wait '{}' timed out: {}", opts.description, last_observed);
            return Err(HarnessError::Timeout {
                description: opts.description.clone(),
                last_observed,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HarnessError::Cancelled(opts.description.clone()));
            }
            _ = tokio::time::sleep_until(deadline.min(now + opts.poll_interval)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn opts(timeout_ms: u64, poll_ms: u64) -> WaitOptions {
        WaitOptions::new("test condition")
            .timeout(Duration::from_millis(timeout_ms))
            .poll_interval(Duration::from_millis(poll_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_success_returns_first_value() {
        let cancel = CancellationToken::new();
        let result = wait_for(&opts(1000, 100), &cancel, || async {
            Ok(Probe::Ready(7u32))
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_condition_becomes_true() {
        let cancel = CancellationToken::new();
        let polls = Arc::new(AtomicUsize::new(0));
        let polls2 = polls.clone();

        let result = wait_for(&opts(5000, 100), &cancel, move || {
            let polls = polls2.clone();
            async move {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                if n >= 3 {
                    Ok(Probe::Ready("loaded"))
                } else {
                    Ok(Probe::NotYet(format!("still empty (poll {})", n)))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "loaded");
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_description_and_last_observation() {
        let cancel = CancellationToken::new();
        let polls = Arc::new(AtomicUsize::new(0));
        let polls2 = polls.clone();

        let err = wait_for::<(), _, _>(&opts(1000, 250), &cancel, move || {
            let polls = polls2.clone();
            async move {
                polls.fetch_add(1, Ordering::SeqCst);
                Ok(Probe::NotYet("spinner still visible".to_string()))
            }
        })
        .await
        .unwrap_err();

        match err {
            HarnessError::Timeout {
                description,
                last_observed,
            } => {
                assert_eq!(description, "test condition");
                assert_eq!(last_observed, "spinner still visible");
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
        // no polling continues past the deadline: 1000/250 = 4 sleeps + initial
        assert!(polls.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn stable_for_rejects_flicker() {
        let cancel = CancellationToken::new();
        // true, true, false, then true forever: the early trues must not win
        let sequence = [true, true, false, true, true, true, true, true, true];
        let polls = Arc::new(AtomicUsize::new(0));
        let polls2 = polls.clone();

        let options = opts(5000, 100).stable_for(Some(Duration::from_millis(300)));
        wait_for(&options, &cancel, move || {
            let polls = polls2.clone();
            async move {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                let up = *sequence.get(n).unwrap_or(&true);
                if up {
                    Ok(Probe::Ready(n))
                } else {
                    Ok(Probe::NotYet("flickered off".to_string()))
                }
            }
        })
        .await
        .unwrap();

        // Window restarted at poll 3; needs polls 3..=6 to span 300ms.
        assert!(polls.load(Ordering::SeqCst) >= 7);
    }

    #[tokio::test(start_paused = true)]
    async fn stability_window_must_fit_inside_deadline() {
        let cancel = CancellationToken::new();
        let options = opts(500, 100).stable_for(Some(Duration::from_millis(2000)));

        let err = wait_for(&options, &cancel, || async { Ok(Probe::Ready(())) })
            .await
            .unwrap_err();

        match err {
            HarnessError::Timeout { last_observed, .. } => {
                assert!(last_observed.contains("required 2000ms"), "{}", last_observed);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_distinct_from_timeout() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            child.cancel();
        });

        let err = wait_for::<(), _, _>(&opts(60_000, 100), &cancel, || async {
            Ok(Probe::NotYet("waiting".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_abort_the_wait() {
        let cancel = CancellationToken::new();
        let err = wait_for::<(), _, _>(&opts(10_000, 100), &cancel, || async {
            Err(HarnessError::InvalidCredentials("error banner".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::InvalidCredentials(_)));
    }
}
