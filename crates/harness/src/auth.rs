//! Auth session fixture
//!
//! Logs a browser identity in once per role per run and hands the captured
//! cookie state to every scenario that asks for that role. Concurrent
//! requests for the same role coalesce onto a single in-flight login; the
//! cache invalidates on logout, expiry, or request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webscout_browser::{CdpClient, CdpCookie, CdpError, Page};
use webscout_common::{HarnessConfig, Role};

use crate::error::{HarnessError, HarnessResult};
use crate::wait::{wait_for, Probe, WaitOptions};

/// A cached, authenticated browser identity for one role.
///
/// Carries cookie state rather than a live tab so concurrent scenarios can
/// share one login without sharing mutable page state.
#[derive(Debug, Clone)]
pub struct Session {
    role: Role,
    cookies: Vec<CdpCookie>,
    authenticated_at: Instant,
    ttl: Duration,
}

impl Session {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn expired(&self) -> bool {
        self.authenticated_at.elapsed() >= self.ttl
    }

    /// Install this session's cookies into a scenario's page.
    pub async fn apply(&self, page: &Page) -> HarnessResult<()> {
        page.set_cookies(&self.cookies).await?;
        Ok(())
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<Session>>>>;

/// Per-run session cache with per-role login coalescing.
pub struct SessionFixture {
    client: Arc<CdpClient>,
    config: Arc<HarnessConfig>,
    slots: parking_lot::Mutex<HashMap<Role, Slot>>,
    cancel: CancellationToken,
}

impl SessionFixture {
    pub fn new(
        client: Arc<CdpClient>,
        config: Arc<HarnessConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            slots: parking_lot::Mutex::new(HashMap::new()),
            cancel,
        }
    }

    fn slot(&self, role: Role) -> Slot {
        self.slots.lock().entry(role).or_default().clone()
    }

    /// Authenticated session for `role`, logging in at most once even under
    /// concurrent callers.
    pub async fn session(&self, role: Role) -> HarnessResult<Arc<Session>> {
        if !role.requires_login() {
            return Err(HarnessError::SpecInvalid(
                "anonymous scenarios do not use the session fixture".to_string(),
            ));
        }

        let slot = self.slot(role);
        // Holding the slot lock serializes login for this role; waiters see
        // the cached session the winner installed.
        let mut guard = slot.lock().await;

        if let Some(session) = guard.as_ref() {
            if !session.expired() {
                debug!("Reusing cached {} session", role);
                return Ok(session.clone());
            }
            debug!("Cached {} session expired, re-authenticating", role);
        }

        let session = Arc::new(self.login(role).await?);
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session so the next request re-authenticates.
    pub async fn invalidate(&self, role: Role) {
        let slot = self.slot(role);
        *slot.lock().await = None;
        debug!("Invalidated {} session", role);
    }

    /// Drive the UI logout on `page`, confirm the anonymous marker, and
    /// invalidate the cache entry.
    pub async fn logout(&self, page: &Page, role: Role) -> HarnessResult<()> {
        let selectors = &self.config.profile.selectors;
        page.click_selector(&selectors.logout_control).await?;

        let marker = selectors.anonymous_marker.clone();
        let opts = WaitOptions::new("anonymous marker after logout")
            .timeout(self.config.step_timeout)
            .poll_interval(self.config.poll_interval);
        wait_for(&opts, &self.cancel, || {
            let marker = marker.clone();
            async move {
                match page.is_visible(&marker).await {
                    Ok(true) => Ok(Probe::Ready(())),
                    Ok(false) => {
                        let url = page.current_url().await.unwrap_or_default();
                        Ok(Probe::NotYet(format!("still authenticated at {}", url)))
                    }
                    // Logout navigations tear the execution context down
                    Err(CdpError::JavaScript(_)) => {
                        Ok(Probe::NotYet("page navigating".to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await?;

        self.invalidate(role).await;
        info!("Logged out {} session", role);
        Ok(())
    }

    /// Full login flow on a scratch page: navigate, fill, submit, confirm.
    async fn login(&self, role: Role) -> HarnessResult<Session> {
        let creds = self.config.credentials_for(role)?.clone();
        let login_url = self.config.resolve_url(&self.config.profile.paths.login);
        let selectors = self.config.profile.selectors.clone();

        info!("Logging in as {} via {}", role, login_url);

        let page = self.client.open_page(None).await?;
        let result = self
            .login_on_page(&page, role, &login_url, &selectors, &creds)
            .await;

        // The scratch page served only to mint cookies.
        if let Err(e) = self.client.close_page(page).await {
            debug!("Failed to close login page: {}", e);
        }

        result
    }

    async fn login_on_page(
        &self,
        page: &Page,
        role: Role,
        login_url: &str,
        selectors: &webscout_common::config::SelectorSet,
        creds: &webscout_common::RoleCredentials,
    ) -> HarnessResult<Session> {
        page.navigate(login_url).await.map_err(|e| match e {
            CdpError::NavigationFailed(msg) => HarnessError::Navigation(msg),
            other => HarnessError::from(other),
        })?;

        // The form itself must render before we type into it.
        let form_opts = WaitOptions::new("login form")
            .timeout(self.config.step_timeout)
            .poll_interval(self.config.poll_interval);
        let username_sel = selectors.username_input.clone();
        wait_for(&form_opts, &self.cancel, || {
            let sel = username_sel.clone();
            async move {
                if page.is_visible(&sel).await? {
                    Ok(Probe::Ready(()))
                } else {
                    Ok(Probe::NotYet("login form not rendered".to_string()))
                }
            }
        })
        .await
        .map_err(|e| match e {
            HarnessError::Timeout { .. } => {
                HarnessError::Navigation(format!("login form never rendered at {}", login_url))
            }
            other => other,
        })?;

        page.fill(&selectors.username_input, &creds.username).await?;
        page.fill(&selectors.password_input, &creds.password).await?;
        page.click_selector(&selectors.submit_button).await?;

        // Post-login marker: URL leaves the login path or the authenticated
        // marker appears. A visible error banner is terminal.
        let login_path = self.config.profile.paths.login.clone();
        let marker_opts = WaitOptions::new("post-login state")
            .timeout(self.config.step_timeout)
            .poll_interval(self.config.poll_interval);
        let error_sel = selectors.error_banner.clone();
        let auth_sel = selectors.authenticated_marker.clone();

        wait_for(&marker_opts, &self.cancel, || {
            let error_sel = error_sel.clone();
            let auth_sel = auth_sel.clone();
            let login_path = login_path.clone();
            async move {
                // The submit redirect tears the execution context down; treat
                // evaluation failures in that window as "not yet".
                let banner_visible = match page.is_visible(&error_sel).await {
                    Ok(v) => v,
                    Err(CdpError::JavaScript(_)) => {
                        return Ok(Probe::NotYet("page navigating".to_string()))
                    }
                    Err(e) => return Err(e.into()),
                };
                if banner_visible {
                    let banner = page
                        .element_text(&error_sel)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| "login form rejected credentials".to_string());
                    return Err(HarnessError::InvalidCredentials(banner));
                }
                let url = match page.current_url().await {
                    Ok(url) => url,
                    Err(CdpError::JavaScript(_)) => {
                        return Ok(Probe::NotYet("page navigating".to_string()))
                    }
                    Err(e) => return Err(e.into()),
                };
                if !url.contains(&login_path) {
                    return Ok(Probe::Ready(()));
                }
                match page.is_visible(&auth_sel).await {
                    Ok(true) => Ok(Probe::Ready(())),
                    Ok(false) => Ok(Probe::NotYet(format!("still on login page: {}", url))),
                    Err(CdpError::JavaScript(_)) => {
                        Ok(Probe::NotYet("page navigating".to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await
        .map_err(|e| match e {
            HarnessError::Timeout { .. } => HarnessError::LoginTimeout {
                role: role.to_string(),
            },
            other => other,
        })?;

        let cookies = page.cookies().await?;
        debug!("Captured {} cookies for {}", cookies.len(), role);

        Ok(Session {
            role,
            cookies,
            authenticated_at: Instant::now(),
            ttl: self.config.session_ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_session(role: Role, ttl: Duration) -> Arc<Session> {
        Arc::new(Session {
            role,
            cookies: Vec::new(),
            authenticated_at: Instant::now(),
            ttl,
        })
    }

    /// The coalescing invariant: N concurrent requests for one role perform
    /// exactly one login. Exercises the same slot-locking shape
    /// `SessionFixture::session` uses.
    #[tokio::test]
    async fn concurrent_requests_coalesce_to_one_login() {
        let slot: Slot = Arc::default();
        let logins = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let slot = slot.clone();
            let logins = logins.clone();
            handles.push(tokio::spawn(async move {
                let mut guard = slot.lock().await;
                if let Some(session) = guard.as_ref() {
                    if !session.expired() {
                        return session.clone();
                    }
                }
                // Simulate login latency so callers genuinely overlap.
                tokio::time::sleep(Duration::from_millis(20)).await;
                logins.fetch_add(1, Ordering::SeqCst);
                let session = test_session(Role::Admin, Duration::from_secs(60));
                *guard = Some(session.clone());
                session
            }));
        }

        for handle in handles {
            let session = handle.await.unwrap();
            assert_eq!(session.role(), Role::Admin);
        }
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_sessions_are_not_reused() {
        let session = test_session(Role::Member, Duration::from_millis(0));
        assert!(session.expired());

        let fresh = test_session(Role::Member, Duration::from_secs(60));
        assert!(!fresh.expired());
    }

    #[test]
    fn sessions_are_cheap_to_share() {
        let session = test_session(Role::Admin, Duration::from_secs(60));
        let clone = session.clone();
        assert_eq!(clone.role(), Role::Admin);
        assert_eq!(Arc::strong_count(&session), 2);
    }
}
