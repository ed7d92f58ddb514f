//! Harness configuration
//!
//! Everything the harness needs to know about the target application is
//! configuration: base URLs, credentials, and the selector strategy for the
//! login/logout surface. Credentials come from environment variables only;
//! the selector strategy can be overridden with a TOML target profile.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Role;

/// Environment variable names recognized by the harness.
pub mod env_keys {
    pub const BASE_URL: &str = "WEBSCOUT_BASE_URL";
    pub const API_BASE_URL: &str = "WEBSCOUT_API_BASE_URL";
    pub const ADMIN_USER: &str = "WEBSCOUT_ADMIN_USER";
    pub const ADMIN_PASSWORD: &str = "WEBSCOUT_ADMIN_PASSWORD";
    pub const MEMBER_USER: &str = "WEBSCOUT_MEMBER_USER";
    pub const MEMBER_PASSWORD: &str = "WEBSCOUT_MEMBER_PASSWORD";
    pub const TIMEOUT_MS: &str = "WEBSCOUT_TIMEOUT_MS";
    pub const CDP_URL: &str = "WEBSCOUT_CDP_URL";
    pub const CHROME_BIN: &str = "WEBSCOUT_CHROME_BIN";
}

/// Credential pair for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCredentials {
    pub username: String,
    pub password: String,
}

/// Top-level harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Base URL of the application under test.
    pub base_url: String,

    /// Base URL of the JSON API surface (defaults to `base_url`).
    pub api_base_url: String,

    /// Per-role credentials. Roles without an entry cannot authenticate.
    pub credentials: HashMap<Role, RoleCredentials>,

    /// Default per-step deadline.
    pub step_timeout: Duration,

    /// Default whole-scenario deadline.
    pub scenario_timeout: Duration,

    /// Deadline for the whole run; still-running scenarios are cancelled.
    pub run_timeout: Option<Duration>,

    /// Wait-condition poll cadence.
    pub poll_interval: Duration,

    /// Cached session lifetime before re-authentication.
    pub session_ttl: Duration,

    /// Maximum scenarios driven concurrently.
    pub max_concurrency: usize,

    /// Per-category evidence ring-buffer capacity.
    pub evidence_cap: usize,

    /// Failed-response URLs matching any of these patterns are not recorded.
    pub ignore_url_patterns: Vec<String>,

    /// Root directory for reports and screenshots.
    pub output_dir: PathBuf,

    /// Login surface description.
    pub profile: TargetProfile,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5173".to_string(),
            api_base_url: "http://127.0.0.1:5173".to_string(),
            credentials: HashMap::new(),
            step_timeout: Duration::from_secs(10),
            scenario_timeout: Duration::from_secs(60),
            run_timeout: None,
            poll_interval: Duration::from_millis(150),
            session_ttl: Duration::from_secs(20 * 60),
            max_concurrency: 4,
            evidence_cap: 512,
            ignore_url_patterns: Vec::new(),
            output_dir: PathBuf::from("test-results"),
            profile: TargetProfile::default(),
        }
    }
}

impl HarnessConfig {
    /// Overlay environment variables onto this configuration.
    ///
    /// Unset variables leave the current value in place, so CLI flags and
    /// profile files can still win where the environment is silent.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(env_keys::BASE_URL) {
            self.base_url = url.trim_end_matches('/').to_string();
            self.api_base_url = self.base_url.clone();
        }
        if let Ok(url) = std::env::var(env_keys::API_BASE_URL) {
            self.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(ms) = std::env::var(env_keys::TIMEOUT_MS) {
            let ms: u64 = ms
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("{} must be an integer", env_keys::TIMEOUT_MS)))?;
            self.step_timeout = Duration::from_millis(ms);
        }

        if let Some(creds) = read_credentials(env_keys::ADMIN_USER, env_keys::ADMIN_PASSWORD)? {
            self.credentials.insert(Role::Admin, creds);
        }
        if let Some(creds) = read_credentials(env_keys::MEMBER_USER, env_keys::MEMBER_PASSWORD)? {
            self.credentials.insert(Role::Member, creds);
        }

        Ok(self)
    }

    /// Credentials for a role, or an error naming the missing role.
    pub fn credentials_for(&self, role: Role) -> Result<&RoleCredentials> {
        self.credentials
            .get(&role)
            .ok_or_else(|| Error::MissingCredentials(role.to_string()))
    }

    /// Resolve a possibly-relative path against the application base URL.
    pub fn resolve_url(&self, path: &str) -> String {
        resolve_against(&self.base_url, path)
    }

    /// Resolve a possibly-relative path against the API base URL.
    pub fn resolve_api_url(&self, path: &str) -> String {
        resolve_against(&self.api_base_url, path)
    }
}

fn resolve_against(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

fn read_credentials(user_key: &str, password_key: &str) -> Result<Option<RoleCredentials>> {
    match (std::env::var(user_key), std::env::var(password_key)) {
        (Ok(username), Ok(password)) => Ok(Some(RoleCredentials { username, password })),
        (Err(_), Err(_)) => Ok(None),
        _ => Err(Error::InvalidConfig(format!(
            "{} and {} must be set together",
            user_key, password_key
        ))),
    }
}

/// Target profile: paths and selectors the harness itself needs.
///
/// Target applications drift; the source investigation this harness grew out
/// of probed several frontends with inconsistent login markup. Everything
/// here is therefore data, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    pub paths: TargetPaths,
    pub selectors: SelectorSet,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            paths: TargetPaths::default(),
            selectors: SelectorSet::default(),
        }
    }
}

impl TargetProfile {
    /// Load a profile from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Well-known paths on the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetPaths {
    /// Login entry point.
    pub login: String,
    /// Health endpoint probed by `webscout check`.
    pub health: String,
}

impl Default for TargetPaths {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            health: "/".to_string(),
        }
    }
}

/// CSS selectors for the auth surface of the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    /// Username / email field on the login form.
    pub username_input: String,
    /// Password field on the login form.
    pub password_input: String,
    /// Login form submit control.
    pub submit_button: String,
    /// Element shown when the form rejects credentials.
    pub error_banner: String,
    /// Element present only while authenticated.
    pub authenticated_marker: String,
    /// Element present only while anonymous.
    pub anonymous_marker: String,
    /// Control that triggers UI logout.
    pub logout_control: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            username_input: "input[type='email'], input[name='email'], input[name='username']"
                .to_string(),
            password_input: "input[type='password']".to_string(),
            submit_button: "button[type='submit']".to_string(),
            error_banner: "[role='alert'], .validation-summary-errors, .login-error".to_string(),
            authenticated_marker: "[data-testid='user-menu'], a[href*='logout']".to_string(),
            anonymous_marker: "a[href*='login'], [data-testid='login-link']".to_string(),
            logout_control: "[data-testid='logout'], a[href*='logout'], button[name='logout']"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_url_joins_relative_paths() {
        let cfg = HarnessConfig {
            base_url: "http://localhost:5173".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_url("/admin"), "http://localhost:5173/admin");
        assert_eq!(cfg.resolve_url("admin"), "http://localhost:5173/admin");
        assert_eq!(
            cfg.resolve_url("https://other.example/x"),
            "https://other.example/x"
        );
    }

    #[test]
    fn missing_credentials_name_the_role() {
        let cfg = HarnessConfig::default();
        let err = cfg.credentials_for(Role::Admin).unwrap_err();
        assert!(err.to_string().contains("admin"));
    }

    #[test]
    fn profile_parses_partial_toml() {
        let profile: TargetProfile = toml::from_str(
            r#"
[paths]
login = "/Identity/Account/Login"

[selectors]
username_input = "input[name='Input.EmailOrUsername']"
"#,
        )
        .unwrap();
        assert_eq!(profile.paths.login, "/Identity/Account/Login");
        assert_eq!(
            profile.selectors.username_input,
            "input[name='Input.EmailOrUsername']"
        );
        // Unspecified fields keep their defaults
        assert_eq!(profile.selectors.password_input, "input[type='password']");
    }

    #[test]
    fn default_profile_has_complete_selector_set() {
        let p = TargetProfile::default();
        for s in [
            &p.selectors.username_input,
            &p.selectors.password_input,
            &p.selectors.submit_button,
            &p.selectors.error_banner,
            &p.selectors.authenticated_marker,
            &p.selectors.anonymous_marker,
            &p.selectors.logout_control,
        ] {
            assert!(!s.is_empty());
        }
    }
}
