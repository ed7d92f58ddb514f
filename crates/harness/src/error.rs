//! Harness error taxonomy
//!
//! Distinct variants keep "the expectation was wrong" separable from "the
//! environment broke"; `kind()` is the stable classifier persisted in step
//! records.

use thiserror::Error;
use webscout_browser::CdpError;

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Timed out waiting for {description} (last observed: {last_observed})")]
    Timeout {
        description: String,
        last_observed: String,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Login rejected: {0}")]
    InvalidCredentials(String),

    #[error("No post-login state observed for role {role} within budget")]
    LoginTimeout { role: String },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Assertion failed: {description} (expected {expected}, observed {actual})")]
    Assertion {
        description: String,
        expected: String,
        actual: String,
    },

    #[error("Evidence capture failed: {0}")]
    Capture(String),

    #[error("Visual baseline missing for {0}")]
    BaselineMissing(String),

    #[error("Visual mismatch for {label}: {diff_percent:.2}% differs (threshold {threshold:.2}%)")]
    VisualMismatch {
        label: String,
        diff_percent: f64,
        threshold: f64,
    },

    #[error("Scenario spec error: {0}")]
    SpecInvalid(String),

    #[error("Browser error: {0}")]
    Browser(#[from] CdpError),

    #[error("Configuration error: {0}")]
    Config(#[from] webscout_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl HarnessError {
    /// Stable classifier recorded in step results and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Timeout { .. } => "timeout",
            HarnessError::Cancelled(_) => "cancelled",
            HarnessError::InvalidCredentials(_) => "invalid_credentials",
            HarnessError::LoginTimeout { .. } => "login_timeout",
            HarnessError::Navigation(_) => "navigation",
            HarnessError::Assertion { .. } => "assertion",
            HarnessError::Capture(_) => "capture",
            HarnessError::BaselineMissing(_) => "baseline_missing",
            HarnessError::VisualMismatch { .. } => "visual_mismatch",
            HarnessError::SpecInvalid(_) => "spec_invalid",
            HarnessError::Browser(CdpError::NavigationFailed(_)) => "navigation",
            HarnessError::Browser(_) => "browser",
            HarnessError::Config(_) => "config",
            HarnessError::Io(_) => "io",
            HarnessError::Json(_) => "json",
            HarnessError::Yaml(_) => "yaml",
            HarnessError::Http(_) => "http",
            HarnessError::Image(_) => "image",
        }
    }

    /// True when the target failed the expectation, as opposed to the
    /// environment failing before it could be checked. Drives the
    /// scenario-level `fail` vs `error` outcome.
    pub fn is_expectation_failure(&self) -> bool {
        matches!(
            self,
            HarnessError::Timeout { .. }
                | HarnessError::Assertion { .. }
                | HarnessError::InvalidCredentials(_)
                | HarnessError::VisualMismatch { .. }
        )
    }
}
