//! Webscout Common Library
//!
//! Shared types, configuration, and the report data model used by the
//! browser driver, the harness, and the CLI.

pub mod config;
pub mod error;
pub mod report;
pub mod types;

// Re-export commonly used types
pub use config::{HarnessConfig, RoleCredentials, TargetProfile};
pub use error::{Error, Result};
pub use report::{EvidenceBundle, RunSummary, ScenarioResult, StepRecord};
pub use types::{ConsoleLevel, Outcome, Role, RunId};

/// Webscout version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
