//! Webscout E2E Investigation Harness
//!
//! The reusable core for browser-driven investigation suites:
//! - Polls page state through wait conditions instead of fixed sleeps
//! - Caches authenticated sessions per role with single-flight login
//! - Aggregates console/network/error evidence per scenario
//! - Executes declarative YAML scenarios and persists structured reports
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                           │
//! │   ├── SessionFixture::session(role)  -> cookie state cache   │
//! │   ├── wait::wait_for(condition)      -> polling + stability  │
//! │   ├── EvidenceCollector              -> console/net/errors   │
//! │   └── ReportSink::write(result)      -> test-results/<run>/  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ScenarioSpec (YAML)                                         │
//! │    steps: navigate / authenticate_as / click / fill / wait   │
//! │           assert / capture / evaluate / logout               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod error;
pub mod evidence;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod visual;
pub mod wait;

pub use auth::{Session, SessionFixture};
pub use error::{HarnessError, HarnessResult};
pub use evidence::EvidenceCollector;
pub use report::ReportSink;
pub use runner::ScenarioRunner;
pub use scenario::{ScenarioSpec, Step};
pub use wait::{wait_for, Probe, WaitOptions};
