//! Core shared types for Webscout

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Browser identity a scenario runs under.
///
/// `Anonymous` scenarios never touch the session fixture; the other roles
/// resolve to credential pairs from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    Anonymous,
}

impl Role {
    /// Roles that require credentials and participate in the session cache.
    pub fn requires_login(&self) -> bool {
        !matches!(self, Role::Anonymous)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "anonymous" | "anon" => Ok(Role::Anonymous),
            other => Err(Error::UnknownRole(other.to_string())),
        }
    }
}

/// Outcome of a scenario or a single step.
///
/// `Fail` means the expectation about the target did not hold (assertion,
/// wait timeout, rejected credentials). `Error` means the environment broke
/// before the expectation could be checked (unreachable target, transport
/// failure, cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a captured browser console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    /// Map a CDP `Runtime.consoleAPICalled` type string.
    pub fn from_cdp(kind: &str) -> Self {
        match kind {
            "debug" => ConsoleLevel::Debug,
            "info" => ConsoleLevel::Info,
            "warning" => ConsoleLevel::Warning,
            "error" | "assert" => ConsoleLevel::Error,
            _ => ConsoleLevel::Log,
        }
    }
}

/// Identifier for one harness invocation.
///
/// Timestamp-prefixed so result directories sort chronologically; the random
/// suffix keeps two runs started in the same second from colliding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        RunId(format!("{}-{}", stamp, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        RunId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("MEMBER".parse::<Role>().unwrap(), Role::Member);
        assert_eq!("anon".parse::<Role>().unwrap(), Role::Anonymous);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn anonymous_needs_no_login() {
        assert!(Role::Admin.requires_login());
        assert!(Role::Member.requires_login());
        assert!(!Role::Anonymous.requires_login());
    }

    #[test]
    fn run_id_is_unique_per_generation() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        // timestamp prefix + dash + 8 hex chars
        assert!(a.as_str().len() > 16);
    }

    #[test]
    fn console_level_maps_cdp_kinds() {
        assert_eq!(ConsoleLevel::from_cdp("error"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from_cdp("assert"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from_cdp("trace"), ConsoleLevel::Log);
    }
}
