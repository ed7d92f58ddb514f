//! Declarative YAML scenario specifications
//!
//! A scenario is an ordered list of steps driven against a live target.
//! There is intentionally no fixed-sleep step: anything state-dependent goes
//! through `wait`/`assert` with an optional stability window.

use std::path::Path;

use serde::{Deserialize, Serialize};
use webscout_common::Role;

use crate::error::{HarnessError, HarnessResult};

/// A complete scenario parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name; becomes the report subdirectory.
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Whole-scenario deadline override.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Steps executed strictly in order.
    pub steps: Vec<Step>,
}

/// A single scenario step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to the base URL).
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    /// Acquire (or reuse) an authenticated session for a role and apply it
    /// to this scenario's page. `anonymous` clears cookie state instead.
    AuthenticateAs { role: Role },

    /// Drive the UI logout and confirm the anonymous marker.
    Logout,

    /// Click an element, optionally confirming an expected post-click state.
    Click {
        selector: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Replace an input's value with trusted keystrokes.
    Fill { selector: String, value: String },

    /// Press a single key on the focused element.
    Press { key: String },

    /// Evaluate JavaScript; `store_as` records the value in the step result.
    Evaluate {
        script: String,
        #[serde(default)]
        store_as: Option<String>,
    },

    /// Wait until a page condition holds.
    Wait {
        #[serde(flatten)]
        condition: Condition,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        stable_for_ms: Option<u64>,
    },

    /// Assert a page condition; failure to reach it is an assertion failure.
    Assert {
        #[serde(flatten)]
        check: Check,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        stable_for_ms: Option<u64>,
    },

    /// Take a labeled screenshot; `baseline` opts into visual comparison.
    Capture {
        label: String,
        #[serde(default)]
        full_page: bool,
        #[serde(default)]
        baseline: bool,
    },
}

/// Waitable page condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    /// Selector that must reach `state`.
    #[serde(default)]
    pub selector: Option<String>,
    /// Desired selector state.
    #[serde(default)]
    pub state: WaitState,
    /// Substring the current URL must contain.
    #[serde(default)]
    pub url_contains: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
}

/// Assertable expectation about the page, possibly cross-checked against the
/// JSON API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Check {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub text_contains: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub url_contains: Option<String>,
    /// Compare the selector's rendered text against an API response value.
    #[serde(default)]
    pub api: Option<ApiCheck>,
}

/// Fetch `path` from the API base URL and extract a value by JSON pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCheck {
    pub path: String,
    /// RFC 6901 pointer into the response body, e.g. `/data/0/capacity`.
    pub pointer: String,
}

impl Step {
    /// Short label used in step records and logs.
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate:{}", url),
            Step::AuthenticateAs { role } => format!("authenticate_as:{}", role),
            Step::Logout => "logout".to_string(),
            Step::Click { selector, .. } => format!("click:{}", selector),
            Step::Fill { selector, .. } => format!("fill:{}", selector),
            Step::Press { key } => format!("press:{}", key),
            Step::Evaluate { store_as, .. } => match store_as {
                Some(name) => format!("evaluate:{}", name),
                None => "evaluate".to_string(),
            },
            Step::Wait { condition, .. } => format!("wait:{}", condition.describe()),
            Step::Assert { check, .. } => format!("assert:{}", check.describe()),
            Step::Capture { label, .. } => format!("capture:{}", label),
        }
    }
}

impl Condition {
    pub fn describe(&self) -> String {
        match (&self.selector, &self.url_contains) {
            (Some(sel), _) => format!("{}:{:?}", sel, self.state),
            (None, Some(url)) => format!("url~{}", url),
            (None, None) => "<empty>".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selector.is_none() && self.url_contains.is_none()
    }
}

impl Check {
    pub fn describe(&self) -> String {
        if let Some(sel) = &self.selector {
            sel.clone()
        } else if let Some(url) = &self.url_contains {
            format!("url~{}", url)
        } else {
            "<empty>".to_string()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selector.is_none()
            && self.visible.is_none()
            && self.text.is_none()
            && self.text_contains.is_none()
            && self.count.is_none()
            && self.url_contains.is_none()
            && self.api.is_none()
    }
}

impl ScenarioSpec {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let spec: ScenarioSpec = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw).map_err(|e| match e {
            HarnessError::Yaml(err) => {
                HarnessError::SpecInvalid(format!("{}: {}", path.display(), err))
            }
            other => other,
        })
    }

    /// Load every `.yaml`/`.yml` scenario under a directory.
    pub fn load_dir(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut specs = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }
        Ok(specs)
    }

    /// Keep scenarios whose name matches any pattern (exact or `*` glob),
    /// or carry the given tag. Empty filters keep everything.
    pub fn filter(specs: Vec<Self>, patterns: &[String], tag: Option<&str>) -> Vec<Self> {
        specs
            .into_iter()
            .filter(|spec| {
                let name_ok = patterns.is_empty()
                    || patterns.iter().any(|p| wildcard_match(p, &spec.name));
                let tag_ok = tag.map_or(true, |t| spec.tags.iter().any(|have| have == t));
                name_ok && tag_ok
            })
            .collect()
    }

    fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::SpecInvalid(
                "scenario name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::SpecInvalid(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }
        for step in &self.steps {
            match step {
                Step::Wait { condition, .. } if condition.is_empty() => {
                    return Err(HarnessError::SpecInvalid(format!(
                        "scenario '{}': wait step needs a selector or url_contains",
                        self.name
                    )));
                }
                Step::Assert { check, .. } if check.is_empty() => {
                    return Err(HarnessError::SpecInvalid(format!(
                        "scenario '{}': assert step has nothing to check",
                        self.name
                    )));
                }
                Step::Assert { check, .. } => {
                    if check.api.is_some() && check.selector.is_none() {
                        return Err(HarnessError::SpecInvalid(format!(
                            "scenario '{}': api cross-check needs a selector to compare against",
                            self.name
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Minimal `*` wildcard matcher for scenario name filters.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..])),
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_investigation_scenario() {
        let yaml = r#"
name: admin-events-check
description: Verify the events table renders for an admin
tags:
  - admin
  - smoke
steps:
  - action: authenticate_as
    role: admin
  - action: navigate
    url: /admin/events
    wait_for_selector: "[data-testid='events-table']"
  - action: assert
    selector: "[data-testid='events-table'] tbody tr"
    count: 3
  - action: capture
    label: events-table
    full_page: true
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "admin-events-check");
        assert_eq!(spec.steps.len(), 4);
        assert!(matches!(
            spec.steps[0],
            Step::AuthenticateAs { role: Role::Admin }
        ));
        match &spec.steps[3] {
            Step::Capture {
                label, full_page, ..
            } => {
                assert_eq!(label, "events-table");
                assert!(full_page);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn parses_wait_with_stability_window() {
        let yaml = r#"
name: capacity-settles
steps:
  - action: wait
    selector: "[data-testid='capacity']"
    timeout_ms: 8000
    stable_for_ms: 750
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        match &spec.steps[0] {
            Step::Wait {
                condition,
                timeout_ms,
                stable_for_ms,
            } => {
                assert_eq!(condition.selector.as_deref(), Some("[data-testid='capacity']"));
                assert_eq!(condition.state, WaitState::Visible);
                assert_eq!(*timeout_ms, Some(8000));
                assert_eq!(*stable_for_ms, Some(750));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn parses_api_cross_check() {
        let yaml = r#"
name: ui-vs-api
steps:
  - action: assert
    selector: "[data-testid='capacity-count']"
    api:
      path: /api/events/42
      pointer: /capacity/current
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        match &spec.steps[0] {
            Step::Assert { check, .. } => {
                let api = check.api.as_ref().unwrap();
                assert_eq!(api.path, "/api/events/42");
                assert_eq!(api.pointer, "/capacity/current");
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn rejects_empty_scenarios_and_checks() {
        assert!(ScenarioSpec::from_yaml("name: x\nsteps: []").is_err());

        let empty_assert = r#"
name: x
steps:
  - action: assert
"#;
        assert!(ScenarioSpec::from_yaml(empty_assert).is_err());

        let api_without_selector = r#"
name: x
steps:
  - action: assert
    api:
      path: /api/x
      pointer: /y
"#;
        assert!(ScenarioSpec::from_yaml(api_without_selector).is_err());
    }

    #[test]
    fn there_is_no_sleep_step() {
        let yaml = r#"
name: no-sleeps
steps:
  - action: sleep
    ms: 3000
"#;
        assert!(ScenarioSpec::from_yaml(yaml).is_err());
    }

    #[test]
    fn wildcard_filter_selects_by_name_and_tag() {
        let specs = vec![
            ScenarioSpec {
                name: "login-admin".to_string(),
                description: String::new(),
                tags: vec!["auth".to_string()],
                timeout_ms: None,
                steps: vec![Step::Logout],
            },
            ScenarioSpec {
                name: "rsvp-counts".to_string(),
                description: String::new(),
                tags: vec!["events".to_string()],
                timeout_ms: None,
                steps: vec![Step::Logout],
            },
        ];

        let by_glob = ScenarioSpec::filter(specs.clone(), &["login-*".to_string()], None);
        assert_eq!(by_glob.len(), 1);
        assert_eq!(by_glob[0].name, "login-admin");

        let by_tag = ScenarioSpec::filter(specs.clone(), &[], Some("events"));
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].name, "rsvp-counts");

        let all = ScenarioSpec::filter(specs, &[], None);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("login-*", "login-admin"));
        assert!(wildcard_match("*-check", "capacity-check"));
        assert!(!wildcard_match("login-*", "logout"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
    }

    #[test]
    fn step_descriptions_are_compact() {
        let step = Step::Click {
            selector: "#rsvp".to_string(),
            wait_for_selector: None,
            timeout_ms: None,
        };
        assert_eq!(step.describe(), "click:#rsvp");
        assert_eq!(Step::Logout.describe(), "logout");
    }
}
