//! Browser process management - spawning and health checking headless Chrome

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{CdpError, CdpResult};
use crate::protocol::BrowserVersion;

/// Binaries probed when no explicit path is configured.
const BINARY_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// Configuration for spawning a browser.
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    /// Explicit browser binary; otherwise well-known names are probed.
    pub binary: Option<PathBuf>,

    /// Debug port (None = pick a free port).
    pub debug_port: Option<u16>,

    pub headless: bool,

    pub window_width: u32,
    pub window_height: u32,

    /// Timeout for the endpoint to become healthy.
    pub startup_timeout: Duration,

    /// Additional command-line flags.
    pub extra_args: Vec<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            binary: None,
            debug_port: None,
            headless: true,
            window_width: 1280,
            window_height: 720,
            startup_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

/// Handle to a spawned browser process.
///
/// The profile lives in a temp dir so runs never share cookie state; both the
/// process and the profile are torn down on drop.
pub struct ChromeHandle {
    child: Child,
    endpoint: String,
    _profile_dir: tempfile::TempDir,
}

impl ChromeHandle {
    /// Spawn a browser and wait for its debugging endpoint to come up.
    pub async fn spawn(config: ChromeConfig) -> CdpResult<Self> {
        let binary = resolve_binary(&config)?;
        let port = config.debug_port.unwrap_or_else(find_free_port);
        let endpoint = format!("http://127.0.0.1:{}", port);

        let profile_dir = tempfile::tempdir()
            .map_err(|e| CdpError::Launch(format!("profile dir: {}", e)))?;

        info!("Spawning {} with debug port {}", binary.display(), port);

        let mut cmd = Command::new(&binary);
        if config.headless {
            cmd.arg("--headless=new");
        }
        cmd.arg(format!("--remote-debugging-port={}", port))
            .arg(format!("--user-data-dir={}", profile_dir.path().display()))
            .arg(format!(
                "--window-size={},{}",
                config.window_width, config.window_height
            ))
            .args([
                "--no-first-run",
                "--no-default-browser-check",
                "--disable-gpu",
                "--disable-background-networking",
            ])
            .args(&config.extra_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            CdpError::Launch(format!("Failed to spawn {}: {}", binary.display(), e))
        })?;

        let handle = ChromeHandle {
            child,
            endpoint: endpoint.clone(),
            _profile_dir: profile_dir,
        };

        handle.wait_for_endpoint(config.startup_timeout).await?;

        info!("Browser debugging endpoint healthy at {}", endpoint);
        Ok(handle)
    }

    /// Poll `/json/version` until the endpoint answers.
    async fn wait_for_endpoint(&self, timeout: Duration) -> CdpResult<()> {
        let version_url = format!("{}/json/version", self.endpoint);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut logged_waiting = false;

        while start.elapsed() < timeout {
            match client.get(&version_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    if let Ok(version) = resp.json::<BrowserVersion>().await {
                        debug!("Connected to {}", version.browser);
                    }
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Version endpoint returned {}", resp.status());
                }
                Err(e) => {
                    // Connection refused is expected while the browser starts
                    if !logged_waiting {
                        debug!("Waiting for browser to start...");
                        logged_waiting = true;
                    }
                    if !e.is_connect() && !e.is_timeout() {
                        warn!("Endpoint probe error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(CdpError::EndpointUnavailable(self.endpoint.clone()))
    }

    /// HTTP debugging endpoint, e.g. `http://127.0.0.1:9222`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stop the browser process.
    pub fn stop(&mut self) {
        debug!("Stopping browser (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ChromeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve_binary(config: &ChromeConfig) -> CdpResult<PathBuf> {
    if let Some(path) = &config.binary {
        return Ok(path.clone());
    }

    for candidate in BINARY_CANDIDATES {
        if let Some(found) = search_path(candidate) {
            return Ok(found);
        }
    }

    Err(CdpError::Launch(
        "no Chromium binary found; set WEBSCOUT_CHROME_BIN or --chrome-bin".to_string(),
    ))
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Find a free port to use for the debugging endpoint.
fn find_free_port() -> u16 {
    use std::net::TcpListener;

    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(9222)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_free_port_is_unprivileged() {
        let port = find_free_port();
        assert!(port > 1024);
    }

    #[test]
    fn explicit_binary_wins_over_probing() {
        let config = ChromeConfig {
            binary: Some(PathBuf::from("/opt/custom/chrome")),
            ..Default::default()
        };
        assert_eq!(
            resolve_binary(&config).unwrap(),
            PathBuf::from("/opt/custom/chrome")
        );
    }

    #[test]
    fn default_config_is_headless() {
        let config = ChromeConfig::default();
        assert!(config.headless);
        assert_eq!((config.window_width, config.window_height), (1280, 720));
    }
}
