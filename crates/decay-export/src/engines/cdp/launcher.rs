//! Starting a Chromium-family browser with remote debugging enabled.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::ExportError;

const DEVTOOLS_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const DEVTOOLS_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Executable names searched for on `PATH`, in order.
const BROWSER_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &["/usr/bin/chromium", "/snap/bin/chromium"];

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Browser")]
    browser: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    websocket_url: String,
}

/// A running browser and the throwaway profile it was started with.
pub struct BrowserProcess {
    child: Child,
    websocket_url: String,
    // Dropped (and deleted) after the child is gone
    _profile: TempDir,
}

impl BrowserProcess {
    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    /// Wait briefly for the browser to exit on its own, then kill it.
    pub async fn shutdown(mut self) {
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Browser exited"),
            Ok(Err(e)) => warn!("Failed to wait for browser exit: {}", e),
            Err(_) => {
                debug!("Browser still running after {:?}, killing it", SHUTDOWN_GRACE);
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill browser process: {}", e);
                }
            }
        }
    }
}

/// Launch a browser and wait until its DevTools endpoint is published.
pub async fn launch(config: &BrowserConfig) -> Result<BrowserProcess, ExportError> {
    let executable = find_executable(config)?;
    let port = free_port()?;
    let profile = tempfile::Builder::new()
        .prefix("decay-export-profile-")
        .tempdir()
        .map_err(|e| ExportError::BrowserLaunch(format!("cannot create profile dir: {e}")))?;

    let args = launch_args(config, port, profile.path());
    debug!(executable = %executable.display(), ?args, "Launching browser");

    let mut child = Command::new(&executable)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ExportError::BrowserLaunch(format!("cannot start {}: {e}", executable.display()))
        })?;

    let version = wait_for_devtools(&mut child, port).await?;
    info!(
        browser = version.browser.as_deref().unwrap_or("unknown"),
        port,
        "Browser ready"
    );

    Ok(BrowserProcess {
        child,
        websocket_url: version.websocket_url,
        _profile: profile,
    })
}

fn launch_args(config: &BrowserConfig, port: u16, profile: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        format!("--user-data-dir={}", profile.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-popup-blocking".to_string(),
        "--password-store=basic".to_string(),
        "--use-mock-keychain".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.extend(config.args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Configured path, then `CHROME_PATH`, then `PATH`, then the usual install locations.
fn find_executable(config: &BrowserConfig) -> Result<PathBuf, ExportError> {
    if let Some(path) = &config.executable {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(ExportError::BrowserLaunch(format!(
            "browser executable {} does not exist",
            path.display()
        )));
    }

    if let Some(path) = std::env::var_os("CHROME_PATH").map(PathBuf::from) {
        if path.is_file() {
            return Ok(path);
        }
        warn!("CHROME_PATH points at {}, which is not a file", path.display());
    }

    if let Some(search_path) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&search_path) {
            for name in BROWSER_NAMES {
                let candidate = dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    INSTALL_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or_else(|| {
            ExportError::BrowserLaunch(
                "no Chrome/Chromium/Edge executable found; set --browser-path or CHROME_PATH"
                    .to_string(),
            )
        })
}

fn free_port() -> Result<u16, ExportError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| ExportError::BrowserLaunch(format!("no free port for DevTools: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| ExportError::BrowserLaunch(format!("no free port for DevTools: {e}")))?
        .port();
    Ok(port)
}

async fn wait_for_devtools(child: &mut Child, port: u16) -> Result<VersionInfo, ExportError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| ExportError::BrowserLaunch(format!("HTTP client: {e}")))?;
    let url = format!("http://127.0.0.1:{port}/json/version");
    let deadline = Instant::now() + DEVTOOLS_STARTUP_TIMEOUT;

    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(ExportError::BrowserLaunch(format!(
                "browser exited during startup with {status}"
            )));
        }

        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                return response.json::<VersionInfo>().await.map_err(|e| {
                    ExportError::BrowserLaunch(format!("unexpected /json/version reply: {e}"))
                });
            }
            Ok(response) => debug!(status = %response.status(), "DevTools not ready yet"),
            Err(e) => debug!("DevTools not ready yet: {}", e),
        }

        if Instant::now() >= deadline {
            return Err(ExportError::BrowserLaunch(format!(
                "DevTools endpoint on port {port} did not come up within {DEVTOOLS_STARTUP_TIMEOUT:?}"
            )));
        }
        tokio::time::sleep(DEVTOOLS_POLL_INTERVAL).await;
    }
}
