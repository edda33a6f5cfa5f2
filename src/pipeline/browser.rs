//! Scoped headless-browser sessions.
//!
//! A [`BrowserSession`] owns everything a render acquires: the browser
//! process (when we launched it), its throw-away profile directory, the
//! DevTools connection and the page target. Release happens on every exit
//! path:
//!
//! - **Normal / error return** — the renderer calls [`BrowserSession::close`],
//!   which closes the tab, asks the browser to exit and reaps the process.
//! - **Panic or cancellation** — the session is simply dropped. The child was
//!   spawned with `kill_on_drop(true)` and the profile is a `TempDir`, so the
//!   process is killed and the directory removed without any async cleanup.
//!
//! Attached sessions (an already-running browser reached through a debug
//! port or WebSocket URL) only ever close the tab they opened.

use crate::config::ExtractionConfig;
use crate::error::Web2CsvError;
use crate::pipeline::cdp::{self, CdpConnection, CdpError};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Executables probed on `PATH`, in order.
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "microsoft-edge",
];

/// A launched browser process and its profile directory.
struct LaunchedBrowser {
    child: Child,
    _profile: TempDir,
}

/// One browser, one page target, released together.
pub struct BrowserSession {
    conn: CdpConnection,
    target_id: String,
    session_id: String,
    launched: Option<LaunchedBrowser>,
}

impl BrowserSession {
    /// Launch (or attach to) a browser and open a blank page target.
    pub async fn open(config: &ExtractionConfig) -> Result<Self, Web2CsvError> {
        let timeout = Duration::from_secs(config.navigation_timeout_secs);

        let (ws_url, launched) = if let Some(ref ws) = config.browser_ws_url {
            (ws.clone(), None)
        } else if let Some(port) = config.browser_debug_port {
            let info = cdp::discover_endpoint(port, timeout)
                .await
                .map_err(|e| Web2CsvError::BrowserNotFound {
                    hint: format!(
                        "{e}\nStart one with: chromium --headless=new --remote-debugging-port={port}"
                    ),
                })?;
            debug!("Attaching to {:?}", info.browser);
            (info.web_socket_debugger_url, None)
        } else {
            let (ws, browser) = launch(config, timeout).await?;
            (ws, Some(browser))
        };

        let mut conn = CdpConnection::connect(&ws_url, timeout)
            .await
            .map_err(session_error)?;

        let target = conn
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await
            .map_err(session_error)?;
        let target_id = string_field(&target, "targetId")?;

        let attached = conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await
            .map_err(session_error)?;
        let session_id = string_field(&attached, "sessionId")?;

        Ok(Self {
            conn,
            target_id,
            session_id,
            launched,
        })
    }

    /// Send a command to the page target.
    pub async fn page_call(&mut self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.conn
            .call(method, params, Some(&self.session_id))
            .await
    }

    /// Release every resource held by the session.
    pub async fn close(mut self) {
        let _ = self
            .conn
            .call(
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
                None,
            )
            .await;

        match self.launched.take() {
            Some(mut browser) => {
                let _ = self.conn.call("Browser.close", json!({}), None).await;
                self.conn.close().await;
                let exited = tokio::time::timeout(Duration::from_secs(5), browser.child.wait()).await;
                if !matches!(exited, Ok(Ok(_))) {
                    warn!("Browser did not exit after Browser.close; killing it");
                    let _ = browser.child.kill().await;
                }
                debug!("Browser process released");
            }
            None => self.conn.close().await,
        }
    }
}

/// Start a headless browser with a private profile and wait for its DevTools URL.
async fn launch(
    config: &ExtractionConfig,
    timeout: Duration,
) -> Result<(String, LaunchedBrowser), Web2CsvError> {
    let exe = find_browser(config)?;
    let profile = TempDir::new().map_err(|e| Web2CsvError::Internal(format!("profile dir: {e}")))?;

    let args = launch_args(config, &profile.path().display().to_string());
    info!("Launching {}", exe.display());

    let mut child = Command::new(&exe)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Web2CsvError::BrowserNotFound {
            hint: format!("Failed to launch {}: {}", exe.display(), e),
        })?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Web2CsvError::Internal("browser stderr not captured".into()))?;
    let mut lines = BufReader::new(stderr).lines();

    let ws_url = tokio::time::timeout(timeout, async {
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(url) = cdp::parse_devtools_line(&line) {
                return Some(url.to_string());
            }
        }
        None
    })
    .await
    .map_err(|_| Web2CsvError::Timeout {
        stage: "render".into(),
        secs: timeout.as_secs(),
    })?
    .ok_or_else(|| Web2CsvError::RenderFailed {
        url: exe.display().to_string(),
        detail: "browser exited before the DevTools endpoint came up".into(),
    })?;

    // Keep draining stderr so a chatty browser never blocks on a full pipe.
    tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    debug!("DevTools endpoint: {}", ws_url);
    Ok((
        ws_url,
        LaunchedBrowser {
            child,
            _profile: profile,
        },
    ))
}

/// Command-line flags for a throw-away headless browser.
fn launch_args(config: &ExtractionConfig, profile_dir: &str) -> Vec<String> {
    vec![
        "--headless=new".to_string(),
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--hide-scrollbars".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        "--remote-debugging-port=0".to_string(),
        format!("--user-data-dir={}", profile_dir),
        "about:blank".to_string(),
    ]
}

/// Locate the browser executable: explicit path → `CHROME_PATH` → `PATH`.
fn find_browser(config: &ExtractionConfig) -> Result<PathBuf, Web2CsvError> {
    if let Some(ref p) = config.browser_path {
        return Ok(p.clone());
    }
    if let Ok(p) = std::env::var("CHROME_PATH") {
        if !p.is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    BROWSER_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| Web2CsvError::BrowserNotFound {
            hint: format!(
                "None of {} was found on PATH.\n\
                 Install Chromium or set CHROME_PATH=/path/to/chrome.",
                BROWSER_CANDIDATES.join(", ")
            ),
        })
}

fn string_field(value: &Value, field: &str) -> Result<String, Web2CsvError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Web2CsvError::RenderFailed {
            url: "about:blank".into(),
            detail: format!("DevTools response missing '{field}'"),
        })
}

fn session_error(e: CdpError) -> Web2CsvError {
    Web2CsvError::RenderFailed {
        url: "about:blank".into(),
        detail: format!("browser session: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_use_viewport_and_private_profile() {
        let config = ExtractionConfig::builder()
            .viewport(1280, 720)
            .build()
            .unwrap();
        let args = launch_args(&config, "/tmp/profile-x");
        assert!(args.contains(&"--window-size=1280,720".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile-x".to_string()));
        assert!(args.contains(&"--remote-debugging-port=0".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn explicit_browser_path_wins() {
        let config = ExtractionConfig::builder()
            .browser_path("/opt/chromium/chrome")
            .build()
            .unwrap();
        assert_eq!(
            find_browser(&config).unwrap(),
            PathBuf::from("/opt/chromium/chrome")
        );
    }

    #[test]
    fn missing_field_is_a_render_failure() {
        let err = string_field(&json!({"other": 1}), "targetId").unwrap_err();
        assert!(err.is_render_failure());
        assert!(err.to_string().contains("targetId"));
    }
}
