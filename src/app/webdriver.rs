use std::fs::{self, File};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use super::error::{Result, ScrapeError};
use super::types::{BrowserArg, WebDriverConfig};

/// The browser capability the page fetcher needs. Backends own their setup.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Resolves once at least one element matches `selector`.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    async fn document_html(&mut self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

/// A session on a W3C WebDriver endpoint.
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    session_id: String,
    poll_interval: Duration,
    closed: bool,
}

impl WebDriverSession {
    pub async fn connect(
        endpoint: &str,
        browser: BrowserArg,
        headless: bool,
        browser_binary: Option<&str>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(40))
            .build()
            .map_err(|e| ScrapeError::BackendUnavailable(format!("http client build failed: {e}")))?;
        let base = endpoint.trim_end_matches('/').to_string();
        let caps = webdriver_capabilities(browser, headless, browser_binary);

        let res = client
            .post(format!("{base}/session"))
            .json(&caps)
            .send()
            .await
            .map_err(|e| {
                ScrapeError::BackendUnavailable(format!("session create request failed: {e}"))
            })?;
        let status = res.status();
        let body = res.text().await.map_err(|e| {
            ScrapeError::BackendUnavailable(format!("session create response read failed: {e}"))
        })?;
        let value = webdriver_value(status, &body, "session create")
            .map_err(|e| ScrapeError::BackendUnavailable(e.to_string()))?;
        let session_id = value
            .pointer("/value/sessionId")
            .and_then(|v| v.as_str())
            .or_else(|| value.pointer("/sessionId").and_then(|v| v.as_str()))
            .ok_or_else(|| {
                ScrapeError::BackendUnavailable(format!(
                    "session id missing in response: {}",
                    truncate_for_log(&body, 220)
                ))
            })?
            .to_string();

        info!(%session_id, browser = ?browser, headless, "webdriver session created");
        Ok(Self {
            client,
            base,
            session_id,
            poll_interval: Duration::from_millis(250),
            closed: false,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.base, self.session_id, suffix)
    }

    async fn post(&self, suffix: &str, payload: &Value, context: &str) -> Result<Value> {
        let res = self
            .client
            .post(self.session_url(suffix))
            .json(payload)
            .send()
            .await
            .map_err(|e| ScrapeError::Protocol(format!("{context} request failed: {e}")))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ScrapeError::Protocol(format!("{context} response read failed: {e}")))?;
        webdriver_value(status, &body, context)
    }

    async fn matching_elements(&self, selector: &str) -> Result<usize> {
        let value = self
            .post(
                "/elements",
                &json!({ "using": "css selector", "value": selector }),
                "find elements",
            )
            .await?;
        Ok(value
            .pointer("/value")
            .and_then(|v| v.as_array())
            .map(Vec::len)
            .unwrap_or(0))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.post("/url", &json!({ "url": url }), "navigate")
            .await
            .map(|_| ())
            .map_err(|e| ScrapeError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.matching_elements(selector).await {
                Ok(count) if count > 0 => {
                    debug!(selector, count, "readiness signal present");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => debug!(selector, %err, "element lookup failed while waiting"),
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(ScrapeError::ReadinessTimeout {
                    selector: selector.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - waited)).await;
        }
    }

    async fn document_html(&mut self) -> Result<String> {
        let script = r#"
            return document.documentElement ? document.documentElement.outerHTML : "";
        "#;
        let value = self
            .post(
                "/execute/sync",
                &json!({ "script": script, "args": [] }),
                "execute snapshot",
            )
            .await?;
        let html = value
            .pointer("/value")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if html.is_empty() {
            return Err(ScrapeError::Protocol("empty rendered snapshot".to_string()));
        }
        Ok(html)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let res = self
            .client
            .delete(self.session_url(""))
            .send()
            .await
            .map_err(|e| ScrapeError::Protocol(format!("delete session request failed: {e}")))?;
        let status = res.status();
        let body = res.text().await.map_err(|e| {
            ScrapeError::Protocol(format!("delete session response read failed: {e}"))
        })?;
        webdriver_value(status, &body, "delete session")?;
        info!(session_id = %self.session_id, "webdriver session closed");
        Ok(())
    }
}

/// Parses a WebDriver reply, turning HTTP failures and `value.error`
/// payloads into errors.
fn webdriver_value(status: reqwest::StatusCode, body: &str, context: &str) -> Result<Value> {
    if !status.is_success() {
        return Err(ScrapeError::Protocol(format!(
            "{context} HTTP {}: {}",
            status.as_u16(),
            truncate_for_log(body, 260)
        )));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ScrapeError::Protocol(format!("{context} parse failed: {e}")))?;
    if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
        let message = value
            .pointer("/value/message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown webdriver error");
        return Err(ScrapeError::Protocol(format!("{context} {err}: {message}")));
    }
    Ok(value)
}

fn webdriver_capabilities(browser: BrowserArg, headless: bool, binary: Option<&str>) -> Value {
    match browser {
        BrowserArg::Firefox => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("-headless".to_string());
            }
            args.push("--width=1920".to_string());
            args.push("--height=1080".to_string());
            let mut firefox_options = json!({ "args": args });
            if let Some(binary) = binary {
                firefox_options["binary"] = json!(binary);
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "acceptInsecureCerts": true,
                        "moz:firefoxOptions": firefox_options
                    }
                }
            })
        }
        BrowserArg::Edge => {
            let mut args = chromium_args(headless);
            args.push("--disable-cache".to_string());
            let mut edge_options = json!({ "args": args });
            if let Some(binary) = binary {
                edge_options["binary"] = json!(binary);
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "MicrosoftEdge",
                        "acceptInsecureCerts": true,
                        "ms:edgeOptions": edge_options
                    }
                }
            })
        }
        BrowserArg::Chrome => {
            let mut chrome_options = json!({ "args": chromium_args(headless) });
            if let Some(binary) = binary {
                chrome_options["binary"] = json!(binary);
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "acceptInsecureCerts": true,
                        "goog:chromeOptions": chrome_options
                    }
                }
            })
        }
    }
}

fn chromium_args(headless: bool) -> Vec<String> {
    let mut args = Vec::<String>::new();
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1920,1080".to_string());
    args.push("--disable-gpu".to_string());
    args.push("--disable-dev-shm-usage".to_string());
    args.push("--no-first-run".to_string());
    args.push("--no-default-browser-check".to_string());
    if !cfg!(target_os = "macos") {
        args.push("--no-sandbox".to_string());
    }
    args
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}

/// A driver executable launched for the duration of one run.
pub struct DriverProcess {
    child: Option<Child>,
    endpoint: String,
    log_path: PathBuf,
}

impl DriverProcess {
    /// Launches `binary` on a free local port and waits until it accepts
    /// connections.
    pub async fn launch(binary: &str, browser: BrowserArg, start_timeout: Duration) -> Result<Self> {
        let port = find_free_local_port()?;
        let endpoint = format!("http://127.0.0.1:{port}");
        let log_path = std::env::temp_dir().join(format!("carlist-webdriver-{port}.log"));

        let log_file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)?;
        let log_file_err = log_file.try_clone()?;

        let mut cmd = Command::new(binary);
        configure_webdriver_command(&mut cmd, binary, browser, port);
        cmd.stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .stdin(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| ScrapeError::BackendUnavailable(format!("failed to spawn {binary}: {e}")))?;

        let steps = (start_timeout.as_millis() / 200).max(1);
        for _ in 0..steps {
            if webdriver_reachable(&endpoint).await {
                info!(%endpoint, binary, "webdriver started");
                return Ok(Self {
                    child: Some(child),
                    endpoint,
                    log_path,
                });
            }
            if let Ok(Some(status)) = child.try_wait() {
                let mut reason = format!(
                    "{binary} exited early with status {status} (log: {})",
                    log_path.display()
                );
                if let Some(tail) = read_log_tail(&log_path, 30) {
                    reason = format!("{reason}; tail: {tail}");
                }
                return Err(ScrapeError::BackendUnavailable(reason));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let _ = child.kill();
        let _ = child.wait();
        Err(ScrapeError::BackendUnavailable(format!(
            "{binary} did not become ready in time (log: {})",
            log_path.display()
        )))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                warn!(%err, "failed to stop webdriver process");
            }
            let _ = child.wait();
            debug!(log = %self.log_path.display(), "webdriver process stopped");
        }
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn configure_webdriver_command(cmd: &mut Command, bin: &str, browser: BrowserArg, port: u16) {
    let lower = bin.to_ascii_lowercase();
    if matches!(browser, BrowserArg::Firefox) || lower.contains("geckodriver") {
        cmd.arg("--port").arg(port.to_string());
        return;
    }
    cmd.arg(format!("--port={port}"));
    if lower.contains("chromedriver") {
        cmd.arg("--log-level=SEVERE");
    }
}

async fn webdriver_reachable(endpoint: &str) -> bool {
    let Ok(parsed) = Url::parse(endpoint) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let port = parsed.port_or_known_default().unwrap_or(4444);
    matches!(
        tokio::time::timeout(
            Duration::from_secs(2),
            tokio::net::TcpStream::connect((host, port)),
        )
        .await,
        Ok(Ok(_))
    )
}

fn find_free_local_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn read_log_tail(path: &Path, lines: usize) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let tail = content
        .lines()
        .rev()
        .take(lines)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join(" | ");
    (!tail.is_empty()).then_some(tail)
}

/// Opens the session described by `config`, launching a driver first when a
/// binary was given.
pub async fn open_session(
    config: &WebDriverConfig,
) -> Result<(WebDriverSession, Option<DriverProcess>)> {
    let driver = match &config.driver_binary {
        Some(binary) => {
            Some(DriverProcess::launch(binary, config.browser, config.start_timeout).await?)
        }
        None => None,
    };
    let endpoint = driver
        .as_ref()
        .map(|d| d.endpoint().to_string())
        .unwrap_or_else(|| config.endpoint.clone());

    let session = WebDriverSession::connect(
        &endpoint,
        config.browser,
        config.headless,
        config.browser_binary.as_deref(),
    )
    .await?;
    Ok((session, driver))
}
