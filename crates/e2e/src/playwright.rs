//! Playwright browser automation
//!
//! Drives a Playwright browser by generating a Node session script, running
//! it with `node`, and parsing a single JSON result line from stdout. Each
//! session launches a fresh browser context; page state never leaks
//! between operations batched into different sessions.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::config::{HarnessConfig, Viewport};
use crate::error::{E2eError, E2eResult};

/// Prefix marking the one stdout line that carries the session result.
const RESULT_SENTINEL: &str = "SITECHECK_RESULT ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "chromium" => Some(Browser::Chromium),
            "firefox" => Some(Browser::Firefox),
            "webkit" => Some(Browser::Webkit),
            _ => None,
        }
    }
}

impl std::fmt::Display for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation within a browser session.
///
/// `Query*` variants append their result to the session output in order.
#[derive(Debug, Clone)]
pub enum PageOp {
    /// Navigate to a path relative to the base URL
    Goto { path: String },

    /// Wait until the page reports network idle
    WaitForNetworkIdle,

    SetViewport { width: u32, height: u32 },

    /// Press a key at page level (keyboard navigation)
    Press { key: String },

    /// Hover the first element matching the selector
    Hover { selector: String },

    /// Delay every subsequent request by `delay_ms` (degraded network)
    ThrottleRequests { delay_ms: u64 },

    Screenshot { file: PathBuf, full_page: bool },

    QueryTitle,
    QueryUrl,
    QueryText { selector: String },
    QueryAttribute { selector: String, name: String },
    QueryCount { selector: String },
    QueryVisible { selector: String },

    /// Evaluate a JS expression and return its JSON value
    QueryEvaluate { expression: String },
}

#[derive(Debug, Deserialize)]
struct SessionOutput {
    ok: bool,
    #[serde(default)]
    values: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Handle to the browser, the base context's navigable page.
///
/// Cheap to share behind an `Arc`; the current viewport is the only
/// mutable state.
pub struct PageHandle {
    base_url: String,
    browser: Browser,
    headless: bool,
    viewport: Mutex<Viewport>,
    nav_timeout_ms: u64,
    node_root: PathBuf,
    screenshot_dir: PathBuf,
}

impl PageHandle {
    pub fn new(config: &HarnessConfig, browser: Browser) -> E2eResult<Self> {
        Self::check_installed()?;
        std::fs::create_dir_all(&config.screenshot_dir)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            browser,
            headless: config.headless,
            viewport: Mutex::new(config.viewport),
            nav_timeout_ms: config.nav_timeout.as_millis() as u64,
            node_root: config.node_root.clone(),
            screenshot_dir: config.screenshot_dir.clone(),
        })
    }

    /// Check if Playwright is installed
    pub fn check_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    pub fn browser(&self) -> Browser {
        self.browser
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.lock()
    }

    /// Viewport for subsequently started sessions.
    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.lock() = viewport;
    }

    /// Build the Node session script for a batch of operations.
    pub fn build_script(&self, ops: &[PageOp]) -> String {
        let viewport = self.viewport();
        let mut script = format!(
            r#"const {{ chromium, firefox, webkit }} = require('playwright');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  const baseUrl = {base_url};
  const out = [];
  try {{
"#,
            browser = self.browser.as_str(),
            headless = self.headless,
            width = viewport.width,
            height = viewport.height,
            base_url = js_str(&self.base_url),
        );

        for (i, op) in ops.iter().enumerate() {
            script.push_str(&format!("\n    // Op {}: {}\n", i + 1, op_name(op)));
            script.push_str(&self.op_to_js(op));
            script.push('\n');
        }

        script.push_str(&format!(
            r#"
    console.log('{sentinel}' + JSON.stringify({{ ok: true, values: out }}));
  }} catch (error) {{
    console.log('{sentinel}' + JSON.stringify({{ ok: false, error: String((error && error.message) || error) }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            sentinel = RESULT_SENTINEL,
        ));

        script
    }

    fn op_to_js(&self, op: &PageOp) -> String {
        let timeout = self.nav_timeout_ms;
        match op {
            PageOp::Goto { path } => format!(
                "    await page.goto(baseUrl + {}, {{ timeout: {} }});",
                js_str(path),
                timeout
            ),
            PageOp::WaitForNetworkIdle => format!(
                "    await page.waitForLoadState('networkidle', {{ timeout: {} }});",
                timeout
            ),
            PageOp::SetViewport { width, height } => format!(
                "    await page.setViewportSize({{ width: {}, height: {} }});",
                width, height
            ),
            PageOp::Press { key } => {
                format!("    await page.keyboard.press({});", js_str(key))
            }
            PageOp::Hover { selector } => format!(
                "    await page.locator({}).first().hover();",
                js_str(selector)
            ),
            PageOp::ThrottleRequests { delay_ms } => format!(
                "    await page.route('**/*', route => {{ setTimeout(() => route.continue(), {}); }});",
                delay_ms
            ),
            PageOp::Screenshot { file, full_page } => format!(
                "    await page.screenshot({{ path: {}, fullPage: {} }});",
                js_str(&file.to_string_lossy()),
                full_page
            ),
            PageOp::QueryTitle => "    out.push(await page.title());".to_string(),
            PageOp::QueryUrl => "    out.push(page.url());".to_string(),
            PageOp::QueryText { selector } => format!(
                "    out.push(await page.locator({}).first().innerText());",
                js_str(selector)
            ),
            PageOp::QueryAttribute { selector, name } => format!(
                "    out.push(await page.locator({}).first().getAttribute({}));",
                js_str(selector),
                js_str(name)
            ),
            PageOp::QueryCount { selector } => format!(
                "    out.push(await page.locator({}).count());",
                js_str(selector)
            ),
            PageOp::QueryVisible { selector } => format!(
                "    out.push(await page.locator({}).first().isVisible());",
                js_str(selector)
            ),
            PageOp::QueryEvaluate { expression } => format!(
                "    out.push(await page.evaluate(() => ({})));",
                expression
            ),
        }
    }

    /// Run a batch of operations in one browser session and return the
    /// query results in order.
    pub async fn run(&self, ops: &[PageOp]) -> E2eResult<Vec<Value>> {
        let script = self.build_script(ops);

        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("session.js");
        std::fs::write(&script_path, &script)?;

        debug!(
            "running {} session with {} op(s)",
            self.browser,
            ops.len()
        );

        let output = TokioCommand::new("node")
            .arg(&script_path)
            .env("NODE_PATH", self.node_root.join("node_modules"))
            .current_dir(temp_dir.path())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_session_result(&stdout) {
            Some(result) => result,
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(E2eError::Playwright(format!(
                    "session produced no result line:\nstdout: {}\nstderr: {}",
                    stdout, stderr
                )))
            }
        }
    }

    /// Navigate to `/` and wait until the network goes idle.
    pub async fn goto_and_idle(&self) -> E2eResult<()> {
        self.run(&[goto_root(), PageOp::WaitForNetworkIdle]).await?;
        Ok(())
    }

    pub async fn title(&self) -> E2eResult<String> {
        let values = self.loaded_query(PageOp::QueryTitle).await?;
        as_string(values.into_iter().next())
    }

    pub async fn current_url(&self) -> E2eResult<String> {
        let values = self.loaded_query(PageOp::QueryUrl).await?;
        as_string(values.into_iter().next())
    }

    /// Inner text of the first element matching `selector` on the loaded page.
    pub async fn text(&self, selector: &str) -> E2eResult<String> {
        let values = self
            .loaded_query(PageOp::QueryText {
                selector: selector.to_string(),
            })
            .await?;
        as_string(values.into_iter().next())
    }

    pub async fn attribute(&self, selector: &str, name: &str) -> E2eResult<Option<String>> {
        let values = self
            .loaded_query(PageOp::QueryAttribute {
                selector: selector.to_string(),
                name: name.to_string(),
            })
            .await?;
        match values.into_iter().next() {
            Some(Value::Null) | None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(unexpected_value(&other)),
        }
    }

    pub async fn count(&self, selector: &str) -> E2eResult<u64> {
        let values = self
            .loaded_query(PageOp::QueryCount {
                selector: selector.to_string(),
            })
            .await?;
        match values.into_iter().next().and_then(|v| v.as_u64()) {
            Some(n) => Ok(n),
            None => Err(E2eError::Playwright("count query returned no number".into())),
        }
    }

    pub async fn is_visible(&self, selector: &str) -> E2eResult<bool> {
        let values = self
            .loaded_query(PageOp::QueryVisible {
                selector: selector.to_string(),
            })
            .await?;
        Ok(values
            .into_iter()
            .next()
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Evaluate a JS expression without navigating first.
    pub async fn evaluate(&self, expression: &str) -> E2eResult<Value> {
        let mut values = self
            .run(&[PageOp::QueryEvaluate {
                expression: expression.to_string(),
            }])
            .await?;
        values
            .pop()
            .ok_or_else(|| E2eError::Playwright("evaluate returned no value".into()))
    }

    /// Take a full-page or viewport screenshot of the loaded page.
    pub async fn screenshot(&self, name: &str, full_page: bool) -> E2eResult<PathBuf> {
        let file = self.screenshot_dir.join(format!("{}.png", name));
        self.run(&[
            goto_root(),
            PageOp::WaitForNetworkIdle,
            PageOp::Screenshot {
                file: file.clone(),
                full_page,
            },
        ])
        .await?;
        Ok(file)
    }

    async fn loaded_query(&self, query: PageOp) -> E2eResult<Vec<Value>> {
        self.run(&[goto_root(), PageOp::WaitForNetworkIdle, query])
            .await
    }
}

/// Navigate to the base URL root.
pub fn goto_root() -> PageOp {
    PageOp::Goto {
        path: "/".to_string(),
    }
}

fn op_name(op: &PageOp) -> String {
    match op {
        PageOp::Goto { path } => format!("goto:{}", path),
        PageOp::WaitForNetworkIdle => "wait:networkidle".to_string(),
        PageOp::SetViewport { width, height } => format!("viewport:{}x{}", width, height),
        PageOp::Press { key } => format!("press:{}", key),
        PageOp::Hover { selector } => format!("hover:{}", selector),
        PageOp::ThrottleRequests { delay_ms } => format!("throttle:{}ms", delay_ms),
        PageOp::Screenshot { file, .. } => format!("screenshot:{}", file.display()),
        PageOp::QueryTitle => "query:title".to_string(),
        PageOp::QueryUrl => "query:url".to_string(),
        PageOp::QueryText { selector } => format!("query:text:{}", selector),
        PageOp::QueryAttribute { selector, name } => {
            format!("query:attr:{}@{}", selector, name)
        }
        PageOp::QueryCount { selector } => format!("query:count:{}", selector),
        PageOp::QueryVisible { selector } => format!("query:visible:{}", selector),
        PageOp::QueryEvaluate { .. } => "query:evaluate".to_string(),
    }
}

/// Find and parse the sentinel result line in session stdout.
fn parse_session_result(stdout: &str) -> Option<E2eResult<Vec<Value>>> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.starts_with(RESULT_SENTINEL))?;
    let payload = &line[RESULT_SENTINEL.len()..];

    Some(match serde_json::from_str::<SessionOutput>(payload) {
        Ok(output) if output.ok => Ok(output.values),
        Ok(output) => Err(E2eError::Playwright(
            output.error.unwrap_or_else(|| "unknown session error".to_string()),
        )),
        Err(e) => Err(E2eError::Json(e)),
    })
}

/// Quote a string as a single-quoted JS literal.
fn js_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn as_string(value: Option<Value>) -> E2eResult<String> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(unexpected_value(&other)),
        None => Err(E2eError::Playwright("query returned no value".into())),
    }
}

fn unexpected_value(value: &Value) -> E2eError {
    E2eError::Playwright(format!("unexpected query result: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> PageHandle {
        let config = HarnessConfig::default();
        PageHandle {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            browser: Browser::Firefox,
            headless: true,
            viewport: Mutex::new(config.viewport),
            nav_timeout_ms: 10_000,
            node_root: config.node_root,
            screenshot_dir: config.screenshot_dir,
        }
    }

    #[test]
    fn test_js_str_escapes_quotes_and_backslashes() {
        assert_eq!(js_str("a'b"), r"'a\'b'");
        assert_eq!(js_str(r"a\b"), r"'a\\b'");
        assert_eq!(js_str(r#"meta[name="viewport"]"#), r#"'meta[name="viewport"]'"#);
    }

    #[test]
    fn test_build_script_contains_launch_and_queries() {
        let page = handle();
        let script = page.build_script(&[
            goto_root(),
            PageOp::WaitForNetworkIdle,
            PageOp::QueryText {
                selector: "h1".to_string(),
            },
        ]);

        assert!(script.contains("firefox.launch({ headless: true })"));
        assert!(script.contains("viewport: { width: 1280, height: 800 }"));
        assert!(script.contains("await page.goto(baseUrl + '/', { timeout: 10000 });"));
        assert!(script.contains("waitForLoadState('networkidle'"));
        assert!(script.contains("page.locator('h1').first().innerText()"));
        assert!(script.contains(RESULT_SENTINEL));
    }

    #[test]
    fn test_build_script_keyboard_and_viewport_ops() {
        let page = handle();
        let script = page.build_script(&[
            PageOp::SetViewport {
                width: 375,
                height: 667,
            },
            PageOp::Press {
                key: "Tab".to_string(),
            },
        ]);

        assert!(script.contains("setViewportSize({ width: 375, height: 667 })"));
        assert!(script.contains("page.keyboard.press('Tab')"));
    }

    #[test]
    fn test_build_script_throttle_and_hover_ops() {
        let page = handle();
        let script = page.build_script(&[
            PageOp::ThrottleRequests { delay_ms: 100 },
            goto_root(),
            PageOp::Hover {
                selector: "a".to_string(),
            },
        ]);

        assert!(script
            .contains("page.route('**/*', route => { setTimeout(() => route.continue(), 100); })"));
        // Throttling is installed before the navigation it degrades.
        let route_at = script.find("page.route").unwrap();
        let goto_at = script.find("page.goto").unwrap();
        assert!(route_at < goto_at);
        assert!(script.contains("page.locator('a').first().hover()"));
    }

    #[test]
    fn test_parse_session_result_success() {
        let stdout = format!(
            "npm noise\n{}{}\n",
            RESULT_SENTINEL,
            r#"{"ok":true,"values":["Example Domain",2]}"#
        );
        let values = parse_session_result(&stdout).unwrap().unwrap();
        assert_eq!(values[0], Value::String("Example Domain".into()));
        assert_eq!(values[1], Value::from(2));
    }

    #[test]
    fn test_parse_session_result_failure() {
        let stdout = format!(
            "{}{}\n",
            RESULT_SENTINEL,
            r#"{"ok":false,"error":"locator timed out"}"#
        );
        let err = parse_session_result(&stdout).unwrap().unwrap_err();
        assert!(matches!(err, E2eError::Playwright(msg) if msg.contains("locator timed out")));
    }

    #[test]
    fn test_parse_session_result_missing_line() {
        assert!(parse_session_result("no sentinel here\n").is_none());
    }

    #[test]
    fn test_set_viewport_applies_to_next_script() {
        let page = handle();
        page.set_viewport(Viewport::new(1920, 1080));
        let script = page.build_script(&[PageOp::QueryTitle]);
        assert!(script.contains("viewport: { width: 1920, height: 1080 }"));
    }
}
