//! Built-in fixtures for the target page
//!
//! The base set layers the harness's fixtures on top of the automation
//! engine's capabilities: `page` exposes the navigable page handle,
//! `browser_info` the browser-identity descriptor, `ready_page` a page
//! already navigated and settled, and `perf_monitor` a wall-clock mark
//! recorder for timing assertions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use sitecheck_fixtures::{FixtureDefinition, FixtureError, FixtureResult, FixtureSet, Resolved};

use crate::config::{HarnessConfig, Viewport};
use crate::playwright::{Browser, PageHandle};

/// Browser-identity descriptor resolved from the live browser.
#[derive(Debug, Clone)]
pub struct BrowserInfo {
    pub name: String,
    pub user_agent: String,
    pub viewport: Viewport,
}

/// Wall-clock mark recorder scoped to one test.
pub struct PerfMonitor {
    start: Instant,
    marks: Mutex<Vec<(String, Duration)>>,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            marks: Mutex::new(Vec::new()),
        }
    }

    /// Record a named mark at the current offset from fixture setup.
    pub fn mark(&self, name: &str) {
        let elapsed = self.start.elapsed();
        self.marks.lock().push((name.to_string(), elapsed));
    }

    /// All marks in recording order.
    pub fn marks(&self) -> Vec<(String, Duration)> {
        self.marks.lock().clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for PerfMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Compose the base fixture set for one browser.
///
/// The returned set is validated; a typo in a dependency name fails here,
/// before any test runs.
pub fn base_set(config: &HarnessConfig, browser: Browser) -> FixtureResult<FixtureSet> {
    let mut set = FixtureSet::new();

    let page_config = config.clone();
    set.register(FixtureDefinition::new("page", &[], move |_deps| {
        let config = page_config.clone();
        async move {
            let page = PageHandle::new(&config, browser)
                .map_err(|e| FixtureError::setup("page", e))?;
            Ok(Resolved::value(page))
        }
    }))?;

    set.register(FixtureDefinition::new(
        "browser_info",
        &["page"],
        move |deps| async move {
            let page = deps.get::<PageHandle>("page")?;
            let user_agent = match page
                .evaluate("navigator.userAgent")
                .await
                .map_err(|e| FixtureError::setup("browser_info", e))?
            {
                Value::String(ua) => ua,
                other => {
                    return Err(FixtureError::setup(
                        "browser_info",
                        anyhow::anyhow!("userAgent query returned {other}"),
                    ))
                }
            };

            Ok(Resolved::value(BrowserInfo {
                name: page.browser().to_string(),
                user_agent,
                viewport: page.viewport(),
            }))
        },
    ))?;

    set.register(FixtureDefinition::new(
        "ready_page",
        &["page"],
        |deps| async move {
            let page = deps.get::<PageHandle>("page")?;
            page.goto_and_idle()
                .await
                .map_err(|e| FixtureError::setup("ready_page", e))?;
            debug!("page navigated and network idle");
            // Same handle as `page`; dependents share the Arc.
            Ok(Resolved::shared(page))
        },
    ))?;

    set.register(FixtureDefinition::new("perf_monitor", &[], |_deps| async {
        let monitor = Arc::new(PerfMonitor::new());
        let report = monitor.clone();
        Ok(Resolved::shared(monitor).with_teardown(move || async move {
            for (name, at) in report.marks() {
                debug!("perf mark '{}' at {}ms", name, at.as_millis());
            }
            Ok(())
        }))
    }))?;

    set.validate()?;
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_set_composition() {
        let set = base_set(&HarnessConfig::default(), Browser::Chromium).unwrap();

        for name in ["page", "browser_info", "ready_page", "perf_monitor"] {
            assert!(set.contains(name), "missing fixture '{name}'");
        }

        // Dependents resolve after the page handle.
        let order = set.resolution_order(&["browser_info", "ready_page"]).unwrap();
        assert_eq!(order, vec!["page", "browser_info", "ready_page"]);
    }

    #[test]
    fn test_base_set_rejects_duplicate_extension() {
        let mut set = base_set(&HarnessConfig::default(), Browser::Chromium).unwrap();
        let err = set
            .register(FixtureDefinition::new("page", &[], |_deps| async {
                Ok(Resolved::value(()))
            }))
            .unwrap_err();
        assert!(matches!(err, FixtureError::DuplicateFixture { name } if name == "page"));
    }

    #[test]
    fn test_perf_monitor_marks_in_order() {
        let monitor = PerfMonitor::new();
        monitor.mark("navigation-start");
        std::thread::sleep(Duration::from_millis(2));
        monitor.mark("navigation-end");

        let marks = monitor.marks();
        assert_eq!(marks[0].0, "navigation-start");
        assert_eq!(marks[1].0, "navigation-end");
        assert!(marks[1].1 >= marks[0].1);
    }
}
