//! The example.com test cases
//!
//! Each case names the fixtures it needs and asserts against their
//! resolved values. The target is the static example.com page, so most
//! cases only need `ready_page`; interaction-heavy cases batch their
//! operations into a single browser session via the raw `page` handle.

use serde_json::Value;
use tracing::info;

use crate::config::{HarnessConfig, Viewport};
use crate::error::{E2eError, E2eResult};
use crate::fixtures::{BrowserInfo, PerfMonitor};
use crate::playwright::{goto_root, PageHandle, PageOp};
use crate::runner::TestCase;
use crate::visual::{VisualConfig, VisualTester};

const LINK_SELECTOR: &str = r#"a[href*="iana.org"]"#;

const NAV_TIMING_EXPR: &str = "(() => { \
    const nav = performance.getEntriesByType('navigation')[0]; \
    return { \
        domContentLoaded: nav.domContentLoadedEventEnd - nav.domContentLoadedEventStart, \
        loadComplete: nav.loadEventEnd - nav.loadEventStart \
    }; })()";

const FEATURE_PROBE_EXPR: &str = "({ \
    flexbox: CSS.supports('display', 'flex'), \
    grid: CSS.supports('display', 'grid'), \
    customProperties: CSS.supports('--test', 'initial'), \
    promises: typeof Promise !== 'undefined', \
    fetch: typeof fetch !== 'undefined' })";

fn ensure(cond: bool, msg: impl Into<String>) -> E2eResult<()> {
    if cond {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(msg.into()))
    }
}

/// Build the full case list for one suite run.
pub fn example_page_cases(config: &HarnessConfig) -> Vec<TestCase> {
    let mut cases = Vec::new();

    cases.push(TestCase::new(
        "page-title",
        &["ready_page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("ready_page")?;
            let title = page.title().await?;
            ensure(title == "Example Domain", format!("unexpected title: {title:?}"))
        },
    ));

    cases.push(TestCase::new(
        "main-heading",
        &["ready_page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("ready_page")?;
            ensure(page.is_visible("h1").await?, "h1 is not visible")?;
            let heading = page.text("h1").await?;
            ensure(
                heading == "Example Domain",
                format!("unexpected heading: {heading:?}"),
            )
        },
    ));

    cases.push(TestCase::new(
        "info-paragraph",
        &["ready_page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("ready_page")?;
            let text = page.text("p").await?;
            ensure(
                text.contains("This domain is for use in illustrative examples"),
                format!("paragraph missing domain notice: {text:?}"),
            )?;
            ensure(
                text.contains("You may use this domain in literature"),
                format!("paragraph missing usage notice: {text:?}"),
            )
        },
    ));

    cases.push(TestCase::new(
        "more-information-link",
        &["ready_page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("ready_page")?;
            ensure(page.is_visible(LINK_SELECTOR).await?, "link is not visible")?;

            let text = page.text(LINK_SELECTOR).await?;
            ensure(
                text == "More information...",
                format!("unexpected link text: {text:?}"),
            )?;

            let href = page.attribute(LINK_SELECTOR, "href").await?;
            ensure(
                href.as_deref().is_some_and(|h| h.contains("iana.org")),
                format!("unexpected href: {href:?}"),
            )
        },
    ));

    let expected_url = config.landing_url();
    cases.push(TestCase::new("page-url", &["ready_page"], move |fx| {
        let expected = expected_url.clone();
        async move {
            let page = fx.get::<PageHandle>("ready_page")?;
            let url = page.current_url().await?;
            ensure(url == expected, format!("unexpected url: {url:?}"))
        }
    }));

    cases.push(TestCase::new("meta-tags", &["ready_page"], |fx| async move {
        let page = fx.get::<PageHandle>("ready_page")?;
        let charset = page.count("meta[charset]").await?;
        ensure(charset == 1, format!("expected one charset meta, found {charset}"))?;
        let viewport = page.count(r#"meta[name="viewport"]"#).await?;
        ensure(
            viewport == 1,
            format!("expected one viewport meta, found {viewport}"),
        )
    }));

    cases.push(TestCase::new(
        "document-structure",
        &["ready_page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("ready_page")?;
            for (selector, expected) in [("h1", 1), ("p", 2), ("a", 1)] {
                let count = page.count(selector).await?;
                ensure(
                    count == expected,
                    format!("expected {expected} '{selector}' element(s), found {count}"),
                )?;
            }
            let body = page.text("body").await?;
            ensure(!body.is_empty(), "body text is empty")?;
            ensure(
                body.contains("Example Domain"),
                "body text missing the domain name",
            )
        },
    ));

    cases.push(TestCase::new(
        "browser-identity",
        &["browser_info"],
        |fx| async move {
            let info = fx.get::<BrowserInfo>("browser_info")?;
            info!("browser: {} ({})", info.name, info.user_agent);
            ensure(!info.name.is_empty(), "browser name is empty")?;
            ensure(!info.user_agent.is_empty(), "user agent is empty")?;
            ensure(
                info.viewport.width > 0 && info.viewport.height > 0,
                format!(
                    "degenerate viewport: {}x{}",
                    info.viewport.width, info.viewport.height
                ),
            )
        },
    ));

    cases.push(TestCase::new(
        "responsive-layout",
        &["page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("page")?;
            let original = page.viewport();

            for viewport in [
                Viewport::new(1920, 1080),
                Viewport::new(768, 1024),
                Viewport::new(375, 667),
            ] {
                page.set_viewport(viewport);
                let visible = page.is_visible("h1").await?;
                if !visible {
                    page.set_viewport(original);
                    return Err(E2eError::AssertionFailed(format!(
                        "h1 hidden at {}x{}",
                        viewport.width, viewport.height
                    )));
                }
            }

            page.set_viewport(original);
            Ok(())
        },
    ));

    cases.push(TestCase::new(
        "keyboard-navigation",
        &["page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("page")?;
            let values = page
                .run(&[
                    goto_root(),
                    PageOp::WaitForNetworkIdle,
                    PageOp::Hover {
                        selector: LINK_SELECTOR.to_string(),
                    },
                    PageOp::QueryVisible {
                        selector: LINK_SELECTOR.to_string(),
                    },
                    PageOp::Press {
                        key: "Tab".to_string(),
                    },
                    PageOp::QueryEvaluate {
                        expression: "document.activeElement.tagName".to_string(),
                    },
                    PageOp::Press {
                        key: "Enter".to_string(),
                    },
                    PageOp::WaitForNetworkIdle,
                    PageOp::QueryUrl,
                ])
                .await?;

            let hovered_visible = values
                .first()
                .and_then(Value::as_bool)
                .unwrap_or(false);
            ensure(hovered_visible, "link disappeared on hover")?;

            let focused = values.get(1).and_then(Value::as_str).unwrap_or_default();
            ensure(
                focused == "A",
                format!("Tab focused {focused:?}, expected the link"),
            )?;

            let landed = values.last().and_then(Value::as_str).unwrap_or_default();
            ensure(
                landed.contains("iana.org"),
                format!("Enter on the focused link landed on {landed:?}"),
            )
        },
    ));

    cases.push(TestCase::new(
        "network-conditions",
        &["page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("page")?;
            // Every request is delayed 100ms; the page must still render.
            let values = page
                .run(&[
                    PageOp::ThrottleRequests { delay_ms: 100 },
                    goto_root(),
                    PageOp::QueryText {
                        selector: "h1".to_string(),
                    },
                ])
                .await?;

            let heading = values.last().and_then(Value::as_str).unwrap_or_default();
            ensure(
                heading == "Example Domain",
                format!("heading under throttled network: {heading:?}"),
            )
        },
    ));

    let budget_ms = config.load_budget_ms;
    cases.push(TestCase::new(
        "load-performance",
        &["page", "perf_monitor"],
        move |fx| async move {
            let page = fx.get::<PageHandle>("page")?;
            let perf = fx.get::<PerfMonitor>("perf_monitor")?;

            perf.mark("navigation-start");
            let values = page
                .run(&[
                    goto_root(),
                    PageOp::WaitForNetworkIdle,
                    PageOp::QueryEvaluate {
                        expression: NAV_TIMING_EXPR.to_string(),
                    },
                ])
                .await?;
            perf.mark("load-complete");

            let marks = perf.marks();
            ensure(
                marks.len() == 2 && marks[1].1 >= marks[0].1,
                "performance marks out of order",
            )?;

            let load_ms = marks[1].1.as_millis() as u64;
            info!("page load time: {}ms", load_ms);
            ensure(
                load_ms < budget_ms,
                format!("load took {load_ms}ms, budget is {budget_ms}ms"),
            )?;

            let timing = values.last().cloned().unwrap_or(Value::Null);
            let dcl = timing
                .get("domContentLoaded")
                .and_then(Value::as_f64)
                .unwrap_or(-1.0);
            ensure(
                dcl >= 0.0,
                format!("navigation timing missing domContentLoaded: {timing}"),
            )
        },
    ));

    cases.push(TestCase::new(
        "feature-support",
        &["ready_page"],
        |fx| async move {
            let page = fx.get::<PageHandle>("ready_page")?;
            let probes = page.evaluate(FEATURE_PROBE_EXPR).await?;

            for feature in ["flexbox", "grid", "promises", "fetch"] {
                let supported = probes
                    .get(feature)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                ensure(supported, format!("browser lacks {feature} support"))?;
            }

            ensure(page.is_visible("h1").await?, "h1 is not visible")?;
            ensure(page.is_visible("a").await?, "link is not visible")
        },
    ));

    let visual = VisualConfig {
        baseline_dir: config.baseline_dir.clone(),
        actual_dir: config.screenshot_dir.clone(),
        diff_dir: config.output_dir.join("diffs"),
        threshold: config.visual_threshold,
        max_diff_pixels: config.max_diff_pixels,
        auto_update: false,
    };
    cases.push(TestCase::new("visual-baseline", &["page"], move |fx| {
        let visual = visual.clone();
        async move {
            let page = fx.get::<PageHandle>("page")?;
            let name = format!("example-page-{}", page.browser());
            page.screenshot(&name, true).await?;

            let threshold = visual.threshold;
            let tester = VisualTester::new(visual)?;
            match tester.compare(&name, None) {
                Ok(diff) if diff.matches => Ok(()),
                Ok(diff) => Err(E2eError::ScreenshotMismatch {
                    name,
                    diff_percent: diff.diff_percent,
                    threshold,
                }),
                Err(E2eError::BaselineNotFound(path)) => {
                    // First run: write the baseline, then fail so the
                    // result is distinguishable from a real match.
                    tester.update_baseline(&name)?;
                    info!("wrote new baseline for '{}'", name);
                    Err(E2eError::BaselineNotFound(path))
                }
                Err(e) => Err(e),
            }
        }
    }));

    cases
}
