//! Declarative harness configuration
//!
//! Everything here is passed through to the automation engine or the
//! outer runner unchanged; the harness interprets none of it beyond
//! wiring. Defaults mirror the capability matrix the suites were written
//! against.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::playwright::Browser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Configuration for the harness
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Target page, without a trailing slash
    pub base_url: String,

    /// Browser capability list; the harness runs the suite once per entry
    pub browsers: Vec<Browser>,

    pub headless: bool,

    /// Default viewport for new pages
    pub viewport: Viewport,

    /// Timeout for navigation and network-idle waits
    pub nav_timeout: Duration,

    /// Deadline for one test including its fixtures
    pub test_deadline: Duration,

    /// Page load budget asserted by the performance case (ms)
    pub load_budget_ms: u64,

    /// Retries per failing test, applied by the suite runner
    pub retries: u32,

    /// Visual diff threshold (0.0 - 100.0 percent)
    pub visual_threshold: f64,

    /// Absolute pixel-count cap below which a visual diff still passes
    pub max_diff_pixels: u64,

    /// Directory resolving the `playwright` npm package
    pub node_root: PathBuf,

    pub screenshot_dir: PathBuf,
    pub baseline_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "https://example.com".to_string(),
            browsers: vec![Browser::Chromium, Browser::Firefox, Browser::Webkit],
            headless: true,
            viewport: Viewport::new(1280, 800),
            nav_timeout: Duration::from_secs(10),
            test_deadline: Duration::from_secs(30),
            load_budget_ms: 5000,
            retries: 0,
            visual_threshold: 0.5,
            max_diff_pixels: 100,
            node_root: PathBuf::from("."),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            baseline_dir: PathBuf::from("test-results/baselines"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl HarnessConfig {
    /// The URL the page reports after navigating to `/`.
    pub fn landing_url(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_capability_matrix() {
        let config = HarnessConfig::default();
        assert_eq!(config.base_url, "https://example.com");
        assert_eq!(config.browsers.len(), 3);
        assert_eq!(config.viewport, Viewport::new(1280, 800));
        assert_eq!(config.visual_threshold, 0.5);
    }

    #[test]
    fn test_landing_url_normalizes_trailing_slash() {
        let mut config = HarnessConfig::default();
        assert_eq!(config.landing_url(), "https://example.com/");

        config.base_url = "https://example.com/".to_string();
        assert_eq!(config.landing_url(), "https://example.com/");
    }
}
