//! Sitecheck E2E Harness
//!
//! Rust-controlled browser test suites for the example.com page:
//! - Controls Playwright via generated Node session scripts
//! - Composes per-test fixtures on top of the base page handle
//! - Performs visual regression testing with baseline screenshots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Suite runner (Rust)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Suite                                                      │
//! │    ├── per case: fresh ExecutionContext                     │
//! │    ├── resolve(requested fixtures) -> values                │
//! │    ├── body(values) -> assertions                           │
//! │    └── teardown_all() -> reverse order, always runs         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fixtures (sitecheck-fixtures)                              │
//! │    ├── page         -> PageHandle                           │
//! │    ├── browser_info -> BrowserInfo      (depends on page)   │
//! │    ├── ready_page   -> navigated page   (depends on page)   │
//! │    └── perf_monitor -> PerfMonitor                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PageHandle -> node script -> Playwright -> browser         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cases;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod playwright;
pub mod runner;
pub mod visual;

pub use config::{HarnessConfig, Viewport};
pub use error::{E2eError, E2eResult};
pub use fixtures::{base_set, BrowserInfo, PerfMonitor};
pub use playwright::{Browser, PageHandle};
pub use runner::{Suite, SuiteResult, TestCase, TestResult};
