//! Suite runner: per-test context lifecycle and result aggregation
//!
//! Each case gets a fresh `ExecutionContext`; requested fixtures are
//! resolved before the body runs and torn down afterwards whether or not
//! the body succeeded. Body errors and teardown aggregates are both
//! attached to the test result so a failing teardown never masks the
//! body's outcome.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use sitecheck_fixtures::{ExecutionContext, FixtureError, FixtureSet, FixtureValue};

use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};

/// The resolved fixture values a test body requested, by name.
pub struct Fixtures {
    values: HashMap<String, FixtureValue>,
}

impl Fixtures {
    fn from_context(ctx: &ExecutionContext, names: &[String]) -> Self {
        let mut values = HashMap::with_capacity(names.len());
        for name in names {
            if let Some(value) = ctx.value(name) {
                values.insert(name.clone(), value);
            }
        }
        Self { values }
    }

    /// Typed access to a requested fixture's value.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> E2eResult<Arc<T>> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| FixtureError::UnknownFixture {
                name: name.to_string(),
            })?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| {
                E2eError::Fixture(FixtureError::TypeMismatch {
                    name: name.to_string(),
                })
            })
    }
}

type BodyFn = Arc<dyn Fn(Fixtures) -> BoxFuture<'static, E2eResult<()>> + Send + Sync>;

/// A named test case requesting fixtures by name.
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub fixtures: Vec<String>,
    body: BodyFn,
}

impl TestCase {
    pub fn new<F, Fut>(name: &str, fixtures: &[&str], body: F) -> Self
    where
        F: Fn(Fixtures) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = E2eResult<()>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            fixtures: fixtures.iter().map(|f| f.to_string()).collect(),
            body: Arc::new(move |fixtures| Box::pin(body(fixtures))),
        }
    }
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub teardown_error: Option<String>,
}

/// Result of running a whole suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub browser: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

/// Runs a list of cases against one composed fixture set.
pub struct Suite {
    set: FixtureSet,
    cases: Vec<TestCase>,
    config: HarnessConfig,
    label: String,
}

impl Suite {
    pub fn new(label: &str, set: FixtureSet, config: HarnessConfig) -> Self {
        Self {
            set,
            cases: Vec::new(),
            config,
            label: label.to_string(),
        }
    }

    pub fn add_case(&mut self, case: TestCase) {
        self.cases.push(case);
    }

    pub fn with_cases(mut self, cases: impl IntoIterator<Item = TestCase>) -> Self {
        self.cases.extend(cases);
        self
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Run every case sequentially, retrying failures up to the
    /// configured count. Fixture resolution and teardown inside one case
    /// are strictly sequential; nothing is shared between cases.
    pub async fn run(&self) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(self.cases.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("[{}] running {} test(s)...", self.label, self.cases.len());

        for case in &self.cases {
            let mut result = self.run_case(case).await;
            let mut attempt = 1;
            while !result.success && attempt <= self.config.retries {
                warn!(
                    "[{}] retrying '{}' (attempt {}/{})",
                    self.label,
                    case.name,
                    attempt + 1,
                    self.config.retries + 1
                );
                result = self.run_case(case).await;
                attempt += 1;
            }

            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result
                        .error
                        .as_deref()
                        .or(result.teardown_error.as_deref())
                        .unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "[{}] {} passed, {} failed ({} ms)",
            self.label, passed, failed, duration_ms
        );

        SuiteResult {
            browser: self.label.clone(),
            total: self.cases.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    async fn run_case(&self, case: &TestCase) -> TestResult {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.test_deadline;
        let mut ctx = ExecutionContext::with_deadline(deadline);

        let names: Vec<&str> = case.fixtures.iter().map(String::as_str).collect();
        let error = match self.set.resolve(&names, &mut ctx).await {
            Ok(()) => {
                let fixtures = Fixtures::from_context(&ctx, &case.fixtures);
                match tokio::time::timeout_at(deadline, (case.body)(fixtures)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => {
                        ctx.cancel();
                        Some(
                            E2eError::Timeout(format!(
                                "test body to finish within the {}ms deadline",
                                self.config.test_deadline.as_millis()
                            ))
                            .to_string(),
                        )
                    }
                }
            }
            Err(e) => Some(e.to_string()),
        };

        // Teardown always runs; its failures are reported alongside the
        // body's, never instead of them.
        let teardown_error = ctx.teardown_all().await.err().map(|e| e.to_string());

        TestResult {
            name: case.name.clone(),
            success: error.is_none() && teardown_error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            error,
            teardown_error,
        }
    }

    /// Write suite results to a JSON file in the output directory.
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self
            .config
            .output_dir
            .join(format!("results-{}.json", self.label));
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("results written to: {}", path.display());
        Ok(path)
    }
}
