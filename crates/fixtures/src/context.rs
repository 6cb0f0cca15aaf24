//! Per-test execution context: memoized fixture values and teardown stack

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FixtureError, FixtureResult, TeardownFailure};

/// A resolved fixture value, shared with every dependent within one context.
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

/// A teardown continuation recorded during setup. Runs exactly once.
pub type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// The per-test cache and lifecycle scope for resolved fixture values.
///
/// Created fresh for every test invocation, destroyed after the test and
/// its teardowns complete. The cache is private to this context; nothing
/// is shared across tests.
pub struct ExecutionContext {
    /// Memoized values, at most one per fixture name
    cache: HashMap<String, FixtureValue>,

    /// Teardown continuations in setup order; drained in reverse
    teardowns: Vec<(String, Teardown)>,

    /// Names in the order their setups completed
    setup_order: Vec<String>,

    /// Deadline for the enclosing test, if any
    deadline: Option<Instant>,

    /// Cancellation threaded from the enclosing test
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Create a context with no deadline.
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            teardowns: Vec::new(),
            setup_order: Vec::new(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a context whose fixture setups must finish before `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new()
        }
    }

    /// Token observed by setups during opaque suspension points.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every in-flight and future setup in this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` means unbounded.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether a fixture has already been resolved in this context.
    pub fn is_resolved(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Raw resolved value, if present.
    pub fn value(&self, name: &str) -> Option<FixtureValue> {
        self.cache.get(name).cloned()
    }

    /// Typed access to a resolved fixture value.
    ///
    /// Returns the same `Arc` for every call with the same name within
    /// this context.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> FixtureResult<Arc<T>> {
        let value = self.cache.get(name).ok_or_else(|| FixtureError::UnknownFixture {
            name: name.to_string(),
        })?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| FixtureError::TypeMismatch {
                name: name.to_string(),
            })
    }

    /// Names in the order their setups completed.
    pub fn setup_order(&self) -> &[String] {
        &self.setup_order
    }

    pub(crate) fn insert(&mut self, name: String, value: FixtureValue) {
        self.setup_order.push(name.clone());
        self.cache.insert(name, value);
    }

    pub(crate) fn push_teardown(&mut self, name: String, teardown: Teardown) {
        self.teardowns.push((name, teardown));
    }

    /// Run every recorded teardown in the exact reverse of setup order.
    ///
    /// A failing teardown never prevents the remaining ones from running;
    /// all failures are collected into a single
    /// [`FixtureError::TeardownAggregate`]. The cache is cleared either way.
    pub async fn teardown_all(&mut self) -> FixtureResult<()> {
        let mut failures = Vec::new();

        while let Some((name, teardown)) = self.teardowns.pop() {
            debug!("tearing down fixture '{}'", name);
            if let Err(error) = teardown().await {
                warn!("teardown of fixture '{}' failed: {}", name, error);
                failures.push(TeardownFailure {
                    fixture: name,
                    error,
                });
            }
        }

        self.cache.clear();
        self.setup_order.clear();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FixtureError::TeardownAggregate { failures })
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unresolved_name_fails() {
        let ctx = ExecutionContext::new();
        let err = ctx.get::<u32>("missing").unwrap_err();
        assert!(matches!(err, FixtureError::UnknownFixture { name } if name == "missing"));
    }

    #[test]
    fn test_get_wrong_type_fails() {
        let mut ctx = ExecutionContext::new();
        ctx.insert("answer".to_string(), Arc::new(42u32));

        assert_eq!(*ctx.get::<u32>("answer").unwrap(), 42);
        let err = ctx.get::<String>("answer").unwrap_err();
        assert!(matches!(err, FixtureError::TypeMismatch { name } if name == "answer"));
    }

    #[test]
    fn test_get_returns_identical_arc() {
        let mut ctx = ExecutionContext::new();
        ctx.insert("v".to_string(), Arc::new("hello".to_string()));

        let first = ctx.get::<String>("v").unwrap();
        let second = ctx.get::<String>("v").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_teardown_all_on_empty_context() {
        let mut ctx = ExecutionContext::new();
        ctx.teardown_all().await.unwrap();
    }
}
