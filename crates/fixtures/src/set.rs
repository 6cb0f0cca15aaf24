//! Named fixture definitions and dependency-aware resolution
//!
//! Fixtures form a directed acyclic graph of named providers. The graph is
//! checked as a whole (`validate`) or per request (`resolution_order`)
//! before any setup runs, so unknown names and cycles surface at
//! construction time rather than mid-test.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{ExecutionContext, FixtureValue, Teardown};
use crate::error::{FixtureError, FixtureResult};

/// The resolved dependency values handed to a fixture's setup.
///
/// Only declared dependencies are visible; requesting anything else fails
/// with [`FixtureError::UnknownFixture`], which catches undeclared access.
pub struct Deps {
    values: HashMap<String, FixtureValue>,
    cancel: CancellationToken,
}

impl Deps {
    /// Typed access to a declared dependency's resolved value.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> FixtureResult<Arc<T>> {
        let value = self.values.get(name).ok_or_else(|| FixtureError::UnknownFixture {
            name: name.to_string(),
        })?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| FixtureError::TypeMismatch {
                name: name.to_string(),
            })
    }

    /// Cancellation token threaded from the enclosing test's deadline.
    ///
    /// Setups with opaque suspension points (page loads, network-idle
    /// waits) should observe this alongside their own timeouts.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// What a fixture's setup hands back: the value plus an optional teardown
/// continuation that runs after every dependent has finished.
pub struct Resolved {
    pub(crate) value: FixtureValue,
    pub(crate) teardown: Option<Teardown>,
}

impl Resolved {
    /// Wrap a plain value.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            teardown: None,
        }
    }

    /// Reuse an already shared value (the context will hand out this
    /// exact `Arc`).
    pub fn shared<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            teardown: None,
        }
    }

    /// Attach a teardown continuation.
    pub fn with_teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.teardown = Some(Box::new(move || Box::pin(teardown())));
        self
    }
}

type SetupFn = Arc<dyn Fn(Deps) -> BoxFuture<'static, FixtureResult<Resolved>> + Send + Sync>;

/// A named, reusable unit of per-test setup/teardown logic.
pub struct FixtureDefinition {
    name: String,
    dependencies: Vec<String>,
    setup: SetupFn,
}

impl FixtureDefinition {
    pub fn new<F, Fut>(name: &str, dependencies: &[&str], setup: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FixtureResult<Resolved>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            setup: Arc::new(move |deps| Box::pin(setup(deps))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// A composed set of named fixtures.
///
/// Duplicate names are rejected on registration; overriding an existing
/// fixture is a separate, intentional operation ([`FixtureSet::replace`]).
#[derive(Default)]
pub struct FixtureSet {
    fixtures: BTreeMap<String, FixtureDefinition>,
}

impl FixtureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one fixture. Fails if the name is already taken.
    pub fn register(&mut self, def: FixtureDefinition) -> FixtureResult<()> {
        if self.fixtures.contains_key(def.name()) {
            return Err(FixtureError::DuplicateFixture {
                name: def.name().to_string(),
            });
        }
        self.fixtures.insert(def.name().to_string(), def);
        Ok(())
    }

    /// Merge new fixtures into this set. Any name collision fails the
    /// whole call with [`FixtureError::DuplicateFixture`].
    pub fn extend(&mut self, defs: impl IntoIterator<Item = FixtureDefinition>) -> FixtureResult<()> {
        for def in defs {
            self.register(def)?;
        }
        Ok(())
    }

    /// Override an existing fixture. Fails if the name is not registered,
    /// so a typo cannot silently become a new fixture.
    pub fn replace(&mut self, def: FixtureDefinition) -> FixtureResult<()> {
        if !self.fixtures.contains_key(def.name()) {
            return Err(FixtureError::ReplaceMissing {
                name: def.name().to_string(),
            });
        }
        self.fixtures.insert(def.name().to_string(), def);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fixtures.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fixtures.keys().map(String::as_str)
    }

    /// Check the whole dependency graph: every declared dependency must be
    /// registered and no cycle may exist. Run this once after composing
    /// the set, before any test executes.
    pub fn validate(&self) -> FixtureResult<()> {
        let all: Vec<&str> = self.fixtures.keys().map(String::as_str).collect();
        self.topological_order(&all)?;
        Ok(())
    }

    /// Deterministic topological order for the requested names and their
    /// transitive dependencies, dependencies first.
    pub fn resolution_order(&self, requested: &[&str]) -> FixtureResult<Vec<String>> {
        self.topological_order(requested)
    }

    fn topological_order(&self, requested: &[&str]) -> FixtureResult<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut order = Vec::new();

        // Iterative DFS; `path` tracks the active chain for cycle reporting.
        for &root in requested {
            if marks.get(root) == Some(&Mark::Done) {
                continue;
            }
            if !self.fixtures.contains_key(root) {
                return Err(FixtureError::UnknownFixture {
                    name: root.to_string(),
                });
            }

            let mut path: Vec<String> = vec![root.to_string()];
            let mut stack: Vec<(String, usize)> = vec![(root.to_string(), 0)];
            marks.insert(root.to_string(), Mark::InProgress);

            while let Some((name, dep_index)) = stack.pop() {
                let deps = self.fixtures[&name].dependencies();
                if dep_index < deps.len() {
                    let dep = deps[dep_index].clone();
                    stack.push((name, dep_index + 1));
                    match marks.get(&dep) {
                        Some(Mark::Done) => {}
                        Some(Mark::InProgress) => {
                            let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                            let mut cycle: Vec<String> = path[start..].to_vec();
                            cycle.push(dep);
                            return Err(FixtureError::CircularDependency { cycle });
                        }
                        None => {
                            if !self.fixtures.contains_key(&dep) {
                                return Err(FixtureError::UnknownFixture { name: dep });
                            }
                            marks.insert(dep.clone(), Mark::InProgress);
                            path.push(dep.clone());
                            stack.push((dep, 0));
                        }
                    }
                } else {
                    marks.insert(name.clone(), Mark::Done);
                    path.pop();
                    order.push(name);
                }
            }
        }

        Ok(order)
    }

    /// Resolve the requested fixtures into `ctx`, transitively resolving
    /// declared dependencies first.
    ///
    /// Already-memoized names are skipped without re-running their setup.
    /// The order and any unknown name or cycle are established before the
    /// first setup runs. Each setup is bounded by the context deadline and
    /// observes the context's cancellation token.
    pub async fn resolve(&self, requested: &[&str], ctx: &mut ExecutionContext) -> FixtureResult<()> {
        let order = self.resolution_order(requested)?;

        for name in order {
            if ctx.is_resolved(&name) {
                continue;
            }

            let def = self
                .fixtures
                .get(&name)
                .ok_or_else(|| FixtureError::UnknownFixture { name: name.clone() })?;

            let mut values = HashMap::with_capacity(def.dependencies().len());
            for dep in def.dependencies() {
                let value = ctx
                    .value(dep)
                    .ok_or_else(|| FixtureError::UnknownFixture { name: dep.clone() })?;
                values.insert(dep.clone(), value);
            }

            debug!("setting up fixture '{}'", name);
            let cancel = ctx.cancellation();
            let remaining = ctx.remaining();
            let deps = Deps {
                values,
                cancel: cancel.clone(),
            };
            let setup = (def.setup)(deps);

            let resolved = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(FixtureError::Cancelled { name: name.clone() });
                }
                outcome = async {
                    match remaining {
                        Some(limit) => match tokio::time::timeout(limit, setup).await {
                            Ok(result) => result,
                            Err(_) => Err(FixtureError::SetupTimeout {
                                name: name.clone(),
                                limit_ms: limit.as_millis() as u64,
                            }),
                        },
                        None => setup.await,
                    }
                } => outcome?,
            };

            ctx.insert(name.clone(), resolved.value);
            if let Some(teardown) = resolved.teardown {
                ctx.push_teardown(name, teardown);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn counting(name: &'static str, deps: &[&str], counter: Arc<AtomicUsize>) -> FixtureDefinition {
        FixtureDefinition::new(name, deps, move |_deps| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Resolved::value(name.to_string()))
            }
        })
    }

    #[tokio::test]
    async fn test_memoized_chain_scenario() {
        // {a: setup->1, b (depends on a): setup->(a value)+1}
        let a_setups = Arc::new(AtomicUsize::new(0));
        let a_count = a_setups.clone();

        let mut set = FixtureSet::new();
        set.register(FixtureDefinition::new("a", &[], move |_deps| {
            let a_count = a_count.clone();
            async move {
                a_count.fetch_add(1, Ordering::SeqCst);
                Ok(Resolved::value(1u32))
            }
        }))
        .unwrap();
        set.register(FixtureDefinition::new("b", &["a"], |deps| async move {
            let a = deps.get::<u32>("a")?;
            Ok(Resolved::value(*a + 1))
        }))
        .unwrap();

        let mut ctx = ExecutionContext::new();
        set.resolve(&["b"], &mut ctx).await.unwrap();
        assert_eq!(*ctx.get::<u32>("a").unwrap(), 1);
        assert_eq!(*ctx.get::<u32>("b").unwrap(), 2);

        // Second resolve in the same context: cached, a's setup not re-run.
        let first_b = ctx.get::<u32>("b").unwrap();
        set.resolve(&["b"], &mut ctx).await.unwrap();
        let second_b = ctx.get::<u32>("b").unwrap();
        assert!(Arc::ptr_eq(&first_b, &second_b));
        assert_eq!(a_setups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolution_is_topological_and_teardown_reversed() {
        let setup_log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let teardown_log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let mut set = FixtureSet::new();
        for (name, deps) in [("a", vec![]), ("b", vec!["a"]), ("c", vec!["a", "b"])] {
            let setup_log = setup_log.clone();
            let teardown_log = teardown_log.clone();
            let deps: Vec<&str> = deps;
            set.register(FixtureDefinition::new(name, &deps, move |_deps| {
                let setup_log = setup_log.clone();
                let teardown_log = teardown_log.clone();
                async move {
                    setup_log.lock().unwrap().push(name.to_string());
                    Ok(Resolved::value(name.to_string()).with_teardown(move || async move {
                        teardown_log.lock().unwrap().push(name.to_string());
                        Ok(())
                    }))
                }
            }))
            .unwrap();
        }

        let mut ctx = ExecutionContext::new();
        set.resolve(&["c"], &mut ctx).await.unwrap();
        ctx.teardown_all().await.unwrap();

        assert_eq!(*setup_log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(*teardown_log.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_unknown_request_resolves_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = FixtureSet::new();
        set.register(counting("a", &[], counter.clone())).unwrap();

        let mut ctx = ExecutionContext::new();
        let err = set.resolve(&["a", "nope"], &mut ctx).await.unwrap_err();
        assert!(matches!(err, FixtureError::UnknownFixture { name } if name == "nope"));

        // The order is rejected before any setup runs.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!ctx.is_resolved("a"));
    }

    #[tokio::test]
    async fn test_cycle_detected_before_any_setup() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = FixtureSet::new();
        set.register(counting("a", &["b"], counter.clone())).unwrap();
        set.register(counting("b", &["a"], counter.clone())).unwrap();

        let mut ctx = ExecutionContext::new();
        let err = set.resolve(&["a"], &mut ctx).await.unwrap_err();
        match err {
            FixtureError::CircularDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected CircularDependency, got {other}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_catches_unknown_dependency() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = FixtureSet::new();
        set.register(counting("a", &["typo"], counter)).unwrap();

        let err = set.validate().unwrap_err();
        assert!(matches!(err, FixtureError::UnknownFixture { name } if name == "typo"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = FixtureSet::new();
        set.register(counting("a", &[], counter.clone())).unwrap();

        let err = set.register(counting("a", &[], counter.clone())).unwrap_err();
        assert!(matches!(err, FixtureError::DuplicateFixture { name } if name == "a"));

        // Explicit override works; overriding a missing name does not.
        set.replace(counting("a", &[], counter.clone())).unwrap();
        let err = set.replace(counting("ghost", &[], counter)).unwrap_err();
        assert!(matches!(err, FixtureError::ReplaceMissing { name } if name == "ghost"));
    }

    #[test]
    fn test_extend_rejects_colliding_merge() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = FixtureSet::new();
        set.extend([
            counting("a", &[], counter.clone()),
            counting("b", &[], counter.clone()),
        ])
        .unwrap();

        let err = set
            .extend([
                counting("c", &[], counter.clone()),
                counting("b", &[], counter),
            ])
            .unwrap_err();
        assert!(matches!(err, FixtureError::DuplicateFixture { name } if name == "b"));

        // Definitions ahead of the collision were merged; the original
        // "b" was not shadowed.
        assert!(set.contains("c"));
        assert_eq!(set.names().count(), 3);
    }

    #[tokio::test]
    async fn test_failing_teardown_never_skips_siblings() {
        // c is set up before d, so d tears down first and must still run
        // even though c's teardown fails afterwards.
        let d_tore_down = Arc::new(AtomicUsize::new(0));
        let d_count = d_tore_down.clone();

        let mut set = FixtureSet::new();
        set.register(FixtureDefinition::new("c", &[], |_deps| async {
            Ok(Resolved::value(()).with_teardown(|| async {
                Err(anyhow::anyhow!("c teardown exploded"))
            }))
        }))
        .unwrap();
        set.register(FixtureDefinition::new("d", &["c"], move |_deps| {
            let d_count = d_count.clone();
            async move {
                Ok(Resolved::value(()).with_teardown(move || async move {
                    d_count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
            }
        }))
        .unwrap();

        let mut ctx = ExecutionContext::new();
        set.resolve(&["d"], &mut ctx).await.unwrap();

        let err = ctx.teardown_all().await.unwrap_err();
        assert_eq!(d_tore_down.load(Ordering::SeqCst), 1);
        match err {
            FixtureError::TeardownAggregate { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].fixture, "c");
            }
            other => panic!("expected TeardownAggregate, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_all_teardown_failures_reported_together() {
        let mut set = FixtureSet::new();
        for name in ["x", "y"] {
            set.register(FixtureDefinition::new(name, &[], move |_deps| async move {
                Ok(Resolved::value(()).with_teardown(move || async move {
                    Err(anyhow::anyhow!("{name} failed"))
                }))
            }))
            .unwrap();
        }

        let mut ctx = ExecutionContext::new();
        set.resolve(&["x", "y"], &mut ctx).await.unwrap();

        match ctx.teardown_all().await.unwrap_err() {
            FixtureError::TeardownAggregate { failures } => {
                let mut names: Vec<&str> =
                    failures.iter().map(|f| f.fixture.as_str()).collect();
                names.sort_unstable();
                assert_eq!(names, vec!["x", "y"]);
            }
            other => panic!("expected TeardownAggregate, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_setup_hits_deadline() {
        let mut set = FixtureSet::new();
        set.register(FixtureDefinition::new("slow", &[], |_deps| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Resolved::value(()))
        }))
        .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
        let mut ctx = ExecutionContext::with_deadline(deadline);
        let err = set.resolve(&["slow"], &mut ctx).await.unwrap_err();
        assert!(matches!(err, FixtureError::SetupTimeout { name, .. } if name == "slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_aborts_setup() {
        let mut set = FixtureSet::new();
        set.register(FixtureDefinition::new("hung", &[], |_deps| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Resolved::value(()))
        }))
        .unwrap();

        let mut ctx = ExecutionContext::new();
        ctx.cancel();
        let err = set.resolve(&["hung"], &mut ctx).await.unwrap_err();
        assert!(matches!(err, FixtureError::Cancelled { name } if name == "hung"));
    }

    #[test]
    fn test_resolution_order_is_deterministic() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = FixtureSet::new();
        set.register(counting("base", &[], counter.clone())).unwrap();
        set.register(counting("left", &["base"], counter.clone())).unwrap();
        set.register(counting("right", &["base"], counter)).unwrap();

        let order = set.resolution_order(&["left", "right"]).unwrap();
        assert_eq!(order, vec!["base", "left", "right"]);

        // Same request, same order, every time.
        let again = set.resolution_order(&["left", "right"]).unwrap();
        assert_eq!(order, again);
    }
}
