//! Sitecheck Fixture Composition
//!
//! Builds a per-test execution context by layering named, dependency-aware
//! setup/teardown units ("fixtures") on top of a base set supplied by the
//! harness.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FixtureSet                                                 │
//! │    ├── register(def) / extend(defs) / replace(def)          │
//! │    ├── validate() -> catches unknown deps and cycles        │
//! │    ├── resolution_order(requested) -> topological order     │
//! │    └── resolve(requested, ctx) -> memoized values in ctx    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ExecutionContext (one per test)                            │
//! │    ├── cache: name -> Arc<dyn Any>                          │
//! │    ├── teardown stack (setup order)                         │
//! │    ├── deadline + cancellation token                        │
//! │    └── teardown_all() -> reverse order, failures aggregated │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A fixture is resolved at most once per context. Teardown runs in the
//! exact reverse of setup order, and one failing teardown never skips the
//! remaining ones.

pub mod context;
pub mod error;
pub mod set;

pub use context::{ExecutionContext, FixtureValue, Teardown};
pub use error::{FixtureError, FixtureResult, TeardownFailure};
pub use set::{Deps, FixtureDefinition, FixtureSet, Resolved};
