//! Error types for fixture composition

use thiserror::Error;

/// Result type alias for fixture operations
pub type FixtureResult<T> = std::result::Result<T, FixtureError>;

/// A single failed teardown, tagged with the fixture it belongs to.
#[derive(Debug)]
pub struct TeardownFailure {
    pub fixture: String,
    pub error: anyhow::Error,
}

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("unknown fixture: {name}")]
    UnknownFixture { name: String },

    #[error("fixture already registered: {name}")]
    DuplicateFixture { name: String },

    #[error("cannot replace unregistered fixture: {name}")]
    ReplaceMissing { name: String },

    #[error("fixture dependency cycle: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("fixture '{name}' setup timed out after {limit_ms}ms")]
    SetupTimeout { name: String, limit_ms: u64 },

    #[error("fixture '{name}' setup cancelled")]
    Cancelled { name: String },

    #[error("fixture '{name}' setup failed: {source}")]
    Setup {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("fixture '{name}' holds a different type than requested")]
    TypeMismatch { name: String },

    #[error("{} teardown(s) failed: {}", .failures.len(), describe_failures(.failures))]
    TeardownAggregate { failures: Vec<TeardownFailure> },
}

impl FixtureError {
    /// Wrap an arbitrary setup failure with the owning fixture's name.
    pub fn setup(name: &str, source: impl Into<anyhow::Error>) -> Self {
        FixtureError::Setup {
            name: name.to_string(),
            source: source.into(),
        }
    }
}

fn describe_failures(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}: {}]", f.fixture, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}
