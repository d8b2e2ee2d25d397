//! Error types for the core crate

/// Definition-time validation failure.
///
/// Surfaced to the submitter before any state is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Two tasks share the same id
    #[error("duplicate task id: '{0}'")]
    DuplicateTaskId(String),

    /// A task depends on an id that is not a sibling task
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// The dependency graph contains a cycle; the path walks the back edge
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A required field is absent or has the wrong type
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Retry policy values are out of range
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// The workflow defines no tasks
    #[error("workflow defines no tasks")]
    EmptyTasks,

    /// The document is not a mapping, or a field holds an unusable value
    #[error("invalid workflow document: {0}")]
    InvalidDocument(String),
}

/// Audit chain verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("audit chain violation at seq {seq}: {reason}")]
pub struct IntegrityError {
    /// Sequence number of the offending record
    pub seq: i64,
    /// What failed: signature mismatch, broken prev_hash link, bad ordering
    pub reason: String,
}
