use thiserror::Error;

/// Errors raised while constructing or ordering a resource graph.
///
/// These are declaration errors: they surface synchronously to the caller
/// building the graph and are never recovered automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Resource names are case-sensitive, non-empty, and contain no whitespace.
    #[error("'{0}' is not a valid resource name (must be non-empty, without whitespace)")]
    InvalidName(String),

    /// A resource with this name is already declared.
    #[error("a resource named '{0}' is already declared")]
    DuplicateName(String),

    /// A reference names a resource that does not exist in the graph.
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    /// The reference edges form a cycle; the named resource participates in it.
    #[error("dependency cycle detected involving resource '{0}'")]
    CycleDetected(String),

    /// Endpoint names are unique per resource.
    #[error("endpoint '{endpoint}' is already declared on resource '{resource}'")]
    DuplicateEndpoint { resource: String, endpoint: String },
}
