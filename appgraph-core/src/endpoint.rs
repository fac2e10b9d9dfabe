use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A network endpoint declared on a resource.
///
/// Declared during graph construction with a desired port (or none, for an
/// ephemeral allocation) and resolved to a concrete port during the
/// `AfterEndpointsAllocated` phase. Immutable once resolved.
///
/// # Example
/// ```toml
/// [[resources.api.endpoints]]
/// name = "http"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EndpointDecl {
    /// Endpoint name, unique within the resource.
    pub name: String,
    /// URL scheme used when rendering the resolved endpoint.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Fixed port requested by the operator. When absent, an ephemeral port
    /// is allocated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_port: Option<u16>,
    /// Port the process listens on inside its own namespace (containers).
    /// Informational for the external runtime; the engine allocates the
    /// host-side port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    /// Whether the endpoint is exposed outside the local machine.
    #[serde(default)]
    pub external: bool,
}

fn default_scheme() -> String {
    "http".to_string()
}

impl EndpointDecl {
    /// An HTTP endpoint with an ephemeral port.
    pub fn http(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: default_scheme(),
            desired_port: None,
            target_port: None,
            external: false,
        }
    }

    /// An endpoint with an explicit scheme and an ephemeral port.
    pub fn new(name: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            ..Self::http(name)
        }
    }

    /// Request a fixed port. Fixed ports never move silently; a conflict with
    /// another resource is a hard allocation error.
    #[must_use]
    pub fn with_fixed_port(mut self, port: u16) -> Self {
        self.desired_port = Some(port);
        self
    }

    /// Set the container-side target port.
    #[must_use]
    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = Some(port);
        self
    }
}

/// A concrete, bound endpoint produced by the allocator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ResolvedEndpoint {
    /// Render the connection-string form used for environment injection.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl std::fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
