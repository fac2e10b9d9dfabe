use crate::annotation::{keys, Annotation, DerivedFileAnnotation};
use crate::endpoint::EndpointDecl;
use crate::error::GraphError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What a resource is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A project built and run from source.
    Project,
    /// A container run by an external container runtime.
    Container,
    /// A plain executable.
    Executable,
    /// A named value resolved during the run, never launched.
    Value,
    /// A resource managed outside this engine. Participates in ordering and
    /// may declare fixed endpoints for dependents to resolve.
    External,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Container => write!(f, "container"),
            Self::Executable => write!(f, "executable"),
            Self::Value => write!(f, "value"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Lifecycle state of a resource.
///
/// `NotStarted -> Initializing -> Running`; a phase-hook error transitions to
/// `Failed`, which is terminal for the run. `Stopped` is reached via explicit
/// teardown or run cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    NotStarted,
    Initializing,
    Running,
    Failed,
    Stopped,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A named entity in the application's dependency graph.
///
/// Annotations and endpoints are mutated only during graph construction and
/// by the resource's own phase hooks, never by another resource.
#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    kind: ResourceKind,
    annotations: Vec<Annotation>,
    endpoints: Vec<EndpointDecl>,
    state: ResourceState,
}

impl Resource {
    pub(crate) fn new(name: String, kind: ResourceKind) -> Self {
        Self {
            name,
            kind,
            annotations: Vec::new(),
            endpoints: Vec::new(),
            state: ResourceState::NotStarted,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }

    /// Append an annotation. Later annotations of the same type augment
    /// earlier ones rather than replacing them.
    pub fn annotate(&mut self, annotation: Annotation) -> &mut Self {
        self.annotations.push(annotation);
        self
    }

    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Declare an endpoint. Endpoint names are unique per resource.
    pub fn add_endpoint(&mut self, decl: EndpointDecl) -> Result<&mut Self, GraphError> {
        if self.endpoints.iter().any(|e| e.name == decl.name) {
            return Err(GraphError::DuplicateEndpoint {
                resource: self.name.clone(),
                endpoint: decl.name,
            });
        }
        self.endpoints.push(decl);
        Ok(self)
    }

    #[must_use]
    pub fn endpoints(&self) -> &[EndpointDecl] {
        &self.endpoints
    }

    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<&EndpointDecl> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// The raw value of the last options annotation with the given key.
    ///
    /// Last-appended wins: builder-style configuration relies on later calls
    /// overriding earlier defaults.
    #[must_use]
    pub fn options(&self, key: &str) -> Option<&serde_json::Value> {
        self.annotations.iter().rev().find_map(|a| match a {
            Annotation::Options(o) if o.key == key => Some(&o.value),
            _ => None,
        })
    }

    /// Decode the last options annotation with the given key.
    pub fn options_as<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.options(key) {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// The string carried by a `Value` resource, if one was set.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.options(keys::VALUE).and_then(|v| v.as_str())
    }

    /// Watch entries in append order, duplicates preserved.
    pub fn watch_entries(&self) -> impl Iterator<Item = &str> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::WatchEntry(url) => Some(url.as_str()),
            _ => None,
        })
    }

    /// Derived-file annotations in append order.
    pub fn derived_files(&self) -> impl Iterator<Item = &DerivedFileAnnotation> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::DerivedFile(d) => Some(d),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_options_annotation_wins() {
        let mut resource = Resource::new("proxy".to_string(), ResourceKind::Executable);
        resource
            .annotate(Annotation::options("limits", serde_json::json!({"max": 1})))
            .annotate(Annotation::options("other", serde_json::json!(true)))
            .annotate(Annotation::options("limits", serde_json::json!({"max": 9})));

        let value = resource.options("limits").unwrap();
        assert_eq!(value["max"], 9);
    }

    #[test]
    fn watch_entries_preserve_duplicates_in_append_order() {
        let mut resource = Resource::new("proxy".to_string(), ResourceKind::Executable);
        resource
            .annotate(Annotation::watch("https://api.example.com/*"))
            .annotate(Annotation::watch("https://API.example.com/*"));

        let entries: Vec<_> = resource.watch_entries().collect();
        assert_eq!(
            entries,
            vec!["https://api.example.com/*", "https://API.example.com/*"]
        );
    }

    #[test]
    fn duplicate_endpoint_names_are_rejected() {
        let mut resource = Resource::new("api".to_string(), ResourceKind::Project);
        resource.add_endpoint(EndpointDecl::http("http")).unwrap();
        let err = resource.add_endpoint(EndpointDecl::http("http")).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateEndpoint {
                resource: "api".to_string(),
                endpoint: "http".to_string(),
            }
        );
    }
}
