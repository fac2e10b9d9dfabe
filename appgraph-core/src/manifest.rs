use crate::annotation::{Annotation, CommandOptions};
use crate::endpoint::EndpointDecl;
use crate::graph::ResourceGraph;
use crate::resource::ResourceKind;
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root of an `appgraph.toml` manifest.
///
/// A manifest is the declarative way to construct a [`ResourceGraph`];
/// everything it expresses can also be built through the graph API directly.
/// Resources are keyed by name; name order is the declaration order, so
/// manifest-built graphs order deterministically.
///
/// # Example
/// ```toml
/// [app]
/// name = "shop"
///
/// [resources.cache]
/// kind = "container"
///
/// [resources.api]
/// kind = "project"
/// command = "cargo"
/// args = ["run"]
/// depends_on = ["cache"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AppManifest {
    /// Application-level settings.
    pub app: AppSection,
    /// Resource declarations, keyed by resource name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSection>,
}

/// The `[app]` table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AppSection {
    /// The name of the application.
    pub name: String,
}

/// One `[resources.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceSection {
    /// What the resource is backed by.
    pub kind: ResourceKind,
    /// Program to run once the resource completes its phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for `command`. Defaults to the resource's working
    /// directory under the run root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Static environment variables, overlaid on the injected environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Resources that must complete their phases before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Declared endpoints.
    #[serde(default)]
    pub endpoints: Vec<EndpointDecl>,
    /// Watch-list entries for the derived proxy configuration.
    #[serde(default)]
    pub watch: Vec<String>,
    /// The string carried by a `value` resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl AppManifest {
    /// Parse a manifest from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse manifest")
    }

    /// Build the resource graph this manifest declares.
    ///
    /// Construction errors (duplicate names, unknown `depends_on` targets)
    /// surface immediately; nothing is deferred to run time.
    pub fn into_graph(self) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new();

        for (name, section) in &self.resources {
            let resource = graph.add_resource(name.clone(), section.kind)?;
            for decl in &section.endpoints {
                resource.add_endpoint(decl.clone())?;
            }
            for url in &section.watch {
                resource.annotate(Annotation::watch(url));
            }
            if let Some(value) = &section.value {
                resource.annotate(Annotation::value(value));
            }
            if let Some(command) = &section.command {
                let options = CommandOptions {
                    command: command.clone(),
                    args: section.args.clone(),
                    workdir: section.workdir.clone(),
                    env: section.env.clone(),
                };
                let annotation = options
                    .annotation()
                    .with_context(|| format!("invalid command options for resource '{name}'"))?;
                resource.annotate(annotation);
            }
        }

        for (name, section) in &self.resources {
            for dependency in &section.depends_on {
                graph
                    .add_reference(name, dependency)
                    .with_context(|| format!("resource '{name}' has an invalid reference"))?;
            }
        }

        Ok(graph)
    }
}
