//! Derived proxy-configuration materialization.
//!
//! Merges a resource's accumulated annotations with an optional
//! user-authored base config and writes the result into the resource's
//! working directory. The base file is never touched; repeated runs with an
//! unchanged annotation set produce byte-identical output.

use crate::hooks::{LifecycleHook, PhaseContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the plugin entry that enables mock responses in the derived
/// config.
pub const MOCKS_PLUGIN: &str = "MockResponsePlugin";

/// Options for the materializer, attached to a resource as an options
/// annotation under [`MaterializerOptions::KEY`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MaterializerOptions {
    /// File name of the derived config within the resource working
    /// directory.
    #[serde(default = "default_config_file")]
    pub config_file: String,
    /// Default file name for mock entries contributed without an explicit
    /// target file.
    #[serde(default = "default_mocks_file")]
    pub mocks_file: String,
    /// User-authored base config merged into the derived output. Optional;
    /// a missing or malformed file degrades to an empty base.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_config: Option<PathBuf>,
    /// Statically configured watch entries, merged ahead of annotations.
    #[serde(default)]
    pub watch: Vec<String>,
}

fn default_config_file() -> String {
    "proxy-config.json".to_string()
}

fn default_mocks_file() -> String {
    "mocks.json".to_string()
}

impl Default for MaterializerOptions {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            mocks_file: default_mocks_file(),
            base_config: None,
            watch: Vec::new(),
        }
    }
}

impl MaterializerOptions {
    /// Options annotation key.
    pub const KEY: &'static str = "proxy-config";

    /// Build the options annotation for these settings.
    pub fn annotation(&self) -> Result<appgraph_core::Annotation> {
        appgraph_core::Annotation::options_from(Self::KEY, self)
    }

    /// A derived-file annotation contributing mock entries to the default
    /// mocks file.
    pub fn mock_annotation(
        &self,
        produce: impl Fn() -> Result<Vec<Value>> + Send + Sync + 'static,
    ) -> appgraph_core::Annotation {
        appgraph_core::Annotation::derived_file(self.mocks_file.clone(), produce)
    }
}

/// On-disk shape of the derived proxy configuration.
///
/// Unknown fields from a user-authored base config are preserved through
/// `extra`, so hand-edited files round-trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub urls_to_watch: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One plugin entry in the derived config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntry {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// File the plugin reads its payload from, relative to the config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

/// Materialize the derived configuration for `resource` into `workdir`.
///
/// Returns the path of the written config file. Output is a pure function
/// of the base file and the accumulated annotation state, so re-running
/// with unchanged inputs is byte-identical.
pub fn materialize(
    resource: &appgraph_core::Resource,
    options: &MaterializerOptions,
    workdir: &Path,
) -> Result<PathBuf> {
    let mut config = load_base(options);

    // Watch list: base entries keep their position (hand-edited files win
    // the casing race), then the static seed, then annotations. Union, not
    // replace; case-insensitive with first-seen casing preserved.
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();
    let base_entries = std::mem::take(&mut config.urls_to_watch);
    for url in base_entries
        .iter()
        .map(String::as_str)
        .chain(options.watch.iter().map(String::as_str))
        .chain(resource.watch_entries())
    {
        if seen.insert(url.to_ascii_lowercase()) {
            merged.push(url.to_string());
        }
    }
    config.urls_to_watch = merged;

    // Derived files: entries grouped per target file in append order.
    let mut files: Vec<(String, Vec<Value>)> = Vec::new();
    for derived in resource.derived_files() {
        let entries = (derived.produce)()
            .with_context(|| format!("derived file '{}' failed to produce", derived.file_name))?;
        match files.iter_mut().find(|(name, _)| *name == derived.file_name) {
            Some((_, existing)) => existing.extend(entries),
            None => files.push((derived.file_name.clone(), entries)),
        }
    }

    if let Some((first_file, _)) = files.first() {
        // Idempotent insert: skip when an equivalent entry already exists.
        if !config.plugins.iter().any(|p| p.name == MOCKS_PLUGIN) {
            config.plugins.push(PluginEntry {
                name: MOCKS_PLUGIN.to_string(),
                enabled: true,
                config_file: Some(first_file.clone()),
            });
        }
        for (file_name, entries) in &files {
            let payload = serde_json::json!({ "mocks": entries });
            let bytes = serde_json::to_vec_pretty(&payload)?;
            appgraph_utils::fs::atomic_write(&workdir.join(file_name), &bytes)?;
        }
    }

    let path = workdir.join(&options.config_file);
    let bytes = serde_json::to_vec_pretty(&config)?;
    appgraph_utils::fs::atomic_write(&path, &bytes)?;
    debug!(
        "materialized config for resource {} at {}",
        resource.name(),
        path.display()
    );
    Ok(path)
}

/// Load the base config when one is configured and present. Malformed input
/// degrades to an empty config with a warning; developer tooling merges
/// best-effort rather than failing the resource.
fn load_base(options: &MaterializerOptions) -> ProxyConfig {
    let Some(path) = &options.base_config else {
        return ProxyConfig::default();
    };
    if !path.exists() {
        return ProxyConfig::default();
    }
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(
                "failed to read base config {}: {e}; starting from empty",
                path.display()
            );
            return ProxyConfig::default();
        }
    };
    match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                "malformed base config {}: {e}; starting from empty",
                path.display()
            );
            ProxyConfig::default()
        }
    }
}

/// `Initialize`-phase hook that runs the materializer for resources carrying
/// a [`MaterializerOptions`] annotation. Resources without one are left
/// alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyMaterializer;

#[async_trait]
impl LifecycleHook for ProxyMaterializer {
    async fn initialize(&self, ctx: &mut PhaseContext<'_>) -> Result<()> {
        let Some(options) = ctx
            .resource()
            .options_as::<MaterializerOptions>(MaterializerOptions::KEY)?
        else {
            return Ok(());
        };
        materialize(ctx.resource(), &options, ctx.workdir())?;
        Ok(())
    }
}
