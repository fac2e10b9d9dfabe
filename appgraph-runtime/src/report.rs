//! End-of-run reporting.
//!
//! The coordinator never aborts on a single resource's failure; instead it
//! finishes every unaffected branch and aggregates final states here, so an
//! operator can tell root causes from fallout.

use crate::hooks::Phase;
use anyhow::{Context, Result};
use appgraph_core::ResourceState;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Why a resource ended in a non-`Running` state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// A lifecycle hook returned an error during the named phase.
    Hook { phase: Phase, message: String },
    /// A dependency failed, so this resource was never started.
    DependencyFailed { dependency: String },
    /// Endpoint allocation failed.
    Allocation { message: String },
    /// The launcher could not start the resource's process.
    Launch { message: String },
    /// Setting up the resource's working directory failed.
    Workdir { message: String },
    /// The run was cancelled before or during this resource's phases.
    Cancelled,
    /// The coordinator hit an unexpected condition (malformed options
    /// annotation, panicked task).
    Internal { message: String },
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hook { phase, message } => write!(f, "{phase} hook failed: {message}"),
            Self::DependencyFailed { dependency } => {
                write!(f, "not started: dependency '{dependency}' failed")
            }
            Self::Allocation { message } => write!(f, "endpoint allocation failed: {message}"),
            Self::Launch { message } => write!(f, "launch failed: {message}"),
            Self::Workdir { message } => write!(f, "working directory setup failed: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

/// Final state of one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceReport {
    pub name: String,
    pub state: ResourceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Aggregate result of one coordinator run, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub resources: Vec<ResourceReport>,
}

impl RunReport {
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.name == name)
    }

    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<ResourceState> {
        self.resource(name).map(|r| r.state)
    }

    /// True when every resource reached `Running`.
    #[must_use]
    pub fn all_running(&self) -> bool {
        self.resources
            .iter()
            .all(|r| r.state == ResourceState::Running)
    }

    /// Persist the report as pretty-printed JSON.
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write run report to {}", path.display()))?;
        Ok(())
    }

    /// Load a previously saved report.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read run report from {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for resource in &self.resources {
            match &resource.failure {
                Some(failure) => {
                    writeln!(f, "{}: {} ({})", resource.name, resource.state, failure)?;
                }
                None => writeln!(f, "{}: {}", resource.name, resource.state)?,
            }
        }
        Ok(())
    }
}
