//! Lifecycle phase hooks.
//!
//! Hooks are the only points where the coordinator awaits external work.
//! They run in the owning resource's task: a hook may mutate its own
//! resource's annotations and environment, and reads other resources only
//! through the [`EndpointResolver`].

use crate::allocator::{AllocError, EndpointResolver};
use anyhow::{bail, Result};
use appgraph_core::Resource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The three lifecycle phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeStart,
    Initialize,
    AfterEndpointsAllocated,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeforeStart => write!(f, "before_start"),
            Self::Initialize => write!(f, "initialize"),
            Self::AfterEndpointsAllocated => write!(f, "after_endpoints_allocated"),
        }
    }
}

/// Context handed to a phase hook.
///
/// Borrows the resource mutably for the duration of the phase; the
/// coordinator guarantees phases of one resource never overlap, so there is
/// no shared mutable state to coordinate.
pub struct PhaseContext<'a> {
    pub(crate) resource: &'a mut Resource,
    pub(crate) resolver: &'a EndpointResolver,
    pub(crate) workdir: &'a Path,
    pub(crate) env: &'a mut BTreeMap<String, String>,
    pub(crate) cancel: &'a CancellationToken,
}

impl PhaseContext<'_> {
    #[must_use]
    pub fn resource(&self) -> &Resource {
        self.resource
    }

    pub fn resource_mut(&mut self) -> &mut Resource {
        self.resource
    }

    /// Handle for resolving dependency endpoints and values.
    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver {
        self.resolver
    }

    /// The resource's working directory for this run. Derived artifacts
    /// belong here, never next to user-authored input.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.workdir
    }

    /// Environment accumulated for the launch handoff.
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        self.env
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Resolve a dependency endpoint into its connection-string form.
    pub fn resolve_url(&self, resource: &str, endpoint: &str) -> Result<String, AllocError> {
        Ok(self.resolver.resolve(resource, endpoint)?.url())
    }

    /// The run-scoped cancellation token. Long-running hooks should observe
    /// it and exit early.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A lifecycle callback invoked once per resource, in dependency order.
///
/// Every method defaults to a no-op so implementations override only the
/// phases they care about. Hooks must not assume anything about sibling
/// resources: across independent resources no ordering is guaranteed.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Preconditions and logging. A failure here aborts this resource and
    /// all of its transitive dependents; independent branches continue.
    async fn before_start(&self, _ctx: &mut PhaseContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Materialization: merge annotations, write derived files, compute the
    /// launch command. Must be idempotent for an unchanged annotation set.
    async fn initialize(&self, _ctx: &mut PhaseContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Endpoint resolution: the resource's own endpoints are allocated by
    /// the time this runs, and every dependency is fully resolved.
    async fn after_endpoints_allocated(&self, _ctx: &mut PhaseContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// `BeforeStart` precondition that waits until a dependency endpoint accepts
/// TCP connections.
///
/// The dependency's phases have already completed when this runs; the probe
/// covers the gap between "process handed to the launcher" and "process
/// actually listening". Cancellation-aware, no unconditional delays.
#[derive(Debug, Clone)]
pub struct WaitForDependencyTcp {
    pub resource: String,
    pub endpoint: String,
    pub attempts: u32,
    pub interval: Duration,
}

impl WaitForDependencyTcp {
    #[must_use]
    pub fn new(resource: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            endpoint: endpoint.into(),
            attempts: 40,
            interval: Duration::from_millis(250),
        }
    }
}

#[async_trait]
impl LifecycleHook for WaitForDependencyTcp {
    async fn before_start(&self, ctx: &mut PhaseContext<'_>) -> Result<()> {
        let resolved = ctx.resolver().resolve(&self.resource, &self.endpoint)?;
        let addr = format!("{}:{}", resolved.host, resolved.port);

        for _ in 0..self.attempts {
            if appgraph_utils::probe::check_tcp(&addr, self.interval).await {
                return Ok(());
            }
            tokio::select! {
                () = ctx.cancellation().cancelled() => {
                    bail!("cancelled while waiting for {}/{}", self.resource, self.endpoint);
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        bail!(
            "dependency {}/{} did not accept connections at {} after {} attempts",
            self.resource,
            self.endpoint,
            addr,
            self.attempts
        );
    }
}
