//! Endpoint allocation and reference resolution.
//!
//! The allocator is per-run state: every run starts from an empty pool, so a
//! rerun after teardown never reuses stale assignments.

use appgraph_core::{EndpointDecl, ResolvedEndpoint};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;

/// Errors raised while allocating ports or resolving references.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// An operator-declared fixed port is already held by another resource.
    /// Fixed ports never move silently.
    #[error(
        "port {port} requested by resource '{requesting}' is already allocated to resource '{holder}'"
    )]
    PortConflict {
        port: u16,
        requesting: String,
        holder: String,
    },

    /// A reference was queried before the target resource finished its
    /// `AfterEndpointsAllocated` phase. This is an ordering bug in the
    /// caller, not a condition to retry.
    #[error("endpoint '{endpoint}' of resource '{resource}' is not resolved yet")]
    EndpointNotResolved { resource: String, endpoint: String },

    /// The operating system could not provide an ephemeral port.
    #[error("failed to allocate an ephemeral port: {0}")]
    Ephemeral(String),
}

#[derive(Debug, Default)]
struct AllocatorState {
    /// Concrete port -> holding resource, across the whole run.
    taken: HashMap<u16, String>,
    /// Resolved endpoints per resource, in declaration order.
    resolved: HashMap<String, Vec<(String, ResolvedEndpoint)>>,
    /// Resolved value-resource contents.
    values: HashMap<String, String>,
}

/// Assigns concrete ports to declared endpoints, avoiding collisions across
/// all resources in one run.
#[derive(Debug, Clone, Default)]
pub struct EndpointAllocator {
    state: Arc<RwLock<AllocatorState>>,
}

impl EndpointAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, AllocatorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a concrete port for `decl` on `resource` and record the
    /// resolved endpoint.
    ///
    /// Fixed ports conflict hard; ephemeral ports are chosen by binding
    /// `127.0.0.1:0` and excluding everything already allocated this run.
    pub fn allocate(
        &self,
        resource: &str,
        decl: &EndpointDecl,
        host: &str,
    ) -> Result<ResolvedEndpoint, AllocError> {
        let mut state = self.write();

        let port = match decl.desired_port {
            Some(port) => {
                if let Some(holder) = state.taken.get(&port) {
                    return Err(AllocError::PortConflict {
                        port,
                        requesting: resource.to_string(),
                        holder: holder.clone(),
                    });
                }
                port
            }
            None => ephemeral_port(&state.taken)?,
        };

        state.taken.insert(port, resource.to_string());
        let endpoint = ResolvedEndpoint {
            scheme: decl.scheme.clone(),
            host: host.to_string(),
            port,
        };
        state
            .resolved
            .entry(resource.to_string())
            .or_default()
            .push((decl.name.clone(), endpoint.clone()));

        debug!(
            "allocated endpoint {}/{} -> {}",
            resource, decl.name, endpoint
        );
        Ok(endpoint)
    }

    /// Record the resolved content of a value resource.
    pub fn set_value(&self, resource: &str, value: impl Into<String>) {
        self.write()
            .values
            .insert(resource.to_string(), value.into());
    }

    /// A read-only handle for resolving references, shared with phase hooks.
    #[must_use]
    pub fn resolver(&self) -> EndpointResolver {
        EndpointResolver {
            state: self.state.clone(),
        }
    }
}

/// Read-only view over the allocator's resolution tables.
///
/// Cross-resource effects flow exclusively through this handle: a dependent
/// reads its dependencies' resolved endpoints here, never their mutable
/// state.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    state: Arc<RwLock<AllocatorState>>,
}

impl EndpointResolver {
    fn read(&self) -> RwLockReadGuard<'_, AllocatorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a reference to a target resource's endpoint.
    ///
    /// # Errors
    ///
    /// [`AllocError::EndpointNotResolved`] if the target's
    /// `AfterEndpointsAllocated` phase has not completed.
    pub fn resolve(&self, resource: &str, endpoint: &str) -> Result<ResolvedEndpoint, AllocError> {
        self.read()
            .resolved
            .get(resource)
            .and_then(|endpoints| {
                endpoints
                    .iter()
                    .find(|(name, _)| name == endpoint)
                    .map(|(_, resolved)| resolved.clone())
            })
            .ok_or_else(|| AllocError::EndpointNotResolved {
                resource: resource.to_string(),
                endpoint: endpoint.to_string(),
            })
    }

    /// Every resolved endpoint of a resource, in declaration order.
    #[must_use]
    pub fn endpoints_of(&self, resource: &str) -> Vec<(String, ResolvedEndpoint)> {
        self.read()
            .resolved
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    /// The resolved content of a value resource, if any.
    #[must_use]
    pub fn value_of(&self, resource: &str) -> Option<String> {
        self.read().values.get(resource).cloned()
    }
}

/// Pick an unused ephemeral port, excluding everything already taken this
/// run. Binding to port 0 lets the OS choose; the loop guards against the
/// rare case where the OS hands back a port this run already reserved
/// without binding (a fixed-port declaration).
fn ephemeral_port(taken: &HashMap<u16, String>) -> Result<u16, AllocError> {
    for _ in 0..16 {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| AllocError::Ephemeral(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| AllocError::Ephemeral(e.to_string()))?
            .port();
        if !taken.contains_key(&port) {
            return Ok(port);
        }
    }
    Err(AllocError::Ephemeral(
        "no unused port found after 16 attempts".to_string(),
    ))
}
