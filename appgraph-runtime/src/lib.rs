//! # appgraph-runtime
//!
//! The runtime half of appgraph: drives every resource in a
//! [`ResourceGraph`](appgraph_core::ResourceGraph) through its lifecycle
//! phases in dependency order, allocates endpoints, materializes derived
//! configuration, and hands fully resolved launch specs to a process
//! launcher.
//!
//! ## Lifecycle
//!
//! 1. **Ordering**: the graph is topologically ordered; cycles fail the run
//!    before any phase hook fires.
//! 2. **Phases**: each resource runs `BeforeStart` → `Initialize` →
//!    `AfterEndpointsAllocated`, once, after all of its dependencies have
//!    completed their own sequences. Independent branches run concurrently.
//! 3. **Handoff**: resources with a command are passed to the
//!    [`ProcessLauncher`]; the run finishes with a [`RunReport`] covering
//!    every resource, failures included.

#![warn(clippy::await_holding_lock)]
#![warn(clippy::unused_async)]
#![warn(clippy::wildcard_imports)]
#![warn(unreachable_pub)]

pub mod allocator;
pub mod coordinator;
pub mod hooks;
pub mod launcher;
pub mod materializer;
pub mod report;

pub use allocator::{AllocError, EndpointAllocator, EndpointResolver};
pub use coordinator::{Orchestrator, RunOptions};
pub use hooks::{LifecycleHook, Phase, PhaseContext, WaitForDependencyTcp};
pub use launcher::{LaunchHandle, LaunchSpec, LogLine, ProcessLauncher, TokioLauncher};
pub use materializer::{materialize, MaterializerOptions, PluginEntry, ProxyConfig, ProxyMaterializer};
pub use report::{FailureKind, ResourceReport, RunReport};
