//! The lifecycle coordinator.
//!
//! Drives every resource through `BeforeStart` → `Initialize` →
//! `AfterEndpointsAllocated`, in dependency order: a dependency completes
//! its whole phase sequence before any dependent begins, so a dependent's
//! environment can be populated from fully resolved endpoints. Independent
//! branches run concurrently; one resource's failure never aborts the run.

use crate::allocator::{EndpointAllocator, EndpointResolver};
use crate::hooks::{LifecycleHook, Phase, PhaseContext};
use crate::launcher::{LaunchSpec, ProcessLauncher};
use crate::report::{FailureKind, ResourceReport, RunReport};
use appgraph_core::annotation::keys;
use appgraph_core::{CommandOptions, GraphError, Resource, ResourceGraph, ResourceKind, ResourceState};
use appgraph_utils::env::{own_port_env_key, reference_env_key, value_env_key};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Settings for one coordinator run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root under which each resource gets its own working directory.
    pub workdir_root: PathBuf,
    /// Host used when rendering resolved endpoints.
    pub host: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workdir_root: appgraph_utils::env::default_workdir_root(),
            host: "localhost".to_string(),
        }
    }
}

/// Completion outcome a resource signals to its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failed,
    Stopped,
}

/// Runs a resource graph through its lifecycle phases.
pub struct Orchestrator {
    launcher: Arc<dyn ProcessLauncher>,
    hooks: HashMap<String, Vec<Arc<dyn LifecycleHook>>>,
    options: RunOptions,
}

impl Orchestrator {
    #[must_use]
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            launcher,
            hooks: HashMap::new(),
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a hook for a resource. Hooks run in registration order
    /// within each phase.
    #[must_use]
    pub fn with_hook(mut self, resource: impl Into<String>, hook: Arc<dyn LifecycleHook>) -> Self {
        self.add_hook(resource, hook);
        self
    }

    pub fn add_hook(&mut self, resource: impl Into<String>, hook: Arc<dyn LifecycleHook>) {
        self.hooks.entry(resource.into()).or_default().push(hook);
    }

    /// Run every resource through its lifecycle and aggregate the results.
    ///
    /// Graph-shape errors (cycles) surface immediately; per-resource
    /// failures are contained and reported. The returned report covers
    /// every resource in declaration order.
    pub async fn run(
        &self,
        graph: ResourceGraph,
        cancel: CancellationToken,
    ) -> Result<RunReport, GraphError> {
        // Cycle detection is mandatory before any phase hook fires.
        let order: Vec<String> = graph
            .topological_order()?
            .iter()
            .map(|r| r.name().to_string())
            .collect();

        let declaration: Vec<String> = graph.resources().map(|r| r.name().to_string()).collect();
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for name in &declaration {
            dependencies.insert(name.clone(), graph.dependencies_of(name)?);
        }

        let allocator = EndpointAllocator::new();
        let mut resources: HashMap<String, Resource> = graph
            .into_resources()
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();

        let mut senders: HashMap<String, watch::Sender<Option<Outcome>>> = HashMap::new();
        let mut receivers: HashMap<String, watch::Receiver<Option<Outcome>>> = HashMap::new();
        for name in &declaration {
            let (tx, rx) = watch::channel(None);
            senders.insert(name.clone(), tx);
            receivers.insert(name.clone(), rx);
        }

        let mut join = JoinSet::new();
        for name in &order {
            let Some(resource) = resources.remove(name) else {
                continue;
            };
            let Some(done) = senders.remove(name) else {
                continue;
            };
            let dep_rxs: Vec<(String, watch::Receiver<Option<Outcome>>)> = dependencies
                .get(name)
                .into_iter()
                .flatten()
                .map(|dep| (dep.clone(), receivers[dep].clone()))
                .collect();

            join.spawn(run_resource(ResourceTask {
                resource,
                dep_rxs,
                hooks: self.hooks.get(name).cloned().unwrap_or_default(),
                allocator: allocator.clone(),
                launcher: self.launcher.clone(),
                options: self.options.clone(),
                cancel: cancel.clone(),
                done,
            }));
        }
        drop(receivers);

        let mut by_name: HashMap<String, ResourceReport> = HashMap::new();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(report) => {
                    by_name.insert(report.name.clone(), report);
                }
                Err(e) => {
                    // The task's completion sender dropped with it, so
                    // dependents already observed the failure.
                    error!("resource task panicked: {e}");
                }
            }
        }

        let resources = declaration
            .into_iter()
            .map(|name| {
                by_name.remove(&name).unwrap_or_else(|| ResourceReport {
                    state: ResourceState::Failed,
                    failure: Some(FailureKind::Internal {
                        message: "resource task ended without reporting".to_string(),
                    }),
                    pid: None,
                    name,
                })
            })
            .collect();
        Ok(RunReport { resources })
    }

    /// Run without external cancellation.
    pub async fn run_to_completion(&self, graph: ResourceGraph) -> Result<RunReport, GraphError> {
        self.run(graph, CancellationToken::new()).await
    }
}

struct ResourceTask {
    resource: Resource,
    dep_rxs: Vec<(String, watch::Receiver<Option<Outcome>>)>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
    allocator: EndpointAllocator,
    launcher: Arc<dyn ProcessLauncher>,
    options: RunOptions,
    cancel: CancellationToken,
    done: watch::Sender<Option<Outcome>>,
}

enum WaitResult {
    Ready,
    DepFailed(String),
    DepStopped,
    Cancelled,
}

/// Block until every dependency signals an outcome. Success means the
/// dependency completed its whole phase sequence, endpoints included.
async fn wait_for_dependencies(
    dep_rxs: Vec<(String, watch::Receiver<Option<Outcome>>)>,
    cancel: &CancellationToken,
) -> WaitResult {
    for (dep_name, mut rx) in dep_rxs {
        loop {
            match *rx.borrow() {
                Some(Outcome::Success) => break,
                Some(Outcome::Failed) => return WaitResult::DepFailed(dep_name),
                Some(Outcome::Stopped) => return WaitResult::DepStopped,
                None => {}
            }
            tokio::select! {
                () = cancel.cancelled() => return WaitResult::Cancelled,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped without reporting: the dependency's
                        // task died.
                        return WaitResult::DepFailed(dep_name);
                    }
                }
            }
        }
    }
    WaitResult::Ready
}

fn conclude(
    mut resource: Resource,
    done: &watch::Sender<Option<Outcome>>,
    outcome: Outcome,
    failure: Option<FailureKind>,
    pid: Option<u32>,
) -> ResourceReport {
    let state = match outcome {
        Outcome::Success => ResourceState::Running,
        Outcome::Failed => ResourceState::Failed,
        Outcome::Stopped => ResourceState::Stopped,
    };
    resource.set_state(state);
    let _ = done.send(Some(outcome));
    ResourceReport {
        name: resource.name().to_string(),
        state,
        failure,
        pid,
    }
}

fn hook_failure(cancel: &CancellationToken, phase: Phase, err: &anyhow::Error) -> (Outcome, FailureKind) {
    if cancel.is_cancelled() {
        (Outcome::Stopped, FailureKind::Cancelled)
    } else {
        (
            Outcome::Failed,
            FailureKind::Hook {
                phase,
                message: format!("{err:#}"),
            },
        )
    }
}

async fn run_phase(
    phase: Phase,
    hooks: &[Arc<dyn LifecycleHook>],
    resource: &mut Resource,
    resolver: &EndpointResolver,
    workdir: &Path,
    env: &mut BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut ctx = PhaseContext {
        resource,
        resolver,
        workdir,
        env,
        cancel,
    };
    for hook in hooks {
        match phase {
            Phase::BeforeStart => hook.before_start(&mut ctx).await?,
            Phase::Initialize => hook.initialize(&mut ctx).await?,
            Phase::AfterEndpointsAllocated => hook.after_endpoints_allocated(&mut ctx).await?,
        }
    }
    Ok(())
}

async fn run_resource(task: ResourceTask) -> ResourceReport {
    let ResourceTask {
        mut resource,
        dep_rxs,
        hooks,
        allocator,
        launcher,
        options,
        cancel,
        done,
    } = task;
    let name = resource.name().to_string();
    let dep_names: Vec<String> = dep_rxs.iter().map(|(n, _)| n.clone()).collect();

    match wait_for_dependencies(dep_rxs, &cancel).await {
        WaitResult::Ready => {}
        WaitResult::DepFailed(dependency) => {
            info!("resource {name}: not started, dependency '{dependency}' failed");
            return conclude(
                resource,
                &done,
                Outcome::Failed,
                Some(FailureKind::DependencyFailed { dependency }),
                None,
            );
        }
        WaitResult::DepStopped | WaitResult::Cancelled => {
            return conclude(resource, &done, Outcome::Stopped, Some(FailureKind::Cancelled), None);
        }
    }
    if cancel.is_cancelled() {
        return conclude(resource, &done, Outcome::Stopped, Some(FailureKind::Cancelled), None);
    }

    info!("resource {name}: starting lifecycle");
    resource.set_state(ResourceState::Initializing);

    let workdir = options.workdir_root.join(&name);
    if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
        return conclude(
            resource,
            &done,
            Outcome::Failed,
            Some(FailureKind::Workdir {
                message: e.to_string(),
            }),
            None,
        );
    }

    let resolver = allocator.resolver();
    let mut env: BTreeMap<String, String> = BTreeMap::new();

    for phase in [Phase::BeforeStart, Phase::Initialize] {
        if cancel.is_cancelled() {
            return conclude(resource, &done, Outcome::Stopped, Some(FailureKind::Cancelled), None);
        }
        if let Err(e) =
            run_phase(phase, &hooks, &mut resource, &resolver, &workdir, &mut env, &cancel).await
        {
            warn!("resource {name}: {phase} hook failed: {e:#}");
            let (outcome, failure) = hook_failure(&cancel, phase, &e);
            return conclude(resource, &done, outcome, Some(failure), None);
        }
    }

    // Allocate this resource's own endpoints before the final phase so its
    // hooks observe them resolved.
    let mut own_ports = Vec::new();
    for decl in resource.endpoints().to_vec() {
        match allocator.allocate(&name, &decl, &options.host) {
            Ok(resolved) => {
                env.insert(own_port_env_key(&decl.name), resolved.port.to_string());
                own_ports.push(resolved.port);
            }
            Err(e) => {
                warn!("resource {name}: endpoint allocation failed: {e}");
                return conclude(
                    resource,
                    &done,
                    Outcome::Failed,
                    Some(FailureKind::Allocation {
                        message: e.to_string(),
                    }),
                    None,
                );
            }
        }
    }
    // A single-endpoint resource also gets plain PORT, the conventional
    // contract for spawned services.
    if let [port] = own_ports.as_slice() {
        env.insert("PORT".to_string(), port.to_string());
    }

    if resource.kind() == ResourceKind::Value {
        if let Some(value) = resource.value() {
            allocator.set_value(&name, value);
        }
    }

    // Inject fully resolved reference expressions for every dependency.
    for dep in &dep_names {
        for (endpoint, resolved) in resolver.endpoints_of(dep) {
            env.insert(reference_env_key(dep, &endpoint), resolved.url());
        }
        if let Some(value) = resolver.value_of(dep) {
            env.insert(value_env_key(dep), value);
        }
    }

    let command = match resource.options_as::<CommandOptions>(keys::COMMAND) {
        Ok(command) => command,
        Err(e) => {
            return conclude(
                resource,
                &done,
                Outcome::Failed,
                Some(FailureKind::Internal {
                    message: format!("malformed command options: {e:#}"),
                }),
                None,
            );
        }
    };
    // Static configuration overlays the injected environment, so explicit
    // settings win.
    if let Some(command) = &command {
        for (key, value) in &command.env {
            env.insert(key.clone(), value.clone());
        }
    }

    if cancel.is_cancelled() {
        return conclude(resource, &done, Outcome::Stopped, Some(FailureKind::Cancelled), None);
    }
    if let Err(e) = run_phase(
        Phase::AfterEndpointsAllocated,
        &hooks,
        &mut resource,
        &resolver,
        &workdir,
        &mut env,
        &cancel,
    )
    .await
    {
        warn!("resource {name}: {} hook failed: {e:#}", Phase::AfterEndpointsAllocated);
        let (outcome, failure) = hook_failure(&cancel, Phase::AfterEndpointsAllocated, &e);
        return conclude(resource, &done, outcome, Some(failure), None);
    }

    // Handoff to the external runtime for resources backed by a process.
    let mut pid = None;
    if let Some(command) = command {
        let launchable = matches!(
            resource.kind(),
            ResourceKind::Project | ResourceKind::Container | ResourceKind::Executable
        );
        if launchable {
            let spec = LaunchSpec {
                resource: name.clone(),
                command: command.command,
                args: command.args,
                working_dir: command.workdir.unwrap_or_else(|| workdir.clone()),
                env: env.clone(),
            };
            match launcher.launch(spec).await {
                Ok(handle) => pid = handle.pid,
                Err(e) => {
                    warn!("resource {name}: launch failed: {e:#}");
                    return conclude(
                        resource,
                        &done,
                        Outcome::Failed,
                        Some(FailureKind::Launch {
                            message: format!("{e:#}"),
                        }),
                        None,
                    );
                }
            }
        }
    }

    info!("resource {name}: running");
    conclude(resource, &done, Outcome::Success, None, pid)
}
