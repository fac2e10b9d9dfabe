use anyhow::Result;
use appgraph_core::{
    Annotation, CommandOptions, EndpointDecl, GraphError, ResourceGraph, ResourceKind,
    ResourceState,
};
use appgraph_runtime::{
    FailureKind, LaunchHandle, LaunchSpec, LifecycleHook, Orchestrator, Phase, PhaseContext,
    ProcessLauncher, RunOptions,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Launcher double that records every handoff instead of spawning.
#[derive(Debug, Default, Clone)]
struct RecordingLauncher {
    specs: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl RecordingLauncher {
    fn specs(&self) -> Vec<LaunchSpec> {
        self.specs.lock().unwrap().clone()
    }

    fn spec_for(&self, resource: &str) -> Option<LaunchSpec> {
        self.specs().into_iter().find(|s| s.resource == resource)
    }
}

#[async_trait]
impl ProcessLauncher for RecordingLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchHandle> {
        let mut specs = self.specs.lock().unwrap();
        specs.push(spec);
        Ok(LaunchHandle {
            pid: Some(1000 + specs.len() as u32),
        })
    }
}

#[derive(Debug)]
struct FailingInitialize;

#[async_trait]
impl LifecycleHook for FailingInitialize {
    async fn initialize(&self, _ctx: &mut PhaseContext<'_>) -> Result<()> {
        anyhow::bail!("boom")
    }
}

#[derive(Debug)]
struct BlockUntilCancelled;

#[async_trait]
impl LifecycleHook for BlockUntilCancelled {
    async fn before_start(&self, ctx: &mut PhaseContext<'_>) -> Result<()> {
        ctx.cancellation().cancelled().await;
        anyhow::bail!("observed cancellation")
    }
}

fn command(program: &str) -> Annotation {
    CommandOptions {
        command: program.to_string(),
        args: Vec::new(),
        workdir: None,
        env: std::collections::BTreeMap::new(),
    }
    .annotation()
    .unwrap()
}

fn test_options(dir: &tempfile::TempDir) -> RunOptions {
    RunOptions {
        workdir_root: dir.path().to_path_buf(),
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn a_failed_resource_blocks_dependents_but_not_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = ResourceGraph::new();
    graph.add_resource("a", ResourceKind::Executable).unwrap();
    graph.add_resource("b", ResourceKind::Executable).unwrap();
    graph.add_resource("c", ResourceKind::Executable).unwrap();
    graph.add_resource("d", ResourceKind::Executable).unwrap();
    graph.add_reference("b", "a").unwrap();
    graph.add_reference("c", "b").unwrap();

    let launcher = RecordingLauncher::default();
    let orchestrator = Orchestrator::new(Arc::new(launcher))
        .with_options(test_options(&dir))
        .with_hook("b", Arc::new(FailingInitialize));

    let report = orchestrator
        .run_to_completion(graph)
        .await
        .unwrap();

    assert_eq!(report.state_of("a"), Some(ResourceState::Running));
    assert_eq!(report.state_of("b"), Some(ResourceState::Failed));
    assert_eq!(report.state_of("c"), Some(ResourceState::Failed));
    assert_eq!(report.state_of("d"), Some(ResourceState::Running));

    let b = report.resource("b").unwrap();
    assert_eq!(
        b.failure,
        Some(FailureKind::Hook {
            phase: Phase::Initialize,
            message: "boom".to_string(),
        })
    );

    // Fallout is reported distinctly from the root cause.
    let c = report.resource("c").unwrap();
    assert_eq!(
        c.failure,
        Some(FailureKind::DependencyFailed {
            dependency: "b".to_string(),
        })
    );
}

#[tokio::test]
async fn dependents_receive_resolved_reference_expressions() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = ResourceGraph::new();

    let cache = graph.add_resource("cache", ResourceKind::Container).unwrap();
    cache
        .add_endpoint(EndpointDecl::new("tcp", "tcp").with_target_port(6379))
        .unwrap();

    let api = graph.add_resource("api", ResourceKind::Project).unwrap();
    api.add_endpoint(EndpointDecl::http("http")).unwrap();
    api.annotate(command("api-server"));

    let web = graph.add_resource("web", ResourceKind::Project).unwrap();
    web.add_endpoint(EndpointDecl::http("http")).unwrap();
    web.annotate(command("web-server"));

    graph.add_reference("api", "cache").unwrap();
    graph.add_reference("web", "api").unwrap();

    let launcher = RecordingLauncher::default();
    let orchestrator =
        Orchestrator::new(Arc::new(launcher.clone())).with_options(test_options(&dir));

    let report = orchestrator.run_to_completion(graph).await.unwrap();
    assert!(report.all_running(), "unexpected report:\n{report}");

    let api_spec = launcher.spec_for("api").unwrap();
    let cache_url = &api_spec.env["CACHE__TCP"];
    assert!(
        cache_url.starts_with("tcp://localhost:"),
        "unresolved reference: {cache_url}"
    );
    // The resource's own single endpoint injects PORT.
    assert!(api_spec.env.contains_key("PORT"));
    assert_eq!(api_spec.env["PORT"], api_spec.env["PORT_HTTP"]);

    let web_spec = launcher.spec_for("web").unwrap();
    let api_url = &web_spec.env["API__HTTP"];
    assert!(api_url.starts_with("http://localhost:"));
    assert!(api_url.ends_with(&api_spec.env["PORT"]));

    // No unresolved placeholders anywhere in the handed-off environment.
    for spec in launcher.specs() {
        for value in spec.env.values() {
            assert!(!value.contains("${"), "placeholder leaked: {value}");
        }
    }
}

#[tokio::test]
async fn value_resources_resolve_without_launching() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = ResourceGraph::new();
    graph
        .add_resource("api-key", ResourceKind::Value)
        .unwrap()
        .annotate(Annotation::value("s3cr3t"));
    graph
        .add_resource("api", ResourceKind::Project)
        .unwrap()
        .annotate(command("api-server"));
    graph.add_reference("api", "api-key").unwrap();

    let launcher = RecordingLauncher::default();
    let orchestrator =
        Orchestrator::new(Arc::new(launcher.clone())).with_options(test_options(&dir));

    let report = orchestrator.run_to_completion(graph).await.unwrap();
    assert!(report.all_running());

    // Exactly one launch: the value resource is resolved, never spawned.
    let specs = launcher.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].resource, "api");
    assert_eq!(specs[0].env["API_KEY__VALUE"], "s3cr3t");
}

#[tokio::test]
async fn fixed_port_conflicts_fail_only_the_requesting_resource() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = ResourceGraph::new();
    graph
        .add_resource("first", ResourceKind::Executable)
        .unwrap()
        .add_endpoint(EndpointDecl::http("http").with_fixed_port(48120))
        .unwrap();
    graph
        .add_resource("second", ResourceKind::Executable)
        .unwrap()
        .add_endpoint(EndpointDecl::http("http").with_fixed_port(48120))
        .unwrap();
    graph.add_reference("second", "first").unwrap();

    let orchestrator = Orchestrator::new(Arc::new(RecordingLauncher::default()))
        .with_options(test_options(&dir));

    let report = orchestrator.run_to_completion(graph).await.unwrap();

    assert_eq!(report.state_of("first"), Some(ResourceState::Running));
    let second = report.resource("second").unwrap();
    assert_eq!(second.state, ResourceState::Failed);
    let Some(FailureKind::Allocation { message }) = &second.failure else {
        panic!("expected an allocation failure, got {:?}", second.failure);
    };
    assert!(message.contains("first"));
    assert!(message.contains("second"));
    assert!(message.contains("48120"));
}

#[tokio::test]
async fn rerunning_after_teardown_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();

    let build = || {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource("api", ResourceKind::Project)
            .unwrap()
            .add_endpoint(EndpointDecl::http("http").with_fixed_port(48121))
            .unwrap();
        graph
    };

    let orchestrator = Orchestrator::new(Arc::new(RecordingLauncher::default()))
        .with_options(test_options(&dir));

    // The fixed port would conflict if the first run's allocations leaked
    // into the second.
    for _ in 0..2 {
        let graph = build();
        assert_eq!(
            graph.resource("api").unwrap().state(),
            ResourceState::NotStarted
        );
        let report = orchestrator.run_to_completion(graph).await.unwrap();
        assert!(report.all_running(), "unexpected report:\n{report}");
    }
}

#[tokio::test]
async fn cancellation_stops_resources_without_failing_them() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = ResourceGraph::new();
    graph.add_resource("a", ResourceKind::Executable).unwrap();
    graph.add_resource("b", ResourceKind::Executable).unwrap();
    graph.add_reference("b", "a").unwrap();

    let orchestrator = Orchestrator::new(Arc::new(RecordingLauncher::default()))
        .with_options(test_options(&dir))
        .with_hook("a", Arc::new(BlockUntilCancelled));

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move { orchestrator.run(graph, run_cancel).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let report = handle.await.unwrap().unwrap();

    assert_eq!(report.state_of("a"), Some(ResourceState::Stopped));
    assert_eq!(report.state_of("b"), Some(ResourceState::Stopped));
    assert_eq!(
        report.resource("b").unwrap().failure,
        Some(FailureKind::Cancelled)
    );
}

#[tokio::test]
async fn cyclic_graphs_fail_before_any_phase_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = ResourceGraph::new();
    graph.add_resource("a", ResourceKind::Executable).unwrap();
    graph.add_resource("b", ResourceKind::Executable).unwrap();
    graph.add_reference("a", "b").unwrap();
    graph.add_reference("b", "a").unwrap();

    let launcher = RecordingLauncher::default();
    let orchestrator =
        Orchestrator::new(Arc::new(launcher.clone())).with_options(test_options(&dir));

    let err = orchestrator.run_to_completion(graph).await.unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected(_)));
    assert!(launcher.specs().is_empty());
}
