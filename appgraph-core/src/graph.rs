use crate::error::GraphError;
use crate::resource::{Resource, ResourceKind};
use std::collections::HashMap;

/// The set of declared resources and the reference edges between them.
///
/// Resources are stored in declaration order, and reference edges in the
/// order they were added; topological ordering is therefore deterministic
/// across runs given the same construction sequence.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
    /// Dependency indices per resource, deduplicated, in insertion order.
    references: Vec<Vec<usize>>,
}

impl ResourceGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource. Fails on duplicate or malformed names.
    pub fn add_resource(
        &mut self,
        name: impl Into<String>,
        kind: ResourceKind,
    ) -> Result<&mut Resource, GraphError> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(GraphError::InvalidName(name));
        }
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        let idx = self.resources.len();
        self.index.insert(name.clone(), idx);
        self.resources.push(Resource::new(name, kind));
        self.references.push(Vec::new());
        Ok(&mut self.resources[idx])
    }

    /// Declare that `dependent` depends on `dependency`. Adding the same
    /// edge twice is a no-op.
    pub fn add_reference(&mut self, dependent: &str, dependency: &str) -> Result<(), GraphError> {
        let dependent_idx = self.index_of(dependent)?;
        let dependency_idx = self.index_of(dependency)?;
        let edges = &mut self.references[dependent_idx];
        if !edges.contains(&dependency_idx) {
            edges.push(dependency_idx);
        }
        Ok(())
    }

    fn index_of(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownResource(name.to_string()))
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.index.get(name).map(|&idx| &self.resources[idx])
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Resource> {
        let idx = *self.index.get(name)?;
        Some(&mut self.resources[idx])
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Names of the resources `name` depends on, in edge-insertion order.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>, GraphError> {
        let idx = self.index_of(name)?;
        Ok(self.references[idx]
            .iter()
            .map(|&dep| self.resources[dep].name().to_string())
            .collect())
    }

    /// Consume the graph, yielding its resources in declaration order.
    #[must_use]
    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }

    /// Dependency-respecting order: every dependency appears before its
    /// dependents. DFS-based; ties among unconstrained resources fall back
    /// to declaration order, so the result is stable across runs.
    pub fn topological_order(&self) -> Result<Vec<&Resource>, GraphError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit<'g>(
            graph: &'g ResourceGraph,
            idx: usize,
            marks: &mut [Mark],
            order: &mut Vec<&'g Resource>,
        ) -> Result<(), GraphError> {
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::InProgress => {
                    return Err(GraphError::CycleDetected(
                        graph.resources[idx].name().to_string(),
                    ));
                }
                Mark::Unvisited => {}
            }
            marks[idx] = Mark::InProgress;
            for &dep in &graph.references[idx] {
                visit(graph, dep, marks, order)?;
            }
            marks[idx] = Mark::Done;
            order.push(&graph.resources[idx]);
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.resources.len()];
        let mut order = Vec::with_capacity(self.resources.len());
        for idx in 0..self.resources.len() {
            visit(self, idx, &mut marks, &mut order)?;
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(order: &[&Resource]) -> Vec<String> {
        order.iter().map(|r| r.name().to_string()).collect()
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("web", ResourceKind::Project).unwrap();
        graph.add_resource("api", ResourceKind::Project).unwrap();
        graph.add_resource("cache", ResourceKind::Container).unwrap();
        graph.add_reference("web", "api").unwrap();
        graph.add_reference("api", "cache").unwrap();

        let order = names(&graph.topological_order().unwrap());
        assert_eq!(order, vec!["cache", "api", "web"]);
    }

    #[test]
    fn topological_order_is_stable_for_unconstrained_resources() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("c", ResourceKind::Executable).unwrap();
        graph.add_resource("a", ResourceKind::Executable).unwrap();
        graph.add_resource("b", ResourceKind::Executable).unwrap();

        // No edges: declaration order is the tie-break, every time.
        for _ in 0..3 {
            let order = names(&graph.topological_order().unwrap());
            assert_eq!(order, vec!["c", "a", "b"]);
        }
    }

    #[test]
    fn every_resource_appears_exactly_once() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("a", ResourceKind::Executable).unwrap();
        graph.add_resource("b", ResourceKind::Executable).unwrap();
        graph.add_resource("c", ResourceKind::Executable).unwrap();
        graph.add_resource("d", ResourceKind::Executable).unwrap();
        graph.add_reference("b", "a").unwrap();
        graph.add_reference("c", "a").unwrap();
        graph.add_reference("d", "b").unwrap();
        graph.add_reference("d", "c").unwrap();

        let order = names(&graph.topological_order().unwrap());
        assert_eq!(order.len(), 4);
        for name in ["a", "b", "c", "d"] {
            assert_eq!(order.iter().filter(|n| *n == name).count(), 1);
        }
        let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn cycles_are_rejected_with_a_participant_named() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("a", ResourceKind::Executable).unwrap();
        graph.add_resource("b", ResourceKind::Executable).unwrap();
        graph.add_reference("a", "b").unwrap();
        graph.add_reference("b", "a").unwrap();

        let err = graph.topological_order().unwrap_err();
        let GraphError::CycleDetected(name) = err else {
            panic!("expected a cycle error, got {err:?}");
        };
        assert!(name == "a" || name == "b");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("a", ResourceKind::Executable).unwrap();
        graph.add_reference("a", "a").unwrap();

        assert_eq!(
            graph.topological_order().unwrap_err(),
            GraphError::CycleDetected("a".to_string())
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("api", ResourceKind::Project).unwrap();
        assert_eq!(
            graph.add_resource("api", ResourceKind::Container).unwrap_err(),
            GraphError::DuplicateName("api".to_string())
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut graph = ResourceGraph::new();
        assert_eq!(
            graph.add_resource("", ResourceKind::Project).unwrap_err(),
            GraphError::InvalidName(String::new())
        );
        assert_eq!(
            graph.add_resource("my api", ResourceKind::Project).unwrap_err(),
            GraphError::InvalidName("my api".to_string())
        );
    }

    #[test]
    fn references_to_unknown_resources_are_rejected() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("api", ResourceKind::Project).unwrap();
        assert_eq!(
            graph.add_reference("api", "ghost").unwrap_err(),
            GraphError::UnknownResource("ghost".to_string())
        );
        assert_eq!(
            graph.add_reference("ghost", "api").unwrap_err(),
            GraphError::UnknownResource("ghost".to_string())
        );
    }

    #[test]
    fn duplicate_edges_are_deduplicated() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("api", ResourceKind::Project).unwrap();
        graph.add_resource("db", ResourceKind::Container).unwrap();
        graph.add_reference("api", "db").unwrap();
        graph.add_reference("api", "db").unwrap();

        assert_eq!(graph.dependencies_of("api").unwrap(), vec!["db"]);
    }
}
