//! Dependency graph builder.
//!
//! Orders the constructs of a run into waves. Every member of a wave only
//! depends on members of earlier waves, so a wave can be dispatched in
//! parallel. Edges point from the construct that must go first to the one
//! that waits for it.

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{OrchestratorError, PlanError, Result, StateError};
use crate::model::{ConstructAction, Urn};
use crate::state::EnvironmentState;

/// Directed graph over the constructs in scope for one run.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<Urn, ()>,
    node_map: HashMap<Urn, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph for the constructs named in `actions`.
    ///
    /// For a construct A that depends on (or is bound to) B, A waits for B
    /// unless A is being deleted, in which case B waits for A.
    ///
    /// # Errors
    ///
    /// Returns an error if a construct is missing from state, or a create or
    /// update depends on a construct outside the run.
    pub fn build(
        state: &EnvironmentState,
        actions: &BTreeMap<Urn, ConstructAction>,
    ) -> Result<Self> {
        let mut graph = Self::new();
        for urn in actions.keys() {
            graph.add_construct(urn.clone());
        }

        for (urn, action) in actions {
            let construct = state.construct(urn).ok_or_else(|| {
                OrchestratorError::State(StateError::ConstructNotFound {
                    urn: urn.to_string(),
                })
            })?;

            for dependency in construct.dependencies() {
                if !actions.contains_key(dependency) {
                    if *action == ConstructAction::Delete {
                        debug!(urn = %urn, dependency = %dependency, "Dependency outside run, ignoring for delete");
                        continue;
                    }
                    return Err(OrchestratorError::Plan(PlanError::UnknownDependency {
                        urn: urn.to_string(),
                        dependency: dependency.to_string(),
                    }));
                }

                if *action == ConstructAction::Delete {
                    graph.add_ordering(urn, dependency);
                } else {
                    graph.add_ordering(dependency, urn);
                }
            }
        }

        Ok(graph)
    }

    /// Adds a vertex, returning the existing one if already present.
    pub fn add_construct(&mut self, urn: Urn) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(&urn) {
            idx
        } else {
            let idx = self.graph.add_node(urn.clone());
            self.node_map.insert(urn, idx);
            idx
        }
    }

    /// Records that `first` must finish before `then` starts.
    pub fn add_ordering(&mut self, first: &Urn, then: &Urn) {
        let first_idx = self.add_construct(first.clone());
        let then_idx = self.add_construct(then.clone());

        if self.graph.find_edge(first_idx, then_idx).is_none() {
            self.graph.add_edge(first_idx, then_idx, ());
        }
    }

    /// Returns the number of constructs in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the graph has no constructs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Partitions the graph into ordered waves.
    ///
    /// Members of each wave are sorted by URN.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::CircularDependency`] if the graph has a cycle.
    pub fn waves(&self) -> std::result::Result<Vec<Vec<Urn>>, PlanError> {
        if let Err(cycle) = toposort(&self.graph, None) {
            return Err(PlanError::CircularDependency {
                urn: self.graph[cycle.node_id()].to_string(),
            });
        }

        let mut in_degrees: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph.edges_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut waves = Vec::new();
        while !in_degrees.is_empty() {
            let ready: Vec<NodeIndex> = in_degrees
                .iter()
                .filter(|&(_, &degree)| degree == 0)
                .map(|(&idx, _)| idx)
                .collect();

            if ready.is_empty() {
                let stuck = in_degrees
                    .keys()
                    .map(|&idx| &self.graph[idx])
                    .min()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                return Err(PlanError::CircularDependency { urn: stuck });
            }

            for &idx in &ready {
                for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    if let Some(degree) = in_degrees.get_mut(&next) {
                        *degree -= 1;
                    }
                }
                in_degrees.remove(&idx);
            }

            let mut wave: Vec<Urn> = ready.iter().map(|&idx| self.graph[idx].clone()).collect();
            wave.sort();
            waves.push(wave);
        }

        debug!(waves = waves.len(), constructs = self.len(), "Resolved deployment waves");
        Ok(waves)
    }
}

/// Returns the index of the wave containing `urn`.
#[must_use]
pub fn wave_index(waves: &[Vec<Urn>], urn: &Urn) -> Option<usize> {
    waves.iter().position(|wave| wave.contains(urn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstructSpec, ConstructState};

    fn urn(id: &str) -> Urn {
        Urn::parse(&format!("urn:acme:shop:dev:web:construct/klotho.aws.Thing:{id}"))
            .expect("valid urn")
    }

    fn state_with(edges: &[(&str, Vec<&str>)]) -> EnvironmentState {
        let mut state = EnvironmentState::new(
            1,
            Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            "dev",
            "us-east-1",
        );
        for (id, deps) in edges {
            let spec = ConstructSpec {
                depends_on: deps.iter().map(|d| urn(d)).collect(),
                ..ConstructSpec::default()
            };
            state.insert(ConstructState::new(urn(id), spec, "h"));
        }
        state
    }

    fn actions(ids: &[&str], action: ConstructAction) -> BTreeMap<Urn, ConstructAction> {
        ids.iter().map(|id| (urn(id), action)).collect()
    }

    #[test]
    fn test_create_order_follows_dependencies() {
        let state = state_with(&[("db", vec![]), ("api", vec!["db"]), ("web", vec!["api"])]);
        let graph = DependencyGraph::build(
            &state,
            &actions(&["db", "api", "web"], ConstructAction::Create),
        )
        .expect("graph");

        let waves = graph.waves().expect("acyclic");
        assert_eq!(waves, vec![vec![urn("db")], vec![urn("api")], vec![urn("web")]]);
    }

    #[test]
    fn test_delete_order_is_reversed() {
        let state = state_with(&[("db", vec![]), ("api", vec!["db"])]);
        let graph = DependencyGraph::build(
            &state,
            &actions(&["db", "api"], ConstructAction::Delete),
        )
        .expect("graph");

        let waves = graph.waves().expect("acyclic");
        assert!(wave_index(&waves, &urn("api")) < wave_index(&waves, &urn("db")));
    }

    #[test]
    fn test_independent_constructs_share_a_wave() {
        let state = state_with(&[("db", vec![]), ("queue", vec![]), ("api", vec!["db", "queue"])]);
        let graph = DependencyGraph::build(
            &state,
            &actions(&["db", "queue", "api"], ConstructAction::Update),
        )
        .expect("graph");

        let waves = graph.waves().expect("acyclic");
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0], vec![urn("db"), urn("queue")]);
        assert_eq!(waves[1], vec![urn("api")]);
    }

    #[test]
    fn test_input_producer_orders_consumer() {
        let mut state = state_with(&[("db", vec![])]);
        let spec = ConstructSpec {
            inputs: BTreeMap::from([(
                String::from("endpoint"),
                crate::model::Input {
                    depends_on: Some(urn("db")),
                    value: serde_json::Value::Null,
                    status: crate::model::InputStatus::Pending,
                },
            )]),
            ..ConstructSpec::default()
        };
        state.insert(ConstructState::new(urn("api"), spec, "h"));

        let waves = DependencyGraph::build(
            &state,
            &actions(&["db", "api"], ConstructAction::Create),
        )
        .expect("graph")
        .waves()
        .expect("acyclic");
        assert_eq!(waves, vec![vec![urn("db")], vec![urn("api")]]);
    }

    #[test]
    fn test_mixed_actions() {
        let state = state_with(&[("db", vec![]), ("api", vec!["db"]), ("old", vec!["db"])]);
        let mut acts = actions(&["db", "api"], ConstructAction::Update);
        acts.insert(urn("old"), ConstructAction::Delete);

        let waves = DependencyGraph::build(&state, &acts)
            .expect("graph")
            .waves()
            .expect("acyclic");

        assert!(wave_index(&waves, &urn("db")) < wave_index(&waves, &urn("api")));
        assert!(wave_index(&waves, &urn("old")) < wave_index(&waves, &urn("db")));
    }

    #[test]
    fn test_cycle_rejected() {
        let state = state_with(&[("a", vec!["b"]), ("b", vec!["c"]), ("c", vec!["a"])]);
        let graph = DependencyGraph::build(
            &state,
            &actions(&["a", "b", "c"], ConstructAction::Create),
        )
        .expect("graph");

        assert!(matches!(
            graph.waves(),
            Err(PlanError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let state = state_with(&[("api", vec!["db"])]);
        let err = DependencyGraph::build(&state, &actions(&["api"], ConstructAction::Create))
            .expect_err("db not in run");
        assert!(err.is_configuration());

        DependencyGraph::build(&state, &actions(&["api"], ConstructAction::Delete))
            .expect("delete ignores missing dependency");
    }

    #[test]
    fn test_lone_construct_is_first_wave() {
        let state = state_with(&[("db", vec![]), ("api", vec!["db"]), ("cdn", vec![])]);
        let waves = DependencyGraph::build(
            &state,
            &actions(&["db", "api", "cdn"], ConstructAction::Delete),
        )
        .expect("graph")
        .waves()
        .expect("acyclic");

        assert_eq!(wave_index(&waves, &urn("cdn")), Some(0));
    }
}
