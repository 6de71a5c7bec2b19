//! Enabling order for a set of services and their dependencies
//!
//! Each node gets its own branch: the node's dependencies depth first, then the
//! node. Branches are independent, so a shared dependency shows up in every
//! branch that needs it. Cycles terminate the walk silently. A node whose only
//! reference is to itself appears twice, once as its own dependency and once
//! as the target. A self-reference next to other references adds nothing.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::id::ServiceId;
use crate::node::ServiceNode;

/// A vertex of the dependency graph.
pub trait DependencyNode: Clone {
    /// Id of this node.
    fn node_id(&self) -> &ServiceId;

    /// Ids of the nodes this one depends on, in reference order.
    fn dependency_ids(&self) -> Vec<ServiceId>;
}

impl DependencyNode for Arc<ServiceNode> {
    fn node_id(&self) -> &ServiceId {
        self.id()
    }

    fn dependency_ids(&self) -> Vec<ServiceId> {
        self.references()
    }
}

/// Computes one branch per node, in the map's iteration order.
pub fn determine_enabling_order<N>(nodes: &IndexMap<ServiceId, N>) -> Vec<Vec<N>>
where
    N: DependencyNode,
{
    nodes
        .values()
        .map(|node| enabling_branch(nodes, node))
        .collect()
}

/// Computes the branch for `target`. Its last element is always `target`.
///
/// References to ids missing from `nodes` are skipped.
pub fn enabling_branch<N>(nodes: &IndexMap<ServiceId, N>, target: &N) -> Vec<N>
where
    N: DependencyNode,
{
    let mut walk = Walk {
        nodes,
        branch: Vec::new(),
        contained: HashSet::new(),
        visiting: HashSet::new(),
    };
    walk.visit(target);

    walk.branch
}

struct Walk<'a, N> {
    nodes: &'a IndexMap<ServiceId, N>,
    branch: Vec<N>,
    contained: HashSet<ServiceId>,
    visiting: HashSet<ServiceId>,
}

impl<N> Walk<'_, N>
where
    N: DependencyNode,
{
    fn visit(&mut self, node: &N) {
        let nodes = self.nodes;
        let id = node.node_id().clone();
        self.visiting.insert(id.clone());

        let dependency_ids = node.dependency_ids();
        let only_itself =
            !dependency_ids.is_empty() && dependency_ids.iter().all(|dependency| *dependency == id);

        for dependency_id in dependency_ids {
            if dependency_id == id {
                continue;
            }
            if self.visiting.contains(&dependency_id)
                || self.contained.contains(&dependency_id)
            {
                trace!("Not descending into {} again from {}", dependency_id, id);
            } else if let Some(dependency) = nodes.get(&dependency_id) {
                self.visit(dependency);
            } else {
                trace!("Skipping reference from {} to unknown service {}", id, dependency_id);
            }
        }

        if only_itself {
            self.branch.push(node.clone());
        }
        self.visiting.remove(&id);
        self.contained.insert(id);
        self.branch.push(node.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct TestNode {
        id: ServiceId,
        dependencies: Vec<ServiceId>,
    }

    impl DependencyNode for TestNode {
        fn node_id(&self) -> &ServiceId {
            &self.id
        }

        fn dependency_ids(&self) -> Vec<ServiceId> {
            self.dependencies.clone()
        }
    }

    fn graph(edges: &[(&str, &[&str])]) -> IndexMap<ServiceId, TestNode> {
        edges
            .iter()
            .map(|(id, dependencies)| {
                let id = ServiceId::from(*id);
                let node = TestNode {
                    id: id.clone(),
                    dependencies: dependencies.iter().map(|d| ServiceId::from(*d)).collect(),
                };
                (id, node)
            })
            .collect()
    }

    fn ids(branch: &[TestNode]) -> Vec<&str> {
        branch.iter().map(|node| node.id.as_str()).collect()
    }

    #[test]
    fn test_shared_dependencies_repeat_per_branch() {
        let nodes = graph(&[("A", &["B"]), ("B", &[]), ("C", &["B", "D"]), ("D", &[])]);

        let order = determine_enabling_order(&nodes);

        let order: Vec<Vec<&str>> = order.iter().map(|b| ids(b)).collect();
        assert_eq!(
            order,
            vec![
                vec!["B", "A"],
                vec!["B"],
                vec!["B", "D", "C"],
                vec!["D"],
            ]
        );
    }

    #[test]
    fn test_self_reference() {
        let nodes = graph(&[("A", &["A"])]);
        assert_eq!(ids(&determine_enabling_order(&nodes)[0]), vec!["A", "A"]);

        let nodes = graph(&[("A", &["B", "A"]), ("B", &[])]);
        let order = determine_enabling_order(&nodes);
        let order: Vec<Vec<&str>> = order.iter().map(|b| ids(b)).collect();
        assert_eq!(order, vec![vec!["B", "A"], vec!["B"]]);

        let nodes = graph(&[("A", &["A", "B"]), ("B", &[])]);
        assert_eq!(ids(&enabling_branch(&nodes, &nodes[0])), vec!["B", "A"]);
    }

    #[test]
    fn test_transitive_cycle_terminates() {
        let nodes = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);

        let order = determine_enabling_order(&nodes);

        assert_eq!(ids(&order[0]), vec!["C", "B", "A"]);
        assert_eq!(ids(&order[1]), vec!["A", "C", "B"]);
        assert_eq!(ids(&order[2]), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_diamond_visits_shared_leaf_once() {
        let nodes = graph(&[("A", &["B", "C"]), ("B", &["D"]), ("C", &["D"]), ("D", &[])]);

        assert_eq!(
            ids(&enabling_branch(&nodes, &nodes[0])),
            vec!["D", "B", "C", "A"]
        );
    }

    #[test]
    fn test_dangling_reference_is_skipped() {
        let nodes = graph(&[("A", &["missing", "B"]), ("B", &[])]);

        assert_eq!(ids(&enabling_branch(&nodes, &nodes[0])), vec!["B", "A"]);
    }

    #[test]
    fn test_deep_chain() {
        let names: Vec<String> = (0..500).map(|i| format!("n{i}")).collect();
        let nodes: IndexMap<ServiceId, TestNode> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let id = ServiceId::from(name.as_str());
                let dependencies = names
                    .get(i + 1)
                    .map(|next| vec![ServiceId::from(next.as_str())])
                    .unwrap_or_default();
                (id.clone(), TestNode { id, dependencies })
            })
            .collect();

        let branch = enabling_branch(&nodes, &nodes[0]);

        assert_eq!(branch.len(), 500);
        assert_eq!(branch[0].id.as_str(), "n499");
        assert_eq!(branch[499].id.as_str(), "n0");
    }

    /// Random acyclic graphs: node `i` may only depend on nodes with a larger index.
    fn acyclic_graph() -> impl Strategy<Value = IndexMap<ServiceId, TestNode>> {
        (1usize..12).prop_flat_map(|size| {
            proptest::collection::vec(proptest::collection::vec(any::<bool>(), size), size)
                .prop_map(move |matrix| {
                    (0..size)
                        .map(|i| {
                            let id = ServiceId::new(format!("s{i}"));
                            let dependencies = (i + 1..size)
                                .filter(|j| matrix[i][*j])
                                .map(|j| ServiceId::new(format!("s{j}")))
                                .collect();
                            (id.clone(), TestNode { id, dependencies })
                        })
                        .collect()
                })
        })
    }

    proptest! {
        #[test]
        fn prop_dependencies_precede_dependents(nodes in acyclic_graph()) {
            let order = determine_enabling_order(&nodes);
            prop_assert_eq!(order.len(), nodes.len());

            for (branch, target) in order.iter().zip(nodes.values()) {
                prop_assert_eq!(branch.last().map(|n| &n.id), Some(&target.id));

                for (position, node) in branch.iter().enumerate() {
                    for dependency in &node.dependencies {
                        let found = branch.iter().position(|n| &n.id == dependency);
                        prop_assert!(found.is_some_and(|p| p < position));
                    }
                }

                let unique: HashSet<_> = branch.iter().map(|n| &n.id).collect();
                prop_assert_eq!(unique.len(), branch.len());
            }
        }
    }
}
