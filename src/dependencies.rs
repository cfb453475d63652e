//! Dependency Resolver: topological validation and circular-dependency
//! detection over flow-to-flow and node-to-node `DependsOn` edges, via a
//! three-color (unvisited/in-progress/resolved) depth-first walk.

use std::collections::HashSet;

use crate::error::DefinitionError;
use crate::manifest::{DependencyEdge, Manifest};

/// Resolves every flow's own `DependsOn`, then every node's `DependsOn`
/// within that flow.
pub fn resolve_manifest_dependencies(manifest: &mut Manifest) -> Result<(), DefinitionError> {
    let flow_names: Vec<String> = manifest.flows.iter().map(|f| f.name.clone()).collect();

    for name in &flow_names {
        let mut resolved = HashSet::new();
        let mut unresolved = HashSet::new();
        resolve_flow_dependencies(manifest, name, &mut resolved, &mut unresolved)?;
    }

    for flow_index in 0..manifest.flows.len() {
        let node_names: Vec<String> = manifest.flows[flow_index]
            .nodes
            .iter()
            .map(|n| n.name.clone())
            .collect();

        for name in &node_names {
            let mut resolved = HashSet::new();
            let mut unresolved = HashSet::new();
            resolve_call_dependencies(
                &mut manifest.flows[flow_index],
                name,
                &mut resolved,
                &mut unresolved,
            )?;
        }

        compute_edges(&mut manifest.flows[flow_index]);
    }

    Ok(())
}

/// Populates each node's `Previous`/`Next` computed edge lists from its
/// resolved `DependsOn` map: a resolved `ResolvedCall(j)` on node `i` means
/// `j` precedes `i`, so `j` gains `i` as a `Next` edge and `i` gains `j` as
/// a `Previous` edge.
fn compute_edges(flow: &mut crate::manifest::Flow) {
    for node in flow.nodes.iter_mut() {
        node.previous.clear();
        node.next.clear();
    }

    let edges: Vec<(usize, usize)> = flow
        .nodes
        .iter()
        .enumerate()
        .flat_map(|(i, node)| {
            node.depends_on.values().filter_map(move |edge| match edge {
                DependencyEdge::ResolvedCall(j) => Some((*j, i)),
                _ => None,
            })
        })
        .collect();

    for (predecessor, successor) in edges {
        flow.nodes[predecessor].next.push(successor);
        flow.nodes[successor].previous.push(predecessor);
    }
}

/// Resolves the given flow's dependencies and detects circular flow
/// dependencies, mutating `DependsOn[edge]` to a resolved index as it goes.
fn resolve_flow_dependencies(
    manifest: &mut Manifest,
    name: &str,
    resolved: &mut HashSet<String>,
    unresolved: &mut HashSet<String>,
) -> Result<(), DefinitionError> {
    unresolved.insert(name.to_string());

    let edges: Vec<String> = manifest
        .get_flow(name)
        .map(|f| f.depends_on.keys().cloned().collect())
        .unwrap_or_default();

    for edge in edges {
        if resolved.contains(&edge) {
            continue;
        }

        if unresolved.contains(&edge) {
            return Err(DefinitionError::CircularDependency {
                kind: "flow",
                from: name.to_string(),
                to: edge,
            });
        }

        if let Some(target_index) = manifest.flows.iter().position(|f| f.name == edge) {
            resolve_flow_dependencies(manifest, &edge, resolved, unresolved)?;

            if let Some(flow) = manifest.get_flow_mut(name) {
                flow.depends_on
                    .insert(edge.clone(), DependencyEdge::ResolvedFlow(target_index));
            }
        }
    }

    resolved.insert(name.to_string());
    unresolved.remove(name);
    Ok(())
}

/// Resolves the given node's dependencies within one flow and detects
/// circular node dependencies.
fn resolve_call_dependencies(
    flow: &mut crate::manifest::Flow,
    name: &str,
    resolved: &mut HashSet<String>,
    unresolved: &mut HashSet<String>,
) -> Result<(), DefinitionError> {
    unresolved.insert(name.to_string());

    let edges: Vec<String> = flow
        .nodes
        .iter()
        .find(|n| n.name == name)
        .map(|n| n.depends_on.keys().cloned().collect())
        .unwrap_or_default();

    for edge in edges {
        if resolved.contains(&edge) {
            continue;
        }

        if unresolved.contains(&edge) {
            return Err(DefinitionError::CircularDependency {
                kind: "node",
                from: format!("{}.{}", flow.name, name),
                to: format!("{}.{}", flow.name, edge),
            });
        }

        if let Some(target_index) = flow.nodes.iter().position(|n| n.name == edge) {
            resolve_call_dependencies(flow, &edge, resolved, unresolved)?;

            if let Some(node) = flow.nodes.iter_mut().find(|n| n.name == name) {
                node.depends_on
                    .insert(edge.clone(), DependencyEdge::ResolvedCall(target_index));
            }
        }
    }

    resolved.insert(name.to_string());
    unresolved.remove(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Flow, Node};

    #[test]
    fn acyclic_flow_dependencies_resolve() {
        let mut manifest = Manifest::default();
        let mut a = Flow::new("a");
        let mut b = Flow::new("b");
        a.depends_on.insert("b".to_string(), DependencyEdge::Unresolved);
        manifest.flows.push(a);
        b.depends_on.clear();
        manifest.flows.push(b);

        resolve_manifest_dependencies(&mut manifest).unwrap();

        let resolved = manifest.get_flow("a").unwrap().depends_on.get("b").unwrap();
        assert_eq!(*resolved, DependencyEdge::ResolvedFlow(1));
    }

    #[test]
    fn circular_flow_dependency_is_reported() {
        let mut manifest = Manifest::default();
        let mut a = Flow::new("a");
        let mut b = Flow::new("b");
        a.depends_on.insert("b".to_string(), DependencyEdge::Unresolved);
        b.depends_on.insert("a".to_string(), DependencyEdge::Unresolved);
        manifest.flows.push(a);
        manifest.flows.push(b);

        let err = resolve_manifest_dependencies(&mut manifest).unwrap_err();
        match err {
            DefinitionError::CircularDependency { kind, from, to } => {
                assert_eq!(kind, "flow");
                assert!((from == "a" && to == "b") || (from == "b" && to == "a"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn acyclic_node_dependencies_resolve_within_flow() {
        let mut manifest = Manifest::default();
        let mut flow = Flow::new("demo");
        let mut n1 = Node::new("first");
        let n2 = Node::new("second");
        n1.depends_on.insert("second".to_string(), DependencyEdge::Unresolved);
        flow.nodes.push(n1);
        flow.nodes.push(n2);
        manifest.flows.push(flow);

        resolve_manifest_dependencies(&mut manifest).unwrap();

        let flow = manifest.get_flow("demo").unwrap();
        let resolved = flow.nodes[0].depends_on.get("second").unwrap();
        assert_eq!(*resolved, DependencyEdge::ResolvedCall(1));
    }

    #[test]
    fn resolving_dependencies_populates_previous_and_next_edges() {
        let mut manifest = Manifest::default();
        let mut flow = Flow::new("demo");
        let mut first = Node::new("first");
        first.depends_on.insert("second".to_string(), DependencyEdge::Unresolved);
        let second = Node::new("second");
        flow.nodes.push(first);
        flow.nodes.push(second);
        manifest.flows.push(flow);

        resolve_manifest_dependencies(&mut manifest).unwrap();

        let flow = manifest.get_flow("demo").unwrap();
        assert_eq!(flow.nodes[0].previous, vec![1]);
        assert_eq!(flow.nodes[1].next, vec![0]);
        assert!(flow.nodes[0].next.is_empty());
        assert!(flow.nodes[1].previous.is_empty());
    }

    #[test]
    fn circular_node_dependency_is_reported() {
        let mut manifest = Manifest::default();
        let mut flow = Flow::new("demo");
        let mut n1 = Node::new("first");
        let mut n2 = Node::new("second");
        n1.depends_on.insert("second".to_string(), DependencyEdge::Unresolved);
        n2.depends_on.insert("first".to_string(), DependencyEdge::Unresolved);
        flow.nodes.push(n1);
        flow.nodes.push(n2);
        manifest.flows.push(flow);

        let err = resolve_manifest_dependencies(&mut manifest).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::CircularDependency { kind: "node", .. }
        ));
    }
}
