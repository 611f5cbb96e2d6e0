use crate::adapters::AdapterRegistry;
use loomcore::{node_types, Connection, NodeSpec, ValidationError};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Static structural checks on a node/connection graph, run before any
/// execution state or resource is allocated.
///
/// Fails fast on the first defect. Unknown node types are rejected here,
/// never at dispatch time. Cycles are legal only when they pass through a
/// loop node, whose iteration cap bounds them at run time.
pub fn validate(
    nodes: &[NodeSpec],
    connections: &[Connection],
    adapters: &AdapterRegistry,
    max_nodes: usize,
) -> Result<(), ValidationError> {
    if nodes.is_empty() || nodes.len() > max_nodes {
        return Err(ValidationError::InvalidBounds {
            count: nodes.len(),
            max: max_nodes,
        });
    }

    let mut by_id: HashMap<&str, &NodeSpec> = HashMap::new();
    for node in nodes {
        if node.id.is_empty() {
            return Err(ValidationError::MalformedNode {
                node_id: node.id.clone(),
                detail: "empty node id".into(),
            });
        }
        if node.node_type.is_empty() {
            return Err(ValidationError::MalformedNode {
                node_id: node.id.clone(),
                detail: "empty node type".into(),
            });
        }
        if by_id.insert(node.id.as_str(), node).is_some() {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    for node in nodes {
        if !adapters.contains(&node.node_type) {
            return Err(ValidationError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }

    let mut inbound: HashMap<&str, usize> = HashMap::new();
    for conn in connections {
        let from = by_id.get(conn.from.node_id.as_str()).copied().ok_or_else(|| {
            ValidationError::DanglingConnection {
                connection_id: conn.id.clone(),
                detail: format!("source node {} does not exist", conn.from.node_id),
            }
        })?;
        let to = by_id.get(conn.to.node_id.as_str()).copied().ok_or_else(|| {
            ValidationError::DanglingConnection {
                connection_id: conn.id.clone(),
                detail: format!("target node {} does not exist", conn.to.node_id),
            }
        })?;

        if from.output_port(conn.from.port_index).is_none() {
            return Err(ValidationError::DanglingConnection {
                connection_id: conn.id.clone(),
                detail: format!(
                    "output port {} out of range for node {}",
                    conn.from.port_index, from.id
                ),
            });
        }
        if to.input_port(conn.to.port_index).is_none() {
            return Err(ValidationError::DanglingConnection {
                connection_id: conn.id.clone(),
                detail: format!(
                    "input port {} out of range for node {}",
                    conn.to.port_index, to.id
                ),
            });
        }

        *inbound.entry(conn.to.node_id.as_str()).or_default() += 1;
    }

    check_start_node(nodes, &inbound)?;
    check_cycles(nodes, connections)?;

    Ok(())
}

/// Exactly one start node, and nothing may flow into it
fn check_start_node(
    nodes: &[NodeSpec],
    inbound: &HashMap<&str, usize>,
) -> Result<(), ValidationError> {
    let starts: Vec<&NodeSpec> = nodes
        .iter()
        .filter(|n| n.node_type == node_types::START)
        .collect();

    match starts.as_slice() {
        [] => Err(ValidationError::MissingStartNode {
            detail: "workflow has no start node".into(),
        }),
        [start] => {
            if inbound.get(start.id.as_str()).copied().unwrap_or(0) > 0 {
                Err(ValidationError::MissingStartNode {
                    detail: format!("start node {} has inbound connections", start.id),
                })
            } else {
                Ok(())
            }
        }
        many => Err(ValidationError::MissingStartNode {
            detail: format!("workflow has {} start nodes", many.len()),
        }),
    }
}

/// Every strongly connected component larger than a single node (or any
/// self edge) must contain a loop node
fn check_cycles(nodes: &[NodeSpec], connections: &[Connection]) -> Result<(), ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
    for node in nodes {
        index_of.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for conn in connections {
        // Endpoints were resolved above
        if let (Some(&from), Some(&to)) = (
            index_of.get(conn.from.node_id.as_str()),
            index_of.get(conn.to.node_id.as_str()),
        ) {
            graph.add_edge(from, to, ());
        }
    }

    let loop_ids: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.node_type == node_types::LOOP)
        .map(|n| n.id.as_str())
        .collect();

    for component in tarjan_scc(&graph) {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|&idx| graph.find_edge(idx, idx).is_some());
        if !cyclic {
            continue;
        }
        let has_loop = component.iter().any(|&idx| loop_ids.contains(graph[idx]));
        if !has_loop {
            return Err(ValidationError::UnboundedCycle {
                node_id: graph[component[0]].to_string(),
            });
        }
    }

    Ok(())
}
