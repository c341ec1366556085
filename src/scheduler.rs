// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::indexer::DagNode;

use std::collections::{BTreeMap, BTreeSet};

/// Topological layering of the computation DAG. Nodes left over after
/// draining form one fixpoint layer, iterated to stability or limit.
#[derive(Debug, Default)]
pub struct Layering {
    pub layers: Vec<Vec<usize>>,
    pub fixpoint: Vec<usize>,
}

/// `inert` holds every name (plain key or IRI) already satisfied by
/// the document before any node runs. A node depends on another when
/// it reads a name among the other's writes; reads satisfied by inert
/// values never create edges.
pub fn layer_nodes(nodes: &[DagNode], inert: &BTreeSet<std::rc::Rc<str>>) -> Layering {
    // Mapping from each written name to the nodes that write it.
    let mut writers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        writers.entry(node.plain_key.as_ref()).or_default().push(idx);
        writers.entry(node.iri.as_ref()).or_default().push(idx);
    }

    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    for (idx, node) in nodes.iter().enumerate() {
        for read in &node.reads {
            if inert.contains(read) {
                continue;
            }
            if let Some(ws) = writers.get(read.as_ref()) {
                for w in ws {
                    if *w != idx {
                        deps[idx].insert(*w);
                    }
                }
            }
        }
    }

    let mut layering = Layering::default();
    let mut done: BTreeSet<usize> = BTreeSet::new();
    let mut remaining: Vec<usize> = (0..nodes.len()).collect();

    // Repeatedly drain nodes whose dependencies are all satisfied,
    // keeping document order within each layer.
    loop {
        let ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|idx| deps[*idx].iter().all(|d| done.contains(d)))
            .collect();
        if ready.is_empty() {
            break;
        }
        done.extend(ready.iter().copied());
        remaining.retain(|idx| !done.contains(idx));
        layering.layers.push(ready);
    }

    // Whatever remains is cyclic.
    layering.fixpoint = remaining;
    layering
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{DagNode, NodeKind, Payload};
    use crate::parser;
    use anyhow::Result;
    use std::rc::Rc;

    fn node(key: &str, expr: &str) -> Result<DagNode> {
        let ast = parser::parse_expression(key, expr)?;
        Ok(DagNode {
            iri: format!("https://ex/{key}").into(),
            plain_key: key.into(),
            kind: NodeKind::Expr,
            reads: ast.free_vars(),
            payload: Payload::Expr(Rc::new(ast)),
            stable: false,
        })
    }

    fn inert(names: &[&str]) -> BTreeSet<Rc<str>> {
        names.iter().map(|n| Rc::from(*n)).collect()
    }

    #[test]
    fn chains_layer_in_dependency_order() -> Result<()> {
        let nodes = vec![node("c", "b + 1")?, node("b", "a + 1")?, node("a", "x * 2")?];
        let layering = layer_nodes(&nodes, &inert(&["x"]));
        assert_eq!(layering.layers, vec![vec![2], vec![1], vec![0]]);
        assert!(layering.fixpoint.is_empty());
        Ok(())
    }

    #[test]
    fn independent_nodes_share_a_layer() -> Result<()> {
        let nodes = vec![node("a", "x + 1")?, node("b", "x + 2")?, node("c", "a + b")?];
        let layering = layer_nodes(&nodes, &inert(&["x"]));
        assert_eq!(layering.layers, vec![vec![0, 1], vec![2]]);
        Ok(())
    }

    #[test]
    fn cycles_fall_into_the_fixpoint_layer() -> Result<()> {
        let nodes = vec![node("a", "b + 1")?, node("b", "a - 1")?, node("c", "2 * 2")?];
        let layering = layer_nodes(&nodes, &inert(&[]));
        assert_eq!(layering.layers, vec![vec![2]]);
        assert_eq!(layering.fixpoint, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn inert_reads_create_no_edges() -> Result<()> {
        let nodes = vec![node("a", "b + 1")?];
        let layering = layer_nodes(&nodes, &inert(&["b"]));
        assert_eq!(layering.layers, vec![vec![0]]);
        Ok(())
    }
}
