//! Graph analysis over workflow edges.
//!
//! Uses `petgraph` to model routing edges as a directed graph. Topological
//! sort detects cycles; path queries answer "does A run before B" for
//! reference-order validation; a DFS from the start node finds unreachable
//! nodes.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use weft_types::workflow::WorkflowIr;

pub struct WorkflowDag {
    graph: DiGraph<String, String>,
    indices: HashMap<String, NodeIndex>,
}

impl WorkflowDag {
    /// Build from an IR. Edges naming unknown nodes are skipped; schema
    /// validation reports them.
    pub fn build(ir: &WorkflowIr) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for node in &ir.nodes {
            indices
                .entry(node.id.clone())
                .or_insert_with(|| graph.add_node(node.id.clone()));
        }
        for edge in &ir.edges {
            if let (Some(&from), Some(&to)) = (indices.get(&edge.from), indices.get(&edge.to)) {
                graph.add_edge(from, to, edge.action.clone());
            }
        }
        Self { graph, indices }
    }

    /// A node on a cycle, if the graph has one.
    pub fn find_cycle(&self) -> Option<&str> {
        toposort(&self.graph, None)
            .err()
            .map(|cycle| self.graph[cycle.node_id()].as_str())
    }

    /// Whether `upstream` can run before `downstream` along some path.
    pub fn is_upstream(&self, upstream: &str, downstream: &str) -> bool {
        if upstream == downstream {
            return false;
        }
        match (self.indices.get(upstream), self.indices.get(downstream)) {
            (Some(&a), Some(&b)) => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// All nodes reachable from `start`, `start` included.
    pub fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let Some(&start) = self.indices.get(start) else {
            return reached;
        };
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            reached.insert(self.graph[idx].clone());
        }
        reached
    }

    /// Every node that may run before `node_id`, sorted.
    pub fn upstream_of(&self, node_id: &str) -> Vec<String> {
        let mut upstream: Vec<String> = self
            .indices
            .keys()
            .filter(|candidate| self.is_upstream(candidate, node_id))
            .cloned()
            .collect();
        upstream.sort();
        upstream
    }
}
