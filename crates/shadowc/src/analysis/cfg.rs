//! Per-method control-flow graphs.
//!
//! A graph node is a maximal straight-line run of TAC nodes between labels
//! and terminators. Edges come from branch targets, fall-through, and the
//! exceptional successors of calls, throws, catch switches, and resumes.

use crate::tac::nodes::{BranchKind, NodeId, TacKind};
use crate::tac::TacMethod;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

/// One straight-line run.
#[derive(Debug, Default, Clone)]
pub struct Run {
    /// Leading label, absent only for the entry run.
    pub label: Option<NodeId>,
    pub nodes: Vec<NodeId>,
}

pub struct ControlFlowGraph {
    pub graph: DiGraph<Run, ()>,
    pub entry: NodeIndex,
    label_to_run: HashMap<NodeId, NodeIndex>,
}

impl ControlFlowGraph {
    pub fn build(method: &TacMethod) -> Self {
        let mut graph: DiGraph<Run, ()> = DiGraph::new();
        let mut label_to_run = HashMap::new();
        let mut order: Vec<NodeIndex> = Vec::new();

        // Split the node sequence into runs.
        let mut current: Option<NodeIndex> = None;
        for node_id in method.iter() {
            let node = method.node(node_id);
            let start_new = match &node.kind {
                TacKind::Label => true,
                _ => current.is_none(),
            };
            if start_new {
                let index = graph.add_node(Run {
                    label: matches!(node.kind, TacKind::Label).then_some(node_id),
                    nodes: Vec::new(),
                });
                if matches!(node.kind, TacKind::Label) {
                    label_to_run.insert(node_id, index);
                }
                order.push(index);
                current = Some(index);
            }
            let index = current.expect("a run is always open here");
            graph[index].nodes.push(node_id);
            if node.is_terminator() {
                current = None;
            }
        }

        // Edges.
        let mut edges: Vec<(NodeIndex, NodeId)> = Vec::new();
        let mut fallthrough: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        for (position, index) in order.iter().enumerate() {
            let mut terminated = false;
            for node_id in &graph[*index].nodes {
                match &method.node(*node_id).kind {
                    TacKind::Branch(BranchKind::Direct(target)) => {
                        edges.push((*index, *target));
                        terminated = true;
                    }
                    TacKind::Branch(BranchKind::Conditional {
                        true_target,
                        false_target,
                        ..
                    }) => {
                        edges.push((*index, *true_target));
                        edges.push((*index, *false_target));
                        terminated = true;
                    }
                    TacKind::Branch(BranchKind::Indirect(phi)) => {
                        if let TacKind::Phi { entries } = &method.node(*phi).kind {
                            for (value, _) in entries {
                                edges.push((*index, *value));
                            }
                        }
                        terminated = true;
                    }
                    TacKind::CatchSwitch { pads, unwind } => {
                        for pad in pads {
                            edges.push((*index, *pad));
                        }
                        if let Some(unwind) = unwind {
                            edges.push((*index, *unwind));
                        }
                        terminated = true;
                    }
                    TacKind::Throw { unwind, .. } => {
                        if let Some(unwind) = unwind {
                            edges.push((*index, *unwind));
                        }
                        terminated = true;
                    }
                    TacKind::Resume { unwind, .. } => {
                        if let Some(unwind) = unwind {
                            edges.push((*index, *unwind));
                        }
                        terminated = true;
                    }
                    TacKind::Return { .. } => {
                        terminated = true;
                    }
                    TacKind::Call {
                        landing: Some((_, unwind)),
                        ..
                    } => {
                        // Exceptional successor of an invoke.
                        edges.push((*index, *unwind));
                    }
                    _ => {}
                }
            }
            if !terminated {
                if let Some(next) = order.get(position + 1) {
                    fallthrough.push((*index, *next));
                }
            }
        }

        for (from, to) in fallthrough {
            graph.update_edge(from, to, ());
        }
        for (from, label) in edges {
            if let Some(to) = label_to_run.get(&label) {
                graph.update_edge(from, *to, ());
            }
        }

        let entry = order.first().copied().unwrap_or_else(|| {
            graph.add_node(Run::default())
        });
        ControlFlowGraph {
            graph,
            entry,
            label_to_run,
        }
    }

    /// Runs reachable from the entry.
    pub fn reachable(&self) -> HashSet<NodeIndex> {
        let mut out = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, self.entry);
        while let Some(index) = dfs.next(&self.graph) {
            out.insert(index);
        }
        out
    }

    pub fn run_of_label(&self, label: NodeId) -> Option<NodeIndex> {
        self.label_to_run.get(&label).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typecheck::{ModifiedType, TypeId};

    fn void_ty() -> ModifiedType {
        ModifiedType {
            ty: TypeId(0),
            modifiers: Default::default(),
        }
    }

    #[test]
    fn splits_runs_at_labels_and_terminators() {
        let mut method = TacMethod::new(None, 0..0);
        let root = method.root_block();
        let target = method.create_node(TacKind::Label, void_ty(), root, 0..0);
        let branch = method.create_node(
            TacKind::Branch(BranchKind::Direct(target)),
            void_ty(),
            root,
            0..0,
        );
        method.place(branch);
        method.place(target);
        let ret = method.create_node(
            TacKind::Return { values: Vec::new() },
            void_ty(),
            root,
            0..0,
        );
        method.place(ret);

        let cfg = ControlFlowGraph::build(&method);
        assert_eq!(cfg.graph.node_count(), 2);
        assert_eq!(cfg.graph.edge_count(), 1);
        assert_eq!(cfg.reachable().len(), 2);
    }

    #[test]
    fn unreachable_runs_are_not_visited() {
        let mut method = TacMethod::new(None, 0..0);
        let root = method.root_block();
        let ret = method.create_node(
            TacKind::Return { values: Vec::new() },
            void_ty(),
            root,
            0..0,
        );
        method.place(ret);
        let orphan = method.create_node(TacKind::Label, void_ty(), root, 0..0);
        method.place(orphan);
        let ret2 = method.create_node(
            TacKind::Return { values: Vec::new() },
            void_ty(),
            root,
            0..0,
        );
        method.place(ret2);

        let cfg = ControlFlowGraph::build(&method);
        assert_eq!(cfg.graph.node_count(), 2);
        assert_eq!(cfg.reachable().len(), 1);
    }
}
