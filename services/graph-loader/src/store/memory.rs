//! In-process graph store used for `--dry-run` and tests.
//!
//! Writes are staged per transaction and folded into the shared graph on
//! commit, so a rolled-back (or dropped) transaction leaves no trace.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    EdgeMerge, EdgeSpec, GraphStore, GraphTxn, MergeCounts, NodeLabel, NodeMerge, Properties,
    RelType, StoreError,
};
use crate::identity::NaturalKey;

pub type NodeId = (NodeLabel, NaturalKey);
pub type EdgeId = (RelType, NodeId, NodeId);

#[derive(Debug, Default, Clone)]
struct GraphState {
    nodes: BTreeMap<NodeId, Properties>,
    edges: BTreeSet<EdgeId>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    committed: Arc<Mutex<GraphState>>,
    fail_on: Option<NodeLabel>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose transactions fail when asked to merge `label` nodes.
    pub fn failing_on(label: NodeLabel) -> Self {
        Self {
            committed: Arc::default(),
            fail_on: Some(label),
        }
    }

    /// Shares the committed graph of `self` but fails on `label`.
    pub fn with_failure(&self, label: NodeLabel) -> Self {
        Self {
            committed: Arc::clone(&self.committed),
            fail_on: Some(label),
        }
    }

    fn graph(&self) -> MutexGuard<'_, GraphState> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node_count(&self) -> usize {
        self.graph().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph().edges.len()
    }

    pub fn count_label(&self, label: NodeLabel) -> usize {
        self.graph().nodes.keys().filter(|(l, _)| *l == label).count()
    }

    pub fn node(&self, label: NodeLabel, key: &NaturalKey) -> Option<Properties> {
        self.graph().nodes.get(&(label, key.clone())).cloned()
    }

    pub fn has_edge(&self, rel: RelType, from: &NodeId, to: &NodeId) -> bool {
        self.graph()
            .edges
            .contains(&(rel, from.clone(), to.clone()))
    }

    /// Source nodes of every `rel` edge pointing at `to`.
    pub fn parents(&self, rel: RelType, to: &NodeId) -> Vec<NodeId> {
        self.graph()
            .edges
            .iter()
            .filter(|(r, _, target)| *r == rel && target == to)
            .map(|(_, from, _)| from.clone())
            .collect()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, StoreError> {
        Ok(Box::new(MemoryTxn {
            committed: Arc::clone(&self.committed),
            fail_on: self.fail_on,
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
        }))
    }
}

struct MemoryTxn {
    committed: Arc<Mutex<GraphState>>,
    fail_on: Option<NodeLabel>,
    /// Staged node merges: (props on create, props refreshed always).
    nodes: BTreeMap<NodeId, (Properties, Properties)>,
    edges: BTreeSet<EdgeId>,
}

impl MemoryTxn {
    fn graph(&self) -> MutexGuard<'_, GraphState> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn node_exists(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id) || self.graph().nodes.contains_key(id)
    }
}

#[async_trait]
impl GraphTxn for MemoryTxn {
    async fn merge_nodes(
        &mut self,
        label: NodeLabel,
        nodes: &[NodeMerge],
    ) -> Result<MergeCounts, StoreError> {
        if self.fail_on == Some(label) {
            return Err(StoreError::Response(format!(
                "injected failure merging {} nodes",
                label
            )));
        }

        let mut counts = MergeCounts::default();
        for node in nodes {
            let id = (label, node.key.clone());
            let existed = self.node_exists(&id);
            let staged = self
                .nodes
                .entry(id)
                .or_insert_with(|| (node.props.clone(), Properties::new()));
            staged
                .1
                .extend(node.refresh.iter().map(|(k, v)| (*k, v.clone())));
            if existed {
                counts.matched += 1;
            } else {
                counts.created += 1;
            }
        }
        Ok(counts)
    }

    async fn merge_edges(
        &mut self,
        spec: EdgeSpec,
        edges: &[EdgeMerge],
    ) -> Result<MergeCounts, StoreError> {
        let mut counts = MergeCounts::default();
        for edge in edges {
            let from = (spec.from, edge.from.clone());
            let to = (spec.to, edge.to.clone());
            for endpoint in [&from, &to] {
                if !self.node_exists(endpoint) {
                    return Err(StoreError::MissingEndpoint {
                        rel: spec.rel,
                        key: format!("{}{}", endpoint.0, endpoint.1),
                    });
                }
            }

            let id = (spec.rel, from, to);
            let existed = self.edges.contains(&id) || self.graph().edges.contains(&id);
            if existed {
                counts.matched += 1;
            } else {
                self.edges.insert(id);
                counts.created += 1;
            }
        }
        Ok(counts)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTxn {
            committed,
            nodes,
            edges,
            ..
        } = *self;
        let mut graph = committed.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, (props, refresh)) in nodes {
            graph.nodes.entry(id).or_insert(props).extend(refresh);
        }
        graph.edges.extend(edges);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
