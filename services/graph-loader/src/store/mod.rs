//! The property-graph store seam.
//!
//! Merge contract for both nodes and edges: match by natural key; create if
//! absent; refresh the `refresh` properties if present. `props` are only
//! written on creation, so display names keep their first-seen casing.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use thiserror::Error;

use crate::identity::NaturalKey;

pub mod memory;
pub mod neo4j;

pub use memory::MemoryStore;
pub use neo4j::Neo4jStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeLabel {
    State,
    #[serde(rename = "EDD")]
    Edd,
    County,
    Sector,
    #[serde(rename = "Sub_Sector")]
    SubSector,
    Metric,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 6] = [
        NodeLabel::State,
        NodeLabel::Edd,
        NodeLabel::County,
        NodeLabel::Sector,
        NodeLabel::SubSector,
        NodeLabel::Metric,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeLabel::State => "State",
            NodeLabel::Edd => "EDD",
            NodeLabel::County => "County",
            NodeLabel::Sector => "Sector",
            NodeLabel::SubSector => "Sub_Sector",
            NodeLabel::Metric => "Metric",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RelType {
    HasEdd,
    HasCounty,
    HasSector,
    HasSubSector,
    Reports,
}

impl RelType {
    pub fn as_str(self) -> &'static str {
        match self {
            RelType::HasEdd => "HAS_EDD",
            RelType::HasCounty => "HAS_COUNTY",
            RelType::HasSector => "HAS_SECTOR",
            RelType::HasSubSector => "HAS_SUB_SECTOR",
            RelType::Reports => "REPORTS",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Text(value.to_string())
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

pub type Properties = BTreeMap<&'static str, PropValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMerge {
    pub key: NaturalKey,
    /// Written on creation only.
    pub props: Properties,
    /// Written on every merge.
    pub refresh: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgeMerge {
    pub from: NaturalKey,
    pub to: NaturalKey,
}

/// Endpoint labels and type of a batch of edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeSpec {
    pub rel: RelType,
    pub from: NodeLabel,
    pub to: NodeLabel,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub created: u64,
    pub matched: u64,
}

impl MergeCounts {
    pub fn total(&self) -> u64 {
        self.created + self.matched
    }
}

impl AddAssign for MergeCounts {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.matched += other.matched;
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("neo4j: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("{rel} edge references a node that does not exist: {key}")]
    MissingEndpoint { rel: RelType, key: String },

    #[error("unexpected store response: {0}")]
    Response(String),
}

/// A transactional property-graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, StoreError>;
}

/// One atomic unit of work. Dropping without `commit` must not leave
/// partial writes visible.
#[async_trait]
pub trait GraphTxn: Send {
    async fn merge_nodes(
        &mut self,
        label: NodeLabel,
        nodes: &[NodeMerge],
    ) -> Result<MergeCounts, StoreError>;

    /// Fails with `MissingEndpoint` if either end is absent.
    async fn merge_edges(
        &mut self,
        spec: EdgeSpec,
        edges: &[EdgeMerge],
    ) -> Result<MergeCounts, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
