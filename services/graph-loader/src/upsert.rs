//! Graph upsert engine: one file's resolved records become one transaction.
//!
//! Merges run level by level (State, EDD, County, Sector, Sub_Sector,
//! Metric), each level's nodes before the edge that reaches them, so every
//! edge's endpoints exist by the time it is merged.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;
use tracing::{debug, warn};

use crate::identity::{IdentityCache, NaturalKey, ResolvedRecord};
use crate::store::{
    EdgeMerge, EdgeSpec, GraphStore, GraphTxn, MergeCounts, NodeLabel, NodeMerge, PropValue,
    Properties, RelType, StoreError,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub nodes: MergeCounts,
    pub edges: MergeCounts,
}

impl AddAssign for WriteStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes += other.nodes;
        self.edges += other.edges;
    }
}

/// One hierarchy level: its nodes and the edge that attaches them to the
/// level above. Metrics get two edge groups (from Sector and from Sub_Sector).
#[derive(Debug)]
struct Level {
    label: NodeLabel,
    nodes: BTreeMap<NaturalKey, NodeMerge>,
    edges: Vec<(EdgeSpec, BTreeSet<EdgeMerge>)>,
}

impl Level {
    fn new(label: NodeLabel, edges: &[EdgeSpec]) -> Self {
        Self {
            label,
            nodes: BTreeMap::new(),
            edges: edges.iter().map(|spec| (*spec, BTreeSet::new())).collect(),
        }
    }

    /// First occurrence wins for hierarchy nodes.
    fn add_node(&mut self, key: NaturalKey, props: Properties) {
        self.nodes.entry(key.clone()).or_insert(NodeMerge {
            key,
            props,
            refresh: Properties::new(),
        });
    }

    /// Property rewritten on every merge, even when the node already exists.
    fn refresh(&mut self, key: &NaturalKey, name: &'static str, value: PropValue) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.refresh.insert(name, value);
        }
    }

    fn add_edge(&mut self, rel: RelType, from_label: NodeLabel, from: NaturalKey, to: NaturalKey) {
        if let Some((_, edges)) = self
            .edges
            .iter_mut()
            .find(|(spec, _)| spec.rel == rel && spec.from == from_label)
        {
            edges.insert(EdgeMerge { from, to });
        }
    }
}

const fn spec(rel: RelType, from: NodeLabel, to: NodeLabel) -> EdgeSpec {
    EdgeSpec { rel, from, to }
}

/// Every merge for one file, deduplicated by natural key and grouped by level.
#[derive(Debug)]
pub struct FileBatch {
    levels: Vec<Level>,
}

impl FileBatch {
    pub fn from_records(records: &[ResolvedRecord]) -> Self {
        let mut states = Level::new(NodeLabel::State, &[]);
        let mut edds = Level::new(
            NodeLabel::Edd,
            &[spec(RelType::HasEdd, NodeLabel::State, NodeLabel::Edd)],
        );
        let mut counties = Level::new(
            NodeLabel::County,
            &[spec(RelType::HasCounty, NodeLabel::Edd, NodeLabel::County)],
        );
        let mut sectors = Level::new(
            NodeLabel::Sector,
            &[spec(RelType::HasSector, NodeLabel::County, NodeLabel::Sector)],
        );
        let mut sub_sectors = Level::new(
            NodeLabel::SubSector,
            &[spec(RelType::HasSubSector, NodeLabel::Sector, NodeLabel::SubSector)],
        );
        let mut metrics = Level::new(
            NodeLabel::Metric,
            &[
                spec(RelType::Reports, NodeLabel::Sector, NodeLabel::Metric),
                spec(RelType::Reports, NodeLabel::SubSector, NodeLabel::Metric),
            ],
        );

        for record in records {
            let state_key = record.state_key();
            let edd_key = record.edd_key();
            let county_key = record.county_key();
            let sector_key = record.sector_key();
            let metric_key = record.metric_key();

            states.add_node(
                state_key.clone(),
                Properties::from([("name", record.state.display().into())]),
            );

            edds.add_node(
                edd_key.clone(),
                Properties::from([
                    ("name", record.edd.display().into()),
                    ("state", record.state.display().into()),
                ]),
            );
            edds.add_edge(RelType::HasEdd, NodeLabel::State, state_key, edd_key.clone());

            counties.add_node(
                county_key.clone(),
                Properties::from([
                    ("name", record.county.display().into()),
                    ("edd", record.edd.display().into()),
                    ("state", record.state.display().into()),
                ]),
            );
            // a file without the FIPS column never clears one set earlier
            if let Some(fips) = &record.fips_id {
                counties.refresh(&county_key, "fips_id", fips.as_str().into());
            }
            counties.add_edge(RelType::HasCounty, NodeLabel::Edd, edd_key, county_key.clone());

            sectors.add_node(
                sector_key.clone(),
                Properties::from([("name", record.sector.display().into())]),
            );
            sectors.add_edge(
                RelType::HasSector,
                NodeLabel::County,
                county_key,
                sector_key.clone(),
            );

            if let (Some(sub), Some(sub_key)) = (&record.sub_sector, record.sub_sector_key()) {
                sub_sectors.add_node(
                    sub_key.clone(),
                    Properties::from([
                        ("name", sub.display().into()),
                        ("sector", record.sector.display().into()),
                    ]),
                );
                sub_sectors.add_edge(
                    RelType::HasSubSector,
                    NodeLabel::Sector,
                    sector_key,
                    sub_key,
                );
            }

            let mut metric_props = Properties::from([
                ("name", record.metric.display().into()),
                ("year", record.year.into()),
                ("county", record.county.display().into()),
                ("state", record.state.display().into()),
                ("sector", record.sector.display().into()),
            ]);
            if let Some(sub) = &record.sub_sector {
                metric_props.insert("sub_sector", sub.display().into());
            }
            let previous = metrics.nodes.insert(
                metric_key.clone(),
                NodeMerge {
                    key: metric_key.clone(),
                    props: metric_props,
                    refresh: Properties::from([("value", record.value.into())]),
                },
            );
            // Same observation twice in one file: the later row wins.
            if let Some(previous) = previous {
                debug!(
                    location = %record.location,
                    metric = %record.metric,
                    year = record.year,
                    replaced = ?previous.refresh.get("value"),
                    "duplicate metric observation, keeping last value"
                );
            }
            let (reporter_label, reporter_key) = record.reporter();
            metrics.add_edge(RelType::Reports, reporter_label, reporter_key, metric_key);
        }

        Self {
            levels: vec![states, edds, counties, sectors, sub_sectors, metrics],
        }
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(|level| level.nodes.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.levels
            .iter()
            .flat_map(|level| level.edges.iter())
            .map(|(_, edges)| edges.len())
            .sum()
    }

    fn written_nodes(&self) -> impl Iterator<Item = (NodeLabel, &NaturalKey)> {
        self.levels
            .iter()
            .flat_map(|level| level.nodes.keys().map(move |key| (level.label, key)))
    }

    fn written_edges(&self) -> impl Iterator<Item = (RelType, &NaturalKey, &NaturalKey)> {
        self.levels
            .iter()
            .flat_map(|level| level.edges.iter())
            .flat_map(|(spec, edges)| edges.iter().map(move |e| (spec.rel, &e.from, &e.to)))
    }
}

/// Issue every merge of `batch` in dependency order inside `txn`.
///
/// Hierarchy elements a committed file of this run already wrote are
/// counted as matched without a round trip.
async fn apply(
    txn: &mut dyn GraphTxn,
    batch: &FileBatch,
    cache: &IdentityCache,
) -> Result<WriteStats, StoreError> {
    let mut stats = WriteStats::default();

    for level in &batch.levels {
        let (cached, fresh): (Vec<&NodeMerge>, Vec<&NodeMerge>) = level
            .nodes
            .values()
            .partition(|node| {
                node.refresh.is_empty() && cache.is_node_written(level.label, &node.key)
            });
        stats.nodes.matched += cached.len() as u64;
        let fresh: Vec<NodeMerge> = fresh.into_iter().cloned().collect();
        stats.nodes += txn.merge_nodes(level.label, &fresh).await?;

        for (spec, edges) in &level.edges {
            let (cached, fresh): (Vec<&EdgeMerge>, Vec<&EdgeMerge>) = edges
                .iter()
                .partition(|edge| cache.is_edge_written(spec.rel, &edge.from, &edge.to));
            stats.edges.matched += cached.len() as u64;
            let fresh: Vec<EdgeMerge> = fresh.into_iter().cloned().collect();
            stats.edges += txn.merge_edges(*spec, &fresh).await?;
        }
    }

    Ok(stats)
}

/// Write one file's batch atomically: commit on success, roll back on any error.
pub async fn write_batch(
    store: &dyn GraphStore,
    batch: &FileBatch,
    cache: &IdentityCache,
    file: &str,
) -> Result<WriteStats, StoreError> {
    let mut txn = store.begin().await?;

    match apply(txn.as_mut(), batch, cache).await {
        Ok(stats) => {
            txn.commit().await?;
            cache.mark_written(batch.written_nodes(), batch.written_edges());
            Ok(stats)
        }
        Err(e) => {
            warn!(file = %file, error = %e, "Error during batch merge, rolling back");
            if let Err(rollback) = txn.rollback().await {
                warn!(file = %file, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
