//! Run orchestration: discover input files, push each through
//! normalize -> hierarchy -> identity -> upsert, and aggregate a summary.
//!
//! Files are independent tasks under a bounded pool. A file's failure is
//! recorded and never stops the others.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use crate::error::{ErrorKind, IngestError};
use crate::hierarchy;
use crate::identity::{ConsistencyWarning, IdentityCache};
use crate::normalize::{self, display_name};
use crate::store::{GraphStore, MergeCounts};
use crate::upsert::{write_batch, FileBatch, WriteStats};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: String,
    pub records: usize,
    pub nodes: MergeCounts,
    pub edges: MergeCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_files: usize,
    pub nodes: MergeCounts,
    pub edges: MergeCounts,
    pub files: Vec<FileReport>,
    pub failures: Vec<FileFailure>,
    pub warnings: Vec<ConsistencyWarning>,
    /// Files never started because the run was cancelled.
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    pub fn print(&self) {
        println!("\n=== Load Complete ===");
        println!(
            "Files: {} total, {} loaded, {} failed",
            self.total_files,
            self.files.len(),
            self.failures.len()
        );
        println!("Nodes: {} created, {} merged", self.nodes.created, self.nodes.matched);
        println!("Edges: {} created, {} merged", self.edges.created, self.edges.matched);

        if !self.warnings.is_empty() {
            println!("\nConsistency warnings ({}):", self.warnings.len());
            for (i, warning) in self.warnings.iter().enumerate() {
                println!("  [{}] {}", i + 1, warning);
            }
        }

        if !self.failures.is_empty() {
            println!("\nFailed files ({}):", self.failures.len());
            for failure in &self.failures {
                println!("  {} [{}] {}", failure.file, failure.kind, failure.message);
            }
        }

        if self.cancelled {
            println!("\nCancelled: {} file(s) not started", self.skipped.len());
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Regular, non-hidden files directly under `folder`, sorted by name.
pub fn discover_inputs(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(folder)
        .with_context(|| format!("Failed to read input folder {}", folder.display()))?;

    let mut inputs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", folder.display()))?;
        let path = entry.path();
        if is_hidden(&path) || !path.is_file() {
            continue;
        }
        inputs.push(path);
    }
    inputs.sort();
    Ok(inputs)
}

struct FileOutcome {
    file: String,
    warnings: Vec<ConsistencyWarning>,
    result: Result<(usize, WriteStats), IngestError>,
}

async fn load_file(
    store: &dyn GraphStore,
    cache: &IdentityCache,
    path: &Path,
    warnings: &mut Vec<ConsistencyWarning>,
) -> Result<(usize, WriteStats), IngestError> {
    let file = display_name(path);
    let sector_path = hierarchy::resolve(path)?;

    let owned = path.to_path_buf();
    let records = tokio::task::spawn_blocking(move || normalize::read_records(&owned))
        .await
        .map_err(|e| IngestError::Format(format!("{}: reader task failed: {}", file, e)))??;

    let (resolved, found) = cache.resolve(records, &sector_path, &file)?;
    warnings.extend(found);

    let batch = FileBatch::from_records(&resolved);
    let stats = write_batch(store, &batch, cache, &file).await?;
    cache.commit_parentage(&resolved);
    Ok((resolved.len(), stats))
}

async fn process_file(store: &dyn GraphStore, cache: &IdentityCache, path: &Path) -> FileOutcome {
    let file = display_name(path);
    let mut warnings = Vec::new();
    let result = load_file(store, cache, path, &mut warnings).await;

    match &result {
        Ok((records, stats)) => info!(
            file = %file,
            records,
            nodes_created = stats.nodes.created,
            nodes_matched = stats.nodes.matched,
            edges_created = stats.edges.created,
            edges_matched = stats.edges.matched,
            "file committed"
        ),
        Err(e) => error!(file = %file, kind = %e.kind(), error = %e, "file failed"),
    }

    FileOutcome {
        file,
        warnings,
        result,
    }
}

/// Load every input with at most `concurrency` files in flight.
///
/// Once `cancel` is raised no new file is started; files already running
/// finish (commit or roll back) normally.
pub async fn run(
    store: &dyn GraphStore,
    inputs: &[PathBuf],
    concurrency: usize,
    cancel: &AtomicBool,
) -> RunSummary {
    let started_at = Utc::now();
    let cache = IdentityCache::new();
    info!(files = inputs.len(), concurrency, "starting load");

    let outcomes: Vec<FileOutcome> = stream::iter(inputs)
        .take_while(|_| futures::future::ready(!cancel.load(Ordering::SeqCst)))
        .map(|path| process_file(store, &cache, path))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    // take_while stops at a prefix, so the unstarted files are the tail
    let skipped: Vec<String> = inputs[outcomes.len()..]
        .iter()
        .map(|path| display_name(path))
        .collect();
    if !skipped.is_empty() {
        warn!(skipped = skipped.len(), "run cancelled before all files started");
    }

    let mut summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        total_files: inputs.len(),
        nodes: MergeCounts::default(),
        edges: MergeCounts::default(),
        files: Vec::new(),
        failures: Vec::new(),
        warnings: Vec::new(),
        cancelled: !skipped.is_empty(),
        skipped,
    };

    for outcome in outcomes {
        summary.warnings.extend(outcome.warnings);
        match outcome.result {
            Ok((records, stats)) => {
                summary.nodes += stats.nodes;
                summary.edges += stats.edges;
                summary.files.push(FileReport {
                    file: outcome.file,
                    records,
                    nodes: stats.nodes,
                    edges: stats.edges,
                });
            }
            Err(e) => summary.failures.push(FileFailure {
                file: outcome.file,
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }

    // completion order depends on scheduling
    summary.files.sort_by(|a, b| a.file.cmp(&b.file));
    summary.failures.sort_by(|a, b| a.file.cmp(&b.file));
    summary.warnings.sort_by(|a, b| a.file.cmp(&b.file));
    summary
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NaturalKey;
    use crate::store::{GraphTxn, MemoryStore, NodeLabel, PropValue, RelType, StoreError};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const DEMOGRAPHICS: &str = "State,Region,County,Year,Population\n\
                                Texas,North Texas,Dallas,2020,500000\n\
                                Texas,North Texas,Collin,2020,400000\n";

    fn folder(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    async fn load(store: &dyn GraphStore, dir: &TempDir, concurrency: usize) -> RunSummary {
        let inputs = discover_inputs(dir.path()).unwrap();
        run(store, &inputs, concurrency, &AtomicBool::new(false)).await
    }

    // -------------------------------------------------------------------------
    // DISCOVERY TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_discover_skips_hidden_and_directories() {
        let dir = folder(&[
            ("b_Crops.csv", ""),
            ("a.csv", ""),
            (".~lock.a.csv#", ""),
        ]);
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<String> = discover_inputs(dir.path())
            .unwrap()
            .iter()
            .map(|p| display_name(p))
            .collect();
        assert_eq!(names, vec!["a.csv", "b_Crops.csv"]);
    }

    #[test]
    fn test_discover_missing_folder_is_fatal() {
        let dir = TempDir::new().unwrap();
        assert!(discover_inputs(&dir.path().join("absent")).is_err());
    }

    // -------------------------------------------------------------------------
    // RUN TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_to_end_path() {
        let dir = folder(&[("Demographics.csv", DEMOGRAPHICS)]);
        let store = MemoryStore::new();
        let summary = load(&store, &dir, 1).await;
        assert!(summary.is_success());
        assert_eq!(summary.files[0].records, 2);

        let state = (NodeLabel::State, NaturalKey::from_parts(&["texas"]));
        let edd = (NodeLabel::Edd, NaturalKey::from_parts(&["texas", "north texas"]));
        let county = (
            NodeLabel::County,
            NaturalKey::from_parts(&["texas", "north texas", "dallas"]),
        );
        let sector = (NodeLabel::Sector, NaturalKey::from_parts(&["demographics"]));
        let metric = (
            NodeLabel::Metric,
            NaturalKey::from_parts(&[
                "texas",
                "north texas",
                "dallas",
                "demographics",
                "",
                "population",
                "2020",
            ]),
        );

        assert!(store.has_edge(RelType::HasEdd, &state, &edd));
        assert!(store.has_edge(RelType::HasCounty, &edd, &county));
        assert!(store.has_edge(RelType::HasSector, &county, &sector));
        assert!(store.has_edge(RelType::Reports, &sector, &metric));

        let props = store.node(NodeLabel::Metric, &metric.1).unwrap();
        assert_eq!(props["name"], PropValue::from("Population"));
        assert_eq!(props["year"], PropValue::Int(2020));
        assert_eq!(props["value"], PropValue::Float(500000.0));
    }

    #[tokio::test]
    async fn test_second_run_creates_nothing() {
        let dir = folder(&[
            ("Demographics.csv", DEMOGRAPHICS),
            (
                "Agriculture_Crops.csv",
                "State,Region,County,Year,Acres\nTexas,North Texas,Dallas,2020,1200\n",
            ),
        ]);
        let store = MemoryStore::new();

        let first = load(&store, &dir, 4).await;
        assert!(first.is_success());
        let (nodes, edges) = (store.node_count(), store.edge_count());

        let second = load(&store, &dir, 4).await;
        assert!(second.is_success());
        assert_eq!(second.nodes.created, 0);
        assert_eq!(second.edges.created, 0);
        assert_eq!(store.node_count(), nodes);
        assert_eq!(store.edge_count(), edges);
    }

    #[tokio::test]
    async fn test_bad_file_does_not_block_good_file() {
        let dir = folder(&[
            ("Demographics.csv", DEMOGRAPHICS),
            ("Employment.csv", "State,Region,County,Jobs\nTexas,North Texas,Dallas,10\n"),
        ]);
        let store = MemoryStore::new();
        let summary = load(&store, &dir, 2).await;

        assert!(!summary.is_success());
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].file, "Demographics.csv");
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].file, "Employment.csv");
        assert_eq!(summary.failures[0].kind, ErrorKind::SchemaError);
        assert_eq!(store.count_label(NodeLabel::Metric), 2);
    }

    #[tokio::test]
    async fn test_failure_kinds_are_recorded() {
        let dir = folder(&[
            ("_Crops.csv", DEMOGRAPHICS),
            ("Notes.txt", "not a table"),
        ]);
        let store = MemoryStore::new();
        let summary = load(&store, &dir, 1).await;

        let kinds: Vec<(&str, ErrorKind)> = summary
            .failures
            .iter()
            .map(|f| (f.file.as_str(), f.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("Notes.txt", ErrorKind::FormatError),
                ("_Crops.csv", ErrorKind::NamingConventionError),
            ]
        );
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_rolls_back_file() {
        let dir = folder(&[("Demographics.csv", DEMOGRAPHICS)]);
        let store = MemoryStore::failing_on(NodeLabel::Metric);
        let summary = load(&store, &dir, 1).await;

        assert_eq!(summary.failures[0].kind, ErrorKind::StoreError);
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_earlier_commits() {
        let store = MemoryStore::new();
        let first = folder(&[("Demographics.csv", DEMOGRAPHICS)]);
        assert!(load(&store, &first, 1).await.is_success());
        let (nodes, edges) = (store.node_count(), store.edge_count());

        let second = folder(&[(
            "Employment.csv",
            "State,Region,County,Year,Jobs\nTexas,North Texas,Dallas,2020,10\n",
        )]);
        let failing = store.with_failure(NodeLabel::Metric);
        let summary = load(&failing, &second, 1).await;

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, ErrorKind::StoreError);
        assert_eq!(store.node_count(), nodes);
        assert_eq!(store.edge_count(), edges);
        assert_eq!(store.count_label(NodeLabel::Sector), 1);
    }

    #[tokio::test]
    async fn test_fips_from_later_file_reaches_county() {
        let dir = folder(&[
            ("A_Population.csv", DEMOGRAPHICS),
            (
                "B_Jobs.csv",
                "State,Region,County,FIPS,Year,Jobs\nTexas,North Texas,Dallas,48113,2020,10\n",
            ),
        ]);
        let store = MemoryStore::new();
        assert!(load(&store, &dir, 1).await.is_success());

        let county = NaturalKey::from_parts(&["texas", "north texas", "dallas"]);
        let props = store.node(NodeLabel::County, &county).unwrap();
        assert_eq!(props["fips_id"], PropValue::from("48113"));
    }

    /// Fails the first transaction it hands out, then behaves normally.
    struct FailFirstFile {
        inner: MemoryStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl GraphStore for FailFirstFile {
        async fn begin(&self) -> Result<Box<dyn GraphTxn>, StoreError> {
            if self.failed.swap(true, Ordering::SeqCst) {
                self.inner.begin().await
            } else {
                self.inner.with_failure(NodeLabel::Metric).begin().await
            }
        }
    }

    #[tokio::test]
    async fn test_failed_file_does_not_claim_parentage() {
        let dir = folder(&[
            (
                "A_Jobs.csv",
                "State,Region,County,Year,Jobs\nTexas,Gulf Coast,Dallas,2020,10\n",
            ),
            ("B_Population.csv", DEMOGRAPHICS),
        ]);
        let store = FailFirstFile {
            inner: MemoryStore::new(),
            failed: AtomicBool::new(false),
        };
        let summary = load(&store, &dir, 1).await;

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].file, "A_Jobs.csv");
        assert!(summary.warnings.is_empty());
        let county = (
            NodeLabel::County,
            NaturalKey::from_parts(&["texas", "north texas", "dallas"]),
        );
        assert!(store.inner.node(county.0, &county.1).is_some());
        assert_eq!(store.inner.count_label(NodeLabel::Edd), 1);
    }

    #[tokio::test]
    async fn test_county_conflict_keeps_first_edd() {
        let dir = folder(&[
            ("A_Population.csv", DEMOGRAPHICS),
            (
                "B_Jobs.csv",
                "State,Region,County,Year,Jobs\n\
                 Texas,Gulf Coast,Dallas,2020,10\n\
                 Texas,Gulf Coast,Dallas,2021,12\n",
            ),
        ]);
        let store = MemoryStore::new();
        let summary = load(&store, &dir, 1).await;

        assert!(summary.is_success());
        assert_eq!(summary.warnings.len(), 1);
        let warning = &summary.warnings[0];
        assert_eq!(warning.entity, NodeLabel::County);
        assert_eq!(warning.name, "Dallas");
        assert_eq!(warning.kept_parent, "North Texas");
        assert_eq!(warning.rejected_parent, "Gulf Coast");
        assert_eq!(warning.file, "B_Jobs.csv");

        let county = (
            NodeLabel::County,
            NaturalKey::from_parts(&["texas", "north texas", "dallas"]),
        );
        assert_eq!(store.parents(RelType::HasCounty, &county).len(), 1);
        assert_eq!(store.count_label(NodeLabel::Edd), 1);
        assert_eq!(store.count_label(NodeLabel::County), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let dir = folder(&[("Demographics.csv", DEMOGRAPHICS)]);
        let store = MemoryStore::new();
        let inputs = discover_inputs(dir.path()).unwrap();
        let summary = run(&store, &inputs, 4, &AtomicBool::new(true)).await;

        assert!(summary.cancelled);
        assert!(!summary.is_success());
        assert_eq!(summary.skipped, vec!["Demographics.csv"]);
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_summary_serializes() {
        let dir = folder(&[("Demographics.csv", DEMOGRAPHICS)]);
        let store = MemoryStore::new();
        let summary = load(&store, &dir, 1).await;

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total_files"], 1);
        assert_eq!(json["nodes"]["created"], 7);
        assert!(json["failures"].as_array().unwrap().is_empty());
    }
}
