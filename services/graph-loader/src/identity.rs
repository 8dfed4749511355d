//! Natural keys and per-run identity tracking.
//!
//! Every node is addressed by a key built from case-folded, whitespace-collapsed
//! names, so " texas " and "TEXAS" land on the same State. The cache here only
//! saves work and catches parentage conflicts; MERGE in the store is what
//! actually prevents duplicates.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

use crate::error::IngestError;
use crate::hierarchy::SectorPath;
use crate::normalize::NormalizedRecord;
use crate::store::{NodeLabel, RelType};

/// Trim and collapse internal whitespace runs to a single space.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A human-readable name with its comparison form.
///
/// Equality, ordering and hashing only look at the folded key; the display
/// form keeps whatever casing the source used.
#[derive(Debug, Clone)]
pub struct Name {
    display: String,
    key: String,
}

impl Name {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let display = clean_text(raw);
        if display.is_empty() {
            return None;
        }
        let key = display.to_lowercase();
        Some(Self { display, key })
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Store-side identity of a node: a JSON array of folded key parts.
///
/// JSON keeps the encoding unambiguous even when a name contains the
/// characters a plain separator would use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn from_parts(parts: &[&str]) -> Self {
        Self(serde_json::Value::from(parts.to_vec()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized record with its hierarchy attached and parentage settled.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub state: Name,
    pub edd: Name,
    pub county: Name,
    pub fips_id: Option<String>,
    pub sector: Name,
    pub sub_sector: Option<Name>,
    pub metric: Name,
    pub year: i64,
    pub value: f64,
    pub location: String,
}

impl ResolvedRecord {
    pub fn state_key(&self) -> NaturalKey {
        NaturalKey::from_parts(&[self.state.key()])
    }

    pub fn edd_key(&self) -> NaturalKey {
        NaturalKey::from_parts(&[self.state.key(), self.edd.key()])
    }

    pub fn county_key(&self) -> NaturalKey {
        NaturalKey::from_parts(&[self.state.key(), self.edd.key(), self.county.key()])
    }

    pub fn sector_key(&self) -> NaturalKey {
        NaturalKey::from_parts(&[self.sector.key()])
    }

    pub fn sub_sector_key(&self) -> Option<NaturalKey> {
        self.sub_sector
            .as_ref()
            .map(|sub| NaturalKey::from_parts(&[self.sector.key(), sub.key()]))
    }

    /// The node Metrics hang off: Sub_Sector when present, else Sector.
    pub fn reporter(&self) -> (NodeLabel, NaturalKey) {
        match self.sub_sector_key() {
            Some(key) => (NodeLabel::SubSector, key),
            None => (NodeLabel::Sector, self.sector_key()),
        }
    }

    pub fn metric_key(&self) -> NaturalKey {
        let year = self.year.to_string();
        let sub = self.sub_sector.as_ref().map(Name::key).unwrap_or("");
        NaturalKey::from_parts(&[
            self.state.key(),
            self.edd.key(),
            self.county.key(),
            self.sector.key(),
            sub,
            self.metric.key(),
            &year,
        ])
    }
}

/// Non-fatal report of a child seen under two different parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyWarning {
    pub entity: NodeLabel,
    pub name: String,
    pub kept_parent: String,
    pub rejected_parent: String,
    pub file: String,
    pub location: String,
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' already belongs to '{}', ignoring '{}' ({})",
            self.entity, self.name, self.kept_parent, self.rejected_parent, self.location
        )
    }
}

#[derive(Debug, Default)]
struct CacheState {
    /// EDD name -> first State seen for it.
    edd_parent: HashMap<String, Name>,
    /// (State, County) -> first EDD seen for it.
    county_parent: HashMap<(String, String), Name>,
    reported: HashSet<(NodeLabel, String, String)>,
    written_nodes: HashSet<(NodeLabel, NaturalKey)>,
    written_edges: HashSet<(RelType, NaturalKey, NaturalKey)>,
}

/// Run-scoped identity cache shared by every file worker.
#[derive(Debug, Default)]
pub struct IdentityCache {
    state: Mutex<CacheState>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the file's hierarchy to each record and settle parentage.
    ///
    /// Parents are checked against those committed by earlier files and the
    /// file's own earlier rows. A County already seen under another EDD (or
    /// an EDD under another State) is re-parented to the first-seen parent;
    /// each such conflict is reported once per run. This file's parents only
    /// bind later files once `commit_parentage` is called for it.
    pub fn resolve(
        &self,
        records: Vec<NormalizedRecord>,
        path: &SectorPath,
        file: &str,
    ) -> Result<(Vec<ResolvedRecord>, Vec<ConsistencyWarning>), IngestError> {
        let mut cache = self.lock();
        let mut resolved = Vec::with_capacity(records.len());
        let mut warnings = Vec::new();
        let mut edd_parent: HashMap<String, Name> = HashMap::new();
        let mut county_parent: HashMap<(String, String), Name> = HashMap::new();

        for record in records {
            let name = |raw: &str, what: &str| {
                Name::parse(raw).ok_or_else(|| {
                    IngestError::Schema(format!("{}: blank {} value", record.location, what))
                })
            };
            let mut state = name(&record.state, "state")?;
            let mut edd = name(&record.region, "region")?;
            let county = name(&record.county, "county")?;
            let metric = name(&record.metric, "metric name")?;

            let kept_state = match cache.edd_parent.get(edd.key()) {
                Some(kept) => kept.clone(),
                None => edd_parent
                    .entry(edd.key().to_string())
                    .or_insert_with(|| state.clone())
                    .clone(),
            };
            if kept_state != state {
                let conflict = (NodeLabel::Edd, edd.key().to_string(), state.key().to_string());
                if cache.reported.insert(conflict) {
                    let warning = ConsistencyWarning {
                        entity: NodeLabel::Edd,
                        name: edd.display().to_string(),
                        kept_parent: kept_state.display().to_string(),
                        rejected_parent: state.display().to_string(),
                        file: file.to_string(),
                        location: record.location.clone(),
                    };
                    warn!(file = %file, "{}", warning);
                    warnings.push(warning);
                }
                state = kept_state;
            }

            let county_id = (state.key().to_string(), county.key().to_string());
            let kept_edd = match cache.county_parent.get(&county_id) {
                Some(kept) => kept.clone(),
                None => county_parent
                    .entry(county_id)
                    .or_insert_with(|| edd.clone())
                    .clone(),
            };
            if kept_edd != edd {
                let conflict = (
                    NodeLabel::County,
                    format!("{}/{}", state.key(), county.key()),
                    edd.key().to_string(),
                );
                if cache.reported.insert(conflict) {
                    let warning = ConsistencyWarning {
                        entity: NodeLabel::County,
                        name: county.display().to_string(),
                        kept_parent: kept_edd.display().to_string(),
                        rejected_parent: edd.display().to_string(),
                        file: file.to_string(),
                        location: record.location.clone(),
                    };
                    warn!(file = %file, "{}", warning);
                    warnings.push(warning);
                }
                edd = kept_edd;
            }

            resolved.push(ResolvedRecord {
                state,
                edd,
                county,
                fips_id: record.fips_id,
                sector: path.sector.clone(),
                sub_sector: path.sub_sector.clone(),
                metric,
                year: record.year,
                value: record.value,
                location: record.location,
            });
        }

        Ok((resolved, warnings))
    }

    /// Make a committed file's parents binding for the rest of the run.
    ///
    /// A parent committed first by a concurrent file is kept.
    pub fn commit_parentage(&self, records: &[ResolvedRecord]) {
        let mut cache = self.lock();
        for record in records {
            cache
                .edd_parent
                .entry(record.edd.key().to_string())
                .or_insert_with(|| record.state.clone());
            cache
                .county_parent
                .entry((record.state.key().to_string(), record.county.key().to_string()))
                .or_insert_with(|| record.edd.clone());
        }
    }

    pub fn is_node_written(&self, label: NodeLabel, key: &NaturalKey) -> bool {
        self.lock().written_nodes.contains(&(label, key.clone()))
    }

    pub fn is_edge_written(&self, rel: RelType, from: &NaturalKey, to: &NaturalKey) -> bool {
        self.lock()
            .written_edges
            .contains(&(rel, from.clone(), to.clone()))
    }

    /// Record hierarchy elements from a committed transaction.
    ///
    /// Metrics and REPORTS edges are never cached: their values must be
    /// refreshed on every write.
    pub fn mark_written<'a>(
        &self,
        nodes: impl IntoIterator<Item = (NodeLabel, &'a NaturalKey)>,
        edges: impl IntoIterator<Item = (RelType, &'a NaturalKey, &'a NaturalKey)>,
    ) {
        let mut cache = self.lock();
        for (label, key) in nodes {
            if label != NodeLabel::Metric {
                cache.written_nodes.insert((label, key.clone()));
            }
        }
        for (rel, from, to) in edges {
            if rel != RelType::Reports {
                cache.written_edges.insert((rel, from.clone(), to.clone()));
            }
        }
    }
}
