//! Neo4j-backed store over the bolt protocol.
//!
//! Each merge level is one `UNWIND $rows ... MERGE` statement. Elements
//! created by a transaction are tagged with that transaction's token, which
//! is how created and matched elements are told apart in the counts.

use async_trait::async_trait;
use neo4rs::{
    query, BoltFloat, BoltInteger, BoltMap, BoltString, BoltType, ConfigBuilder, Graph, Query,
    Txn,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    EdgeMerge, EdgeSpec, GraphStore, GraphTxn, MergeCounts, NodeLabel, NodeMerge, PropValue,
    Properties, StoreError,
};

/// Connection pool handle; cheap to clone.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        max_connections: usize,
    ) -> Result<Self, StoreError> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(max_connections)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    /// Unique `key` per label, so concurrent MERGEs from different files
    /// serialize on the same node instead of racing to create two.
    pub async fn ensure_constraints(&self) -> Result<(), StoreError> {
        for label in NodeLabel::ALL {
            let name = format!("{}_key", label.as_str().to_lowercase());
            let statement = format!(
                "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:`{label}`) REQUIRE n.key IS UNIQUE"
            );
            self.graph.run(query(&statement)).await?;
        }
        info!("Key constraints ensured");
        Ok(())
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn begin(&self) -> Result<Box<dyn GraphTxn>, StoreError> {
        let txn = self.graph.start_txn().await?;
        Ok(Box::new(Neo4jTxn {
            txn,
            token: Uuid::new_v4().to_string(),
        }))
    }
}

struct Neo4jTxn {
    txn: Txn,
    token: String,
}

fn bolt_value(value: &PropValue) -> BoltType {
    match value {
        PropValue::Text(s) => BoltType::String(BoltString::from(s.as_str())),
        PropValue::Int(i) => BoltType::Integer(BoltInteger::new(*i)),
        PropValue::Float(f) => BoltType::Float(BoltFloat::new(*f)),
    }
}

fn bolt_map(entries: Vec<(&str, BoltType)>) -> BoltType {
    BoltType::Map(BoltMap::from_iter(
        entries
            .into_iter()
            .map(|(k, v)| (BoltString::from(k), v)),
    ))
}

fn bolt_props(props: &Properties) -> BoltType {
    bolt_map(props.iter().map(|(k, v)| (*k, bolt_value(v))).collect())
}

fn bolt_str(s: &str) -> BoltType {
    BoltType::String(BoltString::from(s))
}

impl Neo4jTxn {
    /// Run a statement that returns a single row and read integer columns.
    async fn fetch_counts(&mut self, q: Query) -> Result<(i64, i64), StoreError> {
        let mut stream = self.txn.execute(q).await?;
        let row = stream
            .next(self.txn.handle())
            .await?
            .ok_or_else(|| StoreError::Response("merge returned no rows".to_string()))?;
        let created: i64 = row
            .get("created")
            .map_err(|e| StoreError::Response(e.to_string()))?;
        let total: i64 = row
            .get("total")
            .map_err(|e| StoreError::Response(e.to_string()))?;
        Ok((created, total))
    }

    async fn first_missing_endpoint(
        &mut self,
        spec: EdgeSpec,
        rows: Vec<BoltType>,
    ) -> Result<Option<String>, StoreError> {
        let q = query(&format!(
            "UNWIND $rows AS row
             OPTIONAL MATCH (a:`{from}` {{key: row.from}})
             OPTIONAL MATCH (b:`{to}` {{key: row.to}})
             WITH row, a, b WHERE a IS NULL OR b IS NULL
             RETURN CASE WHEN a IS NULL THEN '{from}' + row.from ELSE '{to}' + row.to END AS missing
             LIMIT 1",
            from = spec.from,
            to = spec.to,
        ))
        .param("rows", rows);

        let mut stream = self.txn.execute(q).await?;
        match stream.next(self.txn.handle()).await? {
            Some(row) => Ok(Some(
                row.get::<String>("missing")
                    .map_err(|e| StoreError::Response(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl GraphTxn for Neo4jTxn {
    async fn merge_nodes(
        &mut self,
        label: NodeLabel,
        nodes: &[NodeMerge],
    ) -> Result<MergeCounts, StoreError> {
        if nodes.is_empty() {
            return Ok(MergeCounts::default());
        }

        let rows: Vec<BoltType> = nodes
            .iter()
            .map(|node| {
                bolt_map(vec![
                    ("key", bolt_str(node.key.as_str())),
                    ("props", bolt_props(&node.props)),
                    ("refresh", bolt_props(&node.refresh)),
                ])
            })
            .collect();

        let q = query(&format!(
            "UNWIND $rows AS row
             MERGE (n:`{label}` {{key: row.key}})
             ON CREATE SET n += row.props, n.ingest_txn = $txn
             SET n += row.refresh
             RETURN count(CASE WHEN n.ingest_txn = $txn THEN 1 END) AS created,
                    count(n) AS total"
        ))
        .param("rows", rows)
        .param("txn", self.token.as_str());

        let (created, total) = self.fetch_counts(q).await?;
        debug!(label = %label, created, total, "merged nodes");
        Ok(MergeCounts {
            created: created as u64,
            matched: (total - created) as u64,
        })
    }

    async fn merge_edges(
        &mut self,
        spec: EdgeSpec,
        edges: &[EdgeMerge],
    ) -> Result<MergeCounts, StoreError> {
        if edges.is_empty() {
            return Ok(MergeCounts::default());
        }

        let rows: Vec<BoltType> = edges
            .iter()
            .map(|edge| {
                bolt_map(vec![
                    ("from", bolt_str(edge.from.as_str())),
                    ("to", bolt_str(edge.to.as_str())),
                ])
            })
            .collect();

        if let Some(key) = self.first_missing_endpoint(spec, rows.clone()).await? {
            return Err(StoreError::MissingEndpoint { rel: spec.rel, key });
        }

        let q = query(&format!(
            "UNWIND $rows AS row
             MATCH (a:`{from}` {{key: row.from}})
             MATCH (b:`{to}` {{key: row.to}})
             MERGE (a)-[r:{rel}]->(b)
             ON CREATE SET r.ingest_txn = $txn
             RETURN count(CASE WHEN r.ingest_txn = $txn THEN 1 END) AS created,
                    count(r) AS total",
            from = spec.from,
            to = spec.to,
            rel = spec.rel,
        ))
        .param("rows", rows)
        .param("txn", self.token.as_str());

        let (created, total) = self.fetch_counts(q).await?;
        debug!(rel = %spec.rel, created, total, "merged edges");
        Ok(MergeCounts {
            created: created as u64,
            matched: (total - created) as u64,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.rollback().await?;
        Ok(())
    }
}
