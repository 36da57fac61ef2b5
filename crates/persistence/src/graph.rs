//! Graph memory: node/edge upserts, recall queries, and forget.
//!
//! Node upserts are idempotent on identical payload — the version only
//! advances when the attributes actually change.

use sqlx::Row;

use ciris_domain::graph::{GraphEdge, GraphNode, GraphScope, MemoryQuery, NodeKey, NodeKind};
use ciris_domain::{Error, Result};

use crate::store::{fmt_ts, parse_ts};
use crate::Storage;

const NODE_COLUMNS: [&str; 6] = [
    "scope",
    "kind",
    "node_id",
    "version",
    "attributes",
    "updated_at",
];

fn node_from_row(row: &sqlx::any::AnyRow) -> Result<GraphNode> {
    let scope: String = row.try_get("scope").map_err(Error::sql)?;
    let kind: String = row.try_get("kind").map_err(Error::sql)?;
    let attributes: String = row.try_get("attributes").map_err(Error::sql)?;
    Ok(GraphNode {
        key: NodeKey {
            scope: GraphScope::parse(&scope)
                .ok_or_else(|| Error::sql(format!("unknown scope {scope:?}")))?,
            kind: NodeKind::parse(&kind)
                .ok_or_else(|| Error::sql(format!("unknown node kind {kind:?}")))?,
            id: row.try_get("node_id").map_err(Error::sql)?,
        },
        version: row.try_get::<i64, _>("version").map_err(Error::sql)? as u32,
        attributes: serde_json::from_str(&attributes)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(Error::sql)?)?,
    })
}

impl Storage {
    /// Insert or update a node.
    ///
    /// Identical attributes are a no-op (same version); changed
    /// attributes bump the version. Returns the stored node.
    pub async fn upsert_node(&self, node: &GraphNode) -> Result<GraphNode> {
        let existing = self.get_node(&node.key).await?;
        if let Some(current) = &existing {
            if current.attributes == node.attributes {
                return Ok(current.clone());
            }
        }
        let version = existing.map(|n| n.version + 1).unwrap_or(1);

        let sql = self.dialect().upsert(
            "graph_nodes",
            &NODE_COLUMNS,
            &["scope", "kind", "node_id"],
            &["version", "attributes", "updated_at"],
        );
        let stored = GraphNode {
            key: node.key.clone(),
            version,
            attributes: node.attributes.clone(),
            updated_at: chrono::Utc::now(),
        };
        sqlx::query(&sql)
            .bind(stored.key.scope.as_str())
            .bind(stored.key.kind.as_str())
            .bind(&stored.key.id)
            .bind(stored.version as i64)
            .bind(serde_json::to_string(&stored.attributes)?)
            .bind(fmt_ts(stored.updated_at))
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(stored)
    }

    pub async fn get_node(&self, key: &NodeKey) -> Result<Option<GraphNode>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT * FROM graph_nodes WHERE {}",
            d.where_eq(&["scope", "kind", "node_id"], 1)
        );
        let row = sqlx::query(&sql)
            .bind(key.scope.as_str())
            .bind(key.kind.as_str())
            .bind(&key.id)
            .fetch_optional(self.pool())
            .await
            .map_err(Error::sql)?;
        row.as_ref().map(node_from_row).transpose()
    }

    /// RECALL: exact lookup or scoped scan, most recently updated first.
    pub async fn query_nodes(&self, query: &MemoryQuery) -> Result<Vec<GraphNode>> {
        let d = self.dialect();
        let mut conditions = vec![format!("scope = {}", d.ph(1))];
        let mut next = 2;
        if query.kind.is_some() {
            conditions.push(format!("kind = {}", d.ph(next)));
            next += 1;
        }
        if query.node_id.is_some() {
            conditions.push(format!("node_id = {}", d.ph(next)));
            next += 1;
        }
        let sql = format!(
            "SELECT * FROM graph_nodes WHERE {} ORDER BY updated_at DESC LIMIT {}",
            conditions.join(" AND "),
            d.ph(next)
        );

        let mut q = sqlx::query(&sql).bind(query.scope.as_str());
        if let Some(kind) = query.kind {
            q = q.bind(kind.as_str());
        }
        if let Some(id) = &query.node_id {
            q = q.bind(id);
        }
        let rows = q
            .bind(query.limit as i64)
            .fetch_all(self.pool())
            .await
            .map_err(Error::sql)?;
        rows.iter().map(node_from_row).collect()
    }

    /// FORGET: delete the node and every edge touching it. Returns true
    /// if the node existed.
    pub async fn forget_node(&self, key: &NodeKey) -> Result<bool> {
        let d = self.dialect();
        let sql = format!(
            "DELETE FROM graph_edges WHERE ({}) OR ({})",
            d.where_eq(&["from_scope", "from_kind", "from_id"], 1),
            d.where_eq(&["to_scope", "to_kind", "to_id"], 4),
        );
        sqlx::query(&sql)
            .bind(key.scope.as_str())
            .bind(key.kind.as_str())
            .bind(&key.id)
            .bind(key.scope.as_str())
            .bind(key.kind.as_str())
            .bind(&key.id)
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;

        let sql = format!(
            "DELETE FROM graph_nodes WHERE {}",
            d.where_eq(&["scope", "kind", "node_id"], 1)
        );
        let result = sqlx::query(&sql)
            .bind(key.scope.as_str())
            .bind(key.kind.as_str())
            .bind(&key.id)
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()> {
        let columns = [
            "from_scope",
            "from_kind",
            "from_id",
            "to_scope",
            "to_kind",
            "to_id",
            "relationship",
            "weight",
        ];
        let sql = self.dialect().upsert(
            "graph_edges",
            &columns,
            &[
                "from_scope",
                "from_kind",
                "from_id",
                "to_scope",
                "to_kind",
                "to_id",
                "relationship",
            ],
            &["weight"],
        );
        sqlx::query(&sql)
            .bind(edge.from.scope.as_str())
            .bind(edge.from.kind.as_str())
            .bind(&edge.from.id)
            .bind(edge.to.scope.as_str())
            .bind(edge.to.kind.as_str())
            .bind(&edge.to.id)
            .bind(&edge.relationship)
            .bind(edge.weight)
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(())
    }

    pub async fn edges_from(&self, key: &NodeKey) -> Result<Vec<GraphEdge>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT * FROM graph_edges WHERE {}",
            d.where_eq(&["from_scope", "from_kind", "from_id"], 1)
        );
        let rows = sqlx::query(&sql)
            .bind(key.scope.as_str())
            .bind(key.kind.as_str())
            .bind(&key.id)
            .fetch_all(self.pool())
            .await
            .map_err(Error::sql)?;

        rows.iter()
            .map(|row| {
                let parse_key = |scope_col: &str, kind_col: &str, id_col: &str| -> Result<NodeKey> {
                    let scope: String = row.try_get(scope_col).map_err(Error::sql)?;
                    let kind: String = row.try_get(kind_col).map_err(Error::sql)?;
                    Ok(NodeKey {
                        scope: GraphScope::parse(&scope)
                            .ok_or_else(|| Error::sql(format!("unknown scope {scope:?}")))?,
                        kind: NodeKind::parse(&kind)
                            .ok_or_else(|| Error::sql(format!("unknown kind {kind:?}")))?,
                        id: row.try_get(id_col).map_err(Error::sql)?,
                    })
                };
                Ok(GraphEdge {
                    from: parse_key("from_scope", "from_kind", "from_id")?,
                    to: parse_key("to_scope", "to_kind", "to_id")?,
                    relationship: row.try_get("relationship").map_err(Error::sql)?,
                    weight: row.try_get("weight").map_err(Error::sql)?,
                })
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sqlite_storage;
    use ciris_domain::graph::ScalarValue;

    fn key(id: &str) -> NodeKey {
        NodeKey::new(GraphScope::Local, NodeKind::Concept, id)
    }

    fn node(id: &str, summary: &str) -> GraphNode {
        GraphNode::new(key(id)).with_attribute("summary", ScalarValue::String(summary.into()))
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let (_dir, storage) = sqlite_storage().await;
        let stored = storage.upsert_node(&node("n1", "first")).await.unwrap();
        assert_eq!(stored.version, 1);

        let got = storage.get_node(&key("n1")).await.unwrap().unwrap();
        assert_eq!(
            got.attributes.get("summary"),
            Some(&ScalarValue::String("first".into()))
        );
    }

    #[tokio::test]
    async fn upsert_identical_payload_is_idempotent() {
        let (_dir, storage) = sqlite_storage().await;
        storage.upsert_node(&node("n1", "same")).await.unwrap();
        let again = storage.upsert_node(&node("n1", "same")).await.unwrap();
        assert_eq!(again.version, 1);
    }

    #[tokio::test]
    async fn upsert_changed_payload_bumps_version() {
        let (_dir, storage) = sqlite_storage().await;
        storage.upsert_node(&node("n1", "v1")).await.unwrap();
        let updated = storage.upsert_node(&node("n1", "v2")).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(
            updated.attributes.get("summary"),
            Some(&ScalarValue::String("v2".into()))
        );
    }

    #[tokio::test]
    async fn query_by_scope_and_kind() {
        let (_dir, storage) = sqlite_storage().await;
        storage.upsert_node(&node("a", "x")).await.unwrap();
        storage.upsert_node(&node("b", "y")).await.unwrap();
        storage
            .upsert_node(&GraphNode::new(NodeKey::new(
                GraphScope::Identity,
                NodeKind::User,
                "u1",
            )))
            .await
            .unwrap();

        let hits = storage
            .query_nodes(&MemoryQuery {
                scope: GraphScope::Local,
                kind: Some(NodeKind::Concept),
                node_id: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn exact_query_returns_single_node() {
        let (_dir, storage) = sqlite_storage().await;
        storage.upsert_node(&node("a", "x")).await.unwrap();
        let hits = storage
            .query_nodes(&MemoryQuery::exact(&key("a")))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key.id, "a");
    }

    #[tokio::test]
    async fn forget_removes_node_and_edges() {
        let (_dir, storage) = sqlite_storage().await;
        storage.upsert_node(&node("a", "x")).await.unwrap();
        storage.upsert_node(&node("b", "y")).await.unwrap();
        storage
            .upsert_edge(&GraphEdge {
                from: key("a"),
                to: key("b"),
                relationship: "related".into(),
                weight: Some(0.5),
            })
            .await
            .unwrap();

        assert!(storage.forget_node(&key("a")).await.unwrap());
        assert!(storage.get_node(&key("a")).await.unwrap().is_none());
        assert!(storage.edges_from(&key("a")).await.unwrap().is_empty());
        // Second forget is a clean no-op.
        assert!(!storage.forget_node(&key("a")).await.unwrap());
    }

    #[tokio::test]
    async fn edge_upsert_updates_weight() {
        let (_dir, storage) = sqlite_storage().await;
        let edge = GraphEdge {
            from: key("a"),
            to: key("b"),
            relationship: "related".into(),
            weight: Some(0.1),
        };
        storage.upsert_edge(&edge).await.unwrap();
        storage
            .upsert_edge(&GraphEdge {
                weight: Some(0.9),
                ..edge.clone()
            })
            .await
            .unwrap();

        let edges = storage.edges_from(&key("a")).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, Some(0.9));
    }
}
