//! Graph memory node and edge types.
//!
//! Node identity is the triple `(scope, kind, id)`. Attributes are a
//! declared string→scalar map, schema-validated at the Memory Bus
//! boundary; the system-managed attribute names can never be written by
//! handlers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribute names owned by the system. MEMORIZE refuses these.
pub const MANAGED_ATTRIBUTES: [&str; 3] = ["user_id", "agent_id", "thread_id"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphScope {
    /// Visible to this occurrence only.
    Local,
    /// Part of the agent's identity; shared across occurrences.
    Identity,
    /// Observations about the operating environment.
    Environment,
    /// Community/subject-facing knowledge.
    Community,
}

impl GraphScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Identity => "identity",
            Self::Environment => "environment",
            Self::Community => "community",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "identity" => Some(Self::Identity),
            "environment" => Some(Self::Environment),
            "community" => Some(Self::Community),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    User,
    Channel,
    Concept,
    Observation,
    Config,
    Metric,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Channel => "channel",
            Self::Concept => "concept",
            Self::Observation => "observation",
            Self::Config => "config",
            Self::Metric => "metric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "channel" => Some(Self::Channel),
            "concept" => Some(Self::Concept),
            "observation" => Some(Self::Observation),
            "config" => Some(Self::Config),
            "metric" => Some(Self::Metric),
            _ => None,
        }
    }
}

/// Node identity: `(scope, kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub scope: GraphScope,
    pub kind: NodeKind,
    pub id: String,
}

impl NodeKey {
    pub fn new(scope: GraphScope, kind: NodeKind, id: impl Into<String>) -> Self {
        Self {
            scope,
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.scope.as_str(), self.kind.as_str(), self.id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attributes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declared scalar values for node attributes. The deliberate absence of
/// nested maps keeps the attribute schema flat and checkable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ScalarValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

fn valid_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node / edge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: NodeKey,
    pub version: u32,
    pub attributes: BTreeMap<String, ScalarValue>,
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            version: 1,
            attributes: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: ScalarValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Schema validation applied at the Memory Bus boundary.
    ///
    /// `reject_managed` is set for handler-originated writes; system
    /// bookkeeping paths may write managed attributes.
    pub fn validate(&self, reject_managed: bool) -> crate::Result<()> {
        if self.key.id.is_empty() {
            return Err(crate::Error::Validation("node id must not be empty".into()));
        }
        for name in self.attributes.keys() {
            if !valid_attribute_name(name) {
                return Err(crate::Error::Validation(format!(
                    "invalid attribute name: {name:?}"
                )));
            }
            if reject_managed && MANAGED_ATTRIBUTES.contains(&name.as_str()) {
                return Err(crate::Error::ManagedAttribute(name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeKey,
    pub to: NodeKey,
    pub relationship: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A RECALL query. Either an exact key lookup or a scoped scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub scope: GraphScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    /// Exact node id; when absent the query scans the scope/kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default = "d_limit")]
    pub limit: u32,
}

fn d_limit() -> u32 {
    20
}

impl MemoryQuery {
    pub fn exact(key: &NodeKey) -> Self {
        Self {
            scope: key.scope,
            kind: Some(key.kind),
            node_id: Some(key.id.clone()),
            limit: 1,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
