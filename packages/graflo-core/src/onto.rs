//! Core ontology: shared enums, index and weight definitions, edge identity.
//!
//! Everything here is database-agnostic. Store-specific behaviour is limited
//! to what an identity slot is called (`_key` vs `id`) and how indexes are
//! rendered, both of which key off [`DbFlavor`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record or vertex/edge document: a JSON object with preserved field order.
pub type Doc = serde_json::Map<String, Value>;

/// Target graph-store flavor. Drives identity-slot naming and index defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbFlavor {
    #[default]
    Arango,
    Neo4j,
    Tigergraph,
    Falkordb,
    Memgraph,
}

impl DbFlavor {
    /// Name of the identity slot blank vertices receive generated ids in.
    pub fn identity_slot(&self) -> &'static str {
        match self {
            DbFlavor::Arango => "_key",
            _ => "id",
        }
    }

    /// Whether edge documents carry explicit endpoint columns (`_from`/`_to`).
    pub fn has_edge_endpoint_fields(&self) -> bool {
        matches!(self, DbFlavor::Arango)
    }
}

/// Typed field tags, for stores that require explicit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Int,
    Uint,
    Float,
    Double,
    Bool,
    String,
    Datetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Persistent,
    Hash,
    Skiplist,
    Fulltext,
}

/// How an edge participates in ingestion.
///
/// DIRECT edges are generated while records are cast; INDIRECT edges are only
/// initialized in the store (e.g. filled by a later job); AUX edges are
/// initialized but never touched by ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    #[default]
    Direct,
    Indirect,
    Aux,
}

/// Character encoding tag carried by resources and file patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncodingType {
    #[serde(rename = "ISO-8859-1")]
    Iso8859,
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
}

/// Edge identity: (source vertex type, target vertex type, purpose).
///
/// The purpose slot disambiguates parallel edges between the same endpoints.
/// Edges emitted with `relation_from_key` deposit the derived relation label
/// here, so one configured edge can fan out into several keyed edge lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId {
    pub source: String,
    pub target: String,
    pub purpose: Option<String>,
}

impl EdgeId {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        purpose: Option<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            purpose,
        }
    }

    /// True when `other` names the same endpoint pair, ignoring purpose.
    pub fn same_endpoints(&self, other: &EdgeId) -> bool {
        self.source == other.source && self.target == other.target
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.purpose {
            Some(p) => write!(f, "{}->{}[{}]", self.source, self.target, p),
            None => write!(f, "{}->{}", self.source, self.target),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Index definition for a vertex or edge collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Index {
    /// For edge indexes, a vertex name expands into `vertex@field` composites.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_true")]
    pub unique: bool,
    #[serde(rename = "type", default)]
    pub kind: IndexKind,
    #[serde(default = "default_true")]
    pub deduplicate: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub exclude_edge_endpoints: bool,
}

impl Index {
    pub fn over(fields: Vec<String>) -> Self {
        Self {
            name: None,
            fields,
            unique: true,
            kind: IndexKind::Persistent,
            deduplicate: true,
            sparse: false,
            exclude_edge_endpoints: false,
        }
    }
}

/// Vertex-sourced edge weight: fields of another vertex type attached to an
/// edge at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Weight {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    /// Composite naming: `vertex@field` when set, bare `field` otherwise.
    #[serde(default = "default_true")]
    pub keep_vertex_name: bool,
    #[serde(default)]
    pub map: Doc,
    #[serde(default)]
    pub filter: Doc,
}

impl Weight {
    /// Composite field name under which a looked-up value lands on the edge.
    pub fn cfield(&self, field: &str) -> String {
        match (&self.name, self.keep_vertex_name) {
            (Some(name), true) => format!("{name}@{field}"),
            _ => field.to_string(),
        }
    }
}
