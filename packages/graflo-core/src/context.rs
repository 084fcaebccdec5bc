//! Per-record scratch state for actor-tree traversal.
//!
//! The central abstraction is the [`LocationIndex`]: the path from the record
//! root to the sub-document an actor is looking at. Vertices emitted at
//! congruent locations are siblings of the same enclosing scope, which is
//! what makes cross-level edge joins possible.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::onto::{Doc, EdgeId};

/// One step of a location path: a mapping key or a list position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathSeg {
    Key(String),
    Item(usize),
}

/// Immutable path of segments from the record root to a sub-document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationIndex {
    path: Vec<PathSeg>,
}

impl LocationIndex {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(path: Vec<PathSeg>) -> Self {
        Self { path }
    }

    pub fn segments(&self) -> &[PathSeg] {
        &self.path
    }

    pub fn extend_key(&self, key: &str) -> Self {
        let mut path = self.path.clone();
        path.push(PathSeg::Key(key.to_string()));
        Self { path }
    }

    pub fn extend_item(&self, index: usize) -> Self {
        let mut path = self.path.clone();
        path.push(PathSeg::Item(index));
        Self { path }
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Number of equal leading segments shared with `other`.
    pub fn congruence_measure(&self, other: &LocationIndex) -> usize {
        self.path
            .iter()
            .zip(other.path.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// True when `self` is a (possibly equal) prefix of `other`.
    pub fn is_prefix_of(&self, other: &LocationIndex) -> bool {
        other.path.len() >= self.path.len() && other.path[..self.path.len()] == self.path[..]
    }

    /// True when `self` is a strictly shorter prefix of `other`.
    pub fn is_proper_prefix_of(&self, other: &LocationIndex) -> bool {
        other.path.len() > self.path.len() && self.is_prefix_of(other)
    }

    /// Deepest mapping-key segment, if any. This is what `relation_from_key`
    /// edges read their relation label from.
    pub fn last_key(&self) -> Option<&str> {
        self.path.iter().rev().find_map(|seg| match seg {
            PathSeg::Key(k) => Some(k.as_str()),
            PathSeg::Item(_) => None,
        })
    }

    /// True when some segment equals `Key(key)`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.path
            .iter()
            .any(|seg| matches!(seg, PathSeg::Key(k) if k == key))
    }
}

impl std::fmt::Display for LocationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, seg) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match seg {
                PathSeg::Key(k) => write!(f, "{k:?}")?,
                PathSeg::Item(i) => write!(f, "{i}")?,
            }
        }
        write!(f, ")")
    }
}

/// An emerging vertex document paired with the ambient sub-document that
/// produced it. The context is kept verbatim so cross-level edges can read
/// weight fields the vertex itself does not carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexRep {
    pub vertex: Doc,
    pub ctx: Doc,
}

/// One emitted edge: source document, target document, weight attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: Doc,
    pub target: Doc,
    pub weight: Doc,
}

/// Transform output staged at a location, waiting to be merged into vertex
/// reps emitted at the same location.
#[derive(Debug, Clone)]
pub struct StagedTransform {
    pub fields: Doc,
    pub to_vertex: Option<String>,
}

/// Per-record accumulation state threaded through one actor-tree traversal.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// vertex type -> location -> reps, both levels insertion-ordered.
    pub acc_vertex: IndexMap<String, IndexMap<LocationIndex, Vec<VertexRep>>>,
    /// edge id -> emitted edge records.
    pub acc_global: IndexMap<EdgeId, Vec<EdgeRecord>>,
    /// location -> transform outputs staged for later emissions there.
    pub buffer_transforms: IndexMap<LocationIndex, Vec<StagedTransform>>,
    /// Vertex types the pipeline explicitly routed to.
    pub target_vertices: BTreeSet<String>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rep(&mut self, vertex_type: &str, loc: &LocationIndex, rep: VertexRep) {
        self.acc_vertex
            .entry(vertex_type.to_string())
            .or_default()
            .entry(loc.clone())
            .or_default()
            .push(rep);
    }

    pub fn stage_transform(&mut self, loc: &LocationIndex, staged: StagedTransform) {
        self.buffer_transforms
            .entry(loc.clone())
            .or_default()
            .push(staged);
    }

    pub fn staged_at(&self, loc: &LocationIndex) -> &[StagedTransform] {
        self.buffer_transforms
            .get(loc)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add_edge(&mut self, edge_id: EdgeId, record: EdgeRecord) {
        self.acc_global.entry(edge_id).or_default().push(record);
    }

    /// All reps of one vertex type, in emission order.
    pub fn reps_of(&self, vertex_type: &str) -> Vec<(&LocationIndex, &VertexRep)> {
        let Some(by_loc) = self.acc_vertex.get(vertex_type) else {
            return Vec::new();
        };
        by_loc
            .iter()
            .flat_map(|(loc, reps)| reps.iter().map(move |rep| (loc, rep)))
            .collect()
    }

    /// Flatten into the per-record accumulator, de-duplicating identical
    /// vertex documents within the same (type, location).
    pub fn normalize(self) -> DocAccumulator {
        let mut acc = DocAccumulator::default();
        for (vertex_type, by_loc) in self.acc_vertex {
            let out = acc.vertices.entry(vertex_type).or_default();
            for (_loc, reps) in by_loc {
                let mut seen: Vec<Doc> = Vec::new();
                for rep in reps {
                    if seen.contains(&rep.vertex) {
                        continue;
                    }
                    seen.push(rep.vertex.clone());
                    out.push(rep.vertex);
                }
            }
        }
        acc.edges = self.acc_global;
        acc
    }
}

/// The normalized output of one record: per-type vertex lists and per-id edge
/// lists. Batches of these aggregate into a `GraphContainer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocAccumulator {
    pub vertices: IndexMap<String, Vec<Doc>>,
    pub edges: IndexMap<EdgeId, Vec<EdgeRecord>>,
}

impl DocAccumulator {
    pub fn is_empty(&self) -> bool {
        self.vertices.values().all(Vec::is_empty) && self.edges.values().all(Vec::is_empty)
    }
}

/// Restrict a JSON object to an allowed key set, preserving field order.
pub(crate) fn restrict_doc(doc: &Doc, allowed: &BTreeSet<String>) -> Doc {
    doc.iter()
        .filter(|(k, v)| allowed.contains(*k) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Non-null field lookup helper used for weight resolution.
pub(crate) fn non_null<'a>(doc: &'a Doc, field: &str) -> Option<&'a Value> {
    doc.get(field).filter(|v| !v.is_null())
}
