//! Batch-level aggregation of per-record accumulators.

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::context::{DocAccumulator, EdgeRecord};
use crate::onto::{Doc, EdgeId};

/// Aggregated output of one batch of records.
///
/// `linear` preserves the per-record accumulators because extra-weight
/// enrichment needs the original per-record grouping; the flattened
/// `vertices`/`edges` maps are what the writer pushes to the sink.
#[derive(Debug, Clone, Default)]
pub struct GraphContainer {
    pub vertices: IndexMap<String, Vec<Doc>>,
    pub edges: IndexMap<EdgeId, Vec<EdgeRecord>>,
    pub linear: Vec<DocAccumulator>,
}

impl GraphContainer {
    /// Aggregate per-record accumulators, preserving record order.
    pub fn from_docs_list(accumulators: Vec<DocAccumulator>) -> Self {
        let mut container = GraphContainer::default();
        for acc in &accumulators {
            for (vertex_type, docs) in &acc.vertices {
                container
                    .vertices
                    .entry(vertex_type.clone())
                    .or_default()
                    .extend(docs.iter().cloned());
            }
            for (edge_id, records) in &acc.edges {
                container
                    .edges
                    .entry(edge_id.clone())
                    .or_default()
                    .extend(records.iter().cloned());
            }
        }
        container.linear = accumulators;
        container
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.values().all(Vec::is_empty) && self.edges.values().all(Vec::is_empty)
    }

    /// Remove deep-equal duplicates within each vertex type and edge id,
    /// keeping first occurrences.
    pub fn pick_unique(&mut self) {
        for docs in self.vertices.values_mut() {
            let mut seen = HashSet::new();
            docs.retain(|doc| seen.insert(serde_json::to_string(doc).unwrap_or_default()));
        }
        for records in self.edges.values_mut() {
            let mut seen = HashSet::new();
            records.retain(|record| {
                let key = serde_json::to_string(&(&record.source, &record.target, &record.weight))
                    .unwrap_or_default();
                seen.insert(key)
            });
        }
    }

    /// Edge ids in this container with the same endpoints as `edge_id`,
    /// regardless of purpose. Relation-keyed emissions fan one configured
    /// edge out into several container entries.
    pub fn matching_edge_ids(&self, edge_id: &EdgeId) -> Vec<EdgeId> {
        self.edges
            .keys()
            .filter(|candidate| candidate.same_endpoints(edge_id))
            .cloned()
            .collect()
    }
}
