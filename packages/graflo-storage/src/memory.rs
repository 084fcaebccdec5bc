//! In-memory reference sink: the `GraphSink` contract over plain maps.
//!
//! Exists to exercise the writer end-to-end (interface-first, like a real
//! backend would be driven) and as the test double for orchestration.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Result, StorageError};
use crate::sink::GraphSink;
use graflo_core::{Doc, EdgeRecord, Schema};

/// One persisted edge: projected endpoint keys, relation and weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEdge {
    pub source_key: Doc,
    pub target_key: Doc,
    pub relation: Option<String>,
    pub weight: Doc,
}

#[derive(Debug, Default)]
struct SinkState {
    schema_defined: bool,
    collections: BTreeMap<String, Vec<Doc>>,
    edges: BTreeMap<String, Vec<StoredEdge>>,
}

#[derive(Debug, Default)]
pub struct InMemorySink {
    state: Mutex<SinkState>,
}

fn project(doc: &Doc, keys: &[String]) -> Doc {
    keys.iter()
        .filter_map(|k| doc.get(k).map(|v| (k.clone(), v.clone())))
        .collect()
}

fn matches_on(doc: &Doc, other: &Doc, keys: &[String]) -> bool {
    keys.iter().all(|k| {
        matches!((doc.get(k), other.get(k)), (Some(a), Some(b)) if !a.is_null() && a == b)
    })
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self, class_name: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(class_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn edge_count(&self, collection_name: &str) -> usize {
        self.state
            .lock()
            .edges
            .get(collection_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_edge_count(&self) -> usize {
        self.state.lock().edges.values().map(Vec::len).sum()
    }

    pub fn docs(&self, class_name: &str) -> Vec<Doc> {
        self.state
            .lock()
            .collections
            .get(class_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stored_edges(&self, collection_name: &str) -> Vec<StoredEdge> {
        self.state
            .lock()
            .edges
            .get(collection_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.collections.values().all(Vec::is_empty) && state.edges.values().all(Vec::is_empty)
    }
}

#[async_trait]
impl GraphSink for InMemorySink {
    async fn init_db(&self, _schema: &Schema, recreate_schema: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.schema_defined && !recreate_schema {
            return Err(StorageError::SchemaExists);
        }
        state.schema_defined = true;
        state.collections.clear();
        state.edges.clear();
        Ok(())
    }

    async fn clear_data(&self, _schema: &Schema) -> Result<()> {
        let mut state = self.state.lock();
        state.collections.clear();
        state.edges.clear();
        Ok(())
    }

    async fn upsert_docs_batch(
        &self,
        docs: Vec<Doc>,
        class_name: &str,
        match_keys: &[String],
        dry: bool,
    ) -> Result<()> {
        if dry {
            return Ok(());
        }
        let mut state = self.state.lock();
        let collection = state.collections.entry(class_name.to_string()).or_default();
        for doc in docs {
            match collection
                .iter_mut()
                .find(|existing| matches_on(existing, &doc, match_keys))
            {
                Some(existing) => existing.extend(doc),
                None => collection.push(doc),
            }
        }
        Ok(())
    }

    async fn insert_edges_batch(
        &self,
        edges: Vec<EdgeRecord>,
        source_class: &str,
        target_class: &str,
        relation: Option<&str>,
        match_keys_source: &[String],
        match_keys_target: &[String],
        collection_name: Option<&str>,
        dry: bool,
    ) -> Result<()> {
        if dry {
            return Ok(());
        }
        let collection = collection_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{source_class}_{target_class}"));
        let mut state = self.state.lock();
        let stored = state.edges.entry(collection).or_default();
        for record in edges {
            let source_key = project(&record.source, match_keys_source);
            let target_key = project(&record.target, match_keys_target);
            if source_key.len() != match_keys_source.len()
                || target_key.len() != match_keys_target.len()
            {
                return Err(StorageError::write(format!(
                    "edge endpoint missing match keys ({source_class} -> {target_class})"
                )));
            }
            let candidate = StoredEdge {
                source_key,
                target_key,
                relation: relation.map(str::to_string),
                weight: record.weight,
            };
            // idempotent on endpoint keys + relation + weight
            if !stored.contains(&candidate) {
                stored.push(candidate);
            }
        }
        Ok(())
    }

    async fn fetch_present_documents(
        &self,
        class_name: &str,
        batch: &[Doc],
        match_keys: &[String],
        keep_keys: &[String],
    ) -> Result<Vec<Vec<Doc>>> {
        let state = self.state.lock();
        let empty: Vec<Doc> = Vec::new();
        let collection = state.collections.get(class_name).unwrap_or(&empty);
        Ok(batch
            .iter()
            .map(|wanted| {
                collection
                    .iter()
                    .filter(|stored| matches_on(stored, wanted, match_keys))
                    .map(|stored| project(stored, keep_keys))
                    .collect()
            })
            .collect())
    }
}
